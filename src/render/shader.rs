use anyhow::Result;

use crate::render::constants::MAX_BONES;
use crate::render::descriptor::{
    ANIMATION_BINDING, FRAME_BINDING, OBJECT_BINDING, TEXTURE_BINDING,
};
use crate::render::pipeline::RenderPipelineConfiguration;

pub struct ShaderModulePackage {
    pub vertex_shader_module: wgpu::ShaderModule,
    pub fragment_shader_module: wgpu::ShaderModule,
}

impl ShaderModulePackage {
    pub fn from_templates(
        vertex_template_name: &str,
        fragment_template_name: &str,
        name: &str,
        device: &wgpu::Device,
        tera: &tera::Tera,
        shader_template_config: &ShaderTemplateConfiguration,
    ) -> Result<Self> {
        let shader_template_context = tera::Context::from_serialize(shader_template_config)?;

        let vertex_shader_source = ShaderModulePackage::render_shader(
            vertex_template_name,
            tera,
            &shader_template_context,
        )?;

        let fragment_shader_source = ShaderModulePackage::render_shader(
            fragment_template_name,
            tera,
            &shader_template_context,
        )?;

        log::debug!(
            "Creating shader module package {name} from config: {:?}",
            shader_template_config
        );

        Ok(ShaderModulePackage {
            vertex_shader_module: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{}_VERTEX_SHADER_MODULE", name)),
                source: wgpu::ShaderSource::Wgsl(vertex_shader_source.into()),
            }),
            fragment_shader_module: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{}_FRAGMENT_SHADER_MODULE", name)),
                source: wgpu::ShaderSource::Wgsl(fragment_shader_source.into()),
            }),
        })
    }

    pub fn from_render_pipeline_config(
        config: &RenderPipelineConfiguration,
        name: &str,
        device: &wgpu::Device,
        tera: &tera::Tera,
    ) -> Result<Self> {
        let (vertex_template_name, fragment_template_name) = config.template_names();

        ShaderModulePackage::from_templates(
            vertex_template_name,
            fragment_template_name,
            name,
            device,
            tera,
            &ShaderTemplateConfiguration::default(),
        )
    }

    fn render_shader(
        template_name: &str,
        tera: &tera::Tera,
        template_context: &tera::Context,
    ) -> Result<String> {
        match tera.render(template_name, template_context) {
            Ok(shader_source) => Ok(shader_source),
            Err(error) => Err(error.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize)]
pub struct ShaderTemplateConfiguration {
    pub max_bones: usize,
    pub frame_binding: u32,
    pub object_binding: u32,
    pub texture_binding: u32,
    pub sampler_binding: u32,
    pub animation_binding: u32,
}

impl Default for ShaderTemplateConfiguration {
    fn default() -> Self {
        Self {
            max_bones: MAX_BONES,
            frame_binding: FRAME_BINDING,
            object_binding: OBJECT_BINDING,
            texture_binding: TEXTURE_BINDING,
            sampler_binding: TEXTURE_BINDING + 1,
            animation_binding: ANIMATION_BINDING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> tera::Tera {
        tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/**/*")).unwrap()
    }

    #[test]
    fn skinned_template_sizes_the_bone_array() {
        let context =
            tera::Context::from_serialize(ShaderTemplateConfiguration::default()).unwrap();
        let source = templates().render("skinned.vert.wgsl", &context).unwrap();

        assert!(source.contains("array<mat4x4<f32>, 256>"));
        assert!(source.contains("@binding(4)"));
    }

    #[test]
    fn fragment_template_places_the_sampler_after_the_texture() {
        let context =
            tera::Context::from_serialize(ShaderTemplateConfiguration::default()).unwrap();
        let source = templates().render("mesh.frag.wgsl", &context).unwrap();

        assert!(source.contains("@group(0) @binding(2) var diffuse_texture"));
        assert!(source.contains("@group(0) @binding(3) var diffuse_sampler"));
    }
}
