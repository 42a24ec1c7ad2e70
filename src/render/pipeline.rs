use crate::render::mesh::{SkinnedVertex, StaticVertex};
use crate::render::resource::DEPTH_FORMAT;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MeshKind {
    Static,
    Skinned,
}

pub struct RenderPipeline {
    pub config: RenderPipelineConfiguration,
    pub gpu_pipeline: wgpu::RenderPipeline,
}

impl RenderPipeline {
    pub fn from_config(
        config: RenderPipelineConfiguration,
        name: &str,
        device: &wgpu::Device,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        vertex_shader_module: &wgpu::ShaderModule,
        fragment_shader_module: &wgpu::ShaderModule,
    ) -> Self {
        log::debug!("Creating render pipeline {name} from config: {:?}", config);

        let render_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{name}_RENDER_PIPELINE_LAYOUT")),
                bind_group_layouts,
                push_constant_ranges: &[],
            });

        let gpu_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{name}_RENDER_PIPELINE")),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: vertex_shader_module,
                entry_point: "vs_main",
                buffers: &[config.vertex_buffer_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: fragment_shader_module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.color_format,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent::REPLACE,
                        alpha: wgpu::BlendComponent::REPLACE,
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        Self {
            config,
            gpu_pipeline,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RenderPipelineConfiguration {
    pub kind: MeshKind,
    pub color_format: wgpu::TextureFormat,
}

impl RenderPipelineConfiguration {
    pub fn vertex_buffer_layout(&self) -> wgpu::VertexBufferLayout<'static> {
        match self.kind {
            MeshKind::Static => StaticVertex::buffer_layout(),
            MeshKind::Skinned => SkinnedVertex::buffer_layout(),
        }
    }

    pub fn template_names(&self) -> (&'static str, &'static str) {
        match self.kind {
            MeshKind::Static => ("static.vert.wgsl", "mesh.frag.wgsl"),
            MeshKind::Skinned => ("skinned.vert.wgsl", "mesh.frag.wgsl"),
        }
    }
}
