use std::rc::Rc;

use crate::animation::{Animation, Skeleton};
use crate::data::transform::Transform;
use crate::error::Error;
use crate::render::buffer::GpuBuffer;
use crate::render::constants::{AnimationConstants, ConstantUpdater, ObjectConstants};
use crate::render::descriptor::DescriptorSet;
use crate::render::mesh::MeshGeometry;
use crate::render::pipeline::MeshKind;
use crate::render::resource::ResourceFactory;

/// Geometry shared between instances plus the descriptor set binding it for one drawable.
pub struct SubMesh {
    pub geometry: Rc<MeshGeometry>,
    pub descriptor_set: DescriptorSet,
}

pub trait Drawable {
    fn label(&self) -> &str;

    fn kind(&self) -> MeshKind;

    fn transform(&self) -> &Transform;

    fn transform_mut(&mut self) -> &mut Transform;

    fn sub_meshes(&self) -> &[SubMesh];

    fn build_model_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from(*self.transform())
    }

    fn descriptor_sets(&self) -> Vec<&DescriptorSet> {
        self.sub_meshes()
            .iter()
            .map(|sub_mesh| &sub_mesh.descriptor_set)
            .collect()
    }

    /// Records one indexed draw per sub-mesh. The pipeline must already be set.
    fn record_draw<'a>(
        &'a self,
        encoder: &mut wgpu::RenderBundleEncoder<'a>,
    ) -> Result<(), Error> {
        for sub_mesh in self.sub_meshes() {
            let bind_group = sub_mesh.descriptor_set.bind_group().ok_or_else(|| {
                Error::ContractViolation(format!(
                    "{} records a draw with an unwritten descriptor set",
                    self.label()
                ))
            })?;

            let geometry = &sub_mesh.geometry;
            encoder.set_bind_group(0, bind_group, &[]);
            encoder.set_vertex_buffer(0, geometry.vertex_buffer.slice());
            encoder.set_index_buffer(geometry.index_buffer.slice(), geometry.index_format());
            encoder.draw_indexed(0..geometry.index_count, 0, 0..1);
        }

        Ok(())
    }

    fn update(&mut self, _elapsed_millis: u32) -> Result<(), Error> {
        Ok(())
    }

    fn upload_constants(
        &self,
        factory: &ResourceFactory,
        updater: &mut ConstantUpdater,
    ) -> Result<(), Error>;
}

pub struct StaticMesh {
    label: String,
    transform: Transform,
    object_buffer: GpuBuffer,
    sub_meshes: Vec<SubMesh>,
}

impl StaticMesh {
    pub fn new(
        label: &str,
        transform: Transform,
        object_buffer: GpuBuffer,
        sub_meshes: Vec<SubMesh>,
    ) -> Self {
        Self {
            label: label.to_string(),
            transform,
            object_buffer,
            sub_meshes,
        }
    }
}

impl Drawable for StaticMesh {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> MeshKind {
        MeshKind::Static
    }

    fn transform(&self) -> &Transform {
        &self.transform
    }

    fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    fn upload_constants(
        &self,
        factory: &ResourceFactory,
        updater: &mut ConstantUpdater,
    ) -> Result<(), Error> {
        updater.update(
            factory,
            &ObjectConstants::from(self.build_model_matrix()),
            &self.object_buffer,
        )
    }
}

/// A skinned mesh driven by an animation whose bone count matches its skeleton.
pub struct AnimatedMesh {
    label: String,
    transform: Transform,
    object_buffer: GpuBuffer,
    animation_buffer: GpuBuffer,
    skeleton: Rc<Skeleton>,
    animation: Box<dyn Animation>,
    sub_meshes: Vec<SubMesh>,
}

impl AnimatedMesh {
    pub fn new(
        label: &str,
        transform: Transform,
        object_buffer: GpuBuffer,
        animation_buffer: GpuBuffer,
        skeleton: Rc<Skeleton>,
        animation: Box<dyn Animation>,
        sub_meshes: Vec<SubMesh>,
    ) -> Result<Self, Error> {
        check_bone_count(label, &skeleton, animation.as_ref())?;

        Ok(Self {
            label: label.to_string(),
            transform,
            object_buffer,
            animation_buffer,
            skeleton,
            animation,
            sub_meshes,
        })
    }

    pub fn set_animation(&mut self, animation: Box<dyn Animation>) -> Result<(), Error> {
        check_bone_count(&self.label, &self.skeleton, animation.as_ref())?;
        self.animation = animation;

        Ok(())
    }

    pub fn animation(&self) -> &dyn Animation {
        self.animation.as_ref()
    }

    pub fn bone_matrices(&self) -> Result<Vec<cgmath::Matrix4<f32>>, Error> {
        self.skeleton.bone_matrices(self.animation.skeleton())
    }
}

fn check_bone_count(
    label: &str,
    skeleton: &Skeleton,
    animation: &dyn Animation,
) -> Result<(), Error> {
    if animation.bone_count() != skeleton.bone_count() {
        return Err(Error::ContractViolation(format!(
            "{label} has {} bones but its animation drives {}",
            skeleton.bone_count(),
            animation.bone_count()
        )));
    }

    Ok(())
}

impl Drawable for AnimatedMesh {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> MeshKind {
        MeshKind::Skinned
    }

    fn transform(&self) -> &Transform {
        &self.transform
    }

    fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    fn update(&mut self, elapsed_millis: u32) -> Result<(), Error> {
        self.animation.update(elapsed_millis);
        Ok(())
    }

    fn upload_constants(
        &self,
        factory: &ResourceFactory,
        updater: &mut ConstantUpdater,
    ) -> Result<(), Error> {
        updater.update(
            factory,
            &ObjectConstants::from(self.build_model_matrix()),
            &self.object_buffer,
        )?;

        let bone_matrices = self.bone_matrices()?;
        updater.update(
            factory,
            &AnimationConstants::from_matrices(&bone_matrices)?,
            &self.animation_buffer,
        )
    }
}
