//! Constant buffer layouts shared with the shaders, and the staging path that refreshes them.

use crate::error::Error;
use crate::memory::{align_up, MemoryProperties};
use crate::render::buffer::GpuBuffer;
use crate::render::resource::ResourceFactory;

pub const MAX_BONES: usize = 256;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameConstants {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub light_direction: [f32; 4],
    pub light_color: [f32; 4],
}

impl FrameConstants {
    pub fn new(
        view: cgmath::Matrix4<f32>,
        projection: cgmath::Matrix4<f32>,
        light_direction: cgmath::Vector4<f32>,
        light_color: cgmath::Vector4<f32>,
    ) -> Self {
        Self {
            view: view.into(),
            projection: projection.into(),
            light_direction: light_direction.into(),
            light_color: light_color.into(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectConstants {
    pub model: [[f32; 4]; 4],
}

impl From<cgmath::Matrix4<f32>> for ObjectConstants {
    fn from(value: cgmath::Matrix4<f32>) -> Self {
        Self {
            model: value.into(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AnimationConstants {
    pub bone_matrices: [[[f32; 4]; 4]; MAX_BONES],
}

impl AnimationConstants {
    /// Unused slots past the last bone stay zeroed.
    pub fn from_matrices(bone_matrices: &[cgmath::Matrix4<f32>]) -> Result<Self, Error> {
        if bone_matrices.len() > MAX_BONES {
            return Err(Error::ContractViolation(format!(
                "{} bone matrices exceed the capacity of {MAX_BONES}",
                bone_matrices.len()
            )));
        }

        let mut constants: Self = bytemuck::Zeroable::zeroed();
        for (slot, matrix) in constants.bone_matrices.iter_mut().zip(bone_matrices) {
            *slot = (*matrix).into();
        }

        Ok(constants)
    }
}

/// Rewrites existing device-local constant buffers through one shared staging buffer.
///
/// The staging buffer starts out sized for the largest constant layout and is replaced by
/// a larger one when a bigger write comes along.
pub struct ConstantUpdater {
    staging_buffer: Option<GpuBuffer>,
}

impl ConstantUpdater {
    pub fn new(factory: &ResourceFactory) -> Result<Self, Error> {
        let mut updater = Self {
            staging_buffer: None,
        };
        updater.reserve(factory, std::mem::size_of::<AnimationConstants>() as u64)?;

        Ok(updater)
    }

    pub fn staging_capacity(&self) -> u64 {
        match &self.staging_buffer {
            Some(staging_buffer) => staging_buffer.size(),
            None => 0,
        }
    }

    pub fn update<T: bytemuck::Pod>(
        &mut self,
        factory: &ResourceFactory,
        value: &T,
        target: &GpuBuffer,
    ) -> Result<(), Error> {
        self.update_buffer(factory, bytemuck::bytes_of(value), target)
    }

    pub fn update_buffer(
        &mut self,
        factory: &ResourceFactory,
        data: &[u8],
        target: &GpuBuffer,
    ) -> Result<(), Error> {
        let size = data.len() as u64;
        if size > target.size() {
            return Err(Error::UploadOverflow {
                label: target.label().to_string(),
                size,
                capacity: target.size(),
            });
        }

        if size > self.staging_capacity() {
            self.reserve(factory, size)?;
        }

        let staging_buffer = match &self.staging_buffer {
            Some(staging_buffer) => staging_buffer,
            None => {
                return Err(Error::new(String::from(
                    "The constant staging buffer is missing",
                )))
            }
        };

        factory.write_mapped(staging_buffer, data)?;

        let copy_size = align_up(size.max(1), wgpu::COPY_BUFFER_ALIGNMENT).unwrap_or(u64::MAX);
        factory.copy_buffer(staging_buffer, target, copy_size)
    }

    fn reserve(&mut self, factory: &ResourceFactory, size: u64) -> Result<(), Error> {
        // release first so tail reclaim can hand the same range back
        self.staging_buffer = None;

        log::debug!("Sizing the constant staging buffer to {size} bytes");

        self.staging_buffer = Some(factory.create_buffer(
            "CONSTANT_STAGING_BUFFER",
            size,
            wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        )?);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cgmath::SquareMatrix;

    use super::*;
    use crate::render::resource::{headless_factory, HeapConfig};

    #[test]
    fn constant_layouts_match_shader_sizes() {
        assert_eq!(std::mem::size_of::<FrameConstants>(), 160);
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 64);
        assert_eq!(std::mem::size_of::<AnimationConstants>(), 16384);
    }

    #[test]
    fn frame_constants_keep_field_order() {
        let constants = FrameConstants::new(
            cgmath::Matrix4::identity(),
            cgmath::Matrix4::from_scale(2.0),
            cgmath::Vector4::new(0.0, -1.0, 0.0, 0.0),
            cgmath::Vector4::new(1.0, 1.0, 1.0, 0.25),
        );
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&constants));

        assert_eq!(floats[0], 1.0);
        assert_eq!(floats[16], 2.0);
        assert_eq!(&floats[32..36], &[0.0, -1.0, 0.0, 0.0]);
        assert_eq!(&floats[36..40], &[1.0, 1.0, 1.0, 0.25]);
    }

    #[test]
    fn bone_matrices_fill_leading_slots() {
        let matrices = vec![cgmath::Matrix4::from_scale(3.0); 2];
        let constants = AnimationConstants::from_matrices(&matrices).unwrap();

        assert_eq!(constants.bone_matrices[1][0][0], 3.0);
        assert_eq!(constants.bone_matrices[2], [[0.0; 4]; 4]);
    }

    #[test]
    fn too_many_bones_are_rejected() {
        let matrices = vec![cgmath::Matrix4::identity(); MAX_BONES + 1];
        assert!(matches!(
            AnimationConstants::from_matrices(&matrices),
            Err(Error::ContractViolation(_))
        ));
    }

    fn small_heaps() -> HeapConfig {
        HeapConfig {
            device_local: 1 << 20,
            upload: 1 << 20,
            readback: 1 << 20,
            image: 1 << 20,
        }
    }

    #[test]
    fn updated_constants_read_back_identically() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };
        let mut updater = ConstantUpdater::new(&factory).unwrap();

        let target = factory
            .create_buffer_from_data(
                "OBJECT_CONSTANTS",
                bytemuck::bytes_of(&ObjectConstants::from(cgmath::Matrix4::identity())),
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_SRC,
            )
            .unwrap();

        let moved = ObjectConstants::from(cgmath::Matrix4::from_translation(
            cgmath::Vector3::new(4.0, 0.0, 8.0),
        ));
        updater.update(&factory, &moved, &target).unwrap();

        let read_back = factory.read_buffer(&target).unwrap();
        assert_eq!(read_back.as_slice(), bytemuck::bytes_of(&moved));
    }

    #[test]
    fn writes_larger_than_the_target_overflow() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };
        let mut updater = ConstantUpdater::new(&factory).unwrap();

        let target = factory
            .create_buffer(
                "SMALL_TARGET",
                16,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                MemoryProperties::DEVICE_LOCAL,
            )
            .unwrap();

        match updater.update_buffer(&factory, &[0u8; 64], &target) {
            Err(Error::UploadOverflow { size, capacity, .. }) => {
                assert_eq!(size, 64);
                assert_eq!(capacity, 16);
            }
            other => panic!("expected UploadOverflow, got {other:?}"),
        }
    }

    #[test]
    fn staging_grows_for_larger_writes() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };
        let mut updater = ConstantUpdater::new(&factory).unwrap();
        assert_eq!(
            updater.staging_capacity(),
            std::mem::size_of::<AnimationConstants>() as u64
        );

        let data = vec![7u8; 20_000];
        let target = factory
            .create_buffer(
                "LARGE_TARGET",
                data.len() as u64,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                MemoryProperties::DEVICE_LOCAL,
            )
            .unwrap();

        updater.update_buffer(&factory, &data, &target).unwrap();
        assert_eq!(updater.staging_capacity(), 20_000);
        assert_eq!(factory.upload_heap().live_allocations(), 1);
    }
}
