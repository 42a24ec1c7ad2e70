//! Creation of buffers and images on top of the device memory heaps.
//!
//! Every transfer is submitted on the single queue and waited for before the call returns.
//! Staging buffers therefore never outlive the call that created them, and a constant buffer
//! is always fully written before any later draw that reads it is submitted.

use std::rc::Rc;

use crate::error::Error;
use crate::memory::{
    align_up, MemoryHeap, MemoryProperties, MemoryRequirements, MemoryTypeTable,
};
use crate::render::buffer::GpuBuffer;
use crate::render::image::{GpuImage, Image, ImageLayout, ImageTiling};
use crate::render::sampler::Sampler;
use crate::render::texture::{DepthTexture2DPackage, Texture2DPackage};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

const MIB: u64 = 1024 * 1024;

/// Heap capacities in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    pub device_local: u64,
    pub upload: u64,
    pub readback: u64,
    pub image: u64,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            device_local: 64 * MIB,
            upload: 32 * MIB,
            readback: 4 * MIB,
            image: 128 * MIB,
        }
    }
}

pub struct ResourceFactory {
    device: Rc<wgpu::Device>,
    queue: Rc<wgpu::Queue>,
    limits: wgpu::Limits,
    memory_types: MemoryTypeTable,
    device_local_heap: MemoryHeap,
    upload_heap: MemoryHeap,
    readback_heap: MemoryHeap,
    image_heap: MemoryHeap,
}

impl ResourceFactory {
    pub fn new(
        device: Rc<wgpu::Device>,
        queue: Rc<wgpu::Queue>,
        heap_config: &HeapConfig,
    ) -> Result<Self, Error> {
        let memory_types = MemoryTypeTable::standard();

        let device_local_heap = MemoryHeap::create(
            &device,
            &memory_types,
            "DEVICE_LOCAL_HEAP",
            heap_config.device_local,
            MemoryProperties::DEVICE_LOCAL,
        )?;

        let upload_heap = MemoryHeap::create(
            &device,
            &memory_types,
            "UPLOAD_HEAP",
            heap_config.upload,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        )?;

        let readback_heap = MemoryHeap::create(
            &device,
            &memory_types,
            "READBACK_HEAP",
            heap_config.readback,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_CACHED,
        )?;

        let image_heap = MemoryHeap::budget(
            &memory_types,
            "IMAGE_HEAP",
            heap_config.image,
            MemoryProperties::DEVICE_LOCAL,
        )?;

        Ok(Self {
            limits: device.limits(),
            device,
            queue,
            memory_types,
            device_local_heap,
            upload_heap,
            readback_heap,
            image_heap,
        })
    }

    pub fn device(&self) -> &Rc<wgpu::Device> {
        &self.device
    }

    pub fn device_local_heap(&self) -> &MemoryHeap {
        &self.device_local_heap
    }

    #[cfg(test)]
    pub fn upload_heap(&self) -> &MemoryHeap {
        &self.upload_heap
    }

    pub fn image_heap(&self) -> &MemoryHeap {
        &self.image_heap
    }

    pub fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
        properties: MemoryProperties,
    ) -> Result<GpuBuffer, Error> {
        self.allocate_buffer(label, size, usage, properties)
            .map_err(|error| Error::resource_creation(label, error))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_image(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        tiling: ImageTiling,
        usage: wgpu::TextureUsages,
        properties: MemoryProperties,
    ) -> Result<GpuImage, Error> {
        self.allocate_pooled_image(label, width, height, format, tiling, usage, properties)
            .map_err(|error| Error::resource_creation(label, error))
    }

    /// Uploads `data` into a new device-local buffer through a temporary staging buffer.
    pub fn create_buffer_from_data(
        &self,
        label: &str,
        data: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<GpuBuffer, Error> {
        let upload = || -> Result<GpuBuffer, Error> {
            let staging_buffer = self.allocate_buffer(
                &format!("{label}_STAGING"),
                data.len() as u64,
                wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            )?;
            self.write_mapped(&staging_buffer, data)?;

            let buffer = self.allocate_buffer(
                label,
                data.len() as u64,
                usage | wgpu::BufferUsages::COPY_DST,
                MemoryProperties::DEVICE_LOCAL,
            )?;
            self.copy_buffer(&staging_buffer, &buffer, copy_size(data.len())?)?;

            Ok(buffer)
        };

        upload().map_err(|error| Error::resource_creation(label, error))
    }

    /// Uploads tightly packed RGBA8 pixels into a sampled image.
    pub fn create_image_from_data(
        &self,
        label: &str,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<GpuImage, Error> {
        let upload = || -> Result<GpuImage, Error> {
            let row_size = width as usize * 4;
            if rgba.len() != row_size * height as usize {
                return Err(Error::ContractViolation(format!(
                    "{} bytes of pixel data do not describe a {width}x{height} RGBA image",
                    rgba.len()
                )));
            }

            let padded_row_size =
                align_up(row_size as u64, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64).ok_or_else(
                    || Error::ContractViolation(format!("Image width {width} is too large")),
                )? as usize;

            let mut padded = vec![0u8; padded_row_size * height as usize];
            for (source_row, target_row) in rgba
                .chunks_exact(row_size.max(1))
                .zip(padded.chunks_exact_mut(padded_row_size.max(1)))
            {
                target_row[..row_size].copy_from_slice(source_row);
            }

            let staging_buffer = self.allocate_buffer(
                &format!("{label}_STAGING"),
                padded.len() as u64,
                wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            )?;
            self.write_mapped(&staging_buffer, &padded)?;

            let mut image = self.allocate_pooled_image(
                label,
                width,
                height,
                TEXTURE_FORMAT,
                ImageTiling::Optimal,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                MemoryProperties::DEVICE_LOCAL,
            )?;
            image.transition(ImageLayout::Undefined, ImageLayout::TransferDst)?;

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("IMAGE_UPLOAD_COMMAND_ENCODER"),
                });
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: staging_buffer.gpu_buffer(),
                    layout: wgpu::ImageDataLayout {
                        offset: staging_buffer.offset(),
                        bytes_per_row: Some(padded_row_size as u32),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture: image.texture(),
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                image.extent(),
            );
            self.submit_and_wait(encoder);

            image.transition(ImageLayout::TransferDst, ImageLayout::ShaderReadOnly)?;

            Ok(image)
        };

        upload().map_err(|error| Error::resource_creation(label, error))
    }

    pub fn create_texture(
        &self,
        label: &str,
        image: &Image,
        sampler: Rc<Sampler>,
    ) -> Result<Texture2DPackage, Error> {
        let (width, height) = image.dimensions();
        let image = self.create_image_from_data(label, image.data().as_raw(), width, height)?;
        let gpu_texture_view = image.create_view();

        Ok(Texture2DPackage {
            image,
            gpu_texture_view,
            sampler,
        })
    }

    /// Creates the depth attachment in a heap of its own, sized exactly to the image, so
    /// it can be rebuilt on resize without touching the shared image heap.
    pub fn create_depth_image(
        &self,
        width: u32,
        height: u32,
    ) -> Result<DepthTexture2DPackage, Error> {
        let label = "DEPTH_IMAGE";

        let create = || -> Result<DepthTexture2DPackage, Error> {
            let requirements = MemoryRequirements::for_image(
                width.max(1),
                height.max(1),
                DEPTH_FORMAT,
                &self.memory_types,
            )?;
            let heap = MemoryHeap::budget(
                &self.memory_types,
                "DEPTH_IMAGE_HEAP",
                requirements.size,
                MemoryProperties::DEVICE_LOCAL,
            )?;

            let mut image = self.allocate_image(
                &heap,
                label,
                width.max(1),
                height.max(1),
                DEPTH_FORMAT,
                ImageTiling::Optimal,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )?;
            image.transition(ImageLayout::Undefined, ImageLayout::DepthStencilAttachment)?;
            let gpu_texture_view = image.create_view();

            Ok(DepthTexture2DPackage {
                image,
                gpu_texture_view,
            })
        };

        create().map_err(|error| Error::resource_creation(label, error))
    }

    pub fn create_sampler(&self, label: &str) -> Rc<Sampler> {
        log::debug!("Creating sampler {label}");
        Rc::new(Sampler::linear_repeat(&self.device, label))
    }

    /// Copies a device-local buffer into readback memory and returns its contents.
    pub fn read_buffer(&self, buffer: &GpuBuffer) -> Result<Vec<u8>, Error> {
        if !buffer.usage().contains(wgpu::BufferUsages::COPY_SRC) {
            return Err(Error::ContractViolation(format!(
                "Buffer {} was not created as a copy source",
                buffer.label()
            )));
        }

        let readback_buffer = self.allocate_buffer(
            &format!("{}_READBACK", buffer.label()),
            buffer.size(),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_CACHED,
        )?;
        self.copy_buffer(buffer, &readback_buffer, buffer.size())?;

        let slice = readback_buffer.slice();
        self.map(&readback_buffer, &slice, wgpu::MapMode::Read)?;
        let data = slice.get_mapped_range().to_vec();
        readback_buffer.gpu_buffer().unmap();

        Ok(data)
    }

    /// Writes `data` into a host-visible buffer, zero-filling the rest of its range.
    pub fn write_mapped(&self, buffer: &GpuBuffer, data: &[u8]) -> Result<(), Error> {
        if data.len() as u64 > buffer.size() {
            return Err(Error::UploadOverflow {
                label: buffer.label().to_string(),
                size: data.len() as u64,
                capacity: buffer.size(),
            });
        }

        let slice = buffer.slice();
        self.map(buffer, &slice, wgpu::MapMode::Write)?;
        {
            let mut mapped_range = slice.get_mapped_range_mut();
            mapped_range[..data.len()].copy_from_slice(data);
            mapped_range[data.len()..].fill(0);
        }
        buffer.gpu_buffer().unmap();

        Ok(())
    }

    pub fn copy_buffer(
        &self,
        source: &GpuBuffer,
        destination: &GpuBuffer,
        size: u64,
    ) -> Result<(), Error> {
        if size > source.size() || size > destination.size() {
            return Err(Error::UploadOverflow {
                label: destination.label().to_string(),
                size,
                capacity: source.size().min(destination.size()),
            });
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("TRANSFER_COMMAND_ENCODER"),
            });
        encoder.copy_buffer_to_buffer(
            source.gpu_buffer(),
            source.offset(),
            destination.gpu_buffer(),
            destination.offset(),
            size,
        );
        self.submit_and_wait(encoder);

        Ok(())
    }

    pub fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
        self.wait_idle();
    }

    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn buffer_heap(&self, properties: MemoryProperties) -> Result<&MemoryHeap, Error> {
        let memory_type = self.memory_types.find(properties)?;

        [&self.device_local_heap, &self.upload_heap, &self.readback_heap]
            .into_iter()
            .find(|heap| heap.memory_type().index == memory_type.index)
            .ok_or(Error::OutOfMemoryType(properties))
    }

    fn allocate_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
        properties: MemoryProperties,
    ) -> Result<GpuBuffer, Error> {
        let requirements =
            MemoryRequirements::for_buffer(size, usage, &self.memory_types, &self.limits)?;
        let allocation = self.buffer_heap(properties)?.alloc(&requirements)?;

        GpuBuffer::bind(label, usage, allocation)
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate_pooled_image(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        tiling: ImageTiling,
        usage: wgpu::TextureUsages,
        properties: MemoryProperties,
    ) -> Result<GpuImage, Error> {
        let memory_type = self.memory_types.find(properties)?;
        if memory_type.index != self.image_heap.memory_type().index {
            return Err(Error::TypeMismatch {
                heap: self.image_heap.label().to_string(),
                memory_type: self.image_heap.memory_type().index,
                type_bits: memory_type.type_bit(),
            });
        }

        self.allocate_image(&self.image_heap, label, width, height, format, tiling, usage)
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate_image(
        &self,
        heap: &MemoryHeap,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        tiling: ImageTiling,
        usage: wgpu::TextureUsages,
    ) -> Result<GpuImage, Error> {
        let max_dimension = self.limits.max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
            return Err(Error::AllocationFailed {
                size: width as u64 * height as u64,
                reason: format!(
                    "image dimensions {width}x{height} are outside 1..={max_dimension}"
                ),
            });
        }

        let requirements =
            MemoryRequirements::for_image(width, height, format, &self.memory_types)?;
        let allocation = heap.alloc(&requirements)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::AllocationFailed {
                size: requirements.size,
                reason: error.to_string(),
            });
        }

        log::debug!(
            "Created image {label} ({width}x{height} {format:?}) in heap {} at offset {}",
            heap.label(),
            allocation.offset()
        );

        Ok(GpuImage::new(label, texture, tiling, allocation))
    }

    fn map(
        &self,
        buffer: &GpuBuffer,
        slice: &wgpu::BufferSlice<'_>,
        mode: wgpu::MapMode,
    ) -> Result<(), Error> {
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(mode, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        match receiver.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(Error::new(format!(
                "Failed to map buffer {}: {error}",
                buffer.label()
            ))),
            Err(_) => Err(Error::new(format!(
                "Mapping of buffer {} never completed",
                buffer.label()
            ))),
        }
    }
}

fn copy_size(length: usize) -> Result<u64, Error> {
    align_up(length.max(1) as u64, wgpu::COPY_BUFFER_ALIGNMENT)
        .ok_or_else(|| Error::ContractViolation(format!("{length} bytes cannot be copied")))
}

/// A factory on a software adapter when one exists, otherwise on any adapter. Prints why
/// when neither is available so skipped GPU tests show up in the test output.
#[cfg(test)]
pub(crate) fn headless_factory(heap_config: &HeapConfig) -> Option<ResourceFactory> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let request = |force_fallback_adapter| {
        pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            force_fallback_adapter,
            ..Default::default()
        }))
    };

    let Some(adapter) = request(true).or_else(|| request(false)) else {
        eprintln!("skipping GPU test: no wgpu adapter is available");
        return None;
    };

    let (device, queue) = match pollster::block_on(
        adapter.request_device(&wgpu::DeviceDescriptor::default(), None),
    ) {
        Ok(device_and_queue) => device_and_queue,
        Err(error) => {
            eprintln!("skipping GPU test: {:?} refused a device: {error}", adapter.get_info());
            return None;
        }
    };

    match ResourceFactory::new(Rc::new(device), Rc::new(queue), heap_config) {
        Ok(factory) => Some(factory),
        Err(error) => {
            eprintln!("skipping GPU test: heaps could not be created: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heaps() -> HeapConfig {
        HeapConfig {
            device_local: MIB,
            upload: MIB,
            readback: MIB,
            image: MIB,
        }
    }

    fn pattern(length: usize) -> Vec<u8> {
        (0..length).map(|index| (index * 7 % 251) as u8).collect()
    }

    #[test]
    fn copy_size_pads_to_copy_alignment() {
        assert_eq!(copy_size(1).unwrap(), 4);
        assert_eq!(copy_size(0).unwrap(), 4);
        assert_eq!(copy_size(16).unwrap(), 16);
        assert_eq!(copy_size(18).unwrap(), 20);
    }

    #[test]
    fn uploaded_bytes_read_back_identically() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let data = pattern(1000);
        let buffer = factory
            .create_buffer_from_data(
                "ROUND_TRIP_BUFFER",
                &data,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_SRC,
            )
            .unwrap();

        let read_back = factory.read_buffer(&buffer).unwrap();
        assert_eq!(&read_back[..data.len()], data.as_slice());

        assert_eq!(factory.upload_heap().current_offset(), 0);
        assert_eq!(factory.upload_heap().live_allocations(), 0);
    }

    #[test]
    fn unaligned_upload_reads_back_identically() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let data = pattern(6);
        let buffer = factory
            .create_buffer_from_data(
                "INDEX_BUFFER",
                &data,
                wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_SRC,
            )
            .unwrap();

        assert_eq!(buffer.size(), 8);
        let read_back = factory.read_buffer(&buffer).unwrap();
        assert_eq!(&read_back[..6], data.as_slice());
        assert_eq!(&read_back[6..], &[0, 0]);
    }

    #[test]
    fn oversized_buffer_is_reported_as_creation_failure() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let error = factory
            .create_buffer(
                "HUGE_BUFFER",
                2 * MIB,
                wgpu::BufferUsages::VERTEX,
                MemoryProperties::DEVICE_LOCAL,
            )
            .unwrap_err();

        match &error {
            Error::ResourceCreationFailed { label, .. } => assert_eq!(label, "HUGE_BUFFER"),
            other => panic!("expected ResourceCreationFailed, got {other:?}"),
        }
        assert!(matches!(error.root_cause(), Error::HeapExhausted { .. }));
        assert_eq!(factory.device_local_heap().current_offset(), 0);
    }

    #[test]
    fn vertex_buffers_cannot_live_in_upload_memory() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let error = factory
            .create_buffer(
                "MISPLACED_BUFFER",
                64,
                wgpu::BufferUsages::VERTEX,
                MemoryProperties::HOST_VISIBLE,
            )
            .unwrap_err();
        assert!(matches!(error.root_cause(), Error::TypeMismatch { .. }));
    }

    #[test]
    fn uploaded_image_is_shader_readable() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let pixels = pattern(3 * 2 * 4);
        let image = factory
            .create_image_from_data("TEST_TEXTURE", &pixels, 3, 2)
            .unwrap();

        assert_eq!(image.layout(), ImageLayout::ShaderReadOnly);
        assert_eq!(image.extent().width, 3);
        assert_eq!(factory.upload_heap().live_allocations(), 0);
        assert_eq!(factory.image_heap().live_allocations(), 1);

        drop(image);
        assert_eq!(factory.image_heap().current_offset(), 0);
    }

    #[test]
    fn host_visible_images_are_refused() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let result = factory.create_image(
            "LINEAR_IMAGE",
            4,
            4,
            TEXTURE_FORMAT,
            ImageTiling::Linear,
            wgpu::TextureUsages::TEXTURE_BINDING,
            MemoryProperties::HOST_VISIBLE,
        );
        assert!(matches!(
            result.map(|_| ()).unwrap_err().root_cause(),
            Error::TypeMismatch { .. }
        ));
    }

    #[test]
    fn depth_image_starts_as_attachment() {
        let Some(factory) = headless_factory(&small_heaps()) else {
            return;
        };

        let depth = factory.create_depth_image(64, 32).unwrap();
        assert_eq!(depth.image.layout(), ImageLayout::DepthStencilAttachment);
        assert_eq!(depth.image.texture().format(), DEPTH_FORMAT);
        assert_eq!(factory.image_heap().live_allocations(), 0);
    }
}
