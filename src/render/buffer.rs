use std::rc::Rc;

use crate::error::Error;
use crate::memory::Allocation;

/// A buffer bound to a range of a buffer heap. The range is released when the buffer is dropped.
pub struct GpuBuffer {
    label: String,
    usage: wgpu::BufferUsages,
    gpu_buffer: Rc<wgpu::Buffer>,
    allocation: Allocation,
}

impl GpuBuffer {
    pub fn bind(
        label: &str,
        usage: wgpu::BufferUsages,
        allocation: Allocation,
    ) -> Result<Self, Error> {
        let gpu_buffer = match allocation.memory() {
            Some(gpu_buffer) => gpu_buffer.clone(),
            None => {
                return Err(Error::ContractViolation(format!(
                    "Buffer {label} cannot be bound to heap {}, which has no buffer memory",
                    allocation.heap_label()
                )))
            }
        };

        log::debug!(
            "Bound buffer {label} to heap {} at [{}, {})",
            allocation.heap_label(),
            allocation.offset(),
            allocation.offset() + allocation.size()
        );

        Ok(Self {
            label: label.to_string(),
            usage,
            gpu_buffer,
            allocation,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    pub fn offset(&self) -> wgpu::BufferAddress {
        self.allocation.offset()
    }

    pub fn size(&self) -> wgpu::BufferAddress {
        self.allocation.size()
    }

    pub fn gpu_buffer(&self) -> &wgpu::Buffer {
        &self.gpu_buffer
    }

    pub fn slice(&self) -> wgpu::BufferSlice<'_> {
        self.gpu_buffer.slice(self.offset()..self.offset() + self.size())
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.gpu_buffer,
            offset: self.offset(),
            size: wgpu::BufferSize::new(self.size()),
        })
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("label", &self.label)
            .field("usage", &self.usage)
            .field("allocation", &self.allocation)
            .finish()
    }
}
