pub struct Sampler {
    pub gpu_sampler: wgpu::Sampler,
}

impl Sampler {
    pub fn linear_repeat(device: &wgpu::Device, label: &str) -> Self {
        Self {
            gpu_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                address_mode_w: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            }),
        }
    }
}
