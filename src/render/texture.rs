use crate::render::image::GpuImage;
use crate::render::sampler::Sampler;

pub struct Texture2DPackage {
    pub image: GpuImage,
    pub gpu_texture_view: wgpu::TextureView,
    pub sampler: std::rc::Rc<Sampler>,
}

pub struct DepthTexture2DPackage {
    pub image: GpuImage,
    pub gpu_texture_view: wgpu::TextureView,
}
