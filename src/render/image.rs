use std::path::Path;

use anyhow::Result;

use crate::error::Error;
use crate::memory::Allocation;

/// Decoded RGBA8 pixels waiting to be uploaded.
pub struct Image {
    data: image::RgbaImage,
}

impl Image {
    pub fn from_rgba_image(rgba_image: image::RgbaImage) -> Self {
        Self { data: rgba_image }
    }

    pub fn open(path: &Path) -> Result<Self> {
        log::debug!("Loading image {}", path.display());
        Ok(Self::from_rgba_image(image::open(path)?.to_rgba8()))
    }

    pub fn white_pixel() -> Self {
        Self::from_rgba_image(image::RgbaImage::from_pixel(
            1,
            1,
            image::Rgba([255, 255, 255, 255]),
        ))
    }

    pub fn data(&self) -> &image::RgbaImage {
        &self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.data.dimensions()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageTiling {
    Optimal,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    Preinitialized,
    TransferDst,
    ShaderReadOnly,
    DepthStencilAttachment,
}

impl ImageLayout {
    pub fn initial(tiling: ImageTiling) -> Self {
        match tiling {
            ImageTiling::Optimal => Self::Undefined,
            ImageTiling::Linear => Self::Preinitialized,
        }
    }

    pub fn can_transition_to(self, new_layout: ImageLayout) -> bool {
        use ImageLayout::*;

        matches!(
            (self, new_layout),
            (Undefined | Preinitialized, TransferDst)
                | (Undefined | Preinitialized, DepthStencilAttachment)
                | (TransferDst, ShaderReadOnly)
                | (ShaderReadOnly, TransferDst)
        )
    }

    /// Checks a transition of an image currently in `self` that the caller believes is in
    /// `old_layout`, returning the layout the image ends up in.
    pub fn transition(
        self,
        label: &str,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<ImageLayout, Error> {
        if self != old_layout {
            return Err(Error::LayoutMismatch {
                label: label.to_string(),
                expected: old_layout,
                actual: self,
            });
        }

        if !old_layout.can_transition_to(new_layout) {
            return Err(Error::ContractViolation(format!(
                "Image {label} cannot transition from {old_layout:?} to {new_layout:?}"
            )));
        }

        Ok(new_layout)
    }
}

/// A texture together with the image-heap range it is charged against.
pub struct GpuImage {
    label: String,
    texture: wgpu::Texture,
    extent: wgpu::Extent3d,
    layout: ImageLayout,
    // Returned to the heap on drop.
    _allocation: Allocation,
}

impl GpuImage {
    pub fn new(
        label: &str,
        texture: wgpu::Texture,
        tiling: ImageTiling,
        allocation: Allocation,
    ) -> Self {
        Self {
            label: label.to_string(),
            extent: texture.size(),
            texture,
            layout: ImageLayout::initial(tiling),
            _allocation: allocation,
        }
    }

    pub fn transition(
        &mut self,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<(), Error> {
        self.layout = self.layout.transition(&self.label, old_layout, new_layout)?;
        log::trace!("Image {} is now in layout {:?}", self.label, self.layout);
        Ok(())
    }

    pub fn create_view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{}_VIEW", self.label)),
            ..Default::default()
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        self.extent
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiling_selects_the_initial_layout() {
        assert_eq!(ImageLayout::initial(ImageTiling::Optimal), ImageLayout::Undefined);
        assert_eq!(ImageLayout::initial(ImageTiling::Linear), ImageLayout::Preinitialized);
    }

    #[test]
    fn upload_sequence_ends_shader_readable() {
        let layout = ImageLayout::Undefined
            .transition("TEX", ImageLayout::Undefined, ImageLayout::TransferDst)
            .unwrap();
        let layout = layout
            .transition("TEX", ImageLayout::TransferDst, ImageLayout::ShaderReadOnly)
            .unwrap();
        assert_eq!(layout, ImageLayout::ShaderReadOnly);
    }

    #[test]
    fn stale_old_layout_is_reported() {
        match ImageLayout::TransferDst.transition(
            "TEX",
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
        ) {
            Err(Error::LayoutMismatch {
                label,
                expected,
                actual,
            }) => {
                assert_eq!(label, "TEX");
                assert_eq!(expected, ImageLayout::Undefined);
                assert_eq!(actual, ImageLayout::TransferDst);
            }
            other => panic!("expected LayoutMismatch, got {other:?}"),
        }
    }

    #[test]
    fn sampling_an_undefined_image_is_refused() {
        let result = ImageLayout::Undefined.transition(
            "TEX",
            ImageLayout::Undefined,
            ImageLayout::ShaderReadOnly,
        );
        assert!(matches!(result, Err(Error::ContractViolation(_))));
    }

    #[test]
    fn depth_images_go_straight_to_attachment() {
        assert!(ImageLayout::Undefined.can_transition_to(ImageLayout::DepthStencilAttachment));
        assert!(!ImageLayout::DepthStencilAttachment.can_transition_to(ImageLayout::TransferDst));
    }

    #[test]
    fn white_pixel_fallback_is_one_opaque_texel() {
        let image = Image::white_pixel();
        assert_eq!(image.dimensions(), (1, 1));
        assert_eq!(image.data().as_raw().as_slice(), &[255, 255, 255, 255]);
    }
}
