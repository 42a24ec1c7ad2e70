//! Per-drawable render bundles and the per-frame command buffer that replays them.

use std::rc::Rc;

use crate::error::Error;
use crate::render::drawable::Drawable;
use crate::render::pipeline::{MeshKind, RenderPipeline};
use crate::render::resource::DEPTH_FORMAT;

/// Outcome of one `draw_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    Skipped,
    SwapchainRecreated,
}

pub struct CommandRecorder {
    static_pipeline: Rc<RenderPipeline>,
    skinned_pipeline: Rc<RenderPipeline>,
    color_format: wgpu::TextureFormat,
}

impl CommandRecorder {
    pub fn new(
        static_pipeline: Rc<RenderPipeline>,
        skinned_pipeline: Rc<RenderPipeline>,
        color_format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            static_pipeline,
            skinned_pipeline,
            color_format,
        }
    }

    pub fn pipeline(&self, kind: MeshKind) -> &RenderPipeline {
        match kind {
            MeshKind::Static => &self.static_pipeline,
            MeshKind::Skinned => &self.skinned_pipeline,
        }
    }

    /// Records the draws of one drawable once. The bundle stays valid until its buffers,
    /// descriptor sets or the surface format change.
    pub fn record_drawable(
        &self,
        device: &wgpu::Device,
        drawable: &dyn Drawable,
    ) -> Result<wgpu::RenderBundle, Error> {
        let label = format!("{}_RENDER_BUNDLE", drawable.label());

        let mut encoder =
            device.create_render_bundle_encoder(&wgpu::RenderBundleEncoderDescriptor {
                label: Some(&label),
                color_formats: &[Some(self.color_format)],
                depth_stencil: Some(wgpu::RenderBundleDepthStencil {
                    format: DEPTH_FORMAT,
                    depth_read_only: false,
                    stencil_read_only: true,
                }),
                sample_count: 1,
                multiview: None,
            });

        encoder.set_pipeline(&self.pipeline(drawable.kind()).gpu_pipeline);
        drawable.record_draw(&mut encoder)?;

        log::debug!(
            "Recorded {} sub-mesh draws for {}",
            drawable.sub_meshes().len(),
            drawable.label()
        );

        Ok(encoder.finish(&wgpu::RenderBundleDescriptor {
            label: Some(&label),
        }))
    }

    /// One render pass clearing to black and depth 1.0, then every bundle in order.
    pub fn encode_frame(
        &self,
        device: &wgpu::Device,
        color_view: &wgpu::TextureView,
        depth_view: &wgpu::TextureView,
        bundles: &[wgpu::RenderBundle],
    ) -> wgpu::CommandBuffer {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("RENDER_SYSTEM_COMMAND_ENCODER"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("RENDER_SYSTEM_RENDER_PASS"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.execute_bundles(bundles.iter());
        }

        encoder.finish()
    }
}
