use anyhow::Result;
use cgmath::{InnerSpace, Rotation};

use crate::data::projection::PerspectiveProjection;
use crate::data::transform::Transform;
use crate::error::Error;
use crate::memory::MemoryProperties;
use crate::render::buffer::GpuBuffer;
use crate::render::command::{CommandRecorder, FrameStatus};
use crate::render::constants::{ConstantUpdater, FrameConstants};
use crate::render::descriptor::DescriptorLayouts;
use crate::render::pipeline::{MeshKind, RenderPipeline, RenderPipelineConfiguration};
use crate::render::resource::{HeapConfig, ResourceFactory};
use crate::render::scene::{SceneDescription, SceneLoader};
use crate::render::shader::ShaderModulePackage;
use crate::render::state::RenderSystemState;
use crate::render::storage::RenderSystemSceneStorage;
use crate::render::texture::DepthTexture2DPackage;

pub mod buffer;
pub mod command;
pub mod constants;
pub mod descriptor;
pub mod drawable;
pub mod image;
pub mod mesh;
pub mod pipeline;
pub mod resource;
pub mod sampler;
pub mod scene;
pub mod shader;
pub mod state;
pub mod storage;
pub mod texture;

const LIGHT_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 0.25];

pub struct RenderSystem {
    state: RenderSystemState,
    factory: ResourceFactory,
    updater: ConstantUpdater,
    layouts: DescriptorLayouts,
    recorder: CommandRecorder,
    frame_buffer: GpuBuffer,
    depth_texture: DepthTexture2DPackage,
    camera_transform: Transform,
    storage: RenderSystemSceneStorage,
}

impl RenderSystem {
    pub async fn from_window(
        window: std::sync::Arc<winit::window::Window>,
        heap_config: &HeapConfig,
    ) -> Result<Self> {
        let state = RenderSystemState::from_window(window).await?;

        let factory = ResourceFactory::new(state.device.clone(), state.queue.clone(), heap_config)?;
        let updater = ConstantUpdater::new(&factory)?;
        let layouts = DescriptorLayouts::new(&state.device)?;

        let recorder = CommandRecorder::new(
            RenderSystem::create_pipeline(&state, &layouts, MeshKind::Static)?.into(),
            RenderSystem::create_pipeline(&state, &layouts, MeshKind::Skinned)?.into(),
            state.color_format(),
        );

        let frame_buffer = factory.create_buffer(
            "FRAME_CONSTANTS",
            std::mem::size_of::<FrameConstants>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            MemoryProperties::DEVICE_LOCAL,
        )?;

        let depth_texture = factory.create_depth_image(
            state.surface_config.width,
            state.surface_config.height,
        )?;

        log::info!(
            "Render system ready: {:?} surface, heaps {:?}",
            state.color_format(),
            heap_config
        );

        Ok(Self {
            state,
            factory,
            updater,
            layouts,
            recorder,
            frame_buffer,
            depth_texture,
            camera_transform: Default::default(),
            storage: Default::default(),
        })
    }

    fn create_pipeline(
        state: &RenderSystemState,
        layouts: &DescriptorLayouts,
        kind: MeshKind,
    ) -> Result<RenderPipeline> {
        let name = match kind {
            MeshKind::Static => "STATIC_MESH",
            MeshKind::Skinned => "SKINNED_MESH",
        };
        let config = RenderPipelineConfiguration {
            kind,
            color_format: state.color_format(),
        };

        let shader_module_package =
            ShaderModulePackage::from_render_pipeline_config(&config, name, &state.device, &state.tera)?;

        Ok(RenderPipeline::from_config(
            config,
            name,
            &state.device,
            &[layouts.for_kind(kind).gpu_layout()],
            &shader_module_package.vertex_shader_module,
            &shader_module_package.fragment_shader_module,
        ))
    }

    pub fn drawable_count(&self) -> usize {
        self.storage.drawables.len()
    }

    /// Reconfigures the surface and rebuilds the depth image. Zero-sized views are ignored.
    pub fn set_view_dimensions(
        &mut self,
        view_dimensions: winit::dpi::PhysicalSize<u32>,
    ) -> Result<()> {
        if !self.state.set_view_dimensions(view_dimensions) {
            log::debug!("Ignoring zero-sized view: {:?}", view_dimensions);
            return Ok(());
        }

        self.depth_texture = self
            .factory
            .create_depth_image(view_dimensions.width, view_dimensions.height)?;

        Ok(())
    }

    pub fn set_camera_transform(&mut self, transform: Transform) {
        self.camera_transform = transform;
    }

    /// Replaces the current scene. On failure the render system is left with no scene.
    pub fn load_scene(&mut self, description: &SceneDescription) -> Result<()> {
        self.storage = Default::default();
        self.factory.wait_idle();

        match SceneLoader::load(
            &self.factory,
            &self.layouts,
            &self.frame_buffer,
            &mut self.storage,
            description,
        ) {
            Ok(_) => {}
            Err(error) => {
                self.storage = Default::default();
                return Err(error);
            }
        }

        let bundles = self
            .storage
            .drawables
            .iter()
            .map(|drawable| {
                self.recorder
                    .record_drawable(&self.state.device, drawable.as_ref())
            })
            .collect::<Result<Vec<_>, Error>>();

        match bundles {
            Ok(bundles) => self.storage.bundles = bundles,
            Err(error) => {
                self.storage = Default::default();
                return Err(error.into());
            }
        }

        Ok(())
    }

    /// Advances every drawable and rewrites all constant buffers for the next frame.
    pub fn update(&mut self, elapsed_millis: u32) -> Result<()> {
        for drawable in self.storage.drawables.iter_mut() {
            drawable.update(elapsed_millis)?;
        }

        let frame_constants = self.build_frame_constants();
        self.updater
            .update(&self.factory, &frame_constants, &self.frame_buffer)?;

        for drawable in self.storage.drawables.iter() {
            drawable.upload_constants(&self.factory, &mut self.updater)?;
        }

        Ok(())
    }

    fn build_frame_constants(&self) -> FrameConstants {
        let view = create_view_matrix_from_transform(self.camera_transform);
        let projection = cgmath::Matrix4::from(PerspectiveProjection::from_dimensions(
            self.state.surface_config.width,
            self.state.surface_config.height,
        ));

        FrameConstants::new(
            view,
            projection,
            cgmath::Vector4::new(0.0, -0.5, 0.5, 0.0).normalize(),
            LIGHT_COLOR.into(),
        )
    }

    /// Acquires a surface image, replays every recorded bundle into it and presents it.
    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        let dimensions = self.state.view_dimensions;
        if dimensions.width == 0 || dimensions.height == 0 {
            return Ok(FrameStatus::Skipped);
        }

        let output = match self.state.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                log::info!("Surface out of date, recreating the swapchain");
                self.set_view_dimensions(dimensions)?;
                return Ok(FrameStatus::SwapchainRecreated);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timeout, skipping frame");
                return Ok(FrameStatus::Skipped);
            }
            Err(error) => return Err(error.into()),
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let command_buffer = self.recorder.encode_frame(
            &self.state.device,
            &view,
            &self.depth_texture.gpu_texture_view,
            &self.storage.bundles,
        );

        self.state.queue.submit(std::iter::once(command_buffer));
        output.present();

        Ok(FrameStatus::Presented)
    }
}

pub fn create_view_matrix_from_transform(transform: Transform) -> cgmath::Matrix4<f32> {
    cgmath::Matrix4::look_to_rh(
        cgmath::Point3 {
            x: transform.translation.x,
            y: transform.translation.y,
            z: transform.translation.z,
        },
        transform.rotation.rotate_vector(-cgmath::Vector3::unit_z()),
        cgmath::Vector3::unit_y(),
    )
}
