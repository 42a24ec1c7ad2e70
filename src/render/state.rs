use std::rc::Rc;

use anyhow::Result;

use crate::error::Error;

/// Window surface, adapter, the single device and its single queue.
pub struct RenderSystemState {
    #[allow(dead_code)]
    pub instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub surface_config: wgpu::SurfaceConfiguration,
    #[allow(dead_code)]
    pub adapter: wgpu::Adapter,
    pub device: Rc<wgpu::Device>,
    pub queue: Rc<wgpu::Queue>,
    pub tera: tera::Tera,
    pub view_dimensions: winit::dpi::PhysicalSize<u32>,
}

impl RenderSystemState {
    pub async fn from_window(window: std::sync::Arc<winit::window::Window>) -> Result<Self> {
        let view_dimensions = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
        {
            Some(adapter) => adapter,
            None => return Err(Error::new(String::from("Failed to retrieve adapter.")).into()),
        };

        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("RENDER_SYSTEM_DEVICE"),
                    ..Default::default()
                },
                None,
            )
            .await?;

        let device = Rc::new(device);
        let queue = Rc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);

        let surface_format = match surface_caps.formats.iter().find(|f| f.is_srgb()) {
            Some(format) => *format,
            None => match surface_caps.formats.first() {
                Some(format) => *format,
                None => {
                    return Err(
                        Error::new(String::from("The surface supports no formats.")).into(),
                    )
                }
            },
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: view_dimensions.width.max(1),
            height: view_dimensions.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &surface_config);

        let tera = tera::Tera::new("shaders/**/*")?;

        Ok(Self {
            instance,
            surface,
            surface_config,
            adapter,
            device,
            queue,
            tera,
            view_dimensions,
        })
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }

    /// Reconfigures the surface for new dimensions. Returns `false` and leaves the surface
    /// alone when either dimension is zero.
    pub fn set_view_dimensions(&mut self, view_dimensions: winit::dpi::PhysicalSize<u32>) -> bool {
        self.view_dimensions = view_dimensions;
        if view_dimensions.width == 0 || view_dimensions.height == 0 {
            return false;
        }

        self.surface_config.width = view_dimensions.width;
        self.surface_config.height = view_dimensions.height;
        self.surface.configure(&self.device, &self.surface_config);

        true
    }
}
