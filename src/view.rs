use std::path::Path;
use std::rc::Rc;

use anyhow::Result;

use crate::args::Args;
use crate::camera::OrbitalCameraController;
use crate::render::command::FrameStatus;
use crate::render::resource::HeapConfig;
use crate::render::scene::{grid_center, SceneDescription, GRID_SPACING};
use crate::render::RenderSystem;
use crate::resource::{md5, obj};

const CAMERA_PITCH: f32 = 0.4;
const CAMERA_SENSITIVITY: f32 = 2.0;
const CAMERA_ORBIT_SPEED: f32 = 0.2;

pub struct ViewSystem {
    pub window: std::sync::Arc<winit::window::Window>,
    pub render_system: RenderSystem,
    pub camera_controller: OrbitalCameraController,
}

impl ViewSystem {
    pub async fn from_window(window: winit::window::Window, args: &Args) -> Result<Self> {
        let window = std::sync::Arc::new(window);

        let heap_config = HeapConfig::try_from(args.heap_sizes)?;
        let mut render_system = RenderSystem::from_window(window.clone(), &heap_config).await?;

        let camera_controller = OrbitalCameraController::new(
            grid_center(args.rows, args.cols),
            camera_distance(args.rows, args.cols),
            cgmath::Rad(0.0),
            cgmath::Rad(CAMERA_PITCH),
            CAMERA_SENSITIVITY,
            cgmath::Rad(CAMERA_ORBIT_SPEED),
        );

        render_system.set_camera_transform(camera_controller.calculate_camera_transform());

        Ok(Self {
            window,
            render_system,
            camera_controller,
        })
    }

    /// Parses the model, animation and optional static mesh named in `args` and hands them
    /// to the render system as a new scene.
    pub fn load_scene(&mut self, args: &Args) -> Result<()> {
        let model = md5::load_model(&args.model)?;
        let animation = Rc::new(md5::load_animation(&args.animation)?);
        let static_mesh = match &args.static_mesh {
            Some(path) => Some(obj::load_obj(path)?),
            None => None,
        };

        let description = SceneDescription {
            model,
            model_dir: args
                .model
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf(),
            animation,
            static_mesh,
            texture_dir: args.texture_dir.clone(),
            rows: args.rows,
            cols: args.cols,
        };

        self.render_system.load_scene(&description)?;

        log::info!(
            "Scene ready with {} drawables",
            self.render_system.drawable_count()
        );

        Ok(())
    }

    pub fn update_view(&mut self, delta_time: std::time::Duration) -> Result<FrameStatus> {
        if let Some(transform) = self
            .camera_controller
            .generate_updated_camera_transform(delta_time)
        {
            self.render_system.set_camera_transform(transform);
        }

        let elapsed_millis = u32::try_from(delta_time.as_millis()).unwrap_or(u32::MAX);
        self.render_system.update(elapsed_millis)?;

        self.render_system.draw_frame()
    }
}

/// Far enough back that the whole grid fits the default field of view.
fn camera_distance(rows: u32, cols: u32) -> f32 {
    let extent = rows.max(cols).max(1) as f32 * GRID_SPACING;
    extent * 1.2 + 5.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_backs_off_for_larger_grids() {
        assert!(camera_distance(10, 10) > camera_distance(2, 2));
        assert_eq!(camera_distance(0, 0), camera_distance(1, 1));
        assert_eq!(camera_distance(3, 8), camera_distance(8, 3));
    }
}
