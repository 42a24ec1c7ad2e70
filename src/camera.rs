use cgmath::Angle;
use cgmath::InnerSpace;
use cgmath::Rotation;
use cgmath::Zero;

use crate::data::transform::Transform;

const SAFE_FRAC_PI_2: f32 = std::f32::consts::FRAC_PI_2 - 0.0001;

/// Orbits a fixed target. Dragging with the left mouse button steers; otherwise the camera
/// keeps circling at `orbit_speed`.
pub struct OrbitalCameraController {
    target: cgmath::Point3<f32>,
    distance: f32,
    yaw: cgmath::Rad<f32>,
    pitch: cgmath::Rad<f32>,
    sensitivity: f32,
    orbit_speed: cgmath::Rad<f32>,
    is_left_mouse_pressed: bool,
    rotation_horizontal: f32,
    rotation_vertical: f32,
}

impl OrbitalCameraController {
    pub fn new(
        target: cgmath::Point3<f32>,
        distance: f32,
        yaw: cgmath::Rad<f32>,
        pitch: cgmath::Rad<f32>,
        sensitivity: f32,
        orbit_speed: cgmath::Rad<f32>,
    ) -> Self {
        Self {
            target,
            distance,
            yaw,
            pitch,
            sensitivity,
            orbit_speed,
            is_left_mouse_pressed: false,
            rotation_horizontal: 0.0,
            rotation_vertical: 0.0,
        }
    }

    pub fn handle_mouse_input(
        &mut self,
        button: winit::event::MouseButton,
        state: winit::event::ElementState,
    ) {
        if button == winit::event::MouseButton::Left {
            self.is_left_mouse_pressed = state == winit::event::ElementState::Pressed;
        }
    }

    pub fn handle_mouse_movement(&mut self, delta_x: f32, delta_y: f32) {
        if !self.is_left_mouse_pressed {
            return;
        }

        self.rotation_horizontal += delta_x;
        self.rotation_vertical += delta_y;
    }

    pub fn generate_updated_camera_transform(
        &mut self,
        delta_time: std::time::Duration,
    ) -> Option<Transform> {
        let is_orbiting = !self.is_left_mouse_pressed && !self.orbit_speed.is_zero();
        let is_steered = self.rotation_vertical != 0.0 || self.rotation_horizontal != 0.0;

        if !is_orbiting && !is_steered {
            return None;
        }

        if is_orbiting {
            self.yaw += self.orbit_speed * delta_time.as_secs_f32();
        }
        self.apply_scaled_rotation(delta_time);
        self.rotation_horizontal = 0.0;
        self.rotation_vertical = 0.0;

        Some(self.calculate_camera_transform())
    }

    fn apply_scaled_rotation(&mut self, delta_time: std::time::Duration) {
        let delta_time = delta_time.as_secs_f32();

        self.yaw += cgmath::Rad(self.rotation_horizontal) * self.sensitivity * delta_time;
        self.pitch += cgmath::Rad(self.rotation_vertical) * self.sensitivity * delta_time;

        self.pitch = cgmath::Rad(self.pitch.0.clamp(-SAFE_FRAC_PI_2, SAFE_FRAC_PI_2));
    }

    pub fn calculate_camera_transform(&self) -> Transform {
        let view_direction = cgmath::Vector3::<f32>::new(
            self.yaw.sin() * self.pitch.cos(),
            -self.pitch.sin(),
            -(self.yaw.cos() * self.pitch.cos()),
        )
        .normalize();

        let translation = self.target + (self.distance * -view_direction);

        let rotation = cgmath::Quaternion::<f32>::between_vectors(
            -(cgmath::Vector3::unit_z()),
            view_direction,
        );

        Transform {
            translation: cgmath::Vector3 {
                x: translation.x,
                y: translation.y,
                z: translation.z,
            },
            rotation,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{EuclideanSpace, MetricSpace};

    fn controller(orbit_speed: f32) -> OrbitalCameraController {
        OrbitalCameraController::new(
            cgmath::Point3::new(18.0, 0.0, 18.0),
            40.0,
            cgmath::Rad(0.0),
            cgmath::Rad(0.5),
            2.0,
            cgmath::Rad(orbit_speed),
        )
    }

    #[test]
    fn camera_faces_the_target_from_its_distance() {
        let camera = controller(0.0);
        let transform = camera.calculate_camera_transform();

        let eye = cgmath::Point3::from_vec(transform.translation);
        assert!((eye.distance(cgmath::Point3::new(18.0, 0.0, 18.0)) - 40.0).abs() < 1e-3);

        let forward = transform.rotation.rotate_vector(-cgmath::Vector3::unit_z());
        let to_target = (cgmath::Point3::new(18.0, 0.0, 18.0) - eye).normalize();
        assert!(forward.dot(to_target) > 0.999);
    }

    #[test]
    fn still_camera_reports_no_change() {
        let mut camera = controller(0.0);
        assert!(camera
            .generate_updated_camera_transform(std::time::Duration::from_millis(16))
            .is_none());
    }

    #[test]
    fn orbiting_camera_moves_every_frame() {
        let mut camera = controller(0.5);
        let before = camera.calculate_camera_transform();
        let after = camera
            .generate_updated_camera_transform(std::time::Duration::from_secs(1))
            .unwrap();

        assert!((before.translation - after.translation).magnitude() > 1.0);
    }

    #[test]
    fn mouse_movement_is_ignored_without_a_pressed_button() {
        let mut camera = controller(0.0);
        camera.handle_mouse_movement(10.0, 10.0);
        assert!(camera
            .generate_updated_camera_transform(std::time::Duration::from_millis(16))
            .is_none());

        camera.handle_mouse_input(
            winit::event::MouseButton::Left,
            winit::event::ElementState::Pressed,
        );
        camera.handle_mouse_movement(10.0, 0.0);
        assert!(camera
            .generate_updated_camera_transform(std::time::Duration::from_millis(16))
            .is_some());
    }
}
