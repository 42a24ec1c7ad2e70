use cgmath::{One, Rotation3, Zero};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub translation: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Transform {
    pub fn from_translation(translation: cgmath::Vector3<f32>) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Applies `angle` about `axis` on top of the current rotation.
    pub fn rotate_by(&mut self, angle: cgmath::Rad<f32>, axis: cgmath::Vector3<f32>) {
        self.rotation = self.rotation * cgmath::Quaternion::from_axis_angle(axis, angle);
    }

    pub fn set_uniform_scale(&mut self, scale: f32) {
        self.scale = cgmath::Vector3::new(scale, scale, scale);
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: cgmath::Vector3::zero(),
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3 {
                x: 1.0,
                y: 1.0,
                z: 1.0,
            },
        }
    }
}

impl From<Transform> for cgmath::Matrix4<f32> {
    fn from(value: Transform) -> Self {
        cgmath::Matrix4::from_translation(value.translation)
            * cgmath::Matrix4::from(value.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(value.scale.x, value.scale.y, value.scale.z)
    }
}
