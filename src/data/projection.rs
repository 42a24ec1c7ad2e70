#[derive(Copy, Clone, Debug)]
pub struct PerspectiveProjection {
    pub aspect_ratio: f32,
    pub fovy: cgmath::Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl PerspectiveProjection {
    /// 45 degree vertical field of view over `[0.1, 1000]`.
    pub fn with_aspect_ratio(aspect_ratio: f32) -> Self {
        Self {
            aspect_ratio,
            fovy: cgmath::Deg(45.0).into(),
            znear: 0.1,
            zfar: 1000.0,
        }
    }

    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::with_aspect_ratio(width.max(1) as f32 / height.max(1) as f32)
    }
}

impl From<PerspectiveProjection> for cgmath::Matrix4<f32> {
    fn from(value: PerspectiveProjection) -> Self {
        OPENGL_TO_WGPU_MATRIX
            * cgmath::perspective(value.fovy, value.aspect_ratio, value.znear, value.zfar)
    }
}

/// Remaps clip-space depth from `[-1, 1]` to `[0, 1]`.
pub const OPENGL_TO_WGPU_MATRIX: cgmath::Matrix4<f32> = cgmath::Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector4;

    #[test]
    fn near_and_far_planes_map_to_zero_and_one() {
        let projection = cgmath::Matrix4::from(PerspectiveProjection::from_dimensions(640, 480));

        let near = projection * Vector4::new(0.0, 0.0, -0.1, 1.0);
        let far = projection * Vector4::new(0.0, 0.0, -1000.0, 1.0);

        assert!((near.z / near.w).abs() < 1e-4);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn zero_sized_views_do_not_divide_by_zero() {
        let projection = PerspectiveProjection::from_dimensions(0, 0);
        assert_eq!(projection.aspect_ratio, 1.0);
    }
}
