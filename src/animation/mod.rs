//! Skeletons and the per-tick bone matrices that skin a mesh.

use cgmath::{Matrix4, Quaternion, SquareMatrix, Vector3};

use crate::error::Error;
use crate::render::constants::MAX_BONES;

pub mod keyframe;

pub use keyframe::{AnimationClip, KeyframeAnimation};

/// Model-space transform of one bone in an animated pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkeletonBone {
    pub position: Vector3<f32>,
    pub orientation: Quaternion<f32>,
}

impl SkeletonBone {
    pub fn matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position) * Matrix4::from(self.orientation)
    }
}

/// A source of poses, advanced once per tick.
pub trait Animation {
    fn bone_count(&self) -> usize;
    fn update(&mut self, elapsed_millis: u32);
    /// One entry per bone, in the same order as the mesh skeleton.
    fn skeleton(&self) -> &[SkeletonBone];
}

#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub position: Vector3<f32>,
    pub orientation: Quaternion<f32>,
    pub inverse_bind_matrix: Matrix4<f32>,
}

impl Bone {
    pub fn new(
        name: String,
        parent: Option<usize>,
        position: Vector3<f32>,
        orientation: Quaternion<f32>,
    ) -> Self {
        let bind_matrix = SkeletonBone {
            position,
            orientation,
        }
        .matrix();

        let inverse_bind_matrix = match bind_matrix.invert() {
            Some(inverse) => inverse,
            None => {
                log::warn!("Bone {name} has a singular bind matrix, using identity");
                Matrix4::identity()
            }
        };

        Self {
            name,
            parent,
            position,
            orientation,
            inverse_bind_matrix,
        }
    }
}

/// Bind-pose hierarchy of a skinned mesh.
#[derive(Clone, Debug)]
pub struct Skeleton {
    bones: Vec<Bone>,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Result<Self, Error> {
        if bones.len() > MAX_BONES {
            return Err(Error::ContractViolation(format!(
                "{} bones exceed the capacity of {MAX_BONES}",
                bones.len()
            )));
        }

        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(Error::ContractViolation(format!(
                        "Bone {} ({index}) names parent {parent}, which does not precede it",
                        bone.name
                    )));
                }
            }
        }

        Ok(Self { bones })
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bind_pose(&self) -> Vec<SkeletonBone> {
        self.bones
            .iter()
            .map(|bone| SkeletonBone {
                position: bone.position,
                orientation: bone.orientation,
            })
            .collect()
    }

    /// One matrix per bone taking bind-pose vertices into the given pose.
    pub fn bone_matrices(&self, pose: &[SkeletonBone]) -> Result<Vec<Matrix4<f32>>, Error> {
        if pose.len() != self.bones.len() {
            return Err(Error::ContractViolation(format!(
                "The pose has {} bones, the skeleton {}",
                pose.len(),
                self.bones.len()
            )));
        }

        Ok(pose
            .iter()
            .zip(self.bones.iter())
            .map(|(pose_bone, bone)| pose_bone.matrix() * bone.inverse_bind_matrix)
            .collect())
    }
}

/// Rebuilds a unit quaternion from its vector part, keeping the negative real root.
pub fn quaternion_from_xyz(x: f32, y: f32, z: f32) -> Quaternion<f32> {
    Quaternion::new(compute_w(x, y, z), x, y, z)
}

pub fn compute_w(x: f32, y: f32, z: f32) -> f32 {
    let t = 1.0 - x * x - y * y - z * z;
    if t < 0.0 {
        0.0
    } else {
        -t.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{InnerSpace, Rotation3};

    use super::*;

    fn assert_matrix_near(actual: Matrix4<f32>, expected: Matrix4<f32>) {
        let actual: [[f32; 4]; 4] = actual.into();
        let expected: [[f32; 4]; 4] = expected.into();
        for column in 0..4 {
            for row in 0..4 {
                assert!(
                    (actual[column][row] - expected[column][row]).abs() < 1e-5,
                    "{actual:?} != {expected:?}"
                );
            }
        }
    }

    fn two_bone_skeleton() -> Skeleton {
        Skeleton::new(vec![
            Bone::new(
                String::from("root"),
                None,
                Vector3::new(0.0, 1.0, 0.0),
                quaternion_from_xyz(0.0, 0.0, 0.0),
            ),
            Bone::new(
                String::from("arm"),
                Some(0),
                Vector3::new(1.0, 1.0, 0.0),
                Quaternion::from_angle_z(cgmath::Deg(90.0)),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn w_takes_the_negative_root() {
        assert_eq!(compute_w(0.0, 0.0, 0.0), -1.0);
        assert!((compute_w(0.6, 0.0, 0.0) + 0.8).abs() < 1e-6);
    }

    #[test]
    fn w_clamps_to_zero_outside_the_unit_ball() {
        assert_eq!(compute_w(0.8, 0.8, 0.0), 0.0);
        assert_eq!(compute_w(1.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn reconstructed_quaternions_are_unit_length() {
        let quaternion = quaternion_from_xyz(0.2, -0.4, 0.1);
        assert!((quaternion.magnitude() - 1.0).abs() < 1e-6);
        assert!(quaternion.s < 0.0);
    }

    #[test]
    fn bind_pose_yields_identity_matrices() {
        let skeleton = two_bone_skeleton();
        let matrices = skeleton.bone_matrices(&skeleton.bind_pose()).unwrap();

        assert_eq!(matrices.len(), skeleton.bone_count());
        for matrix in matrices {
            assert_matrix_near(matrix, Matrix4::identity());
        }
    }

    #[test]
    fn moved_bone_carries_its_vertices() {
        let skeleton = two_bone_skeleton();
        let mut pose = skeleton.bind_pose();
        pose[0].position += Vector3::new(0.0, 0.0, 5.0);

        let matrices = skeleton.bone_matrices(&pose).unwrap();
        assert_matrix_near(
            matrices[0],
            Matrix4::from_translation(Vector3::new(0.0, 0.0, 5.0)),
        );
        assert_matrix_near(matrices[1], Matrix4::identity());
    }

    #[test]
    fn pose_with_wrong_bone_count_is_rejected() {
        let skeleton = two_bone_skeleton();
        let pose = vec![skeleton.bind_pose()[0]];

        assert!(matches!(
            skeleton.bone_matrices(&pose),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn forward_parent_references_are_rejected() {
        let bones = vec![Bone::new(
            String::from("orphan"),
            Some(3),
            Vector3::new(0.0, 0.0, 0.0),
            quaternion_from_xyz(0.0, 0.0, 0.0),
        )];
        assert!(Skeleton::new(bones).is_err());
    }

    #[test]
    fn oversized_skeletons_are_rejected() {
        let bones = (0..=MAX_BONES)
            .map(|index| {
                Bone::new(
                    format!("bone{index}"),
                    None,
                    Vector3::new(0.0, 0.0, 0.0),
                    quaternion_from_xyz(0.0, 0.0, 0.0),
                )
            })
            .collect();
        assert!(matches!(
            Skeleton::new(bones),
            Err(Error::ContractViolation(_))
        ));
    }
}
