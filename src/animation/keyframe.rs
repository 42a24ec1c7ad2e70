use std::rc::Rc;

use cgmath::{InnerSpace, Quaternion, Rotation, Vector3, VectorSpace};

use crate::animation::{compute_w, Animation, SkeletonBone};
use crate::error::Error;

bitflags::bitflags! {
    /// Which base-frame components a joint overrides in every frame, in storage order.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AnimatedComponents: u32 {
        const TX = 1 << 0;
        const TY = 1 << 1;
        const TZ = 1 << 2;
        const QX = 1 << 3;
        const QY = 1 << 4;
        const QZ = 1 << 5;
    }
}

#[derive(Clone, Debug)]
pub struct JointInfo {
    pub name: String,
    pub parent: Option<usize>,
    pub components: AnimatedComponents,
    pub start_index: usize,
}

/// Joint transform relative to its parent, with the quaternion stored by its vector part.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaseFrameJoint {
    pub position: Vector3<f32>,
    pub orientation: Vector3<f32>,
}

/// Decoded animation: one model-space skeleton per frame.
#[derive(Debug)]
pub struct AnimationClip {
    joints: Vec<JointInfo>,
    frame_rate: u32,
    frame_skeletons: Vec<Vec<SkeletonBone>>,
}

impl AnimationClip {
    pub fn new(
        joints: Vec<JointInfo>,
        frame_rate: u32,
        base_frame: &[BaseFrameJoint],
        frames: &[Vec<f32>],
    ) -> Result<Self, Error> {
        if base_frame.len() != joints.len() {
            return Err(Error::ContractViolation(format!(
                "The base frame has {} joints, the hierarchy {}",
                base_frame.len(),
                joints.len()
            )));
        }
        if frames.is_empty() {
            return Err(Error::ContractViolation(String::from(
                "An animation needs at least one frame",
            )));
        }
        if frame_rate == 0 {
            return Err(Error::ContractViolation(String::from(
                "The frame rate must be positive",
            )));
        }

        let frame_skeletons = frames
            .iter()
            .enumerate()
            .map(|(frame_index, frame_data)| {
                build_frame_skeleton(&joints, base_frame, frame_index, frame_data)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            joints,
            frame_rate,
            frame_skeletons,
        })
    }

    pub fn bone_count(&self) -> usize {
        self.joints.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_skeletons.len()
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.frame_count() as f32 / self.frame_rate as f32
    }

    pub fn frame_skeleton(&self, frame_index: usize) -> &[SkeletonBone] {
        &self.frame_skeletons[frame_index % self.frame_skeletons.len()]
    }
}

fn build_frame_skeleton(
    joints: &[JointInfo],
    base_frame: &[BaseFrameJoint],
    frame_index: usize,
    frame_data: &[f32],
) -> Result<Vec<SkeletonBone>, Error> {
    let mut skeleton: Vec<SkeletonBone> = Vec::with_capacity(joints.len());

    for (joint, base) in joints.iter().zip(base_frame.iter()) {
        let mut position = base.position;
        let mut orientation = base.orientation;
        let mut cursor = joint.start_index;

        let mut next_component = || -> Result<f32, Error> {
            let value = frame_data.get(cursor).copied().ok_or_else(|| {
                Error::ContractViolation(format!(
                    "Frame {frame_index} has no component {cursor} for joint {}",
                    joint.name
                ))
            })?;
            cursor += 1;
            Ok(value)
        };

        if joint.components.contains(AnimatedComponents::TX) {
            position.x = next_component()?;
        }
        if joint.components.contains(AnimatedComponents::TY) {
            position.y = next_component()?;
        }
        if joint.components.contains(AnimatedComponents::TZ) {
            position.z = next_component()?;
        }
        if joint.components.contains(AnimatedComponents::QX) {
            orientation.x = next_component()?;
        }
        if joint.components.contains(AnimatedComponents::QY) {
            orientation.y = next_component()?;
        }
        if joint.components.contains(AnimatedComponents::QZ) {
            orientation.z = next_component()?;
        }

        let orientation = Quaternion::new(
            compute_w(orientation.x, orientation.y, orientation.z),
            orientation.x,
            orientation.y,
            orientation.z,
        );

        let bone = match joint.parent {
            Some(parent_index) => {
                let parent = skeleton.get(parent_index).ok_or_else(|| {
                    Error::ContractViolation(format!(
                        "Joint {} names parent {parent_index}, which does not precede it",
                        joint.name
                    ))
                })?;

                SkeletonBone {
                    position: parent.position + parent.orientation.rotate_vector(position),
                    orientation: (parent.orientation * orientation).normalize(),
                }
            }
            None => SkeletonBone {
                position,
                orientation,
            },
        };

        skeleton.push(bone);
    }

    Ok(skeleton)
}

/// Playback state over a shared clip, blending the two frames around the current time.
#[derive(Clone, Debug)]
pub struct KeyframeAnimation {
    clip: Rc<AnimationClip>,
    time_secs: f32,
    pose: Vec<SkeletonBone>,
}

impl KeyframeAnimation {
    pub fn new(clip: Rc<AnimationClip>) -> Self {
        let pose = clip.frame_skeleton(0).to_vec();

        Self {
            clip,
            time_secs: 0.0,
            pose,
        }
    }

    pub fn time_secs(&self) -> f32 {
        self.time_secs
    }

    fn interpolate(&mut self) {
        let frame_position = self.time_secs * self.clip.frame_rate() as f32;
        let frame_0 = frame_position.floor() as usize;
        let blend = frame_position - frame_position.floor();

        let skeleton_0 = self.clip.frame_skeleton(frame_0);
        let skeleton_1 = self.clip.frame_skeleton(frame_0 + 1);

        for ((bone, bone_0), bone_1) in self
            .pose
            .iter_mut()
            .zip(skeleton_0.iter())
            .zip(skeleton_1.iter())
        {
            let mut orientation_1 = bone_1.orientation;
            if bone_0.orientation.dot(orientation_1) < 0.0 {
                orientation_1 = -orientation_1;
            }

            bone.position = bone_0.position.lerp(bone_1.position, blend);
            bone.orientation = bone_0.orientation.slerp(orientation_1, blend).normalize();
        }
    }
}

impl Animation for KeyframeAnimation {
    fn bone_count(&self) -> usize {
        self.clip.bone_count()
    }

    fn update(&mut self, elapsed_millis: u32) {
        let duration = self.clip.duration_secs();
        self.time_secs = (self.time_secs + elapsed_millis as f32 / 1000.0).rem_euclid(duration);
        self.interpolate();
    }

    fn skeleton(&self) -> &[SkeletonBone] {
        &self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joint(name: &str, parent: Option<usize>, components: AnimatedComponents, start: usize) -> JointInfo {
        JointInfo {
            name: name.to_string(),
            parent,
            components,
            start_index: start,
        }
    }

    fn still(x: f32, y: f32, z: f32) -> BaseFrameJoint {
        BaseFrameJoint {
            position: Vector3::new(x, y, z),
            orientation: Vector3::new(0.0, 0.0, 0.0),
        }
    }

    /// Root slides along x from 0 to 2 over two frames at 2 fps; the child sits 1 unit above it.
    fn sliding_clip() -> Rc<AnimationClip> {
        Rc::new(
            AnimationClip::new(
                vec![
                    joint("root", None, AnimatedComponents::TX, 0),
                    joint("child", Some(0), AnimatedComponents::empty(), 1),
                ],
                2,
                &[still(0.0, 0.0, 0.0), still(0.0, 1.0, 0.0)],
                &[vec![0.0], vec![2.0]],
            )
            .unwrap(),
        )
    }

    fn assert_near(actual: f32, expected: f32) {
        assert!((actual - expected).abs() < 1e-5, "{actual} != {expected}");
    }

    #[test]
    fn children_are_composed_with_their_parent() {
        let clip = sliding_clip();
        let frame = clip.frame_skeleton(1);

        assert_near(frame[1].position.x, 2.0);
        assert_near(frame[1].position.y, 1.0);
    }

    #[test]
    fn parent_rotation_turns_child_offsets() {
        // vector part of a 90 degree turn about z, real part rebuilt as -sqrt(0.5)
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let clip = AnimationClip::new(
            vec![
                joint("root", None, AnimatedComponents::QZ, 0),
                joint("child", Some(0), AnimatedComponents::empty(), 1),
            ],
            24,
            &[still(0.0, 0.0, 0.0), still(1.0, 0.0, 0.0)],
            &[vec![-half]],
        )
        .unwrap();

        let child = clip.frame_skeleton(0)[1];
        assert_near(child.position.x, 0.0);
        assert_near(child.position.y.abs(), 1.0);
    }

    #[test]
    fn playback_blends_between_frames() {
        let mut animation = KeyframeAnimation::new(sliding_clip());
        assert_near(animation.skeleton()[0].position.x, 0.0);

        animation.update(250);
        assert_near(animation.skeleton()[0].position.x, 1.0);
        assert_near(animation.skeleton()[1].position.x, 1.0);
    }

    #[test]
    fn playback_wraps_past_the_last_frame() {
        let mut animation = KeyframeAnimation::new(sliding_clip());

        animation.update(1250);
        assert_near(animation.time_secs(), 0.25);
        assert_near(animation.skeleton()[0].position.x, 1.0);

        // the last frame blends back into the first
        animation.update(500);
        assert_near(animation.skeleton()[0].position.x, 1.0);
    }

    #[test]
    fn copies_advance_independently() {
        let mut first = KeyframeAnimation::new(sliding_clip());
        let second = first.clone();

        first.update(250);
        assert_near(first.skeleton()[0].position.x, 1.0);
        assert_near(second.skeleton()[0].position.x, 0.0);
        assert_eq!(second.bone_count(), 2);
    }

    #[test]
    fn missing_frame_components_are_rejected() {
        let result = AnimationClip::new(
            vec![joint("root", None, AnimatedComponents::TX | AnimatedComponents::TY, 0)],
            24,
            &[still(0.0, 0.0, 0.0)],
            &[vec![1.0]],
        );
        assert!(matches!(result, Err(Error::ContractViolation(_))));
    }

    #[test]
    fn empty_clips_are_rejected() {
        let result = AnimationClip::new(vec![], 24, &[], &[]);
        assert!(result.is_err());
    }
}
