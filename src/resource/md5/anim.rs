use std::collections::BTreeMap;

use crate::animation::keyframe::{AnimatedComponents, BaseFrameJoint, JointInfo};
use crate::animation::AnimationClip;
use crate::error::Error;
use crate::resource::md5::tokenizer::Tokenizer;

#[derive(Default)]
struct Header {
    frames: Option<usize>,
    joints: Option<usize>,
    frame_rate: Option<u32>,
    animated_components: Option<usize>,
}

pub fn parse_animation(source: &str) -> Result<AnimationClip, Error> {
    let mut tokenizer = Tokenizer::new(source);

    let mut header = Header::default();
    let mut joints: Vec<JointInfo> = Vec::new();
    let mut base_frame: Vec<BaseFrameJoint> = Vec::new();
    let mut frames: BTreeMap<usize, Vec<f32>> = BTreeMap::new();

    while let Some(token) = tokenizer.peek() {
        tokenizer.next_token()?;
        match token {
            "MD5Version" => {
                tokenizer.parse::<i32>("a version")?;
            }
            "commandline" => {
                tokenizer.quoted()?;
            }
            "numFrames" => {
                header.frames = Some(tokenizer.parse("a frame count")?);
            }
            "numJoints" => header.joints = Some(tokenizer.parse("a joint count")?),
            "frameRate" => header.frame_rate = Some(tokenizer.parse("a frame rate")?),
            "numAnimatedComponents" => {
                header.animated_components = Some(tokenizer.parse("a component count")?)
            }
            "hierarchy" => joints = parse_hierarchy(&mut tokenizer)?,
            "bounds" => tokenizer.skip_block()?,
            "baseframe" => base_frame = parse_base_frame(&mut tokenizer)?,
            "frame" => {
                let line = tokenizer.line();
                let index: usize = tokenizer.parse("a frame index")?;
                let data = parse_frame_data(&mut tokenizer)?;
                let declared = header.frames.unwrap_or(0);

                if index >= declared {
                    return Err(Error::Parse {
                        line,
                        message: format!("frame {index} is outside the declared {declared} frames"),
                    });
                }
                frames.insert(index, data);
            }
            other => {
                return Err(tokenizer.error(format!("unexpected token '{other}'")));
            }
        }
    }

    let declared_frames = header
        .frames
        .ok_or_else(|| Error::ContractViolation(String::from("numFrames is missing")))?;

    if let Some(declared) = header.joints {
        if declared != joints.len() {
            return Err(Error::ContractViolation(format!(
                "numJoints is {declared} but the hierarchy lists {}",
                joints.len()
            )));
        }
    }

    // Every stored index is below the declared count, so a short map has a gap.
    if frames.len() != declared_frames {
        let missing = frames
            .keys()
            .enumerate()
            .find(|(expected, index)| *expected != **index)
            .map(|(expected, _)| expected)
            .unwrap_or(frames.len());
        return Err(Error::ContractViolation(format!("frame {missing} is missing")));
    }
    let frames: Vec<Vec<f32>> = frames.into_values().collect();

    if let Some(declared) = header.animated_components {
        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.len() != declared)
        {
            return Err(Error::ContractViolation(format!(
                "frame {index} has {} components, numAnimatedComponents is {declared}",
                frame.len()
            )));
        }
    }

    let frame_rate = header
        .frame_rate
        .ok_or_else(|| Error::ContractViolation(String::from("frameRate is missing")))?;

    let clip = AnimationClip::new(joints, frame_rate, &base_frame, &frames)?;

    log::debug!(
        "Parsed md5 animation with {} bones and {} frames at {} fps",
        clip.bone_count(),
        clip.frame_count(),
        clip.frame_rate()
    );

    Ok(clip)
}

fn parse_hierarchy(tokenizer: &mut Tokenizer) -> Result<Vec<JointInfo>, Error> {
    let mut joints = Vec::new();

    tokenizer.expect("{")?;
    while tokenizer.peek() != Some("}") {
        let name = tokenizer.quoted()?;
        let parent: i32 = tokenizer.parse("a parent index")?;
        let line = tokenizer.line();
        let flags: u32 = tokenizer.parse("component flags")?;
        let start_index = tokenizer.parse("a start index")?;

        let components = AnimatedComponents::from_bits(flags).ok_or_else(|| Error::Parse {
            line,
            message: format!("unknown component flags {flags:#b} for joint {name}"),
        })?;

        joints.push(JointInfo {
            name,
            parent: usize::try_from(parent).ok(),
            components,
            start_index,
        });
    }
    tokenizer.expect("}")?;

    Ok(joints)
}

fn parse_base_frame(tokenizer: &mut Tokenizer) -> Result<Vec<BaseFrameJoint>, Error> {
    let mut base_frame = Vec::new();

    tokenizer.expect("{")?;
    while tokenizer.peek() != Some("}") {
        base_frame.push(BaseFrameJoint {
            position: tokenizer.vector3()?.into(),
            orientation: tokenizer.vector3()?.into(),
        });
    }
    tokenizer.expect("}")?;

    Ok(base_frame)
}

fn parse_frame_data(tokenizer: &mut Tokenizer) -> Result<Vec<f32>, Error> {
    let mut data = Vec::new();

    tokenizer.expect("{")?;
    while tokenizer.peek() != Some("}") {
        data.push(tokenizer.parse("a number")?);
    }
    tokenizer.expect("}")?;

    Ok(data)
}
