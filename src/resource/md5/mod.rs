//! Readers for the md5 skeletal mesh (`.md5mesh`) and animation (`.md5anim`) text formats.

use std::path::Path;

use anyhow::{Context, Result};

use crate::animation::AnimationClip;

pub mod anim;
pub mod mesh;
mod tokenizer;

pub use anim::parse_animation;
pub use mesh::{parse_mesh, Md5Model};

pub fn load_model(path: &Path) -> Result<Md5Model> {
    log::debug!("Loading md5 mesh {}", path.display());

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_mesh(&source).with_context(|| format!("Failed to load {}", path.display()))
}

pub fn load_animation(path: &Path) -> Result<AnimationClip> {
    log::debug!("Loading md5 animation {}", path.display());

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_animation(&source).with_context(|| format!("Failed to load {}", path.display()))
}
