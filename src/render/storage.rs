use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::render::descriptor::DescriptorPool;
use crate::render::drawable::Drawable;
use crate::render::mesh::MeshGeometry;
use crate::render::sampler::Sampler;
use crate::render::texture::Texture2DPackage;

/// Everything a loaded scene owns. Replacing it with `Default::default()` tears the scene
/// down: bundles first, then drawables, then the geometry and textures they shared.
#[derive(Default)]
pub struct RenderSystemSceneStorage {
    pub bundles: Vec<wgpu::RenderBundle>,
    pub drawables: Vec<Box<dyn Drawable>>,
    pub descriptor_pool: Option<DescriptorPool>,
    pub geometry_registry: HashMap<String, Rc<MeshGeometry>>,
    pub texture_registry: HashMap<PathBuf, Rc<Texture2DPackage>>,
    pub sampler: Option<Rc<Sampler>>,
    pub default_texture: Option<Rc<Texture2DPackage>>,
}
