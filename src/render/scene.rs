use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;
use cgmath::EuclideanSpace;
use rand::Rng;

use crate::animation::{AnimationClip, KeyframeAnimation, Skeleton};
use crate::data::transform::Transform;
use crate::error::Error;
use crate::memory::MemoryProperties;
use crate::render::buffer::GpuBuffer;
use crate::render::constants::{AnimationConstants, ObjectConstants};
use crate::render::descriptor::{
    DescriptorLayouts, DescriptorPool, DescriptorPoolConfig, DescriptorWrite, ANIMATION_BINDING,
    FRAME_BINDING, OBJECT_BINDING, TEXTURE_BINDING,
};
use crate::render::drawable::{AnimatedMesh, Drawable, StaticMesh, SubMesh};
use crate::render::image::Image;
use crate::render::mesh::MeshGeometry;
use crate::render::pipeline::MeshKind;
use crate::render::resource::ResourceFactory;
use crate::render::sampler::Sampler;
use crate::render::storage::RenderSystemSceneStorage;
use crate::render::texture::Texture2DPackage;
use crate::resource::md5::Md5Model;
use crate::resource::obj::ObjMesh;

/// Spacing between neighbouring grid cells in world units.
pub const GRID_SPACING: f32 = 4.0;

const MAX_START_OFFSET_MILLIS: u32 = 5000;

/// Parsed inputs of a scene: a grid of one animated model plus an optional static mesh.
pub struct SceneDescription {
    pub model: Md5Model,
    pub model_dir: PathBuf,
    pub animation: Rc<AnimationClip>,
    pub static_mesh: Option<ObjMesh>,
    pub texture_dir: Option<PathBuf>,
    pub rows: u32,
    pub cols: u32,
}

impl SceneDescription {
    pub fn instance_count(&self) -> Result<u32, Error> {
        grid_instance_count(self.rows, self.cols)
    }

    /// Pool capacity for one set per sub-mesh of every drawable in the scene.
    pub fn descriptor_pool_config(
        &self,
        layouts: &DescriptorLayouts,
    ) -> Result<DescriptorPoolConfig, Error> {
        let skinned_sets = u32::try_from(self.model.meshes.len())
            .ok()
            .and_then(|meshes| meshes.checked_mul(self.instance_count().ok()?))
            .ok_or_else(|| {
                Error::ContractViolation(format!(
                    "{} instances of {} sub-meshes need more descriptor sets than can be counted",
                    u64::from(self.rows) * u64::from(self.cols),
                    self.model.meshes.len()
                ))
            })?;
        let static_sets = match self.static_mesh {
            Some(_) => 1,
            None => 0,
        };

        DescriptorPoolConfig::for_drawables(skinned_sets, layouts.skinned_mesh.bindings())?
            .combine(&DescriptorPoolConfig::for_drawables(
                static_sets,
                layouts.static_mesh.bindings(),
            )?)
    }
}

pub fn grid_instance_count(rows: u32, cols: u32) -> Result<u32, Error> {
    rows.checked_mul(cols).ok_or_else(|| {
        Error::ContractViolation(format!(
            "A {rows}x{cols} grid has more instances than can be counted"
        ))
    })
}

/// Model transform of the grid cell at (`col`, `row`): the md5 z-up model stood upright
/// and scaled down to a tenth.
pub fn grid_transform(col: u32, row: u32) -> Transform {
    let mut transform = Transform::from_translation(cgmath::Vector3::new(
        col as f32 * GRID_SPACING,
        0.0,
        row as f32 * GRID_SPACING,
    ));
    transform.rotate_by(cgmath::Deg(-90.0).into(), cgmath::Vector3::unit_x());
    transform.set_uniform_scale(0.1);
    transform
}

pub fn grid_center(rows: u32, cols: u32) -> cgmath::Point3<f32> {
    cgmath::Point3::new(
        cols.saturating_sub(1) as f32 * GRID_SPACING / 2.0,
        0.0,
        rows.saturating_sub(1) as f32 * GRID_SPACING / 2.0,
    )
}

/// Places to look for a texture named in a model, most specific first.
pub fn texture_candidates(
    texture: &str,
    model_dir: &Path,
    texture_dir: Option<&Path>,
) -> Vec<PathBuf> {
    let texture = Path::new(texture);
    let mut candidates = Vec::new();

    if let (Some(texture_dir), Some(file_name)) = (texture_dir, texture.file_name()) {
        candidates.push(texture_dir.join(file_name));
    }
    candidates.push(model_dir.join(texture));
    if let Some(file_name) = texture.file_name() {
        candidates.push(model_dir.join(file_name));
    }

    candidates.dedup();
    candidates
}

pub struct SceneLoader<'a> {
    factory: &'a ResourceFactory,
    layouts: &'a DescriptorLayouts,
    frame_buffer: &'a GpuBuffer,
    storage: &'a mut RenderSystemSceneStorage,
}

impl<'a> SceneLoader<'a> {
    pub fn load(
        factory: &'a ResourceFactory,
        layouts: &'a DescriptorLayouts,
        frame_buffer: &'a GpuBuffer,
        storage: &'a mut RenderSystemSceneStorage,
        description: &SceneDescription,
    ) -> Result<()> {
        let mut scene_loader = Self {
            factory,
            layouts,
            frame_buffer,
            storage,
        };
        scene_loader.load_scene(description)?;

        Ok(())
    }

    fn load_scene(&mut self, description: &SceneDescription) -> Result<()> {
        log::debug!(
            "Loading scene: {}x{} grid of {} sub-meshes with {} bones",
            description.cols,
            description.rows,
            description.model.meshes.len(),
            description.model.skeleton.bone_count()
        );

        if description.animation.bone_count() != description.model.skeleton.bone_count() {
            return Err(Error::ContractViolation(format!(
                "The model has {} bones but the animation drives {}",
                description.model.skeleton.bone_count(),
                description.animation.bone_count()
            ))
            .into());
        }

        self.storage.descriptor_pool = Some(DescriptorPool::new(
            "SCENE_DESCRIPTOR_POOL",
            description.descriptor_pool_config(self.layouts)?,
        ));

        let skinned_geometry = self.load_skinned_geometry(description)?;
        let skeleton = Rc::new(description.model.skeleton.clone());
        let mut rng = rand::thread_rng();

        for col in 0..description.cols {
            for row in 0..description.rows {
                let mut drawable = self.create_animated_mesh(
                    &format!("ANIMATED_MESH_{col}_{row}"),
                    grid_transform(col, row),
                    &skinned_geometry,
                    skeleton.clone(),
                    description.animation.clone(),
                )?;
                drawable.update(rng.gen_range(0..MAX_START_OFFSET_MILLIS))?;
                self.storage.drawables.push(Box::new(drawable));
            }
        }

        if let Some(static_mesh) = &description.static_mesh {
            let geometry = self.load_static_geometry(static_mesh)?;
            let drawable = self.create_static_mesh(
                "STATIC_MESH",
                Transform::from_translation(grid_center(description.rows, description.cols).to_vec()),
                geometry,
            )?;
            self.storage.drawables.push(Box::new(drawable));
        }

        log::info!(
            "Scene loaded with {} drawables, device-local heap at {} of {} bytes, image heap at {} of {} bytes",
            self.storage.drawables.len(),
            self.factory.device_local_heap().current_offset(),
            self.factory.device_local_heap().size(),
            self.factory.image_heap().current_offset(),
            self.factory.image_heap().size()
        );

        Ok(())
    }

    fn load_skinned_geometry(
        &mut self,
        description: &SceneDescription,
    ) -> Result<Vec<Rc<MeshGeometry>>> {
        let mut geometry = Vec::with_capacity(description.model.meshes.len());

        for (index, sub_mesh) in description.model.meshes.iter().enumerate() {
            let label = format!("SKINNED_MESH_{index}");
            if let Some(existing) = self.storage.geometry_registry.get(&label) {
                geometry.push(existing.clone());
                continue;
            }

            let texture = self.load_texture(&texture_candidates(
                &sub_mesh.texture,
                &description.model_dir,
                description.texture_dir.as_deref(),
            ))?;

            let mesh_geometry = Rc::new(self.create_geometry(
                &label,
                bytemuck::cast_slice(&sub_mesh.vertices),
                &sub_mesh.indices,
                texture,
            )?);
            self.storage
                .geometry_registry
                .insert(label, mesh_geometry.clone());
            geometry.push(mesh_geometry);
        }

        Ok(geometry)
    }

    fn load_static_geometry(&mut self, static_mesh: &ObjMesh) -> Result<Rc<MeshGeometry>> {
        let label = String::from("STATIC_MESH_0");
        if let Some(existing) = self.storage.geometry_registry.get(&label) {
            return Ok(existing.clone());
        }

        let texture = self.default_texture()?;
        let geometry = Rc::new(self.create_geometry(
            &label,
            bytemuck::cast_slice(&static_mesh.vertices),
            &static_mesh.indices,
            texture,
        )?);
        self.storage
            .geometry_registry
            .insert(label, geometry.clone());

        Ok(geometry)
    }

    fn create_geometry(
        &self,
        label: &str,
        vertex_data: &[u8],
        indices: &[u32],
        texture: Rc<Texture2DPackage>,
    ) -> Result<MeshGeometry, Error> {
        let vertex_buffer = self.factory.create_buffer_from_data(
            &format!("{label}_VERTEX_BUFFER"),
            vertex_data,
            wgpu::BufferUsages::VERTEX,
        )?;
        let index_buffer = self.factory.create_buffer_from_data(
            &format!("{label}_INDEX_BUFFER"),
            bytemuck::cast_slice(indices),
            wgpu::BufferUsages::INDEX,
        )?;

        Ok(MeshGeometry {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            texture,
        })
    }

    /// First candidate that loads wins; a texture that cannot be found falls back to white.
    fn load_texture(&mut self, candidates: &[PathBuf]) -> Result<Rc<Texture2DPackage>> {
        for path in candidates {
            if let Some(texture) = self.storage.texture_registry.get(path) {
                return Ok(texture.clone());
            }
            if !path.is_file() {
                continue;
            }

            let image = match Image::open(path) {
                Ok(image) => image,
                Err(error) => {
                    log::warn!("Failed to decode texture {}: {error:#}", path.display());
                    continue;
                }
            };

            let label = format!("TEXTURE_{}", self.storage.texture_registry.len());
            let sampler = self.sampler();
            let texture = Rc::new(self.factory.create_texture(&label, &image, sampler)?);
            self.storage
                .texture_registry
                .insert(path.clone(), texture.clone());

            return Ok(texture);
        }

        log::warn!(
            "Texture not found, using the default texture. Looked in: {:?}",
            candidates
        );
        self.default_texture()
    }

    fn default_texture(&mut self) -> Result<Rc<Texture2DPackage>> {
        if let Some(default_texture) = &self.storage.default_texture {
            return Ok(default_texture.clone());
        }

        let sampler = self.sampler();
        let default_texture = Rc::new(self.factory.create_texture(
            "DEFAULT_TEXTURE",
            &Image::white_pixel(),
            sampler,
        )?);
        self.storage.default_texture = Some(default_texture.clone());

        Ok(default_texture)
    }

    fn sampler(&mut self) -> Rc<Sampler> {
        match &self.storage.sampler {
            Some(sampler) => sampler.clone(),
            None => {
                let sampler = self.factory.create_sampler("DEFAULT_SAMPLER");
                self.storage.sampler = Some(sampler.clone());
                sampler
            }
        }
    }

    fn create_uniform_buffer(&self, label: &str, size: usize) -> Result<GpuBuffer, Error> {
        self.factory.create_buffer(
            label,
            size as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            MemoryProperties::DEVICE_LOCAL,
        )
    }

    fn create_animated_mesh(
        &mut self,
        label: &str,
        transform: Transform,
        geometry: &[Rc<MeshGeometry>],
        skeleton: Rc<Skeleton>,
        clip: Rc<AnimationClip>,
    ) -> Result<AnimatedMesh> {
        let object_buffer = self.create_uniform_buffer(
            &format!("{label}_OBJECT_CONSTANTS"),
            std::mem::size_of::<ObjectConstants>(),
        )?;
        let animation_buffer = self.create_uniform_buffer(
            &format!("{label}_ANIMATION_CONSTANTS"),
            std::mem::size_of::<AnimationConstants>(),
        )?;

        let sub_meshes = geometry
            .iter()
            .map(|geometry| {
                self.create_sub_mesh(
                    geometry.clone(),
                    MeshKind::Skinned,
                    &object_buffer,
                    Some(&animation_buffer),
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(AnimatedMesh::new(
            label,
            transform,
            object_buffer,
            animation_buffer,
            skeleton,
            Box::new(KeyframeAnimation::new(clip)),
            sub_meshes,
        )?)
    }

    fn create_static_mesh(
        &mut self,
        label: &str,
        transform: Transform,
        geometry: Rc<MeshGeometry>,
    ) -> Result<StaticMesh> {
        let object_buffer = self.create_uniform_buffer(
            &format!("{label}_OBJECT_CONSTANTS"),
            std::mem::size_of::<ObjectConstants>(),
        )?;
        let sub_mesh = self.create_sub_mesh(geometry, MeshKind::Static, &object_buffer, None)?;

        Ok(StaticMesh::new(label, transform, object_buffer, vec![sub_mesh]))
    }

    fn create_sub_mesh(
        &mut self,
        geometry: Rc<MeshGeometry>,
        kind: MeshKind,
        object_buffer: &GpuBuffer,
        animation_buffer: Option<&GpuBuffer>,
    ) -> Result<SubMesh, Error> {
        let layout = self.layouts.for_kind(kind);
        let pool = self
            .storage
            .descriptor_pool
            .as_mut()
            .ok_or_else(|| Error::ContractViolation(String::from("No descriptor pool")))?;

        let mut descriptor_set = pool.allocate_descriptor_set(layout)?;
        {
            let mut writes = vec![
                DescriptorWrite::UniformBuffer {
                    binding: FRAME_BINDING,
                    buffer: self.frame_buffer,
                },
                DescriptorWrite::UniformBuffer {
                    binding: OBJECT_BINDING,
                    buffer: object_buffer,
                },
                DescriptorWrite::CombinedImageSampler {
                    binding: TEXTURE_BINDING,
                    texture: &geometry.texture,
                },
            ];
            if let Some(animation_buffer) = animation_buffer {
                writes.push(DescriptorWrite::UniformBuffer {
                    binding: ANIMATION_BINDING,
                    buffer: animation_buffer,
                });
            }

            pool.update_descriptor_set(self.factory.device(), &mut descriptor_set, &writes)?;
        }

        Ok(SubMesh {
            geometry,
            descriptor_set,
        })
    }
}
