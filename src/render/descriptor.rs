//! Descriptor set layouts, a fixed-capacity descriptor pool, and batched set updates.
//!
//! A combined image sampler at binding `b` occupies two bind group slots: the texture view
//! at `b` and its sampler at `b + 1`.

use std::rc::Rc;

use crate::error::Error;
use crate::render::buffer::GpuBuffer;
use crate::render::image::ImageLayout;
use crate::render::pipeline::MeshKind;
use crate::render::texture::Texture2DPackage;

pub const FRAME_BINDING: u32 = 0;
pub const OBJECT_BINDING: u32 = 1;
pub const TEXTURE_BINDING: u32 = 2;
pub const ANIMATION_BINDING: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    UniformBuffer,
    CombinedImageSampler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub visibility: wgpu::ShaderStages,
}

impl DescriptorBinding {
    pub fn uniform_buffer(binding: u32, visibility: wgpu::ShaderStages) -> Self {
        Self {
            binding,
            descriptor_type: DescriptorType::UniformBuffer,
            visibility,
        }
    }

    pub fn combined_image_sampler(binding: u32, visibility: wgpu::ShaderStages) -> Self {
        Self {
            binding,
            descriptor_type: DescriptorType::CombinedImageSampler,
            visibility,
        }
    }

    fn slots(&self) -> std::ops::Range<u32> {
        match self.descriptor_type {
            DescriptorType::UniformBuffer => self.binding..self.binding + 1,
            DescriptorType::CombinedImageSampler => self.binding..self.binding + 2,
        }
    }

    fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        match self.descriptor_type {
            DescriptorType::UniformBuffer => vec![wgpu::BindGroupLayoutEntry {
                binding: self.binding,
                visibility: self.visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            DescriptorType::CombinedImageSampler => vec![
                wgpu::BindGroupLayoutEntry {
                    binding: self.binding,
                    visibility: self.visibility,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: self.binding + 1,
                    visibility: self.visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        }
    }
}

/// Per-type descriptor counts consumed from a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorCounts {
    pub sets: u32,
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
}

impl DescriptorCounts {
    pub fn of_bindings(bindings: &[DescriptorBinding]) -> Self {
        bindings.iter().fold(
            Self {
                sets: 1,
                ..Default::default()
            },
            |mut counts, binding| {
                match binding.descriptor_type {
                    DescriptorType::UniformBuffer => counts.uniform_buffers += 1,
                    DescriptorType::CombinedImageSampler => counts.combined_image_samplers += 1,
                }
                counts
            },
        )
    }

    /// `None` when any count overflows.
    pub fn checked_scale(&self, factor: u32) -> Option<Self> {
        Some(Self {
            sets: self.sets.checked_mul(factor)?,
            uniform_buffers: self.uniform_buffers.checked_mul(factor)?,
            combined_image_samplers: self.combined_image_samplers.checked_mul(factor)?,
        })
    }

    /// `None` when any count overflows.
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            sets: self.sets.checked_add(other.sets)?,
            uniform_buffers: self.uniform_buffers.checked_add(other.uniform_buffers)?,
            combined_image_samplers: self
                .combined_image_samplers
                .checked_add(other.combined_image_samplers)?,
        })
    }
}

/// Checks that no two bindings share a bind group slot.
pub fn validate_bindings(label: &str, bindings: &[DescriptorBinding]) -> Result<(), Error> {
    for (index, binding) in bindings.iter().enumerate() {
        let slots = binding.slots();
        for other in bindings[index + 1..].iter() {
            let other_slots = other.slots();
            if slots.start < other_slots.end && other_slots.start < slots.end {
                return Err(Error::DescriptorMismatch(format!(
                    "Layout {label}: bindings {} and {} overlap",
                    binding.binding, other.binding
                )));
            }
        }
    }

    Ok(())
}

pub struct DescriptorSetLayout {
    label: String,
    bindings: Vec<DescriptorBinding>,
    gpu_layout: wgpu::BindGroupLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        bindings: Vec<DescriptorBinding>,
    ) -> Result<Self, Error> {
        validate_bindings(label, &bindings)?;

        let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
            .iter()
            .flat_map(DescriptorBinding::layout_entries)
            .collect();

        log::debug!("Creating descriptor set layout {label} with {} entries", entries.len());

        let gpu_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label}_BIND_GROUP_LAYOUT")),
            entries: &entries,
        });

        Ok(Self {
            label: label.to_string(),
            bindings,
            gpu_layout,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    pub fn counts(&self) -> DescriptorCounts {
        DescriptorCounts::of_bindings(&self.bindings)
    }

    pub fn gpu_layout(&self) -> &wgpu::BindGroupLayout {
        &self.gpu_layout
    }
}

/// Bindings of a static mesh: frame and object constants plus the diffuse texture.
pub fn static_mesh_bindings() -> Vec<DescriptorBinding> {
    vec![
        DescriptorBinding::uniform_buffer(FRAME_BINDING, wgpu::ShaderStages::VERTEX_FRAGMENT),
        DescriptorBinding::uniform_buffer(OBJECT_BINDING, wgpu::ShaderStages::VERTEX),
        DescriptorBinding::combined_image_sampler(TEXTURE_BINDING, wgpu::ShaderStages::FRAGMENT),
    ]
}

/// Bindings of a skinned mesh: the static mesh bindings plus the bone matrices.
pub fn skinned_mesh_bindings() -> Vec<DescriptorBinding> {
    let mut bindings = static_mesh_bindings();
    bindings.push(DescriptorBinding::uniform_buffer(
        ANIMATION_BINDING,
        wgpu::ShaderStages::VERTEX,
    ));
    bindings
}

/// The set layouts shared by every drawable of a kind.
pub struct DescriptorLayouts {
    pub static_mesh: Rc<DescriptorSetLayout>,
    pub skinned_mesh: Rc<DescriptorSetLayout>,
}

impl DescriptorLayouts {
    pub fn new(device: &wgpu::Device) -> Result<Self, Error> {
        Ok(Self {
            static_mesh: Rc::new(DescriptorSetLayout::new(
                device,
                "STATIC_MESH",
                static_mesh_bindings(),
            )?),
            skinned_mesh: Rc::new(DescriptorSetLayout::new(
                device,
                "SKINNED_MESH",
                skinned_mesh_bindings(),
            )?),
        })
    }

    pub fn for_kind(&self, kind: MeshKind) -> &Rc<DescriptorSetLayout> {
        match kind {
            MeshKind::Static => &self.static_mesh,
            MeshKind::Skinned => &self.skinned_mesh,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
}

impl DescriptorPoolConfig {
    /// Capacity for `count` sets of the given layout.
    pub fn for_drawables(count: u32, bindings: &[DescriptorBinding]) -> Result<Self, Error> {
        DescriptorCounts::of_bindings(bindings)
            .checked_scale(count)
            .map(Self::from)
            .ok_or_else(|| {
                Error::ContractViolation(format!(
                    "{count} descriptor sets exceed the addressable pool capacity"
                ))
            })
    }

    pub fn combine(&self, other: &Self) -> Result<Self, Error> {
        DescriptorCounts::from(*self)
            .checked_add(&DescriptorCounts::from(*other))
            .map(Self::from)
            .ok_or_else(|| {
                Error::ContractViolation(String::from(
                    "Combined descriptor pool capacity overflows",
                ))
            })
    }
}

impl From<DescriptorPoolConfig> for DescriptorCounts {
    fn from(value: DescriptorPoolConfig) -> Self {
        Self {
            sets: value.max_sets,
            uniform_buffers: value.uniform_buffers,
            combined_image_samplers: value.combined_image_samplers,
        }
    }
}

impl From<DescriptorCounts> for DescriptorPoolConfig {
    fn from(value: DescriptorCounts) -> Self {
        Self {
            max_sets: value.sets,
            uniform_buffers: value.uniform_buffers,
            combined_image_samplers: value.combined_image_samplers,
        }
    }
}

/// Fixed-capacity pool. Capacity is never grown; sets are not returned individually.
pub struct DescriptorPool {
    label: String,
    config: DescriptorPoolConfig,
    allocated: DescriptorCounts,
}

impl DescriptorPool {
    pub fn new(label: &str, config: DescriptorPoolConfig) -> Self {
        log::debug!("Creating descriptor pool {label}: {:?}", config);

        Self {
            label: label.to_string(),
            config,
            allocated: Default::default(),
        }
    }

    pub fn allocated(&self) -> DescriptorCounts {
        self.allocated
    }

    pub fn allocate_descriptor_set(
        &mut self,
        layout: &Rc<DescriptorSetLayout>,
    ) -> Result<DescriptorSet, Error> {
        self.reserve(&layout.counts())?;

        Ok(DescriptorSet {
            layout: layout.clone(),
            bind_group: None,
        })
    }

    /// Takes `counts` out of the remaining capacity, or fails leaving the pool untouched.
    pub fn reserve(&mut self, counts: &DescriptorCounts) -> Result<(), Error> {
        let Some(requested) = self.allocated.checked_add(counts) else {
            return Err(Error::PoolExhausted(format!(
                "{} cannot count past u32::MAX descriptors",
                self.label
            )));
        };

        let exhausted = if requested.sets > self.config.max_sets {
            Some(("sets", self.config.max_sets))
        } else if requested.uniform_buffers > self.config.uniform_buffers {
            Some(("uniform buffers", self.config.uniform_buffers))
        } else if requested.combined_image_samplers > self.config.combined_image_samplers {
            Some((
                "combined image samplers",
                self.config.combined_image_samplers,
            ))
        } else {
            None
        };

        if let Some((kind, capacity)) = exhausted {
            return Err(Error::PoolExhausted(format!(
                "{} has no room for more {kind} (capacity {capacity})",
                self.label
            )));
        }

        self.allocated = requested;
        Ok(())
    }

    /// Returns the whole capacity to the pool. Sets allocated earlier must not be reused.
    pub fn reset(&mut self) {
        log::debug!("Resetting descriptor pool {}", self.label);
        self.allocated = Default::default();
    }

    /// Writes every binding of `set` in a single bind group creation.
    pub fn update_descriptor_set(
        &self,
        device: &wgpu::Device,
        set: &mut DescriptorSet,
        writes: &[DescriptorWrite<'_>],
    ) -> Result<(), Error> {
        let layout = set.layout.clone();

        let written: Vec<(u32, DescriptorType)> = writes
            .iter()
            .map(|write| (write.binding(), write.descriptor_type()))
            .collect();
        check_coverage(layout.label(), layout.bindings(), &written)?;

        for write in writes.iter() {
            write.check_resource()?;
        }

        let entries: Vec<wgpu::BindGroupEntry> = writes
            .iter()
            .flat_map(DescriptorWrite::bind_group_entries)
            .collect();

        set.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}_BIND_GROUP", layout.label())),
            layout: layout.gpu_layout(),
            entries: &entries,
        }));

        Ok(())
    }
}

/// Checks that every layout binding is written exactly once with a matching type.
pub fn check_coverage(
    label: &str,
    bindings: &[DescriptorBinding],
    written: &[(u32, DescriptorType)],
) -> Result<(), Error> {
    for (binding, descriptor_type) in written.iter() {
        let expected = match bindings.iter().find(|entry| entry.binding == *binding) {
            Some(entry) => entry.descriptor_type,
            None => {
                return Err(Error::DescriptorMismatch(format!(
                    "Layout {label} has no binding {binding}"
                )))
            }
        };

        if expected != *descriptor_type {
            return Err(Error::DescriptorMismatch(format!(
                "Layout {label} binding {binding} expects {expected:?}, got {descriptor_type:?}"
            )));
        }
    }

    for entry in bindings.iter() {
        let count = written
            .iter()
            .filter(|(binding, _)| *binding == entry.binding)
            .count();

        if count != 1 {
            return Err(Error::DescriptorMismatch(format!(
                "Layout {label} binding {} written {count} times",
                entry.binding
            )));
        }
    }

    Ok(())
}

pub struct DescriptorSet {
    layout: Rc<DescriptorSetLayout>,
    bind_group: Option<wgpu::BindGroup>,
}

impl DescriptorSet {
    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    /// `None` until the set has been written.
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }
}

pub enum DescriptorWrite<'a> {
    UniformBuffer {
        binding: u32,
        buffer: &'a GpuBuffer,
    },
    CombinedImageSampler {
        binding: u32,
        texture: &'a Texture2DPackage,
    },
}

impl<'a> DescriptorWrite<'a> {
    pub fn binding(&self) -> u32 {
        match self {
            Self::UniformBuffer { binding, .. } => *binding,
            Self::CombinedImageSampler { binding, .. } => *binding,
        }
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            Self::UniformBuffer { .. } => DescriptorType::UniformBuffer,
            Self::CombinedImageSampler { .. } => DescriptorType::CombinedImageSampler,
        }
    }

    fn check_resource(&self) -> Result<(), Error> {
        match self {
            Self::UniformBuffer { binding, buffer } => {
                if !buffer.usage().contains(wgpu::BufferUsages::UNIFORM) {
                    return Err(Error::DescriptorMismatch(format!(
                        "Buffer {} bound at {binding} was not created for uniform use",
                        buffer.label()
                    )));
                }
            }
            Self::CombinedImageSampler { binding, texture } => {
                if texture.image.layout() != ImageLayout::ShaderReadOnly {
                    return Err(Error::LayoutMismatch {
                        label: format!("{} (binding {binding})", texture.image.label()),
                        expected: ImageLayout::ShaderReadOnly,
                        actual: texture.image.layout(),
                    });
                }
            }
        }

        Ok(())
    }

    fn bind_group_entries(&self) -> Vec<wgpu::BindGroupEntry<'a>> {
        match *self {
            Self::UniformBuffer { binding, buffer } => vec![wgpu::BindGroupEntry {
                binding,
                resource: buffer.binding(),
            }],
            Self::CombinedImageSampler { binding, texture } => vec![
                wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::TextureView(&texture.gpu_texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: binding + 1,
                    resource: wgpu::BindingResource::Sampler(&texture.sampler.gpu_sampler),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_set_from_a_four_set_pool_is_refused() {
        let counts = DescriptorCounts::of_bindings(&skinned_mesh_bindings());
        let mut pool = DescriptorPool::new(
            "TEST_POOL",
            DescriptorPoolConfig {
                max_sets: 4,
                uniform_buffers: 100,
                combined_image_samplers: 100,
            },
        );

        for _ in 0..4 {
            pool.reserve(&counts).unwrap();
        }

        assert!(matches!(pool.reserve(&counts), Err(Error::PoolExhausted(_))));
        assert_eq!(pool.allocated().sets, 4);
    }

    #[test]
    fn descriptor_type_capacity_is_enforced_separately() {
        let counts = DescriptorCounts::of_bindings(&static_mesh_bindings());
        let mut pool = DescriptorPool::new(
            "TEST_POOL",
            DescriptorPoolConfig {
                max_sets: 10,
                uniform_buffers: 10,
                combined_image_samplers: 1,
            },
        );

        pool.reserve(&counts).unwrap();
        assert!(matches!(pool.reserve(&counts), Err(Error::PoolExhausted(_))));
        assert_eq!(pool.allocated(), counts);
    }

    #[test]
    fn reset_returns_all_capacity() {
        let counts = DescriptorCounts::of_bindings(&static_mesh_bindings());
        let mut pool = DescriptorPool::new(
            "TEST_POOL",
            DescriptorPoolConfig::for_drawables(1, &static_mesh_bindings()).unwrap(),
        );

        pool.reserve(&counts).unwrap();
        assert!(pool.reserve(&counts).is_err());

        pool.reset();
        pool.reserve(&counts).unwrap();
    }

    #[test]
    fn pool_sizing_scales_per_drawable() {
        let config = DescriptorPoolConfig::for_drawables(100, &skinned_mesh_bindings()).unwrap();

        assert_eq!(config.max_sets, 100);
        assert_eq!(config.uniform_buffers, 300);
        assert_eq!(config.combined_image_samplers, 100);

        let combined = config
            .combine(&DescriptorPoolConfig::for_drawables(2, &static_mesh_bindings()).unwrap())
            .unwrap();
        assert_eq!(combined.max_sets, 102);
        assert_eq!(combined.uniform_buffers, 304);
    }

    #[test]
    fn pool_sizing_overflow_is_an_error() {
        assert!(matches!(
            DescriptorPoolConfig::for_drawables(u32::MAX, &skinned_mesh_bindings()),
            Err(Error::ContractViolation(_))
        ));

        let full = DescriptorPoolConfig {
            max_sets: u32::MAX,
            uniform_buffers: 0,
            combined_image_samplers: 0,
        };
        let one = DescriptorPoolConfig::for_drawables(1, &static_mesh_bindings()).unwrap();
        assert!(full.combine(&one).is_err());
    }

    #[test]
    fn sampler_slot_collisions_are_rejected() {
        let bindings = vec![
            DescriptorBinding::combined_image_sampler(0, wgpu::ShaderStages::FRAGMENT),
            DescriptorBinding::uniform_buffer(1, wgpu::ShaderStages::VERTEX),
        ];
        assert!(matches!(
            validate_bindings("BROKEN", &bindings),
            Err(Error::DescriptorMismatch(_))
        ));

        validate_bindings("SKINNED", &skinned_mesh_bindings()).unwrap();
    }

    #[test]
    fn complete_writes_are_accepted() {
        let written = vec![
            (FRAME_BINDING, DescriptorType::UniformBuffer),
            (OBJECT_BINDING, DescriptorType::UniformBuffer),
            (TEXTURE_BINDING, DescriptorType::CombinedImageSampler),
        ];
        check_coverage("STATIC", &static_mesh_bindings(), &written).unwrap();
    }

    #[test]
    fn missing_duplicate_and_mistyped_writes_are_rejected() {
        let bindings = static_mesh_bindings();

        let missing = vec![
            (FRAME_BINDING, DescriptorType::UniformBuffer),
            (TEXTURE_BINDING, DescriptorType::CombinedImageSampler),
        ];
        assert!(check_coverage("STATIC", &bindings, &missing).is_err());

        let duplicate = vec![
            (FRAME_BINDING, DescriptorType::UniformBuffer),
            (FRAME_BINDING, DescriptorType::UniformBuffer),
            (OBJECT_BINDING, DescriptorType::UniformBuffer),
            (TEXTURE_BINDING, DescriptorType::CombinedImageSampler),
        ];
        assert!(check_coverage("STATIC", &bindings, &duplicate).is_err());

        let mistyped = vec![
            (FRAME_BINDING, DescriptorType::UniformBuffer),
            (OBJECT_BINDING, DescriptorType::CombinedImageSampler),
            (TEXTURE_BINDING, DescriptorType::CombinedImageSampler),
        ];
        assert!(matches!(
            check_coverage("STATIC", &bindings, &mistyped),
            Err(Error::DescriptorMismatch(_))
        ));

        let unknown = vec![(9, DescriptorType::UniformBuffer)];
        assert!(check_coverage("STATIC", &bindings, &unknown).is_err());
    }

    #[test]
    fn texture_still_awaiting_upload_is_rejected_by_name() {
        use crate::memory::MemoryProperties;
        use crate::render::image::ImageTiling;
        use crate::render::resource::TEXTURE_FORMAT;

        let Some(factory) = crate::render::resource::headless_factory(&Default::default()) else {
            return;
        };

        let layout = Rc::new(
            DescriptorSetLayout::new(factory.device(), "STATIC_MESH", static_mesh_bindings())
                .unwrap(),
        );
        let mut pool = DescriptorPool::new(
            "TEST_POOL",
            DescriptorPoolConfig::for_drawables(1, layout.bindings()).unwrap(),
        );
        let mut set = pool.allocate_descriptor_set(&layout).unwrap();

        let uniform = |label: &str| {
            factory
                .create_buffer(
                    label,
                    64,
                    wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    MemoryProperties::DEVICE_LOCAL,
                )
                .unwrap()
        };
        let frame_buffer = uniform("FRAME_BUFFER");
        let object_buffer = uniform("OBJECT_BUFFER");

        let image = factory
            .create_image(
                "UNSAMPLED_TEXTURE",
                4,
                4,
                TEXTURE_FORMAT,
                ImageTiling::Optimal,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                MemoryProperties::DEVICE_LOCAL,
            )
            .unwrap();
        let gpu_texture_view = image.create_view();
        let texture = Texture2DPackage {
            image,
            gpu_texture_view,
            sampler: factory.create_sampler("TEST_SAMPLER"),
        };

        let result = pool.update_descriptor_set(
            factory.device(),
            &mut set,
            &[
                DescriptorWrite::UniformBuffer {
                    binding: FRAME_BINDING,
                    buffer: &frame_buffer,
                },
                DescriptorWrite::UniformBuffer {
                    binding: OBJECT_BINDING,
                    buffer: &object_buffer,
                },
                DescriptorWrite::CombinedImageSampler {
                    binding: TEXTURE_BINDING,
                    texture: &texture,
                },
            ],
        );

        match result {
            Err(Error::LayoutMismatch { label, actual, .. }) => {
                assert!(label.starts_with("UNSAMPLED_TEXTURE"));
                assert_eq!(actual, ImageLayout::Undefined);
            }
            other => panic!("expected LayoutMismatch, got {other:?}"),
        }
        assert!(set.bind_group().is_none());
    }

    #[test]
    fn fifth_allocation_on_a_device_is_refused() {
        let Some(factory) = crate::render::resource::headless_factory(&Default::default()) else {
            return;
        };

        let layout = Rc::new(
            DescriptorSetLayout::new(factory.device(), "SKINNED_MESH", skinned_mesh_bindings())
                .unwrap(),
        );
        let mut pool = DescriptorPool::new(
            "TEST_POOL",
            DescriptorPoolConfig::for_drawables(4, layout.bindings()).unwrap(),
        );

        let sets: Vec<DescriptorSet> = (0..4)
            .map(|_| pool.allocate_descriptor_set(&layout).unwrap())
            .collect();
        assert!(sets.iter().all(|set| set.bind_group().is_none()));

        assert!(matches!(
            pool.allocate_descriptor_set(&layout),
            Err(Error::PoolExhausted(_))
        ));
    }
}
