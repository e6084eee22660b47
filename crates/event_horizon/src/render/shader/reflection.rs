//! Shader resource reflection
//!
//! Turns parsed SPIR-V modules plus a caller-supplied [`ShaderResourceInfo`]
//! into a [`ShaderReflectionInfo`]: descriptor bindings per set, the vertex
//! input layout and packed push-constant ranges. No binding tables are written
//! by hand; everything comes from the binaries and a handful of overrides.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ash::vk;
use thiserror::Error;

use super::spirv::{DescriptorResource, SpirvError, SpirvModule};

/// Reflection failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectionError {
    /// The binary could not be reflected
    #[error("SPIR-V reflection error: {0}")]
    Parse(#[from] SpirvError),

    /// An offset, size or location computed from the module does not fit in 32 bits
    #[error("Layout of {what} overflows 32 bits")]
    SizeOverflow {
        /// Item whose layout overflowed
        what: String,
    },

    /// Caller declared a different number of push-constant names than the block has members
    #[error("Push constant names for {stage:?}: expected {expected} members, got {found} names")]
    PushConstantNameMismatch {
        /// Stage whose block was reflected
        stage: vk::ShaderStageFlags,
        /// Members in the block
        expected: usize,
        /// Names supplied by the caller
        found: usize,
    },

    /// A push-constant block starts inside a range already claimed by an earlier stage
    ///
    /// Blocks are packed one after another in module order, each stage's range
    /// starting where the previous one ended. A vertex and a fragment block that
    /// both start at offset 0 are therefore rejected; the later stage has to
    /// place its members past the earlier block's end.
    #[error("Push constant block for {stage:?} starts at {offset}, below the packed total {total}")]
    PushConstantOverlap {
        /// Stage whose block overlaps
        stage: vk::ShaderStageFlags,
        /// First member offset of the block
        offset: u32,
        /// Bytes already claimed
        total: u32,
    },

    /// Two stages declare the same slot with different kinds or counts
    #[error("Conflicting declarations for set {set} binding {binding}")]
    ConflictingBinding {
        /// Descriptor set index
        set: u32,
        /// Binding slot
        binding: u32,
    },

    /// Descriptor set indices skip a value
    #[error("Descriptor set {missing} is unused but higher sets are declared")]
    NonContiguousSets {
        /// First missing set index
        missing: u32,
    },
}

/// One slot of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot
    pub binding: u32,
    /// Descriptor type
    pub kind: vk::DescriptorType,
    /// Array element count
    pub count: u32,
    /// Stages that access the slot
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    /// Vulkan layout binding
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.kind)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
            .build()
    }
}

/// A vertex buffer binding description
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexInputBinding {
    /// Binding slot
    pub binding: u32,
    /// Bytes between consecutive elements
    pub stride: u32,
    /// Per-vertex or per-instance stepping
    pub rate: vk::VertexInputRate,
}

impl VertexInputBinding {
    /// Vulkan binding description
    pub fn to_vk(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: self.binding,
            stride: self.stride,
            input_rate: self.rate,
        }
    }
}

/// A vertex attribute description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInputAttribute {
    /// Shader location
    pub location: u32,
    /// Source binding
    pub binding: u32,
    /// Attribute format
    pub format: vk::Format,
    /// Byte offset inside the element
    pub offset: u32,
}

impl VertexInputAttribute {
    /// Vulkan attribute description
    pub fn to_vk(&self) -> vk::VertexInputAttributeDescription {
        vk::VertexInputAttributeDescription {
            location: self.location,
            binding: self.binding,
            format: self.format,
            offset: self.offset,
        }
    }
}

/// A push-constant range of the pipeline layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Stage that reads the range
    pub stage: vk::ShaderStageFlags,
    /// First byte
    pub offset: u32,
    /// Length in bytes
    pub size: u32,
}

impl PushConstantRange {
    /// One past the last byte, `None` if that lies beyond `u32::MAX`
    pub fn end(&self) -> Option<u32> {
        self.offset.checked_add(self.size)
    }

    /// Vulkan push-constant range
    pub fn to_vk(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stage,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// Caller-declared vertex buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferInfo {
    /// Binding slot
    pub binding: u32,
    /// Element stride in bytes
    pub stride: u32,
    /// Step per instance instead of per vertex
    pub per_instance: bool,
}

/// Caller-declared placement of one vertex location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttributeInfo {
    /// Binding the location reads from
    pub binding: u32,
    /// Shader location
    pub location: u32,
    /// Byte offset inside the element
    pub offset: u32,
}

/// Caller-declared uniform or storage buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBufferInfo {
    /// Descriptor set index
    pub set: u32,
    /// Binding slot
    pub binding: u32,
    /// Bound with a dynamic offset
    pub dynamic: bool,
}

/// Push-constant member names for one stage, in block member order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantInfo {
    /// Stage owning the block
    pub stage: vk::ShaderStageFlags,
    /// One name per block member
    pub names: Vec<String>,
}

/// Everything the binaries cannot say about how a shader will be fed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderResourceInfo {
    /// Vertex buffer strides and step rates
    pub vertex_buffers: Vec<VertexBufferInfo>,
    /// Per-location binding/offset overrides
    pub vertex_attributes: Vec<VertexAttributeInfo>,
    /// Dynamic-offset declarations; undeclared buffers are static
    pub uniform_buffers: Vec<UniformBufferInfo>,
    /// Push-constant names per stage
    pub push_constants: Vec<PushConstantInfo>,
}

impl ShaderResourceInfo {
    /// Declare a vertex buffer
    pub fn with_vertex_buffer(mut self, binding: u32, stride: u32, per_instance: bool) -> Self {
        self.vertex_buffers.push(VertexBufferInfo { binding, stride, per_instance });
        self
    }

    /// Place a vertex location in a binding at an offset
    pub fn with_vertex_attribute(mut self, binding: u32, location: u32, offset: u32) -> Self {
        self.vertex_attributes.push(VertexAttributeInfo { binding, location, offset });
        self
    }

    /// Declare a uniform or storage buffer slot
    pub fn with_uniform_buffer(mut self, set: u32, binding: u32, dynamic: bool) -> Self {
        self.uniform_buffers.push(UniformBufferInfo { set, binding, dynamic });
        self
    }

    /// Name the push-constant members of a stage
    pub fn with_push_constants(mut self, stage: vk::ShaderStageFlags, names: &[&str]) -> Self {
        self.push_constants.push(PushConstantInfo {
            stage,
            names: names.iter().map(|name| (*name).to_string()).collect(),
        });
        self
    }

    fn push_constant_names(&self, stage: vk::ShaderStageFlags) -> Option<&[String]> {
        self.push_constants
            .iter()
            .find(|info| info.stage == stage)
            .map(|info| info.names.as_slice())
    }
}

/// Reflected layout of a whole shader (all of its stages)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflectionInfo {
    /// Bindings per set index, each list sorted by binding slot
    pub descriptor_sets: BTreeMap<u32, Vec<DescriptorBinding>>,
    /// Unique vertex buffer bindings
    pub vertex_bindings: Vec<VertexInputBinding>,
    /// Vertex attributes, matrix columns expanded
    pub vertex_attributes: Vec<VertexInputAttribute>,
    /// Packed push-constant ranges in stage order
    pub push_constant_ranges: Vec<PushConstantRange>,
    /// Push-constant member name to byte offset
    pub push_constant_offsets: HashMap<String, u32>,
}

impl ShaderReflectionInfo {
    /// Reflect a shader's modules in order
    pub fn from_modules<'m>(
        modules: impl IntoIterator<Item = (&'m SpirvModule, vk::ShaderStageFlags)>,
        resource_info: &ShaderResourceInfo,
    ) -> Result<Self, ReflectionError> {
        let mut reflector = ShaderReflector::new(resource_info);
        for (module, stage) in modules {
            reflector.reflect(module, stage)?;
        }
        reflector.finish()
    }

    /// Number of descriptor sets
    pub fn set_count(&self) -> usize {
        self.descriptor_sets.len()
    }

    /// Look up one slot
    pub fn binding(&self, set: u32, binding: u32) -> Option<&DescriptorBinding> {
        self.descriptor_sets
            .get(&set)?
            .iter()
            .find(|entry| entry.binding == binding)
    }

    /// Byte offset of a named push-constant member
    pub fn push_constant_offset(&self, name: &str) -> Option<u32> {
        self.push_constant_offsets.get(name).copied()
    }

    /// Bytes covered by all push-constant ranges
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_ranges.last().and_then(PushConstantRange::end).unwrap_or(0)
    }
}

/// Accumulates reflection across the modules of one shader
pub struct ShaderReflector<'a> {
    resource_info: &'a ShaderResourceInfo,
    dynamic_lookup: HashMap<u64, bool>,
    sets: BTreeMap<u32, BTreeMap<u32, DescriptorBinding>>,
    vertex_bindings: BTreeSet<VertexInputBinding>,
    vertex_attributes: Vec<VertexInputAttribute>,
    push_constant_ranges: Vec<PushConstantRange>,
    push_constant_offsets: HashMap<String, u32>,
    push_constant_total: u32,
}

fn slot_key(set: u32, binding: u32) -> u64 {
    (u64::from(set) << 32) | u64::from(binding)
}

impl<'a> ShaderReflector<'a> {
    /// Start reflecting with the given overrides
    pub fn new(resource_info: &'a ShaderResourceInfo) -> Self {
        let dynamic_lookup = resource_info
            .uniform_buffers
            .iter()
            .map(|info| (slot_key(info.set, info.binding), info.dynamic))
            .collect();

        Self {
            resource_info,
            dynamic_lookup,
            sets: BTreeMap::new(),
            vertex_bindings: BTreeSet::new(),
            vertex_attributes: Vec::new(),
            push_constant_ranges: Vec::new(),
            push_constant_offsets: HashMap::new(),
            push_constant_total: 0,
        }
    }

    /// Reflect one module compiled for `stage`
    pub fn reflect(&mut self, module: &SpirvModule, stage: vk::ShaderStageFlags) -> Result<(), ReflectionError> {
        self.reflect_push_constants(module, stage)?;
        self.reflect_descriptors(module, stage)?;
        if stage == vk::ShaderStageFlags::VERTEX {
            self.reflect_vertex_input(module)?;
        }
        Ok(())
    }

    /// Validate and produce the final layout
    pub fn finish(self) -> Result<ShaderReflectionInfo, ReflectionError> {
        // Pipeline layouts address sets by position, so gaps cannot be represented.
        for (expected, set) in self.sets.keys().enumerate() {
            let expected = expected as u32;
            if *set != expected {
                return Err(ReflectionError::NonContiguousSets { missing: expected });
            }
        }

        Ok(ShaderReflectionInfo {
            descriptor_sets: self
                .sets
                .into_iter()
                .map(|(set, bindings)| (set, bindings.into_values().collect()))
                .collect(),
            vertex_bindings: self.vertex_bindings.into_iter().collect(),
            vertex_attributes: self.vertex_attributes,
            push_constant_ranges: self.push_constant_ranges,
            push_constant_offsets: self.push_constant_offsets,
        })
    }

    fn reflect_push_constants(&mut self, module: &SpirvModule, stage: vk::ShaderStageFlags) -> Result<(), ReflectionError> {
        for block in &module.resources.push_constant_buffers {
            if block.members.is_empty() {
                continue;
            }

            let names: Vec<String> = match self.resource_info.push_constant_names(stage) {
                Some(names) => {
                    if names.len() != block.members.len() {
                        return Err(ReflectionError::PushConstantNameMismatch {
                            stage,
                            expected: block.members.len(),
                            found: names.len(),
                        });
                    }
                    names.to_vec()
                }
                None => block.members.iter().map(|member| member.name.clone()).collect(),
            };

            let start = block.start_offset();
            if start < self.push_constant_total {
                return Err(ReflectionError::PushConstantOverlap {
                    stage,
                    offset: start,
                    total: self.push_constant_total,
                });
            }

            let overflow = || ReflectionError::SizeOverflow {
                what: format!("push constant block '{}'", block.name),
            };
            let range = PushConstantRange {
                stage,
                offset: self.push_constant_total,
                size: block
                    .declared_size
                    .checked_sub(self.push_constant_total)
                    .ok_or_else(overflow)?,
            };
            log::debug!(
                "[SHADER] Push constant block '{}' for {:?}: offset {} size {}",
                block.name, stage, range.offset, range.size
            );
            self.push_constant_total = range.end().ok_or_else(overflow)?;
            self.push_constant_ranges.push(range);

            for (name, member) in names.into_iter().zip(&block.members) {
                if !name.is_empty() {
                    self.push_constant_offsets.insert(name, member.offset);
                }
            }
        }
        Ok(())
    }

    fn is_dynamic(&self, set: u32, binding: u32) -> bool {
        // Undeclared slots are static.
        self.dynamic_lookup
            .get(&slot_key(set, binding))
            .copied()
            .unwrap_or(false)
    }

    fn add_binding(&mut self, resource: &DescriptorResource, kind: vk::DescriptorType, stage: vk::ShaderStageFlags) -> Result<(), ReflectionError> {
        let count = resource.array_size.unwrap_or(1);
        let set = self.sets.entry(resource.set).or_default();

        match set.get_mut(&resource.binding) {
            Some(existing) if existing.kind == kind && existing.count == count => {
                existing.stages |= stage;
            }
            Some(_) => {
                return Err(ReflectionError::ConflictingBinding {
                    set: resource.set,
                    binding: resource.binding,
                });
            }
            None => {
                log::trace!(
                    "[SHADER] Binding set {} slot {} '{}': {:?} x{}",
                    resource.set, resource.binding, resource.name, kind, count
                );
                set.insert(
                    resource.binding,
                    DescriptorBinding { binding: resource.binding, kind, count, stages: stage },
                );
            }
        }
        Ok(())
    }

    fn reflect_descriptors(&mut self, module: &SpirvModule, stage: vk::ShaderStageFlags) -> Result<(), ReflectionError> {
        let resources = &module.resources;

        for buffer in &resources.uniform_buffers {
            let kind = if self.is_dynamic(buffer.set, buffer.binding) {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            } else {
                vk::DescriptorType::UNIFORM_BUFFER
            };
            self.add_binding(buffer, kind, stage)?;
        }

        for buffer in &resources.storage_buffers {
            let kind = if self.is_dynamic(buffer.set, buffer.binding) {
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            } else {
                vk::DescriptorType::STORAGE_BUFFER
            };
            self.add_binding(buffer, kind, stage)?;
        }

        let fixed_kinds = [
            (&resources.sampled_images, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            (&resources.separate_samplers, vk::DescriptorType::SAMPLER),
            (&resources.separate_images, vk::DescriptorType::SAMPLED_IMAGE),
            (&resources.storage_images, vk::DescriptorType::STORAGE_IMAGE),
            (&resources.subpass_inputs, vk::DescriptorType::INPUT_ATTACHMENT),
        ];
        for (list, kind) in fixed_kinds {
            for resource in list {
                self.add_binding(resource, kind, stage)?;
            }
        }
        Ok(())
    }

    fn reflect_vertex_input(&mut self, module: &SpirvModule) -> Result<(), ReflectionError> {
        let location_map: HashMap<u32, (u32, u32)> = self
            .resource_info
            .vertex_attributes
            .iter()
            .map(|attr| (attr.location, (attr.binding, attr.offset)))
            .collect();
        let buffer_map: HashMap<u32, (u32, bool)> = self
            .resource_info
            .vertex_buffers
            .iter()
            .map(|buffer| (buffer.binding, (buffer.stride, buffer.per_instance)))
            .collect();

        let mut next_binding = 0;
        for input in &module.resources.stage_inputs {
            let (binding, offset) = match location_map.get(&input.location) {
                Some(placement) => *placement,
                None => {
                    let binding = next_binding;
                    next_binding += 1;
                    (binding, 0)
                }
            };

            let buffer = buffer_map.get(&binding);
            let rate = match buffer {
                Some((_, true)) => vk::VertexInputRate::INSTANCE,
                _ => vk::VertexInputRate::VERTEX,
            };

            let overflow = || ReflectionError::SizeOverflow {
                what: format!("vertex input '{}' at location {}", input.name, input.location),
            };
            let ty = input.ty;
            let format = ty.column_format();
            let column_size = ty.scalar_size().checked_mul(ty.vec_size).ok_or_else(overflow)?;

            for column in 0..ty.columns {
                let location = input.location.checked_add(column).ok_or_else(overflow)?;
                let offset = column
                    .checked_mul(column_size)
                    .and_then(|column_offset| offset.checked_add(column_offset))
                    .ok_or_else(overflow)?;
                self.vertex_attributes.push(VertexInputAttribute {
                    location,
                    binding,
                    format,
                    offset,
                });
            }

            let stride = match buffer {
                Some((stride, _)) => *stride,
                None => column_size.checked_mul(ty.columns).ok_or_else(overflow)?,
            };
            self.vertex_bindings.insert(VertexInputBinding { binding, stride, rate });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::shader::spirv::ScalarKind;
    use crate::render::shader::spirv_builder::{ModuleBuilder, Stage};

    fn parse(builder: &ModuleBuilder) -> SpirvModule {
        SpirvModule::parse(&builder.build()).unwrap()
    }

    #[test]
    fn test_static_and_dynamic_uniform_buffers() {
        let mut builder = ModuleBuilder::new(Stage::Fragment);
        builder.uniform_buffer("Camera", 0, 0, &[("View", 64)]);
        builder.uniform_buffer("GameArgs", 0, 1, &[("Time", 4), ("TimeDelta", 4)]);
        let module = parse(&builder);

        let resource_info = ShaderResourceInfo::default()
            .with_uniform_buffer(0, 0, false)
            .with_uniform_buffer(0, 1, true);
        let info = ShaderReflectionInfo::from_modules(
            [(&module, vk::ShaderStageFlags::FRAGMENT)],
            &resource_info,
        )
        .unwrap();

        assert_eq!(info.binding(0, 0).unwrap().kind, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(info.binding(0, 1).unwrap().kind, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
    }

    #[test]
    fn test_undeclared_buffers_default_to_static() {
        let mut builder = ModuleBuilder::new(Stage::Compute);
        builder.uniform_buffer("Params", 0, 0, &[("Count", 4)]);
        builder.storage_buffer("Particles", 0, 1);
        let module = parse(&builder);

        let info = ShaderReflectionInfo::from_modules(
            [(&module, vk::ShaderStageFlags::COMPUTE)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();

        assert_eq!(info.binding(0, 0).unwrap().kind, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(info.binding(0, 1).unwrap().kind, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(info.binding(0, 1).unwrap().stages, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_image_kinds_and_array_counts() {
        let mut builder = ModuleBuilder::new(Stage::Fragment);
        builder.combined_image_sampler("Skybox", 0, 0, None);
        builder.combined_image_sampler("StarSprites", 0, 1, Some(8));
        builder.separate_sampler("Sampler", 1, 0);
        builder.separate_image("Noise", 1, 1);
        builder.uniform_buffer_array("Lights", 1, 2, 3);
        let module = parse(&builder);

        let info = ShaderReflectionInfo::from_modules(
            [(&module, vk::ShaderStageFlags::FRAGMENT)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();

        assert_eq!(info.set_count(), 2);
        assert_eq!(info.binding(0, 0).unwrap().count, 1);
        assert_eq!(info.binding(0, 1).unwrap().count, 8);
        assert_eq!(info.binding(0, 1).unwrap().kind, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(info.binding(1, 0).unwrap().kind, vk::DescriptorType::SAMPLER);
        assert_eq!(info.binding(1, 1).unwrap().kind, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(info.binding(1, 2).unwrap().count, 3);
    }

    #[test]
    fn test_shared_binding_merges_stages() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.uniform_buffer("Matrices", 0, 0, &[("Model", 64)]);
        let mut frag = ModuleBuilder::new(Stage::Fragment);
        frag.uniform_buffer("Matrices", 0, 0, &[("Model", 64)]);
        frag.combined_image_sampler("Disk", 0, 1, None);
        let (vert, frag) = (parse(&vert), parse(&frag));

        let info = ShaderReflectionInfo::from_modules(
            [(&vert, vk::ShaderStageFlags::VERTEX), (&frag, vk::ShaderStageFlags::FRAGMENT)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();

        let bindings = &info.descriptor_sets[&0];
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            bindings[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(bindings[1].stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_conflicting_binding_is_rejected() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.uniform_buffer("Matrices", 0, 0, &[("Model", 64)]);
        let mut frag = ModuleBuilder::new(Stage::Fragment);
        frag.combined_image_sampler("Disk", 0, 0, None);
        let (vert, frag) = (parse(&vert), parse(&frag));

        let result = ShaderReflectionInfo::from_modules(
            [(&vert, vk::ShaderStageFlags::VERTEX), (&frag, vk::ShaderStageFlags::FRAGMENT)],
            &ShaderResourceInfo::default(),
        );
        assert_eq!(result, Err(ReflectionError::ConflictingBinding { set: 0, binding: 0 }));
    }

    #[test]
    fn test_non_contiguous_sets_are_rejected() {
        let mut builder = ModuleBuilder::new(Stage::Fragment);
        builder.combined_image_sampler("A", 0, 0, None);
        builder.combined_image_sampler("B", 2, 0, None);
        let module = parse(&builder);

        let result = ShaderReflectionInfo::from_modules(
            [(&module, vk::ShaderStageFlags::FRAGMENT)],
            &ShaderResourceInfo::default(),
        );
        assert_eq!(result, Err(ReflectionError::NonContiguousSets { missing: 1 }));
    }

    #[test]
    fn test_push_constants_pack_across_stages() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.push_constant_block("VertPush", &[("Model", 0, 64), ("Scale", 64, 16)]);
        let mut frag = ModuleBuilder::new(Stage::Fragment);
        frag.push_constant_block("FragPush", &[("Exposure", 80, 4), ("Gamma", 84, 4)]);
        let (vert, frag) = (parse(&vert), parse(&frag));

        let resource_info = ShaderResourceInfo::default()
            .with_push_constants(vk::ShaderStageFlags::VERTEX, &["iModel", "iScale"])
            .with_push_constants(vk::ShaderStageFlags::FRAGMENT, &["iExposure", "iGamma"]);
        let info = ShaderReflectionInfo::from_modules(
            [(&vert, vk::ShaderStageFlags::VERTEX), (&frag, vk::ShaderStageFlags::FRAGMENT)],
            &resource_info,
        )
        .unwrap();

        let ranges = &info.push_constant_ranges;
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].offset, ranges[0].size), (0, 80));
        assert_eq!((ranges[1].offset, ranges[1].size), (80, 8));
        for pair in ranges.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
            assert!(pair[0].end().unwrap() <= pair[1].offset);
        }
        assert_eq!(info.push_constant_size(), 88);
        assert_eq!(ranges.iter().map(|r| r.size).sum::<u32>(), info.push_constant_size());

        assert_eq!(info.push_constant_offset("iModel"), Some(0));
        assert_eq!(info.push_constant_offset("iScale"), Some(64));
        assert_eq!(info.push_constant_offset("iGamma"), Some(84));
    }

    #[test]
    fn test_push_constant_names_fall_back_to_debug_names() {
        let mut comp = ModuleBuilder::new(Stage::Compute);
        comp.push_constant_block("Dispatch", &[("Resolution", 0, 8)]);
        let comp = parse(&comp);

        let info = ShaderReflectionInfo::from_modules(
            [(&comp, vk::ShaderStageFlags::COMPUTE)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();
        assert_eq!(info.push_constant_offset("Resolution"), Some(0));
    }

    #[test]
    fn test_push_constant_name_count_mismatch() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.push_constant_block("VertPush", &[("Model", 0, 64), ("Scale", 64, 16)]);
        let vert = parse(&vert);

        let resource_info =
            ShaderResourceInfo::default().with_push_constants(vk::ShaderStageFlags::VERTEX, &["iModel"]);
        let result = ShaderReflectionInfo::from_modules([(&vert, vk::ShaderStageFlags::VERTEX)], &resource_info);

        assert_eq!(
            result,
            Err(ReflectionError::PushConstantNameMismatch {
                stage: vk::ShaderStageFlags::VERTEX,
                expected: 2,
                found: 1,
            })
        );
    }

    #[test]
    fn test_overlapping_push_constant_blocks() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.push_constant_block("VertPush", &[("Model", 0, 64)]);
        let mut frag = ModuleBuilder::new(Stage::Fragment);
        frag.push_constant_block("FragPush", &[("Tint", 0, 16)]);
        let (vert, frag) = (parse(&vert), parse(&frag));

        let result = ShaderReflectionInfo::from_modules(
            [(&vert, vk::ShaderStageFlags::VERTEX), (&frag, vk::ShaderStageFlags::FRAGMENT)],
            &ShaderResourceInfo::default(),
        );
        assert!(matches!(result, Err(ReflectionError::PushConstantOverlap { offset: 0, total: 64, .. })));
    }

    #[test]
    fn test_vertex_input_location_past_u32_is_an_error() {
        use crate::render::shader::spirv::{InputType, ShaderResources, StageInput};

        let module = SpirvModule {
            entry_point: None,
            resources: ShaderResources {
                stage_inputs: vec![StageInput {
                    name: "InInstanceTransform".to_string(),
                    location: u32::MAX - 1,
                    ty: InputType {
                        scalar: ScalarKind::Float,
                        width: 32,
                        vec_size: 4,
                        columns: 4,
                    },
                }],
                ..ShaderResources::default()
            },
        };

        let result = ShaderReflectionInfo::from_modules(
            [(&module, vk::ShaderStageFlags::VERTEX)],
            &ShaderResourceInfo::default(),
        );
        assert!(matches!(result, Err(ReflectionError::SizeOverflow { .. })));
    }

    #[test]
    fn test_push_constant_range_end_is_checked() {
        let range = PushConstantRange {
            stage: vk::ShaderStageFlags::VERTEX,
            offset: 0xFFFF_FFF0,
            size: 64,
        };
        assert_eq!(range.end(), None);
        assert_eq!(PushConstantRange { size: 16, ..range }.end(), Some(u32::MAX));
    }

    #[test]
    fn test_auto_assigned_vertex_bindings() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.input("InPosition", 0, ScalarKind::Float, 3, 1);
        vert.input("InTexCoord", 1, ScalarKind::Float, 2, 1);
        let vert = parse(&vert);

        let info = ShaderReflectionInfo::from_modules(
            [(&vert, vk::ShaderStageFlags::VERTEX)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();

        assert_eq!(
            info.vertex_bindings,
            vec![
                VertexInputBinding { binding: 0, stride: 12, rate: vk::VertexInputRate::VERTEX },
                VertexInputBinding { binding: 1, stride: 8, rate: vk::VertexInputRate::VERTEX },
            ]
        );
        assert_eq!(info.vertex_attributes[1].binding, 1);
        assert_eq!(info.vertex_attributes[1].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_overridden_vertex_layout_deduplicates_bindings() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.input("InPosition", 0, ScalarKind::Float, 3, 1);
        vert.input("InNormal", 1, ScalarKind::Float, 3, 1);
        vert.input("InColor", 2, ScalarKind::Float, 4, 1);
        let vert = parse(&vert);

        let resource_info = ShaderResourceInfo::default()
            .with_vertex_buffer(0, 24, false)
            .with_vertex_attribute(0, 0, 0)
            .with_vertex_attribute(0, 1, 12);
        let info = ShaderReflectionInfo::from_modules([(&vert, vk::ShaderStageFlags::VERTEX)], &resource_info)
            .unwrap();

        // Location 2 is not overridden and takes the first auto binding.
        assert_eq!(
            info.vertex_bindings,
            vec![VertexInputBinding { binding: 0, stride: 24, rate: vk::VertexInputRate::VERTEX }]
        );
        let offsets: Vec<_> = info.vertex_attributes.iter().map(|a| (a.location, a.binding, a.offset)).collect();
        assert_eq!(offsets, vec![(0, 0, 0), (1, 0, 12), (2, 0, 0)]);
    }

    #[test]
    fn test_matrix_input_expands_per_column() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.input("InPosition", 0, ScalarKind::Float, 3, 1);
        vert.input("InInstanceModel", 1, ScalarKind::Float, 4, 4);
        let vert = parse(&vert);

        let resource_info = ShaderResourceInfo::default()
            .with_vertex_buffer(1, 64, true)
            .with_vertex_attribute(0, 0, 0)
            .with_vertex_attribute(1, 1, 0);
        let info = ShaderReflectionInfo::from_modules([(&vert, vk::ShaderStageFlags::VERTEX)], &resource_info)
            .unwrap();

        let columns: Vec<_> = info.vertex_attributes.iter().filter(|a| a.binding == 1).collect();
        assert_eq!(columns.len(), 4);
        for (i, column) in columns.iter().enumerate() {
            let i = i as u32;
            assert_eq!(column.location, 1 + i);
            assert_eq!(column.offset, i * 4 * 4);
            assert_eq!(column.format, vk::Format::R32G32B32A32_SFLOAT);
        }
        assert!(info
            .vertex_bindings
            .contains(&VertexInputBinding { binding: 1, stride: 64, rate: vk::VertexInputRate::INSTANCE }));
    }

    #[test]
    fn test_matrix_stride_without_override() {
        let mut vert = ModuleBuilder::new(Stage::Vertex);
        vert.input("InTransform", 0, ScalarKind::Float, 3, 3);
        let vert = parse(&vert);

        let info = ShaderReflectionInfo::from_modules(
            [(&vert, vk::ShaderStageFlags::VERTEX)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();

        assert_eq!(info.vertex_attributes.len(), 3);
        assert_eq!(info.vertex_attributes[2].offset, 2 * 4 * 3);
        assert_eq!(info.vertex_bindings[0].stride, 4 * 3 * 3);
    }

    #[test]
    fn test_fragment_inputs_are_not_vertex_layout() {
        let mut frag = ModuleBuilder::new(Stage::Fragment);
        frag.input("InUv", 0, ScalarKind::Float, 2, 1);
        let frag = parse(&frag);

        let info = ShaderReflectionInfo::from_modules(
            [(&frag, vk::ShaderStageFlags::FRAGMENT)],
            &ShaderResourceInfo::default(),
        )
        .unwrap();
        assert!(info.vertex_attributes.is_empty());
        assert!(info.vertex_bindings.is_empty());
    }
}
