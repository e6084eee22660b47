//! SPIR-V module reflection
//!
//! Runs `spirv_reflect` over a binary and converts what it reports into a
//! [`SpirvModule`]: the module's resources grouped the way a shader author
//! sees them (uniform buffers, samplers, stage inputs, push-constant blocks).
//! Sizes coming out of the binary are checked before they are combined, so a
//! crafted module yields an error instead of a wrapped range.

use ash::vk;
use spirv_reflect::types::{
    ReflectBlockVariable, ReflectDecorationFlags, ReflectDescriptorBinding, ReflectDescriptorType,
    ReflectInterfaceVariable, ReflectShaderStageFlags, ReflectTypeFlags,
};
use spirv_reflect::ShaderModule;
use thiserror::Error;

/// Location reported for interface variables without a `Location` decoration
const NO_LOCATION: u32 = u32::MAX;

/// SPIR-V reflection failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpirvError {
    /// The reflection library rejected the binary
    #[error("SPIR-V reflection failed: {0}")]
    Reflect(String),

    /// An offset or size declared by the module does not fit in 32 bits
    #[error("Layout of '{name}' overflows 32 bits")]
    SizeOverflow {
        /// Block, member or input whose layout overflowed
        name: String,
    },
}

/// Shader stage that an entry point is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionModel {
    /// Vertex shader
    Vertex,
    /// Tessellation control shader
    TessellationControl,
    /// Tessellation evaluation shader
    TessellationEvaluation,
    /// Geometry shader
    Geometry,
    /// Fragment shader
    Fragment,
    /// Compute shader
    GlCompute,
}

impl ExecutionModel {
    fn from_reflect(stage: ReflectShaderStageFlags) -> Option<Self> {
        [
            (ReflectShaderStageFlags::VERTEX, Self::Vertex),
            (ReflectShaderStageFlags::TESSELLATION_CONTROL, Self::TessellationControl),
            (ReflectShaderStageFlags::TESSELLATION_EVALUATION, Self::TessellationEvaluation),
            (ReflectShaderStageFlags::GEOMETRY, Self::Geometry),
            (ReflectShaderStageFlags::FRAGMENT, Self::Fragment),
            (ReflectShaderStageFlags::COMPUTE, Self::GlCompute),
        ]
        .into_iter()
        .find(|(flag, _)| stage.contains(*flag))
        .map(|(_, model)| model)
    }

    /// Vulkan stage flag for this execution model
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::GlCompute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// The module's entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Stage the entry point runs in
    pub model: ExecutionModel,
    /// Function name, usually `main`
    pub name: String,
}

/// A descriptor-backed resource (buffer, image or sampler)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorResource {
    /// Debug name of the variable, or of its block type when the variable is unnamed
    pub name: String,
    /// `DescriptorSet` decoration
    pub set: u32,
    /// `Binding` decoration
    pub binding: u32,
    /// Outermost array dimension when the resource is an array
    pub array_size: Option<u32>,
}

/// Scalar base type of an interface variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// Signed integer
    Int,
    /// Unsigned integer
    UInt,
    /// Floating point
    Float,
    /// Boolean (not valid for vertex input, kept for completeness)
    Bool,
}

/// Shape of a vertex-stage input: `columns` vectors of `vec_size` scalars of `width` bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputType {
    /// Scalar type
    pub scalar: ScalarKind,
    /// Scalar width in bits
    pub width: u32,
    /// Components per column
    pub vec_size: u32,
    /// Matrix columns, 1 for scalars and vectors
    pub columns: u32,
}

impl InputType {
    /// Size of one scalar component in bytes
    pub fn scalar_size(&self) -> u32 {
        self.width / 8
    }

    /// Whether the input is a matrix
    pub fn is_matrix(&self) -> bool {
        self.columns > 1
    }

    /// Vulkan format of a single column
    pub fn column_format(&self) -> vk::Format {
        use vk::Format as F;
        match (self.scalar, self.width, self.vec_size) {
            (ScalarKind::Float, 32, 1) => F::R32_SFLOAT,
            (ScalarKind::Float, 32, 2) => F::R32G32_SFLOAT,
            (ScalarKind::Float, 32, 3) => F::R32G32B32_SFLOAT,
            (ScalarKind::Float, 32, 4) => F::R32G32B32A32_SFLOAT,
            (ScalarKind::Float, 16, 1) => F::R16_SFLOAT,
            (ScalarKind::Float, 16, 2) => F::R16G16_SFLOAT,
            (ScalarKind::Float, 16, 3) => F::R16G16B16_SFLOAT,
            (ScalarKind::Float, 16, 4) => F::R16G16B16A16_SFLOAT,
            (ScalarKind::Float, 64, 1) => F::R64_SFLOAT,
            (ScalarKind::Float, 64, 2) => F::R64G64_SFLOAT,
            (ScalarKind::Float, 64, 3) => F::R64G64B64_SFLOAT,
            (ScalarKind::Float, 64, 4) => F::R64G64B64A64_SFLOAT,
            (ScalarKind::Int, 32, 1) => F::R32_SINT,
            (ScalarKind::Int, 32, 2) => F::R32G32_SINT,
            (ScalarKind::Int, 32, 3) => F::R32G32B32_SINT,
            (ScalarKind::Int, 32, 4) => F::R32G32B32A32_SINT,
            (ScalarKind::UInt, 32, 1) => F::R32_UINT,
            (ScalarKind::UInt, 32, 2) => F::R32G32_UINT,
            (ScalarKind::UInt, 32, 3) => F::R32G32B32_UINT,
            (ScalarKind::UInt, 32, 4) => F::R32G32B32A32_UINT,
            _ => F::UNDEFINED,
        }
    }
}

/// A non-builtin `Input` variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    /// Debug name
    pub name: String,
    /// `Location` decoration
    pub location: u32,
    /// Type shape
    pub ty: InputType,
}

/// One member of a push-constant block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    /// Debug name, empty when stripped
    pub name: String,
    /// `Offset` decoration
    pub offset: u32,
    /// Declared size in bytes
    pub size: u32,
}

/// A `PushConstant` storage-class block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantBlock {
    /// Debug name of the block type
    pub name: String,
    /// Members in declaration order
    pub members: Vec<BlockMember>,
    /// End of the furthest member (offset + size)
    pub declared_size: u32,
}

impl PushConstantBlock {
    /// Lowest member offset, i.e. where the block's data begins
    pub fn start_offset(&self) -> u32 {
        self.members.iter().map(|m| m.offset).min().unwrap_or(0)
    }
}

/// Module-scope resources grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderResources {
    /// `Uniform` blocks
    pub uniform_buffers: Vec<DescriptorResource>,
    /// `StorageBuffer` blocks and legacy `BufferBlock` uniforms
    pub storage_buffers: Vec<DescriptorResource>,
    /// `sampler2D` and friends
    pub sampled_images: Vec<DescriptorResource>,
    /// Standalone `sampler` objects
    pub separate_samplers: Vec<DescriptorResource>,
    /// Standalone `texture2D` and friends
    pub separate_images: Vec<DescriptorResource>,
    /// `image2D` storage images
    pub storage_images: Vec<DescriptorResource>,
    /// `subpassInput` attachments
    pub subpass_inputs: Vec<DescriptorResource>,
    /// Stage inputs, sorted by location
    pub stage_inputs: Vec<StageInput>,
    /// Push-constant blocks in declaration order
    pub push_constant_buffers: Vec<PushConstantBlock>,
}

/// Reflected SPIR-V module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirvModule {
    /// Entry point, `None` when its stage is not one Vulkan graphics or compute uses
    pub entry_point: Option<EntryPoint>,
    /// Reflected resources
    pub resources: ShaderResources,
}

fn reflect_error(message: &str) -> SpirvError {
    SpirvError::Reflect(message.to_string())
}

impl SpirvModule {
    /// Reflect a SPIR-V word stream
    pub fn parse(words: &[u32]) -> Result<Self, SpirvError> {
        let module = ShaderModule::load_u32_data(words).map_err(reflect_error)?;

        let entry_point = ExecutionModel::from_reflect(module.get_shader_stage()).map(|model| EntryPoint {
            model,
            name: module.get_entry_point_name(),
        });

        let mut resources = ShaderResources::default();
        for binding in module.enumerate_descriptor_bindings(None).map_err(reflect_error)? {
            let target = match binding.descriptor_type {
                ReflectDescriptorType::UniformBuffer => &mut resources.uniform_buffers,
                ReflectDescriptorType::StorageBuffer => &mut resources.storage_buffers,
                ReflectDescriptorType::CombinedImageSampler => &mut resources.sampled_images,
                ReflectDescriptorType::Sampler => &mut resources.separate_samplers,
                ReflectDescriptorType::SampledImage => &mut resources.separate_images,
                ReflectDescriptorType::StorageImage => &mut resources.storage_images,
                ReflectDescriptorType::InputAttachment => &mut resources.subpass_inputs,
                other => {
                    log::warn!(
                        "[SHADER] Skipping {:?} at set {} binding {}",
                        other,
                        binding.set,
                        binding.binding
                    );
                    continue;
                }
            };
            target.push(descriptor_resource(&binding));
        }

        for variable in module.enumerate_input_variables(None).map_err(reflect_error)? {
            if let Some(input) = stage_input(&variable) {
                resources.stage_inputs.push(input);
            }
        }
        resources.stage_inputs.sort_by_key(|input| input.location);

        for block in module.enumerate_push_constant_blocks(None).map_err(reflect_error)? {
            resources.push_constant_buffers.push(push_constant_block(&block)?);
        }

        Ok(Self { entry_point, resources })
    }

    /// Stage of the entry point
    pub fn execution_model(&self) -> Option<ExecutionModel> {
        self.entry_point.as_ref().map(|entry| entry.model)
    }
}

fn descriptor_resource(binding: &ReflectDescriptorBinding) -> DescriptorResource {
    let name = if binding.name.is_empty() {
        binding
            .type_description
            .as_ref()
            .map(|ty| ty.type_name.clone())
            .unwrap_or_default()
    } else {
        binding.name.clone()
    };
    DescriptorResource {
        name,
        set: binding.set,
        binding: binding.binding,
        // Runtime arrays report a zero dimension; one descriptor is reserved for them.
        array_size: binding.array.dims.first().map(|dim| (*dim).max(1)),
    }
}

fn stage_input(variable: &ReflectInterfaceVariable) -> Option<StageInput> {
    if variable.decoration_flags.contains(ReflectDecorationFlags::BUILT_IN)
        || variable.location == NO_LOCATION
        || !variable.members.is_empty()
    {
        return None;
    }

    let ty = variable.type_description.as_ref()?;
    let numeric = &variable.numeric;
    let scalar = if ty.type_flags.contains(ReflectTypeFlags::FLOAT) {
        ScalarKind::Float
    } else if ty.type_flags.contains(ReflectTypeFlags::INT) {
        if numeric.scalar.signedness == 0 {
            ScalarKind::UInt
        } else {
            ScalarKind::Int
        }
    } else if ty.type_flags.contains(ReflectTypeFlags::BOOL) {
        ScalarKind::Bool
    } else {
        return None;
    };

    let (vec_size, columns) = if ty.type_flags.contains(ReflectTypeFlags::MATRIX) {
        (numeric.matrix.row_count, numeric.matrix.column_count)
    } else {
        (numeric.vector.component_count.max(1), 1)
    };

    Some(StageInput {
        name: variable.name.clone(),
        location: variable.location,
        ty: InputType {
            scalar,
            width: if scalar == ScalarKind::Bool { 32 } else { numeric.scalar.width },
            vec_size,
            columns,
        },
    })
}

fn push_constant_block(block: &ReflectBlockVariable) -> Result<PushConstantBlock, SpirvError> {
    let name = block
        .type_description
        .as_ref()
        .map(|ty| ty.type_name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| block.name.clone());

    let mut members = Vec::with_capacity(block.members.len());
    let mut declared_size = 0;
    for member in &block.members {
        let end = member
            .offset
            .checked_add(member.size)
            .ok_or_else(|| SpirvError::SizeOverflow {
                name: format!("{}.{}", name, member.name),
            })?;
        declared_size = declared_size.max(end);
        members.push(BlockMember {
            name: member.name.clone(),
            offset: member.offset,
            size: member.size,
        });
    }

    Ok(PushConstantBlock {
        name,
        members,
        declared_size,
    })
}
