//! SPIR-V fixtures for tests
//!
//! Records the resources a test wants and assembles a complete module with
//! `rspirv` when asked: capabilities, an empty entry function, names,
//! decorations, types and variables.

use rspirv::binary::Assemble;
use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{
    self, AddressingModel, Capability, Decoration, Dim, ExecutionMode, ExecutionModel, FunctionControl, ImageFormat,
    MemoryModel, StorageClass, Word,
};

use super::spirv::ScalarKind;

/// Execution model written into `OpEntryPoint`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    fn model(self) -> ExecutionModel {
        match self {
            Self::Vertex => ExecutionModel::Vertex,
            Self::TessControl => ExecutionModel::TessellationControl,
            Self::TessEval => ExecutionModel::TessellationEvaluation,
            Self::Geometry => ExecutionModel::Geometry,
            Self::Fragment => ExecutionModel::Fragment,
            Self::Compute => ExecutionModel::GLCompute,
        }
    }

    fn capability(self) -> Option<Capability> {
        match self {
            Self::TessControl | Self::TessEval => Some(Capability::Tessellation),
            Self::Geometry => Some(Capability::Geometry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ImageKind {
    Combined,
    Sampler,
    Sampled,
    Storage,
}

#[derive(Debug, Clone)]
enum Resource {
    UniformBuffer {
        name: String,
        set: u32,
        binding: u32,
        members: Vec<(String, u32, u32)>,
    },
    UniformBufferArray {
        name: String,
        set: u32,
        binding: u32,
        count: u32,
    },
    StorageBuffer {
        name: String,
        set: u32,
        binding: u32,
    },
    Image {
        name: String,
        set: u32,
        binding: u32,
        kind: ImageKind,
        array: Option<u32>,
    },
    Input {
        name: String,
        location: u32,
        kind: ScalarKind,
        vec_size: u32,
        columns: u32,
    },
    BuiltinInput {
        name: String,
    },
    PushConstants {
        name: String,
        members: Vec<(String, u32, u32)>,
    },
}

/// Builds a SPIR-V word stream
pub struct ModuleBuilder {
    stage: Stage,
    entry_name: String,
    resources: Vec<Resource>,
}

impl ModuleBuilder {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            entry_name: "main".to_string(),
            resources: Vec::new(),
        }
    }

    pub fn entry_name(mut self, name: &str) -> Self {
        self.entry_name = name.to_string();
        self
    }

    fn push(&mut self, resource: Resource) -> &mut Self {
        self.resources.push(resource);
        self
    }

    /// Uniform block with members packed back to back
    pub fn uniform_buffer(&mut self, name: &str, set: u32, binding: u32, members: &[(&str, u32)]) -> &mut Self {
        let mut offset = 0;
        let members = members
            .iter()
            .map(|(member, size)| {
                let entry = ((*member).to_string(), offset, *size);
                offset += size;
                entry
            })
            .collect();
        self.push(Resource::UniformBuffer {
            name: name.to_string(),
            set,
            binding,
            members,
        })
    }

    /// Uniform block declared as an array of `count` blocks
    pub fn uniform_buffer_array(&mut self, name: &str, set: u32, binding: u32, count: u32) -> &mut Self {
        self.push(Resource::UniformBufferArray {
            name: name.to_string(),
            set,
            binding,
            count,
        })
    }

    /// `StorageBuffer` block holding a runtime array of vec4
    pub fn storage_buffer(&mut self, name: &str, set: u32, binding: u32) -> &mut Self {
        self.push(Resource::StorageBuffer {
            name: name.to_string(),
            set,
            binding,
        })
    }

    fn image(&mut self, name: &str, set: u32, binding: u32, kind: ImageKind, array: Option<u32>) -> &mut Self {
        self.push(Resource::Image {
            name: name.to_string(),
            set,
            binding,
            kind,
            array,
        })
    }

    pub fn combined_image_sampler(&mut self, name: &str, set: u32, binding: u32, array: Option<u32>) -> &mut Self {
        self.image(name, set, binding, ImageKind::Combined, array)
    }

    pub fn separate_sampler(&mut self, name: &str, set: u32, binding: u32) -> &mut Self {
        self.image(name, set, binding, ImageKind::Sampler, None)
    }

    pub fn separate_image(&mut self, name: &str, set: u32, binding: u32) -> &mut Self {
        self.image(name, set, binding, ImageKind::Sampled, None)
    }

    pub fn storage_image(&mut self, name: &str, set: u32, binding: u32) -> &mut Self {
        self.image(name, set, binding, ImageKind::Storage, None)
    }

    /// Stage input; `columns > 1` declares a matrix of `vec_size`-component columns
    pub fn input(&mut self, name: &str, location: u32, kind: ScalarKind, vec_size: u32, columns: u32) -> &mut Self {
        self.push(Resource::Input {
            name: name.to_string(),
            location,
            kind,
            vec_size,
            columns,
        })
    }

    /// `int` input decorated `BuiltIn VertexIndex`
    pub fn builtin_input(&mut self, name: &str) -> &mut Self {
        self.push(Resource::BuiltinInput { name: name.to_string() })
    }

    /// Push-constant block from `(name, offset, size)` members
    pub fn push_constant_block(&mut self, name: &str, members: &[(&str, u32, u32)]) -> &mut Self {
        let members = members
            .iter()
            .map(|(member, offset, size)| ((*member).to_string(), *offset, *size))
            .collect();
        self.push(Resource::PushConstants {
            name: name.to_string(),
            members,
        })
    }

    pub fn build(&self) -> Vec<u32> {
        let mut emitter = Emitter::new(self.stage);
        let mut interface = Vec::new();
        for resource in &self.resources {
            let variable = emitter.emit(resource);
            // SPIR-V 1.4 and later list every global in the interface; harmless before that.
            interface.push(variable);
        }
        emitter.finish(self.stage, &self.entry_name, &interface)
    }

    /// Module as little-endian bytes, the layout of a `.spv` file
    pub fn build_bytes(&self) -> Vec<u8> {
        self.build().iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

struct Emitter {
    b: Builder,
}

fn literal(value: u32) -> [Operand; 1] {
    [Operand::LiteralBit32(value)]
}

fn no_operands() -> Vec<Operand> {
    Vec::new()
}

impl Emitter {
    fn new(stage: Stage) -> Self {
        let mut b = Builder::new();
        b.set_version(1, 3);
        b.capability(Capability::Shader);
        if let Some(capability) = stage.capability() {
            b.capability(capability);
        }
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        Self { b }
    }

    fn scalar(&mut self, kind: ScalarKind) -> Word {
        match kind {
            ScalarKind::Float => self.b.type_float(32),
            ScalarKind::Int => self.b.type_int(32, 1),
            ScalarKind::UInt => self.b.type_int(32, 0),
            ScalarKind::Bool => self.b.type_bool(),
        }
    }

    fn vector(&mut self, kind: ScalarKind, count: u32) -> Word {
        let scalar = self.scalar(kind);
        if count == 1 {
            scalar
        } else {
            self.b.type_vector(scalar, count)
        }
    }

    fn array(&mut self, element: Word, length: u32, stride: Option<u32>) -> Word {
        let uint = self.b.type_int(32, 0);
        let length = self.b.constant_bit32(uint, length);
        let array = self.b.type_array(element, length);
        if let Some(stride) = stride {
            self.b.decorate(array, Decoration::ArrayStride, literal(stride));
        }
        array
    }

    fn bind(&mut self, variable: Word, set: u32, binding: u32) {
        self.b.decorate(variable, Decoration::DescriptorSet, literal(set));
        self.b.decorate(variable, Decoration::Binding, literal(binding));
    }

    fn global(&mut self, storage_class: StorageClass, ty: Word, name: &str) -> Word {
        let pointer = self.b.type_pointer(None, storage_class, ty);
        let variable = self.b.variable(pointer, None, storage_class, None);
        if !name.is_empty() {
            self.b.name(variable, name);
        }
        variable
    }

    /// Member type for a byte size: float, vec2/3/4, mat4, or a float array
    fn member_type(&mut self, size: u32) -> (Word, bool) {
        match size {
            4 => (self.scalar(ScalarKind::Float), false),
            8 => (self.vector(ScalarKind::Float, 2), false),
            12 => (self.vector(ScalarKind::Float, 3), false),
            16 => (self.vector(ScalarKind::Float, 4), false),
            64 => {
                let column = self.vector(ScalarKind::Float, 4);
                (self.b.type_matrix(column, 4), true)
            }
            _ => {
                let float = self.scalar(ScalarKind::Float);
                (self.array(float, size / 4, Some(4)), false)
            }
        }
    }

    fn block(&mut self, name: &str, members: &[(String, u32, u32)]) -> Word {
        let types: Vec<(Word, bool)> = members.iter().map(|(_, _, size)| self.member_type(*size)).collect();
        let block = self.b.type_struct(types.iter().map(|(ty, _)| *ty));
        self.b.name(block, name);
        self.b.decorate(block, Decoration::Block, no_operands());
        for (index, ((member, offset, _), (_, is_matrix))) in (0u32..).zip(members.iter().zip(&types)) {
            self.b.member_name(block, index, member.as_str());
            self.b.member_decorate(block, index, Decoration::Offset, literal(*offset));
            if *is_matrix {
                self.b.member_decorate(block, index, Decoration::ColMajor, no_operands());
                self.b.member_decorate(block, index, Decoration::MatrixStride, literal(16));
            }
        }
        block
    }

    fn image_type(&mut self, sampled: u32) -> Word {
        let float = self.scalar(ScalarKind::Float);
        self.b
            .type_image(float, Dim::Dim2D, 0, 0, 0, sampled, ImageFormat::Unknown, None)
    }

    fn emit(&mut self, resource: &Resource) -> Word {
        match resource {
            Resource::UniformBuffer {
                name,
                set,
                binding,
                members,
            } => {
                let block = self.block(name, members);
                let variable = self.global(StorageClass::Uniform, block, "");
                self.bind(variable, *set, *binding);
                variable
            }
            Resource::UniformBufferArray {
                name,
                set,
                binding,
                count,
            } => {
                let block = self.block(name, &[("Value".to_string(), 0, 16)]);
                let array = self.array(block, *count, None);
                let variable = self.global(StorageClass::Uniform, array, name);
                self.bind(variable, *set, *binding);
                variable
            }
            Resource::StorageBuffer { name, set, binding } => {
                let vec4 = self.vector(ScalarKind::Float, 4);
                let runtime = self.b.type_runtime_array(vec4);
                self.b.decorate(runtime, Decoration::ArrayStride, literal(16));
                let block = self.b.type_struct([runtime]);
                self.b.name(block, name.as_str());
                self.b.decorate(block, Decoration::Block, no_operands());
                self.b.member_decorate(block, 0, Decoration::Offset, literal(0));
                let variable = self.global(StorageClass::StorageBuffer, block, name);
                self.bind(variable, *set, *binding);
                variable
            }
            Resource::Image {
                name,
                set,
                binding,
                kind,
                array,
            } => {
                let ty = match kind {
                    ImageKind::Combined => {
                        let image = self.image_type(1);
                        self.b.type_sampled_image(image)
                    }
                    ImageKind::Sampler => self.b.type_sampler(),
                    ImageKind::Sampled => self.image_type(1),
                    ImageKind::Storage => self.image_type(2),
                };
                let ty = match array {
                    Some(count) => self.array(ty, *count, None),
                    None => ty,
                };
                let variable = self.global(StorageClass::UniformConstant, ty, name);
                self.bind(variable, *set, *binding);
                variable
            }
            Resource::Input {
                name,
                location,
                kind,
                vec_size,
                columns,
            } => {
                let column = self.vector(*kind, *vec_size);
                let ty = if *columns > 1 {
                    self.b.type_matrix(column, *columns)
                } else {
                    column
                };
                let variable = self.global(StorageClass::Input, ty, name);
                self.b.decorate(variable, Decoration::Location, literal(*location));
                variable
            }
            Resource::BuiltinInput { name } => {
                let int = self.scalar(ScalarKind::Int);
                let variable = self.global(StorageClass::Input, int, name);
                self.b.decorate(
                    variable,
                    Decoration::BuiltIn,
                    [Operand::BuiltIn(spirv::BuiltIn::VertexIndex)],
                );
                variable
            }
            Resource::PushConstants { name, members } => {
                let block = self.block(name, members);
                self.global(StorageClass::PushConstant, block, "")
            }
        }
    }

    fn finish(mut self, stage: Stage, entry_name: &str, interface: &[Word]) -> Vec<u32> {
        let void = self.b.type_void();
        let function_type = self.b.type_function(void, Vec::<Word>::new());
        let function = self
            .b
            .begin_function(void, None, FunctionControl::NONE, function_type)
            .expect("no function is open");
        self.b.begin_block(None).expect("no block is open");
        self.b.ret().expect("block is open");
        self.b.end_function().expect("function is open");

        self.b.entry_point(stage.model(), function, entry_name, interface);
        match stage {
            Stage::Fragment => self.b.execution_mode(function, ExecutionMode::OriginUpperLeft, Vec::<u32>::new()),
            Stage::Compute => self.b.execution_mode(function, ExecutionMode::LocalSize, [1, 1, 1]),
            _ => {}
        }
        self.b.module().assemble()
    }
}
