//! Shaders: SPIR-V modules, their reflected layout and descriptor sets
//!
//! A [`Shader`] is built from one SPIR-V binary per stage. The binaries are
//! reflected together, so a uniform buffer declared by both the vertex and
//! fragment stage ends up as one binding visible to both, and push-constant
//! blocks of consecutive stages pack without overlapping.

pub mod reflection;
pub mod spirv;
#[cfg(test)]
pub(crate) mod spirv_builder;

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::render::backend::{DescriptorResources, GpuDevice};
use crate::render::descriptors::DescriptorResourcePool;
use crate::render::VulkanError;

use reflection::{
    PushConstantRange, ReflectionError, ShaderReflectionInfo, ShaderResourceInfo, VertexInputAttribute,
    VertexInputBinding,
};
use spirv::SpirvModule;

/// Shader loading failures
#[derive(Error, Debug)]
pub enum ShaderError {
    /// A shader file could not be read
    #[error("Failed to read shader {path:?}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File size is not a whole number of 32-bit words
    #[error("Shader {path:?} is {len} bytes, not a multiple of 4")]
    Misaligned {
        /// Offending file
        path: PathBuf,
        /// File size in bytes
        len: usize,
    },

    /// Reflection rejected the binaries
    #[error("Shader reflection failed: {0}")]
    Reflection(#[from] ReflectionError),

    /// Device object creation failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// One pipeline stage: module, stage flag and entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStage {
    /// Stage flag
    pub stage: vk::ShaderStageFlags,
    /// Compiled module
    pub module: vk::ShaderModule,
    /// Entry point function name
    pub entry_point: CString,
}

impl ShaderStage {
    /// Stage create info; borrows `entry_point`, so `self` must outlive its use
    pub fn create_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry_point)
            .build()
    }
}

/// Stage implied by a file name, checking the last extension and then the one before it
///
/// `sky.frag` and `sky.frag.spv` both give the fragment stage.
pub fn stage_from_path(path: &Path) -> Option<vk::ShaderStageFlags> {
    fn from_extension(extension: &str) -> Option<vk::ShaderStageFlags> {
        Some(match extension {
            "vert" => vk::ShaderStageFlags::VERTEX,
            "frag" => vk::ShaderStageFlags::FRAGMENT,
            "comp" => vk::ShaderStageFlags::COMPUTE,
            "geom" => vk::ShaderStageFlags::GEOMETRY,
            "tesc" => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            "tese" => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            _ => return None,
        })
    }

    let extension = path.extension()?.to_str()?;
    from_extension(extension).or_else(|| {
        let stem = Path::new(path.file_stem()?);
        from_extension(stem.extension()?.to_str()?)
    })
}

/// Read a SPIR-V file as little-endian words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = std::fs::read(path).map_err(|source| {
        log::error!("[SHADER] Failed to read {:?}: {}", path, source);
        ShaderError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    spirv_words(path, &bytes)
}

fn spirv_words(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.len() % 4 != 0 {
        log::error!("[SHADER] {:?} is {} bytes, not word aligned", path, bytes.len());
        return Err(ShaderError::Misaligned {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }
    Ok(bytemuck::pod_collect_to_vec::<u8, u32>(bytes))
}

/// A compiled, reflected shader with its per-frame descriptor sets
pub struct Shader {
    label: String,
    stages: Vec<ShaderStage>,
    reflection: ShaderReflectionInfo,
    descriptors: DescriptorResourcePool,
    device: Arc<dyn GpuDevice>,
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("label", &self.label)
            .field("stages", &self.stages)
            .field("reflection", &self.reflection)
            .finish_non_exhaustive()
    }
}

impl Shader {
    /// Load, reflect and create a shader from SPIR-V files, one per stage
    pub fn new<P: AsRef<Path>>(
        device: Arc<dyn GpuDevice>,
        files: &[P],
        resource_info: &ShaderResourceInfo,
        frames_in_flight: usize,
    ) -> Result<Self, ShaderError> {
        let mut binaries = Vec::with_capacity(files.len());
        for file in files {
            let path = file.as_ref();
            log::debug!("[SHADER] Loading {:?}", path);
            binaries.push((path.to_path_buf(), read_spirv(path)?));
        }
        Self::from_binaries(device, binaries, resource_info, frames_in_flight)
    }

    /// Create a shader from already loaded SPIR-V words
    ///
    /// The paths only serve stage inference and log messages.
    pub fn from_binaries(
        device: Arc<dyn GpuDevice>,
        binaries: Vec<(PathBuf, Vec<u32>)>,
        resource_info: &ShaderResourceInfo,
        frames_in_flight: usize,
    ) -> Result<Self, ShaderError> {
        let label = binaries
            .iter()
            .map(|(path, _)| path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join("+");

        let mut parsed = Vec::with_capacity(binaries.len());
        for (path, words) in &binaries {
            let module = SpirvModule::parse(words).map_err(|e| {
                log::error!("[SHADER] Failed to parse {:?}: {}", path, e);
                ShaderError::Reflection(e.into())
            })?;
            let stage = module
                .execution_model()
                .map(|model| model.stage_flags())
                .or_else(|| stage_from_path(path))
                .unwrap_or(vk::ShaderStageFlags::ALL);
            let entry_point = module
                .entry_point
                .as_ref()
                .map_or("main", |entry| entry.name.as_str())
                .to_string();
            parsed.push((module, stage, entry_point));
        }

        let reflection =
            ShaderReflectionInfo::from_modules(parsed.iter().map(|(module, stage, _)| (module, *stage)), resource_info)
                .map_err(|e| {
                    log::error!("[SHADER] Reflection of {} failed: {}", label, e);
                    ShaderError::from(e)
                })?;

        let descriptors = DescriptorResourcePool::new(device.clone(), &reflection, frames_in_flight)?;

        let mut shader = Self {
            label,
            stages: Vec::with_capacity(parsed.len()),
            reflection,
            descriptors,
            device,
        };
        for ((_, stage, entry_point), (_, words)) in parsed.into_iter().zip(&binaries) {
            let entry_point = CString::new(entry_point).map_err(|e| VulkanError::InvalidOperation {
                reason: format!("entry point name contains NUL: {}", e),
            })?;
            let module = shader.device.create_shader_module(words)?;
            shader.stages.push(ShaderStage {
                stage,
                module,
                entry_point,
            });
        }

        log::info!(
            "[SHADER] Created {}: {} stages, {} descriptor sets, {} push constant bytes",
            shader.label,
            shader.stages.len(),
            shader.reflection.set_count(),
            shader.reflection.push_constant_size()
        );
        Ok(shader)
    }

    /// File names the shader was built from, joined with `+`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stages in file order
    pub fn stage_infos(&self) -> &[ShaderStage] {
        &self.stages
    }

    /// Reflected layout
    pub fn reflection(&self) -> &ShaderReflectionInfo {
        &self.reflection
    }

    /// Frame slots the descriptor sets are replicated over
    pub fn frames_in_flight(&self) -> usize {
        self.descriptors.frames_in_flight()
    }

    /// Set layouts of one frame slot, in set order
    pub fn descriptor_set_layouts(&self, frame: usize) -> Vec<vk::DescriptorSetLayout> {
        self.descriptors.layouts(frame)
    }

    /// Packed push-constant ranges
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.reflection.push_constant_ranges
    }

    /// Byte offset of a named push-constant member
    pub fn push_constant_offset(&self, name: &str) -> Option<u32> {
        self.reflection.push_constant_offset(name)
    }

    /// Vertex buffer bindings
    pub fn vertex_input_bindings(&self) -> &[VertexInputBinding] {
        &self.reflection.vertex_bindings
    }

    /// Vertex attributes
    pub fn vertex_input_attributes(&self) -> &[VertexInputAttribute] {
        &self.reflection.vertex_attributes
    }

    /// Descriptor sets to bind for `frame`
    pub fn descriptor_sets(&mut self, frame: usize) -> &[vk::DescriptorSet] {
        self.descriptors.descriptor_sets(frame)
    }

    /// Write resources into `(set, binding)` for every frame slot
    pub fn write_shared_descriptors(&mut self, set: u32, binding: u32, resources: &DescriptorResources) -> bool {
        self.descriptors.write_shared(set, binding, resources)
    }

    /// Write resources into `(set, binding)` for one frame slot
    pub fn write_dynamic_descriptors(
        &mut self,
        frame: usize,
        set: u32,
        binding: u32,
        resources: &DescriptorResources,
    ) -> bool {
        self.descriptors.write_dynamic(frame, set, binding, resources)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        log::debug!("[SHADER] Dropping {}", self.label);
        for stage in &self.stages {
            self.device.destroy_shader_module(stage.module);
        }
    }
}
