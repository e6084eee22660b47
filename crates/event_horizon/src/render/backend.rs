//! GPU device abstraction
//!
//! The binding and pipeline managers talk to the GPU only through
//! [`GpuDevice`]. The Vulkan backend implements it on top of `ash`; the
//! headless backend implements it in memory so the managers can be driven
//! without a GPU.
//!
//! Handles are plain `vk` handles so the same values flow to command
//! recording in the frame loop.

use ash::vk;

use crate::render::barriers::ImageLayoutState;
use crate::render::pipeline::GraphicsPipelineState;
use crate::render::shader::reflection::{DescriptorBinding, PushConstantRange};
use crate::render::shader::ShaderStage;
use crate::render::VulkanResult;

/// Descriptor count reserved in a pool for one descriptor type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    /// Descriptor type
    pub kind: vk::DescriptorType,
    /// Descriptors of that type
    pub count: u32,
}

impl DescriptorPoolSize {
    /// Vulkan pool size
    pub fn to_vk(&self) -> vk::DescriptorPoolSize {
        vk::DescriptorPoolSize {
            ty: self.kind,
            descriptor_count: self.count,
        }
    }
}

/// Resources written into one descriptor binding
#[derive(Debug, Clone)]
pub enum DescriptorResources {
    /// Uniform or storage buffers
    Buffers(Vec<vk::DescriptorBufferInfo>),
    /// Images, samplers or combined image samplers
    Images(Vec<vk::DescriptorImageInfo>),
}

impl DescriptorResources {
    /// Number of array elements written
    pub fn len(&self) -> usize {
        match self {
            Self::Buffers(infos) => infos.len(),
            Self::Images(infos) => infos.len(),
        }
    }

    /// Whether nothing is written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One `vkUpdateDescriptorSets` write
#[derive(Debug, Clone)]
pub struct DescriptorWrite {
    /// Target set
    pub set: vk::DescriptorSet,
    /// Target binding slot
    pub binding: u32,
    /// Descriptor type of the slot
    pub kind: vk::DescriptorType,
    /// Resources to write, starting at array element 0
    pub resources: DescriptorResources,
}

/// Pixel data for a sampled 2D texture
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    /// Image size
    pub extent: vk::Extent2D,
    /// Pixel format of `pixels`
    pub format: vk::Format,
    /// Tightly packed pixel rows
    pub pixels: &'a [u8],
}

/// A sampled image with its view and sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    /// Image handle
    pub image: vk::Image,
    /// Full-image view
    pub view: vk::ImageView,
    /// Sampler used when binding as a combined image sampler
    pub sampler: vk::Sampler,
    /// Image size
    pub extent: vk::Extent2D,
    /// Pixel format
    pub format: vk::Format,
    /// Layout the image is left in after creation
    pub layout: ImageLayoutState,
}

/// Device operations used by shaders, descriptor pools, uniform buffers and pipelines
///
/// Creation functions return Vulkan errors; destruction never fails and
/// ignores null handles.
pub trait GpuDevice: Send + Sync {
    /// Block until all submitted work has finished
    fn wait_idle(&self) -> VulkanResult<()>;

    /// `minUniformBufferOffsetAlignment` device limit
    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize;

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;

    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a descriptor pool
    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one set per layout
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;

    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    /// Create a host-visible, persistently mapped, zero-filled buffer
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer>;

    /// Copy bytes into a buffer created by [`GpuDevice::create_buffer`]
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// Create a sampled texture and upload its pixels
    fn create_texture(&self, upload: &TextureUpload<'_>) -> VulkanResult<GpuImage>;

    /// Destroy a texture's sampler, view, image and memory
    fn destroy_texture(&self, image: &GpuImage);

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    /// Build a graphics pipeline from a state snapshot
    fn create_graphics_pipeline(
        &self,
        state: &GraphicsPipelineState,
        layout: vk::PipelineLayout,
    ) -> VulkanResult<vk::Pipeline>;

    /// Build a compute pipeline
    fn create_compute_pipeline(&self, stage: &ShaderStage, layout: vk::PipelineLayout) -> VulkanResult<vk::Pipeline>;

    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}
