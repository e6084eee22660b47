//! Headless GPU device for testing and tooling.
//!
//! Implements [`GpuDevice`] entirely in memory. Handles are unique integers,
//! buffer contents are kept as byte vectors, and every descriptor write and
//! pipeline state is recorded so callers can inspect what would have reached
//! the GPU. Pool limits are enforced the way a driver would, so undersized
//! descriptor pools fail here too.

use std::collections::HashMap;

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::render::backend::{
    DescriptorPoolSize, DescriptorResources, DescriptorWrite, GpuDevice, GpuImage, TextureUpload,
};
use crate::render::barriers::ImageLayoutState;
use crate::render::pipeline::GraphicsPipelineState;
use crate::render::shader::reflection::{DescriptorBinding, PushConstantRange};
use crate::render::shader::ShaderStage;
use crate::render::{VulkanError, VulkanResult};

/// Alignment reported when none is configured (common desktop value)
pub const DEFAULT_UNIFORM_ALIGNMENT: vk::DeviceSize = 256;

/// A pipeline as recorded by the headless device
#[derive(Debug, Clone)]
pub enum RecordedPipeline {
    /// Graphics pipeline with the state it was built from
    Graphics {
        /// State snapshot at creation time
        state: GraphicsPipelineState,
        /// Layout used
        layout: vk::PipelineLayout,
    },
    /// Compute pipeline
    Compute {
        /// Compute stage
        stage: ShaderStage,
        /// Layout used
        layout: vk::PipelineLayout,
    },
}

#[derive(Debug)]
struct PoolRecord {
    max_sets: u32,
    sizes: Vec<DescriptorPoolSize>,
    sets: Vec<vk::DescriptorSet>,
    used: HashMap<vk::DescriptorType, u32>,
}

#[derive(Debug)]
struct SetRecord {
    layout: vk::DescriptorSetLayout,
    bindings: HashMap<u32, DescriptorResources>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    wait_idle_calls: usize,
    shader_modules: HashMap<vk::ShaderModule, usize>,
    set_layouts: HashMap<vk::DescriptorSetLayout, Vec<DescriptorBinding>>,
    pools: HashMap<vk::DescriptorPool, PoolRecord>,
    sets: HashMap<vk::DescriptorSet, SetRecord>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    textures: HashMap<vk::Image, GpuImage>,
    pipeline_layouts: HashMap<vk::PipelineLayout, (Vec<vk::DescriptorSetLayout>, Vec<PushConstantRange>)>,
    pipelines: HashMap<vk::Pipeline, RecordedPipeline>,
    fail_pipeline_creation: Option<vk::Result>,
}

impl HeadlessState {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }
}

/// Counts of live objects, for leak checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    /// Shader modules
    pub shader_modules: usize,
    /// Descriptor set layouts
    pub set_layouts: usize,
    /// Descriptor pools
    pub descriptor_pools: usize,
    /// Buffers
    pub buffers: usize,
    /// Textures
    pub textures: usize,
    /// Pipeline layouts
    pub pipeline_layouts: usize,
    /// Pipelines
    pub pipelines: usize,
}

impl LiveObjects {
    /// Whether every object has been destroyed
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// In-memory [`GpuDevice`]
#[derive(Debug)]
pub struct HeadlessDevice {
    min_uniform_alignment: vk::DeviceSize,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Create a headless device with the default uniform alignment
    pub fn new() -> Self {
        Self::with_uniform_alignment(DEFAULT_UNIFORM_ALIGNMENT)
    }

    /// Create a headless device reporting a specific `minUniformBufferOffsetAlignment`
    pub fn with_uniform_alignment(alignment: vk::DeviceSize) -> Self {
        log::trace!("HeadlessDevice: created (uniform alignment {})", alignment);
        Self {
            min_uniform_alignment: alignment,
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// Make the next pipeline creation fail with `result`
    pub fn fail_next_pipeline(&self, result: vk::Result) {
        self.state.lock().fail_pipeline_creation = Some(result);
    }

    /// Number of `wait_idle` calls so far
    pub fn wait_idle_calls(&self) -> usize {
        self.state.lock().wait_idle_calls
    }

    /// Copy of a buffer's contents
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }

    /// Resources last written to a set's binding
    pub fn descriptor(&self, set: vk::DescriptorSet, binding: u32) -> Option<DescriptorResources> {
        self.state.lock().sets.get(&set)?.bindings.get(&binding).cloned()
    }

    /// Layout a set was allocated with
    pub fn set_layout_of(&self, set: vk::DescriptorSet) -> Option<vk::DescriptorSetLayout> {
        self.state.lock().sets.get(&set).map(|record| record.layout)
    }

    /// Bindings of a live set layout
    pub fn set_layout_bindings(&self, layout: vk::DescriptorSetLayout) -> Option<Vec<DescriptorBinding>> {
        self.state.lock().set_layouts.get(&layout).cloned()
    }

    /// `max_sets` and pool sizes of a live pool
    pub fn pool_limits(&self, pool: vk::DescriptorPool) -> Option<(u32, Vec<DescriptorPoolSize>)> {
        self.state
            .lock()
            .pools
            .get(&pool)
            .map(|record| (record.max_sets, record.sizes.clone()))
    }

    /// Set layouts and push-constant ranges of a live pipeline layout
    pub fn pipeline_layout_info(
        &self,
        layout: vk::PipelineLayout,
    ) -> Option<(Vec<vk::DescriptorSetLayout>, Vec<PushConstantRange>)> {
        self.state.lock().pipeline_layouts.get(&layout).cloned()
    }

    /// A live pipeline
    pub fn pipeline(&self, pipeline: vk::Pipeline) -> Option<RecordedPipeline> {
        self.state.lock().pipelines.get(&pipeline).cloned()
    }

    /// Counts of objects not yet destroyed
    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state.lock();
        LiveObjects {
            shader_modules: state.shader_modules.len(),
            set_layouts: state.set_layouts.len(),
            descriptor_pools: state.pools.len(),
            buffers: state.buffers.len(),
            textures: state.textures.len(),
            pipeline_layouts: state.pipeline_layouts.len(),
            pipelines: state.pipelines.len(),
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn wait_idle(&self) -> VulkanResult<()> {
        self.state.lock().wait_idle_calls += 1;
        Ok(())
    }

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.min_uniform_alignment
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let mut state = self.state.lock();
        let module = state.handle();
        state.shader_modules.insert(module, code.len());
        log::trace!("HeadlessDevice: shader module {:?} ({} words)", module, code.len());
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.lock().shader_modules.remove(&module);
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        let layout = state.handle();
        state.set_layouts.insert(layout, bindings.to_vec());
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().set_layouts.remove(&layout);
    }

    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let pool = state.handle();
        state.pools.insert(
            pool,
            PoolRecord {
                max_sets,
                sizes: pool_sizes.to_vec(),
                sets: Vec::new(),
                used: HashMap::new(),
            },
        );
        log::trace!("HeadlessDevice: descriptor pool {:?} (max sets {})", pool, max_sets);
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        if let Some(record) = state.pools.remove(&pool) {
            for set in record.sets {
                state.sets.remove(&set);
            }
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();

        let mut demand: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            let bindings = state
                .set_layouts
                .get(layout)
                .ok_or(VulkanError::ResourceNotFound { id: layout.as_raw() })?;
            for binding in bindings {
                *demand.entry(binding.kind).or_default() += binding.count;
            }
        }

        let record = state
            .pools
            .get(&pool)
            .ok_or(VulkanError::ResourceNotFound { id: pool.as_raw() })?;
        if record.sets.len() + layouts.len() > record.max_sets as usize {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        for (kind, count) in &demand {
            let capacity = record
                .sizes
                .iter()
                .filter(|size| size.kind == *kind)
                .map(|size| size.count)
                .sum::<u32>();
            let used = record.used.get(kind).copied().unwrap_or(0);
            if used + count > capacity {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
            }
        }

        let sets: Vec<vk::DescriptorSet> = layouts.iter().map(|_| state.handle()).collect();
        for (set, layout) in sets.iter().zip(layouts) {
            state.sets.insert(
                *set,
                SetRecord {
                    layout: *layout,
                    bindings: HashMap::new(),
                },
            );
        }
        if let Some(record) = state.pools.get_mut(&pool) {
            record.sets.extend_from_slice(&sets);
            for (kind, count) in demand {
                *record.used.entry(kind).or_default() += count;
            }
        }
        Ok(sets)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        for write in writes {
            let Some(layout) = state.sets.get(&write.set).map(|record| record.layout) else {
                log::error!("HeadlessDevice: write to unknown descriptor set {:?}", write.set);
                continue;
            };
            let declared = state
                .set_layouts
                .get(&layout)
                .and_then(|bindings| bindings.iter().find(|b| b.binding == write.binding))
                .map(|binding| binding.kind);
            if declared != Some(write.kind) {
                log::error!(
                    "HeadlessDevice: binding {} of set {:?} is {:?}, write uses {:?}",
                    write.binding, write.set, declared, write.kind
                );
                continue;
            }
            if let Some(record) = state.sets.get_mut(&write.set) {
                record.bindings.insert(write.binding, write.resources.clone());
            }
        }
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        let mut state = self.state.lock();
        let buffer = state.handle();
        state.buffers.insert(buffer, vec![0; size as usize]);
        log::trace!("HeadlessDevice: buffer {:?} ({} bytes, {:?})", buffer, size, usage);
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let mut state = self.state.lock();
        let contents = state
            .buffers
            .get_mut(&buffer)
            .ok_or(VulkanError::ResourceNotFound { id: buffer.as_raw() })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {} exceeds buffer size {}", data.len(), start, contents.len()),
            });
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state.lock().buffers.remove(&buffer);
    }

    fn create_texture(&self, upload: &TextureUpload<'_>) -> VulkanResult<GpuImage> {
        let mut state = self.state.lock();
        let image = GpuImage {
            image: state.handle(),
            view: state.handle(),
            sampler: state.handle(),
            extent: upload.extent,
            format: upload.format,
            layout: ImageLayoutState::ShaderReadOnly,
        };
        state.textures.insert(image.image, image);
        Ok(image)
    }

    fn destroy_texture(&self, image: &GpuImage) {
        self.state.lock().textures.remove(&image.image);
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let mut state = self.state.lock();
        if let Some(missing) = set_layouts.iter().find(|layout| !state.set_layouts.contains_key(layout)) {
            return Err(VulkanError::ResourceNotFound { id: missing.as_raw() });
        }
        let layout = state.handle();
        state
            .pipeline_layouts
            .insert(layout, (set_layouts.to_vec(), push_constant_ranges.to_vec()));
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().pipeline_layouts.remove(&layout);
    }

    fn create_graphics_pipeline(
        &self,
        state: &GraphicsPipelineState,
        layout: vk::PipelineLayout,
    ) -> VulkanResult<vk::Pipeline> {
        let mut inner = self.state.lock();
        if let Some(result) = inner.fail_pipeline_creation.take() {
            return Err(VulkanError::Api(result));
        }
        if !inner.pipeline_layouts.contains_key(&layout) {
            return Err(VulkanError::ResourceNotFound { id: layout.as_raw() });
        }
        if state.bakes_empty_viewport() {
            return Err(VulkanError::InvalidOperation {
                reason: "graphics pipeline bakes an empty viewport".to_string(),
            });
        }
        let pipeline = inner.handle();
        inner.pipelines.insert(
            pipeline,
            RecordedPipeline::Graphics {
                state: state.clone(),
                layout,
            },
        );
        log::trace!("HeadlessDevice: graphics pipeline {:?}", pipeline);
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, stage: &ShaderStage, layout: vk::PipelineLayout) -> VulkanResult<vk::Pipeline> {
        let mut inner = self.state.lock();
        if let Some(result) = inner.fail_pipeline_creation.take() {
            return Err(VulkanError::Api(result));
        }
        if !inner.pipeline_layouts.contains_key(&layout) {
            return Err(VulkanError::ResourceNotFound { id: layout.as_raw() });
        }
        let pipeline = inner.handle();
        inner.pipelines.insert(
            pipeline,
            RecordedPipeline::Compute {
                stage: stage.clone(),
                layout,
            },
        );
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().pipelines.remove(&pipeline);
    }
}
