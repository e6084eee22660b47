//! [`GpuDevice`] on top of `ash`
//!
//! Uniform buffers are host-visible and coherent, mapped once at creation
//! and kept mapped until destruction. Textures go through a staging buffer
//! copied in a one-time command buffer.

use std::collections::HashMap;
use std::ffi::CStr;

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use super::context::{VulkanContext, VulkanError, VulkanResult};
use crate::core::config::GraphicsConfig;
use crate::render::backend::{DescriptorPoolSize, DescriptorResources, DescriptorWrite, GpuDevice, GpuImage, TextureUpload};
use crate::render::barriers::{BarrierBatch, ImageLayoutState, TrackedImage};
use crate::render::pipeline::GraphicsPipelineState;
use crate::render::shader::reflection::{DescriptorBinding, PushConstantRange};
use crate::render::shader::ShaderStage;

/// Host pointer of a persistently mapped allocation
#[derive(Debug, Clone, Copy)]
struct MappedPtr(*mut u8);

// The pointer is only dereferenced while the buffer table lock is held.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

#[derive(Debug)]
struct MappedBuffer {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: MappedPtr,
}

/// Vulkan implementation of [`GpuDevice`]
pub struct VulkanDevice {
    buffers: Mutex<HashMap<vk::Buffer, MappedBuffer>>,
    texture_memory: Mutex<HashMap<vk::Image, vk::DeviceMemory>>,
    command_pool: Mutex<vk::CommandPool>,
    context: VulkanContext,
}

impl VulkanDevice {
    /// Create the device
    ///
    /// `instance_extensions` are the surface extensions reported by the
    /// windowing layer. The swapchain device extension is always requested.
    pub fn new(config: &GraphicsConfig, instance_extensions: &[&CStr]) -> VulkanResult<Self> {
        let context = VulkanContext::new(config, instance_extensions, &[ash::extensions::khr::Swapchain::name()])?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.physical_device.graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            context
                .device
                .create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            buffers: Mutex::new(HashMap::new()),
            texture_memory: Mutex::new(HashMap::new()),
            command_pool: Mutex::new(command_pool),
            context,
        })
    }

    /// Underlying context (instance, physical and logical device)
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    fn device(&self) -> &ash::Device {
        &self.context.device
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type = self.context.find_memory_type(requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        unsafe {
            self.device().allocate_memory(&alloc_info, None).map_err(|e| match e {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    VulkanError::OutOfMemory {
                        requested: requirements.size as usize,
                    }
                }
                other => VulkanError::Api(other),
            })
        }
    }

    fn create_raw_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<(vk::Buffer, vk::DeviceMemory)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device().create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { self.device().get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        unsafe {
            if let Err(e) = self.device().bind_buffer_memory(buffer, memory, 0) {
                self.device().destroy_buffer(buffer, None);
                self.device().free_memory(memory, None);
                return Err(VulkanError::Api(e));
            }
        }
        Ok((buffer, memory))
    }

    /// Record and submit a one-time command buffer, waiting for completion
    fn submit_one_time(&self, record: impl FnOnce(vk::CommandBuffer)) -> VulkanResult<()> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        unsafe {
            let command_buffer = self
                .device()
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
                .into_iter()
                .next()
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: "no command buffer allocated".to_string(),
                })?;

            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let result = self
                .device()
                .begin_command_buffer(command_buffer, &begin_info)
                .and_then(|()| {
                    record(command_buffer);
                    self.device().end_command_buffer(command_buffer)
                })
                .and_then(|()| {
                    let command_buffers = [command_buffer];
                    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
                    self.device()
                        .queue_submit(self.context.graphics_queue, &[submit_info], vk::Fence::null())
                })
                .and_then(|()| self.device().queue_wait_idle(self.context.graphics_queue));

            self.device().free_command_buffers(*pool, &[command_buffer]);
            result.map_err(VulkanError::Api)
        }
    }

    fn record_barriers(&self, command_buffer: vk::CommandBuffer, batch: &BarrierBatch) {
        if batch.is_empty() {
            return;
        }
        let barriers = batch.image_barriers();
        unsafe {
            self.device().cmd_pipeline_barrier(
                command_buffer,
                batch.src_stage_mask(),
                batch.dst_stage_mask(),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    fn destroy_image_objects(&self, image: vk::Image, view: vk::ImageView, sampler: vk::Sampler) {
        unsafe {
            if sampler != vk::Sampler::null() {
                self.device().destroy_sampler(sampler, None);
            }
            if view != vk::ImageView::null() {
                self.device().destroy_image_view(view, None);
            }
            if image != vk::Image::null() {
                self.device().destroy_image(image, None);
            }
        }
        if let Some(memory) = self.texture_memory.lock().remove(&image) {
            unsafe { self.device().free_memory(memory, None) };
        }
    }

    fn upload_pixels(&self, image: vk::Image, upload: &TextureUpload<'_>) -> VulkanResult<ImageLayoutState> {
        let size = upload.pixels.len() as vk::DeviceSize;
        let (staging, staging_memory) = self.create_raw_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let result = unsafe {
            self.device()
                .map_memory(staging_memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)
                .and_then(|ptr| {
                    std::ptr::copy_nonoverlapping(upload.pixels.as_ptr(), ptr.cast::<u8>(), upload.pixels.len());
                    self.device().unmap_memory(staging_memory);

                    let mut tracked = TrackedImage::new(image, vk::ImageAspectFlags::COLOR);
                    self.submit_one_time(|command_buffer| {
                        let mut to_transfer = BarrierBatch::new();
                        to_transfer.transition(&mut tracked, ImageLayoutState::TransferDst);
                        self.record_barriers(command_buffer, &to_transfer);

                        let region = vk::BufferImageCopy::builder()
                            .image_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                mip_level: 0,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .image_extent(vk::Extent3D {
                                width: upload.extent.width,
                                height: upload.extent.height,
                                depth: 1,
                            })
                            .build();
                        self.device().cmd_copy_buffer_to_image(
                            command_buffer,
                            staging,
                            image,
                            ImageLayoutState::TransferDst.layout(),
                            &[region],
                        );

                        let mut to_shader = BarrierBatch::new();
                        to_shader.transition(&mut tracked, ImageLayoutState::ShaderReadOnly);
                        self.record_barriers(command_buffer, &to_shader);
                    })?;
                    Ok(tracked.state())
                })
        };

        unsafe {
            self.device().destroy_buffer(staging, None);
            self.device().free_memory(staging_memory, None);
        }
        result
    }

    fn build_texture(&self, upload: &TextureUpload<'_>, gpu: &mut GpuImage) -> VulkanResult<()> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: upload.extent.width,
                height: upload.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(upload.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        gpu.image = unsafe { self.device().create_image(&image_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { self.device().get_image_memory_requirements(gpu.image) };
        let memory = self.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        self.texture_memory.lock().insert(gpu.image, memory);
        unsafe {
            self.device()
                .bind_image_memory(gpu.image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        gpu.layout = self.upload_pixels(gpu.image, upload)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(gpu.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(upload.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        gpu.view = unsafe { self.device().create_image_view(&view_info, None).map_err(VulkanError::Api)? };

        let max_anisotropy = self.context.limits().max_sampler_anisotropy;
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        gpu.sampler = unsafe { self.device().create_sampler(&sampler_info, None).map_err(VulkanError::Api)? };
        Ok(())
    }
}

impl GpuDevice for VulkanDevice {
    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api) }
    }

    fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.context.limits().min_uniform_buffer_offset_alignment
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe {
            self.device().create_shader_module(&create_info, None).map_err(|e| {
                log::error!("[SHADER] vkCreateShaderModule failed: {:?}", e);
                VulkanError::Api(e)
            })
        }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        if module != vk::ShaderModule::null() {
            unsafe { self.device().destroy_shader_module(module, None) };
        }
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings.iter().map(DescriptorBinding::to_vk).collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        unsafe {
            self.device()
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        if layout != vk::DescriptorSetLayout::null() {
            unsafe { self.device().destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn create_descriptor_pool(&self, max_sets: u32, pool_sizes: &[DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let vk_sizes: Vec<vk::DescriptorPoolSize> = pool_sizes.iter().map(DescriptorPoolSize::to_vk).collect();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&vk_sizes);
        unsafe { self.device().create_descriptor_pool(&pool_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        if pool != vk::DescriptorPool::null() {
            unsafe { self.device().destroy_descriptor_pool(pool, None) };
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe { self.device().allocate_descriptor_sets(&alloc_info).map_err(VulkanError::Api) }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .filter(|write| !write.resources.is_empty())
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.kind);
                match &write.resources {
                    DescriptorResources::Buffers(infos) => builder.buffer_info(infos).build(),
                    DescriptorResources::Images(infos) => builder.image_info(infos).build(),
                }
            })
            .collect();
        if !vk_writes.is_empty() {
            unsafe { self.device().update_descriptor_sets(&vk_writes, &[]) };
        }
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        let (buffer, memory) = self.create_raw_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let mapped = unsafe {
            match self.device().map_memory(memory, 0, size, vk::MemoryMapFlags::empty()) {
                Ok(ptr) => ptr.cast::<u8>(),
                Err(e) => {
                    self.device().destroy_buffer(buffer, None);
                    self.device().free_memory(memory, None);
                    return Err(VulkanError::Api(e));
                }
            }
        };
        unsafe { std::ptr::write_bytes(mapped, 0, size as usize) };

        self.buffers.lock().insert(
            buffer,
            MappedBuffer {
                memory,
                size,
                mapped: MappedPtr(mapped),
            },
        );
        log::trace!("[UBO] Created mapped buffer {:?} ({} bytes)", buffer, size);
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let buffers = self.buffers.lock();
        let entry = buffers
            .get(&buffer)
            .ok_or(VulkanError::ResourceNotFound { id: buffer.as_raw() })?;
        if offset + data.len() as vk::DeviceSize > entry.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    entry.size
                ),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), entry.mapped.0.add(offset as usize), data.len());
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        if let Some(entry) = self.buffers.lock().remove(&buffer) {
            unsafe {
                self.device().unmap_memory(entry.memory);
                self.device().destroy_buffer(buffer, None);
                self.device().free_memory(entry.memory, None);
            }
        }
    }

    fn create_texture(&self, upload: &TextureUpload<'_>) -> VulkanResult<GpuImage> {
        let mut gpu = GpuImage {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            extent: upload.extent,
            format: upload.format,
            layout: ImageLayoutState::Undefined,
        };
        if let Err(e) = self.build_texture(upload, &mut gpu) {
            log::error!("[ASSET] Texture creation failed: {}", e);
            self.destroy_image_objects(gpu.image, gpu.view, gpu.sampler);
            return Err(e);
        }
        Ok(gpu)
    }

    fn destroy_texture(&self, image: &GpuImage) {
        self.destroy_image_objects(image.image, image.view, image.sampler);
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let ranges: Vec<vk::PushConstantRange> = push_constant_ranges.iter().map(PushConstantRange::to_vk).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&ranges);
        unsafe { self.device().create_pipeline_layout(&layout_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        if layout != vk::PipelineLayout::null() {
            unsafe { self.device().destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_graphics_pipeline(
        &self,
        state: &GraphicsPipelineState,
        layout: vk::PipelineLayout,
    ) -> VulkanResult<vk::Pipeline> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> =
            state.stages.iter().map(ShaderStage::create_info).collect();

        let bindings: Vec<vk::VertexInputBindingDescription> =
            state.vertex_bindings.iter().map(|b| b.to_vk()).collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> =
            state.vertex_attributes.iter().map(|a| a.to_vk()).collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(state.topology)
            .primitive_restart_enable(false);

        let viewports = [state.viewport];
        let scissors = [state.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(state.polygon_mode.to_vk())
            .line_width(1.0)
            .cull_mode(state.cull_mode.to_vk())
            .front_face(state.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(state.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(state.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = vec![state.blend_mode.attachment(); state.color_attachment_count as usize];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = state.effective_dynamic_states();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(state.render_pass)
            .subpass(state.subpass);

        let pipelines = unsafe {
            self.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| {
                    log::error!("[PIPELINE] vkCreateGraphicsPipelines failed: {:?}", err);
                    VulkanError::Api(err)
                })?
        };
        pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no graphics pipeline".to_string(),
        })
    }

    fn create_compute_pipeline(&self, stage: &ShaderStage, layout: vk::PipelineLayout) -> VulkanResult<vk::Pipeline> {
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.create_info())
            .layout(layout);
        let pipelines = unsafe {
            self.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| {
                    log::error!("[PIPELINE] vkCreateComputePipelines failed: {:?}", err);
                    VulkanError::Api(err)
                })?
        };
        pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no compute pipeline".to_string(),
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        if pipeline != vk::Pipeline::null() {
            unsafe { self.device().destroy_pipeline(pipeline, None) };
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device().device_wait_idle();
        }
        let leaked: Vec<vk::Buffer> = self.buffers.lock().keys().copied().collect();
        if !leaked.is_empty() {
            log::warn!("VulkanDevice dropped with {} live buffers", leaked.len());
        }
        for buffer in leaked {
            self.destroy_buffer(buffer);
        }
        for (_, memory) in self.texture_memory.lock().drain() {
            unsafe { self.device().free_memory(memory, None) };
        }
        unsafe {
            self.device().destroy_command_pool(*self.command_pool.lock(), None);
        }
    }
}

