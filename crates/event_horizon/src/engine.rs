//! Render context
//!
//! [`RenderContext`] is the single owner of everything the binding and
//! pipeline subsystem creates. The frame orchestrator holds one and threads
//! it through the main loop; nothing is reachable through globals.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::assets::{AssetError, AssetHandle, AssetRegistry, Texture};
use crate::config::ConfigError;
use crate::core::config::EngineConfig;
use crate::render::backend::GpuDevice;
use crate::render::frame::FrameCounter;
use crate::render::pipeline::{GraphicsPipelineState, PipelineError, PipelineManager};
use crate::render::resize::SurfaceResizeNotifier;
use crate::render::shader::reflection::ShaderResourceInfo;
use crate::render::shader::Shader;
use crate::render::uniform_buffers::{UniformBlock, UniformBufferCreateInfo, UniformBufferError, UniformBufferManager};
use crate::render::VulkanError;

/// Render context failures
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Asset loading or registration failed
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Pipeline creation or lookup failed
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Uniform buffer operation failed
    #[error("Uniform buffer error: {0}")]
    UniformBuffer(#[from] UniformBufferError),

    /// Device call failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// Owner of the device, assets, uniform buffers, pipelines and resize hooks
pub struct RenderContext {
    frames: FrameCounter,
    notifier: SurfaceResizeNotifier,
    pipelines: PipelineManager,
    uniform_buffers: UniformBufferManager,
    assets: AssetRegistry,
    config: EngineConfig,
    device: Arc<dyn GpuDevice>,
    shut_down: bool,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("frames", &self.frames)
            .field("assets", &self.assets)
            .field("uniform_buffers", &self.uniform_buffers)
            .field("pipelines", &self.pipelines)
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    /// Create a context on `device`
    pub fn new(device: Arc<dyn GpuDevice>, config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let frames_in_flight = config.graphics.max_frames_in_flight;
        log::info!(
            "Render context for {} ({} frames in flight)",
            config.graphics.application_name,
            frames_in_flight
        );

        Ok(Self {
            frames: FrameCounter::new(frames_in_flight),
            notifier: SurfaceResizeNotifier::new(),
            pipelines: PipelineManager::new(Arc::clone(&device)),
            uniform_buffers: UniformBufferManager::new(Arc::clone(&device), frames_in_flight),
            assets: AssetRegistry::new(),
            config: config.clone(),
            device,
            shut_down: false,
        })
    }

    /// Device the context creates objects on
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Configuration the context was created with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frames in flight
    pub fn frames_in_flight(&self) -> usize {
        self.frames.frames_in_flight()
    }

    /// Slot of the frame being recorded
    pub fn current_frame(&self) -> usize {
        self.frames.current()
    }

    /// Named assets
    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    /// Named assets, mutably
    pub fn assets_mut(&mut self) -> &mut AssetRegistry {
        &mut self.assets
    }

    /// Uniform buffer sets
    pub fn uniform_buffers(&self) -> &UniformBufferManager {
        &self.uniform_buffers
    }

    /// Pipelines
    pub fn pipelines(&self) -> &PipelineManager {
        &self.pipelines
    }

    /// Resize hook registry, for objects outside this crate
    pub fn resize_notifier(&mut self) -> &mut SurfaceResizeNotifier {
        &mut self.notifier
    }

    /// Load a shader from files under the configured shader directory
    pub fn load_shader<P: AsRef<Path>>(
        &mut self,
        name: &str,
        files: &[P],
        resource_info: &ShaderResourceInfo,
    ) -> Result<AssetHandle<Shader>, EngineError> {
        self.device.wait_idle()?;
        let paths: Vec<_> = files.iter().map(|file| self.config.assets.shader_path(file)).collect();
        let device = Arc::clone(&self.device);
        let frames_in_flight = self.frames.frames_in_flight();
        Ok(self
            .assets
            .add_with(name, || Shader::new(device, &paths, resource_info, frames_in_flight))?)
    }

    /// Load a texture from the configured texture directory
    pub fn load_texture(&mut self, name: &str, file: impl AsRef<Path>) -> Result<AssetHandle<Texture>, EngineError> {
        let path = self.config.assets.texture_path(file);
        let device = Arc::clone(&self.device);
        Ok(self.assets.add_with(name, || Texture::from_file(device, &path))?)
    }

    /// Create a uniform buffer set, one buffer per frame in flight unless `count` is given
    pub fn create_uniform_buffers<S: UniformBlock>(
        &mut self,
        create_info: UniformBufferCreateInfo,
        count: Option<usize>,
    ) -> Result<(), EngineError> {
        Ok(self.uniform_buffers.create_buffers::<S>(create_info, count)?)
    }

    /// Copy `data` into the current frame's buffer
    pub fn update_uniform_buffer<S: UniformBlock>(&self, name: &str, data: &S) -> Result<(), EngineError> {
        Ok(self
            .uniform_buffers
            .update_entire_buffer(self.frames.current(), name, data)?)
    }

    /// Bind a uniform buffer set into every frame slot of the listed shaders
    pub fn bind_uniform_buffers(&mut self, shaders: &[&str], buffer: &str) -> Result<(), EngineError> {
        Ok(self.uniform_buffers.bind_to_buffers(shaders, buffer, &mut self.assets)?)
    }

    /// Bind the current frame's uniform buffer into each listed shader
    pub fn bind_uniform_buffer_for_frame(&mut self, shaders: &[&str], buffer: &str) -> Result<(), EngineError> {
        Ok(self
            .uniform_buffers
            .bind_shaders_to_buffer(self.frames.current(), shaders, buffer, &mut self.assets)?)
    }

    /// Create a graphics pipeline rebuilt on every surface resize
    pub fn create_graphics_pipeline(
        &mut self,
        name: &str,
        shader_name: &str,
        state: GraphicsPipelineState,
    ) -> Result<(), EngineError> {
        Ok(self
            .pipelines
            .create_graphics_pipeline(name, shader_name, state, &self.assets, &mut self.notifier)?)
    }

    /// Create a compute pipeline
    pub fn create_compute_pipeline(&mut self, name: &str, shader_name: &str) -> Result<(), EngineError> {
        Ok(self.pipelines.create_compute_pipeline(name, shader_name, &self.assets)?)
    }

    /// Remove a pipeline and its resize hooks
    pub fn remove_pipeline(&mut self, name: &str) -> Result<(), EngineError> {
        Ok(self.pipelines.remove(name, &mut self.notifier)?)
    }

    /// Descriptor sets of a shader for the current frame, in set order
    pub fn descriptor_sets(&mut self, shader_name: &str) -> Option<Vec<vk::DescriptorSet>> {
        let frame = self.frames.current();
        let shader = self.assets.get_mut::<Shader>(shader_name);
        if shader.is_none() {
            log::error!("[DESCRIPTOR] Shader not found: {}", shader_name);
        }
        Some(shader?.descriptor_sets(frame).to_vec())
    }

    /// Recreate extent-dependent objects after the swapchain was rebuilt
    pub fn resize_surface(&mut self, extent: vk::Extent2D) -> Result<(), EngineError> {
        log::info!("[RESIZE] Surface resized to {}x{}", extent.width, extent.height);
        self.device.wait_idle()?;
        Ok(self.notifier.notify_resize(extent)?)
    }

    /// Start recording a frame, returning its slot
    pub fn begin_frame(&self) -> usize {
        self.frames.current()
    }

    /// Finish the frame, returning the next slot
    pub fn end_frame(&mut self) -> usize {
        self.frames.advance()
    }

    /// Wait for the device, then release pipelines, uniform buffers and assets in that order
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Ok(());
        }
        log::info!("Render context shutting down");
        let idle = self.device.wait_idle();
        self.pipelines.clear(&mut self.notifier);
        self.uniform_buffers.clear();
        self.assets.clear();
        self.shut_down = true;
        Ok(idle?)
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Render context shutdown failed: {}", e);
        }
    }
}
