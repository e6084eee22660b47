//! Named graphics and compute pipelines
//!
//! Graphics pipelines bake their viewport, so each one registers a hook pair
//! with the [`SurfaceResizeNotifier`]: the destroy hook drops the pipeline
//! object, the create hook applies the new extent to the stored state and
//! rebuilds. Pipeline layouts survive resizes.
//!
//! A pipeline keeps using its shader's modules after creation; remove
//! pipelines before the shaders they were built from.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::pipeline_state::GraphicsPipelineState;
use crate::assets::AssetRegistry;
use crate::render::backend::GpuDevice;
use crate::render::resize::{HookToken, SurfaceResizeNotifier};
use crate::render::shader::Shader;
use crate::render::{VulkanError, VulkanResult};

/// Pipeline manager failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A pipeline with the name already exists
    #[error("Pipeline already exists: {0}")]
    DuplicateName(String),

    /// No pipeline has the name
    #[error("Pipeline not found: {0}")]
    NotFound(String),

    /// The named shader is not in the asset registry
    #[error("Shader not found: {0}")]
    ShaderNotFound(String),

    /// The shader has no stages to build from
    #[error("Shader {0} has no stages")]
    NoStages(String),

    /// Device call failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

#[derive(Debug)]
struct PipelineEntry {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    graphics: Option<GraphicsPipelineState>,
    generation: u64,
    hook: Option<HookToken>,
    retired: bool,
}

impl PipelineEntry {
    fn destroy_pipeline(&mut self, device: &dyn GpuDevice) {
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
    }

    fn rebuild(&mut self, device: &dyn GpuDevice, extent: vk::Extent2D) -> VulkanResult<()> {
        if self.retired {
            return Ok(());
        }
        match self.graphics.as_mut() {
            Some(state) => state.apply_surface_extent(extent),
            None => return Ok(()),
        }
        self.destroy_pipeline(device);
        if let Some(state) = &self.graphics {
            self.pipeline = device.create_graphics_pipeline(state, self.layout)?;
        }
        self.generation += 1;
        Ok(())
    }

    fn retire(&mut self, device: &dyn GpuDevice) {
        self.destroy_pipeline(device);
        device.destroy_pipeline_layout(self.layout);
        self.layout = vk::PipelineLayout::null();
        self.retired = true;
    }
}

/// Owns every pipeline and its layout by name
pub struct PipelineManager {
    device: Arc<dyn GpuDevice>,
    entries: HashMap<String, Rc<RefCell<PipelineEntry>>>,
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("pipelines", &self.names())
            .finish_non_exhaustive()
    }
}

impl PipelineManager {
    /// Create an empty manager
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            entries: HashMap::new(),
        }
    }

    fn shader<'a>(&self, shader_name: &str, assets: &'a AssetRegistry) -> Result<&'a Shader, PipelineError> {
        let shader = assets.get::<Shader>(shader_name).ok_or_else(|| {
            log::error!("[PIPELINE] Shader not found: {}", shader_name);
            PipelineError::ShaderNotFound(shader_name.to_string())
        })?;
        if shader.stage_infos().is_empty() {
            log::error!("[PIPELINE] Shader {} has no stages", shader_name);
            return Err(PipelineError::NoStages(shader_name.to_string()));
        }
        Ok(shader)
    }

    fn check_name(&self, name: &str) -> Result<(), PipelineError> {
        if self.entries.contains_key(name) {
            log::error!("[PIPELINE] Pipeline already exists: {}", name);
            return Err(PipelineError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn create_layout(&self, shader: &Shader) -> VulkanResult<vk::PipelineLayout> {
        self.device
            .create_pipeline_layout(&shader.descriptor_set_layouts(0), shader.push_constant_ranges())
    }

    /// Build a graphics pipeline from a shader and state, rebuilt on every resize
    ///
    /// Stages and vertex input of `state` are replaced by the shader's. When
    /// the notifier already knows the surface extent it is applied before
    /// the first build.
    pub fn create_graphics_pipeline(
        &mut self,
        name: &str,
        shader_name: &str,
        mut state: GraphicsPipelineState,
        assets: &AssetRegistry,
        notifier: &mut SurfaceResizeNotifier,
    ) -> Result<(), PipelineError> {
        self.check_name(name)?;
        let shader = self.shader(shader_name, assets)?;
        self.device.wait_idle()?;

        state.stages = shader.stage_infos().to_vec();
        state.vertex_bindings = shader.vertex_input_bindings().to_vec();
        state.vertex_attributes = shader.vertex_input_attributes().to_vec();
        if let Some(extent) = notifier.current_extent() {
            state.apply_surface_extent(extent);
        }

        let layout = self.create_layout(shader)?;
        let pipeline = match self.device.create_graphics_pipeline(&state, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("[PIPELINE] Failed to create {}: {}", name, e);
                self.device.destroy_pipeline_layout(layout);
                return Err(e.into());
            }
        };

        let entry = Rc::new(RefCell::new(PipelineEntry {
            pipeline,
            layout,
            graphics: Some(state),
            generation: 1,
            hook: None,
            retired: false,
        }));

        let created_entry = Rc::clone(&entry);
        let created_device = Arc::clone(&self.device);
        let destroyed_entry = Rc::clone(&entry);
        let destroyed_device = Arc::clone(&self.device);
        let token = notifier.register(
            name,
            move |extent| {
                created_device.wait_idle()?;
                created_entry.borrow_mut().rebuild(created_device.as_ref(), extent)
            },
            move || destroyed_entry.borrow_mut().destroy_pipeline(destroyed_device.as_ref()),
        );
        entry.borrow_mut().hook = Some(token);

        log::info!("[PIPELINE] Created graphics pipeline {} from {}", name, shader_name);
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Build a compute pipeline from the shader's first stage
    pub fn create_compute_pipeline(
        &mut self,
        name: &str,
        shader_name: &str,
        assets: &AssetRegistry,
    ) -> Result<(), PipelineError> {
        self.check_name(name)?;
        let shader = self.shader(shader_name, assets)?;
        self.device.wait_idle()?;

        let layout = self.create_layout(shader)?;
        let stage = &shader.stage_infos()[0];
        let pipeline = match self.device.create_compute_pipeline(stage, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("[PIPELINE] Failed to create {}: {}", name, e);
                self.device.destroy_pipeline_layout(layout);
                return Err(e.into());
            }
        };

        log::info!("[PIPELINE] Created compute pipeline {} from {}", name, shader_name);
        self.entries.insert(
            name.to_string(),
            Rc::new(RefCell::new(PipelineEntry {
                pipeline,
                layout,
                graphics: None,
                generation: 1,
                hook: None,
                retired: false,
            })),
        );
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<&Rc<RefCell<PipelineEntry>>, PipelineError> {
        self.entries.get(name).ok_or_else(|| {
            log::error!("[PIPELINE] Pipeline not found: {}", name);
            PipelineError::NotFound(name.to_string())
        })
    }

    /// Current pipeline handle; null between a surface destroy and recreate
    pub fn pipeline(&self, name: &str) -> Result<vk::Pipeline, PipelineError> {
        Ok(self.entry(name)?.borrow().pipeline)
    }

    /// Pipeline layout handle
    pub fn pipeline_layout(&self, name: &str) -> Result<vk::PipelineLayout, PipelineError> {
        Ok(self.entry(name)?.borrow().layout)
    }

    /// Times the pipeline has been built, starting at 1
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|entry| entry.borrow().generation)
    }

    /// Copy of a graphics pipeline's current state
    pub fn graphics_state(&self, name: &str) -> Option<GraphicsPipelineState> {
        self.entries.get(name)?.borrow().graphics.clone()
    }

    /// Whether a pipeline has the name
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Pipeline names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Unregister a pipeline's hooks and destroy it with its layout
    pub fn remove(&mut self, name: &str, notifier: &mut SurfaceResizeNotifier) -> Result<(), PipelineError> {
        let entry = self.entries.remove(name).ok_or_else(|| {
            log::error!("[PIPELINE] Pipeline not found: {}", name);
            PipelineError::NotFound(name.to_string())
        })?;
        let mut entry = entry.borrow_mut();
        if let Some(token) = entry.hook.take() {
            notifier.unregister(token);
        }
        entry.retire(self.device.as_ref());
        log::debug!("[PIPELINE] Removed {}", name);
        Ok(())
    }

    /// Remove every pipeline
    pub fn clear(&mut self, notifier: &mut SurfaceResizeNotifier) {
        let names: Vec<String> = self.entries.keys().cloned().collect();
        for name in names {
            let _ = self.remove(&name, notifier);
        }
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        // Hooks still registered elsewhere see the entries retired and do nothing.
        for entry in self.entries.values() {
            entry.borrow_mut().retire(self.device.as_ref());
        }
    }
}
