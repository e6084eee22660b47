//! # Event Horizon
//!
//! Shader resource binding and pipeline lifecycle for a Vulkan black-hole renderer.
//!
//! ## Features
//!
//! - **Shader reflection**: descriptor layouts, push constants and vertex input
//!   are read from SPIR-V, with per-shader overrides
//! - **Descriptor management**: per-frame descriptor sets, written once and
//!   flushed lazily
//! - **Uniform buffers**: typed `#[repr(C)]` blocks with whole-buffer and
//!   per-field updates
//! - **Pipelines**: named graphics and compute pipelines rebuilt on resize
//! - **Assets**: shaders and textures by name
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ash::vk;
//! use event_horizon::prelude::*;
//!
//! event_horizon::uniform_block! {
//!     pub struct GameArgs {
//!         pub time: f32,
//!         pub time_delta: f32,
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::new("Event Horizon");
//!     let device = Arc::new(VulkanDevice::new(&config.graphics, &[])?);
//!     let mut context = RenderContext::new(device, &config)?;
//!
//!     context.load_shader(
//!         "lensing",
//!         &["lensing.vert.spv", "lensing.frag.spv"],
//!         &ShaderResourceInfo::default(),
//!     )?;
//!     context.create_uniform_buffers::<GameArgs>(
//!         UniformBufferCreateInfo::new("GameArgs", 0, 0).with_fields(&["Time", "TimeDelta"]),
//!         None,
//!     )?;
//!     context.bind_uniform_buffers(&["lensing"], "GameArgs")?;
//!     context.create_graphics_pipeline(
//!         "lensing",
//!         "lensing",
//!         GraphicsPipelineState::fullscreen(vk::RenderPass::null()),
//!     )?;
//!
//!     context.resize_surface(vk::Extent2D { width: 1280, height: 720 })?;
//!     context.update_uniform_buffer("GameArgs", &GameArgs { time: 0.0, time_delta: 0.016 })?;
//!     context.end_frame();
//!     context.shutdown()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;

pub mod assets;
pub mod config;
pub mod foundation;
pub mod render;

mod engine;

pub use engine::{EngineError, RenderContext};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{Asset, AssetError, AssetHandle, AssetRegistry, Texture},
        config::{Config, ConfigError},
        core::{AssetConfig, EngineConfig, GraphicsConfig, LoggingSettings},
        render::{
            backend::GpuDevice,
            backends::{headless::HeadlessDevice, vulkan::VulkanDevice},
            pipeline::{BlendMode, CullMode, GraphicsPipelineState, PipelineError, PolygonMode},
            shader::{reflection::ShaderResourceInfo, Shader, ShaderError},
            uniform_buffers::{UniformBlock, UniformBufferCreateInfo, UniformBufferError},
            VulkanError,
        },
        EngineError, RenderContext,
    };
}
