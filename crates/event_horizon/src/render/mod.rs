//! # Rendering
//!
//! Shader resource binding and pipeline lifecycle.
//!
//! ## Architecture
//!
//! - **Shaders**: SPIR-V reflection into descriptor layouts, push constant
//!   ranges and vertex input
//! - **Descriptors**: one pool per shader, one set per frame in flight
//! - **Uniform buffers**: named, typed buffer sets bound into shader descriptors
//! - **Pipelines**: named graphics and compute pipelines, rebuilt when the
//!   surface is resized
//! - **Backends**: [`GpuDevice`](backend::GpuDevice) over Vulkan, plus a
//!   headless device that records calls for tests and offline tools

pub mod backend;
pub mod barriers;
pub mod descriptors;
pub mod frame;
pub mod pipeline;
pub mod resize;
pub mod shader;
pub mod uniform_buffers;

/// Graphics backend implementations
pub mod backends;

pub use backend::GpuDevice;
pub use backends::vulkan::{VulkanError, VulkanResult};
pub use frame::FrameCounter;
pub use pipeline::{GraphicsPipelineState, PipelineError, PipelineManager};
pub use resize::{HookToken, SurfaceResizeNotifier};
pub use shader::{Shader, ShaderError};
pub use uniform_buffers::{UniformBlock, UniformBufferCreateInfo, UniformBufferError, UniformBufferManager};
