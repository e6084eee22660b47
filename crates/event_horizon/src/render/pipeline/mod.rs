//! Graphics and compute pipeline lifecycle

pub mod pipeline_manager;
pub mod pipeline_state;

pub use pipeline_manager::{PipelineError, PipelineManager};
pub use pipeline_state::{BlendMode, CullMode, GraphicsPipelineState, PolygonMode};
