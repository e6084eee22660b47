//! [`GpuDevice`](crate::render::backend::GpuDevice) implementations

pub mod headless;
pub mod vulkan;
