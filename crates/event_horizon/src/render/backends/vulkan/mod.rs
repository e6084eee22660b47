//! Vulkan backend
//!
//! The only place in the crate that calls into `ash` directly.

#![allow(unsafe_code)]

pub mod context;
pub mod device;

pub use context::{PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use device::VulkanDevice;
