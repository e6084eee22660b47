//! Vulkan context management
//!
//! Instance, physical device and logical device creation. Presentation is
//! owned by the window collaborator: it passes the instance extensions its
//! surface needs and creates the surface and swapchain against the handles
//! exposed here.

use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use crate::core::config::GraphicsConfig;

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The raw handle of the resource
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|e| VulkanError::InitializationFailed(format!("Invalid name {:?}: {}", value, e)))
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, with validation layers when requested
    pub fn new(app_name: &str, enable_validation: bool, extensions: &[&CStr]) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("EventHorizon")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extension_ptrs: Vec<*const std::os::raw::c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extension_ptrs.push(DebugUtils::name().as_ptr());
        }

        let layer_ptrs: Vec<*const std::os::raw::c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug_utils = if enable_validation {
            let loader = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", enable_validation);
        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = &self.debug_utils {
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family with graphics and compute support
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first device with a graphics + compute queue and the required extensions
    ///
    /// Discrete GPUs are preferred over integrated ones.
    pub fn select_suitable_device(instance: &Instance, device_extensions: &[&CStr]) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        let mut candidates: Vec<Self> = devices
            .into_iter()
            .filter_map(|device| Self::evaluate_device(instance, device, device_extensions).ok())
            .collect();
        candidates.sort_by_key(|info| info.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);

        let selected = candidates
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))?;

        log::info!("Selected GPU: {}", unsafe {
            CStr::from_ptr(selected.properties.device_name.as_ptr()).to_string_lossy()
        });
        Ok(selected)
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice, device_extensions: &[&CStr]) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let graphics_family = queue_families
            .iter()
            .position(|family| {
                family
                    .queue_flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?
            as u32;

        let available = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_required_extensions = device_extensions.iter().all(|required| {
            available.iter().any(|extension| {
                let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
                name == *required
            })
        });
        if !has_required_extensions {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
        })
    }
}

/// Everything needed to create GPU objects: instance, selected GPU, logical device and queue
pub struct VulkanContext {
    /// Logical device
    pub device: Device,
    /// Graphics + compute queue
    pub graphics_queue: vk::Queue,
    /// Selected physical device
    pub physical_device: PhysicalDeviceInfo,
    /// Instance (dropped last)
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a context
    ///
    /// `instance_extensions` come from the windowing layer (surface
    /// extensions); `device_extensions` usually contain `VK_KHR_swapchain`.
    pub fn new(config: &GraphicsConfig, instance_extensions: &[&CStr], device_extensions: &[&CStr]) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(
            &config.application_name,
            config.validation_enabled(),
            instance_extensions,
        )?;
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, device_extensions)?;

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device.graphics_family)
            .queue_priorities(&priorities)
            .build()];
        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            device_extensions.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true).build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            physical_device,
            instance,
        })
    }

    /// Device limits
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.physical_device.properties.limits
    }

    /// Find a memory type index matching `type_filter` with the requested properties
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.physical_device.memory_properties, type_filter, properties)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Find a memory type index matching `type_filter` with the requested properties
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&index| {
            (type_filter & (1 << index)) != 0
                && memory_properties.memory_types[index as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}
