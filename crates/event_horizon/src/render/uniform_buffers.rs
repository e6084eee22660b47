//! Shared uniform buffers
//!
//! Named uniform buffers, one device buffer per frame in flight, whose
//! Rust-side layout is a `#[repr(C)]` struct declared with
//! [`uniform_block!`](crate::uniform_block). Whole structs are copied with
//! [`UniformBufferManager::update_entire_buffer`]; single fields go through
//! typed [`FieldUpdater`]s that stay valid even if the manager entry is
//! removed.
//!
//! ```ignore
//! uniform_block! {
//!     pub struct GameArgs {
//!         pub time: f32,
//!         pub time_delta: f32,
//!     }
//! }
//!
//! let info = UniformBufferCreateInfo::new("GameArgs", 0, 0).with_fields(&["Time", "TimeDelta"]);
//! ubos.create_buffers::<GameArgs>(info, None)?;
//! ubos.bind_to_buffers(&["lensing"], "GameArgs", &mut assets)?;
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use thiserror::Error;

use crate::assets::AssetRegistry;
use crate::render::backend::{DescriptorResources, GpuDevice};
use crate::render::shader::Shader;
use crate::render::{VulkanError, VulkanResult};

/// Uniform buffer manager failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UniformBufferError {
    /// A buffer set with the name already exists
    #[error("Uniform buffer already exists: {0}")]
    DuplicateName(String),

    /// No buffer set has the name
    #[error("Uniform buffer not found: {0}")]
    NotFound(String),

    /// The buffer has no field with the name
    #[error("Uniform buffer {buffer} has no field {field}")]
    FieldNotFound {
        /// Buffer name
        buffer: String,
        /// Requested field
        field: String,
    },

    /// Field names do not match the struct's field count
    #[error("Uniform buffer {buffer}: {expected} struct fields, {found} names")]
    FieldCountMismatch {
        /// Buffer name
        buffer: String,
        /// Fields in the struct
        expected: usize,
        /// Names supplied
        found: usize,
    },

    /// Updater type does not match the field size
    #[error("Field {field} of {buffer} is {expected} bytes, updater type is {found}")]
    FieldSizeMismatch {
        /// Buffer name
        buffer: String,
        /// Field name
        field: String,
        /// Recorded field size
        expected: usize,
        /// Size of the updater type
        found: usize,
    },

    /// Data type differs from the one the buffer was created with
    #[error("Uniform buffer {buffer} holds {expected}, not {found}")]
    TypeMismatch {
        /// Buffer name
        buffer: String,
        /// Type the buffer was created with
        expected: &'static str,
        /// Type passed in
        found: &'static str,
    },

    /// The shader declares nothing at the buffer's `(set, binding)`
    #[error("Shader {shader} has no binding at set {set} slot {binding}")]
    BindingNotFound {
        /// Shader name
        shader: String,
        /// Descriptor set index
        set: u32,
        /// Binding slot
        binding: u32,
    },

    /// Frame index is not below the number of frames in flight
    #[error("Frame {frame} out of range ({frames_in_flight} frames in flight)")]
    FrameOutOfRange {
        /// Requested frame
        frame: usize,
        /// Frames in flight
        frames_in_flight: usize,
    },

    /// The named shader is not in the asset registry
    #[error("Shader not found: {0}")]
    ShaderNotFound(String),

    /// Device call failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// One field of a uniform block as laid out in Rust
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockField {
    /// Rust field name
    pub name: &'static str,
    /// Byte offset in the struct
    pub offset: usize,
    /// Byte size
    pub size: usize,
}

/// A `#[repr(C)]` plain-data struct uploadable as a uniform buffer
///
/// Implement through [`uniform_block!`](crate::uniform_block).
pub trait UniformBlock: Pod {
    /// Fields in declaration order
    fn fields() -> Vec<BlockField>;
}

/// Declare a `#[repr(C)]` struct implementing [`UniformBlock`]
///
/// Fields must leave no padding (use `[f32; 4]` style members or explicit
/// padding fields), as required by `bytemuck::Pod`.
#[macro_export]
macro_rules! uniform_block {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$field_meta:meta])* $field_vis:vis $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, ::bytemuck::Pod, ::bytemuck::Zeroable)]
        $vis struct $name {
            $($(#[$field_meta])* $field_vis $field: $ty),*
        }

        impl $crate::render::uniform_buffers::UniformBlock for $name {
            fn fields() -> ::std::vec::Vec<$crate::render::uniform_buffers::BlockField> {
                ::std::vec![$(
                    $crate::render::uniform_buffers::BlockField {
                        name: ::std::stringify!($field),
                        offset: ::std::mem::offset_of!($name, $field),
                        size: ::std::mem::size_of::<$ty>(),
                    }
                ),*]
            }
        }
    };
}

/// How a uniform buffer set is created and bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBufferCreateInfo {
    /// Unique buffer name
    pub name: String,
    /// Field names in struct order; empty to use the Rust field names
    pub fields: Vec<String>,
    /// Descriptor set index it binds to
    pub set: u32,
    /// Binding slot it binds to
    pub binding: u32,
    /// `UNIFORM_BUFFER` or `UNIFORM_BUFFER_DYNAMIC`
    pub usage: vk::DescriptorType,
}

impl UniformBufferCreateInfo {
    /// Static uniform buffer bound at `(set, binding)`
    pub fn new(name: impl Into<String>, set: u32, binding: u32) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            set,
            binding,
            usage: vk::DescriptorType::UNIFORM_BUFFER,
        }
    }

    /// Name the struct's fields
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|field| (*field).to_string()).collect();
        self
    }

    /// Bind with a dynamic offset
    pub fn dynamic(mut self) -> Self {
        self.usage = vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC;
        self
    }
}

/// Placement of a named field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    /// Byte offset in the buffer
    pub offset: usize,
    /// Byte size
    pub size: usize,
    /// Space reserved for the field
    pub alignment: vk::DeviceSize,
}

/// A mapped device buffer, destroyed when the last owner drops it
pub struct DeviceBuffer {
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    device: Arc<dyn GpuDevice>,
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl DeviceBuffer {
    fn new(device: Arc<dyn GpuDevice>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let buffer = device.create_buffer(size, usage)?;
        Ok(Self { buffer, size, device })
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy bytes at `offset`
    pub fn write(&self, offset: usize, data: &[u8]) -> VulkanResult<()> {
        self.device.write_buffer(self.buffer, offset as vk::DeviceSize, data)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
    }
}

/// Writes one field of one buffer
#[derive(Debug)]
pub struct FieldUpdater<F> {
    buffer: Arc<DeviceBuffer>,
    offset: usize,
    _marker: PhantomData<fn(&F)>,
}

impl<F> Clone for FieldUpdater<F> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            _marker: PhantomData,
        }
    }
}

impl<F: Pod> FieldUpdater<F> {
    /// Copy `value` into the field
    pub fn submit(&self, value: &F) -> VulkanResult<()> {
        self.buffer.write(self.offset, bytemuck::bytes_of(value))
    }

    /// Buffer written to
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Byte offset written to
    pub fn offset(&self) -> usize {
        self.offset
    }
}

struct UniformBufferEntry {
    buffers: Vec<Arc<DeviceBuffer>>,
    fields: HashMap<String, UniformField>,
    size: vk::DeviceSize,
    set: u32,
    binding: u32,
    type_id: TypeId,
    type_name: &'static str,
}

/// Named uniform buffer sets
pub struct UniformBufferManager {
    device: Arc<dyn GpuDevice>,
    frames_in_flight: usize,
    entries: HashMap<String, UniformBufferEntry>,
}

impl std::fmt::Debug for UniformBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformBufferManager")
            .field("frames_in_flight", &self.frames_in_flight)
            .field("buffers", &self.names())
            .finish_non_exhaustive()
    }
}

fn round_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        size
    } else {
        size.div_ceil(alignment) * alignment
    }
}

impl UniformBufferManager {
    /// Create a manager whose buffer sets default to one buffer per frame
    pub fn new(device: Arc<dyn GpuDevice>, frames_in_flight: usize) -> Self {
        Self {
            device,
            frames_in_flight: frames_in_flight.max(1),
            entries: HashMap::new(),
        }
    }

    /// Frames in flight
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn entry(&self, name: &str) -> Result<&UniformBufferEntry, UniformBufferError> {
        self.entries.get(name).ok_or_else(|| {
            log::error!("[UBO] Uniform buffer not found: {}", name);
            UniformBufferError::NotFound(name.to_string())
        })
    }

    fn check_frame(&self, frame: usize) -> Result<(), UniformBufferError> {
        if frame >= self.frames_in_flight {
            log::error!(
                "[UBO] Frame {} out of range ({} frames in flight)",
                frame,
                self.frames_in_flight
            );
            return Err(UniformBufferError::FrameOutOfRange {
                frame,
                frames_in_flight: self.frames_in_flight,
            });
        }
        Ok(())
    }

    /// Create `count` buffers (default: frames in flight) holding an `S`
    pub fn create_buffers<S: UniformBlock>(
        &mut self,
        create_info: UniformBufferCreateInfo,
        count: Option<usize>,
    ) -> Result<(), UniformBufferError> {
        let name = create_info.name;
        if self.entries.contains_key(&name) {
            log::error!("[UBO] Uniform buffer already exists: {}", name);
            return Err(UniformBufferError::DuplicateName(name));
        }

        let block_fields = S::fields();
        if !create_info.fields.is_empty() && create_info.fields.len() != block_fields.len() {
            log::error!(
                "[UBO] {}: {} field names for {} struct fields",
                name,
                create_info.fields.len(),
                block_fields.len()
            );
            return Err(UniformBufferError::FieldCountMismatch {
                buffer: name,
                expected: block_fields.len(),
                found: create_info.fields.len(),
            });
        }

        let dynamic = create_info.usage == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC;
        let min_alignment = self.device.min_uniform_buffer_offset_alignment();
        let mut fields = HashMap::with_capacity(block_fields.len());
        let mut reserved: vk::DeviceSize = 0;
        for (index, field) in block_fields.iter().enumerate() {
            let field_name = create_info
                .fields
                .get(index)
                .cloned()
                .unwrap_or_else(|| field.name.to_string());
            let alignment = if dynamic {
                round_up(field.size as vk::DeviceSize, min_alignment)
            } else {
                field.size as vk::DeviceSize
            };
            reserved += alignment;
            fields.insert(
                field_name,
                UniformField {
                    offset: field.offset,
                    size: field.size,
                    alignment,
                },
            );
        }
        let size = (std::mem::size_of::<S>() as vk::DeviceSize).max(reserved);

        let count = count.unwrap_or(self.frames_in_flight).max(1);
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            buffers.push(Arc::new(DeviceBuffer::new(
                Arc::clone(&self.device),
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?));
        }

        log::debug!(
            "[UBO] Created {} ({} x {} bytes, {:?} at set {} binding {})",
            name,
            count,
            size,
            create_info.usage,
            create_info.set,
            create_info.binding
        );
        self.entries.insert(
            name,
            UniformBufferEntry {
                buffers,
                fields,
                size,
                set: create_info.set,
                binding: create_info.binding,
                type_id: TypeId::of::<S>(),
                type_name: std::any::type_name::<S>(),
            },
        );
        Ok(())
    }

    fn typed_entry<S: UniformBlock>(&self, name: &str) -> Result<&UniformBufferEntry, UniformBufferError> {
        let entry = self.entry(name)?;
        if entry.type_id != TypeId::of::<S>() {
            log::error!(
                "[UBO] {} holds {}, not {}",
                name,
                entry.type_name,
                std::any::type_name::<S>()
            );
            return Err(UniformBufferError::TypeMismatch {
                buffer: name.to_string(),
                expected: entry.type_name,
                found: std::any::type_name::<S>(),
            });
        }
        Ok(entry)
    }

    /// Copy `data` into the buffer used by `frame`
    pub fn update_entire_buffer<S: UniformBlock>(
        &self,
        frame: usize,
        name: &str,
        data: &S,
    ) -> Result<(), UniformBufferError> {
        self.check_frame(frame)?;
        let entry = self.typed_entry::<S>(name)?;
        entry.buffers[frame % entry.buffers.len()].write(0, bytemuck::bytes_of(data))?;
        Ok(())
    }

    /// Copy `data` into every buffer of the set
    pub fn update_entire_buffers<S: UniformBlock>(&self, name: &str, data: &S) -> Result<(), UniformBufferError> {
        let entry = self.typed_entry::<S>(name)?;
        for buffer in &entry.buffers {
            buffer.write(0, bytemuck::bytes_of(data))?;
        }
        Ok(())
    }

    fn checked_field<F: Pod>(&self, buffer: &str, field: &str) -> Result<(&UniformBufferEntry, UniformField), UniformBufferError> {
        let entry = self.entry(buffer)?;
        let info = *entry.fields.get(field).ok_or_else(|| {
            log::error!("[UBO] {} has no field {}", buffer, field);
            UniformBufferError::FieldNotFound {
                buffer: buffer.to_string(),
                field: field.to_string(),
            }
        })?;
        let found = std::mem::size_of::<F>();
        if found != info.size {
            log::error!(
                "[UBO] Field {} of {} is {} bytes, updater type is {}",
                field,
                buffer,
                info.size,
                found
            );
            return Err(UniformBufferError::FieldSizeMismatch {
                buffer: buffer.to_string(),
                field: field.to_string(),
                expected: info.size,
                found,
            });
        }
        Ok((entry, info))
    }

    /// Updater for one field of the buffer used by `frame`
    pub fn field_updater<F: Pod>(
        &self,
        frame: usize,
        buffer: &str,
        field: &str,
    ) -> Result<FieldUpdater<F>, UniformBufferError> {
        self.check_frame(frame)?;
        let (entry, info) = self.checked_field::<F>(buffer, field)?;
        Ok(FieldUpdater {
            buffer: Arc::clone(&entry.buffers[frame % entry.buffers.len()]),
            offset: info.offset,
            _marker: PhantomData,
        })
    }

    /// One updater per buffer of the set, in buffer order
    pub fn field_updaters<F: Pod>(&self, buffer: &str, field: &str) -> Result<Vec<FieldUpdater<F>>, UniformBufferError> {
        let (entry, info) = self.checked_field::<F>(buffer, field)?;
        Ok(entry
            .buffers
            .iter()
            .map(|device_buffer| FieldUpdater {
                buffer: Arc::clone(device_buffer),
                offset: info.offset,
                _marker: PhantomData,
            })
            .collect())
    }

    fn descriptor_resources(entry: &UniformBufferEntry, frame: usize) -> DescriptorResources {
        DescriptorResources::Buffers(vec![vk::DescriptorBufferInfo {
            buffer: entry.buffers[frame % entry.buffers.len()].handle(),
            offset: 0,
            range: entry.size,
        }])
    }

    fn shader_mut<'a>(assets: &'a mut AssetRegistry, shader: &str) -> Result<&'a mut Shader, UniformBufferError> {
        assets.get_mut::<Shader>(shader).ok_or_else(|| {
            log::error!("[UBO] Shader not found: {}", shader);
            UniformBufferError::ShaderNotFound(shader.to_string())
        })
    }

    /// Write one frame slot of `entry` into the shader's matching binding
    fn write_binding(
        entry: &UniformBufferEntry,
        frame: usize,
        shader: &str,
        target: &mut Shader,
    ) -> Result<(), UniformBufferError> {
        if frame >= target.frames_in_flight() {
            log::error!("[UBO] Shader {} has no frame slot {}", shader, frame);
            return Err(UniformBufferError::FrameOutOfRange {
                frame,
                frames_in_flight: target.frames_in_flight(),
            });
        }
        let resources = Self::descriptor_resources(entry, frame);
        if target.write_dynamic_descriptors(frame, entry.set, entry.binding, &resources) {
            Ok(())
        } else {
            log::error!(
                "[UBO] Shader {} has no binding at set {} slot {}",
                shader,
                entry.set,
                entry.binding
            );
            Err(UniformBufferError::BindingNotFound {
                shader: shader.to_string(),
                set: entry.set,
                binding: entry.binding,
            })
        }
    }

    /// Point a shader's `(set, binding)` at this frame's buffer, for one frame slot
    pub fn bind_to_buffer(
        &self,
        frame: usize,
        shader: &str,
        buffer: &str,
        assets: &mut AssetRegistry,
    ) -> Result<(), UniformBufferError> {
        self.check_frame(frame)?;
        let entry = self.entry(buffer)?;
        let target = Self::shader_mut(assets, shader)?;
        Self::write_binding(entry, frame, shader, target)
    }

    /// Bind one frame slot of the buffer into each listed shader
    ///
    /// Every shader is attempted; the first failure is returned.
    pub fn bind_shaders_to_buffer(
        &self,
        frame: usize,
        shaders: &[&str],
        buffer: &str,
        assets: &mut AssetRegistry,
    ) -> Result<(), UniformBufferError> {
        self.check_frame(frame)?;
        let entry = self.entry(buffer)?;
        let mut first_error = None;
        for shader in shaders {
            let result = Self::shader_mut(assets, shader)
                .and_then(|target| Self::write_binding(entry, frame, shader, target));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Bind every frame slot of every listed shader
    ///
    /// Frame slot `i` gets buffer `i % count`. Shaders that are missing or
    /// lack the binding are skipped; the first one is reported.
    pub fn bind_to_buffers(
        &self,
        shaders: &[&str],
        buffer: &str,
        assets: &mut AssetRegistry,
    ) -> Result<(), UniformBufferError> {
        let entry = self.entry(buffer)?;
        let mut first_error = None;
        for shader in shaders {
            let target = match Self::shader_mut(assets, shader) {
                Ok(target) => target,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            let bound = (0..target.frames_in_flight())
                .try_for_each(|frame| Self::write_binding(entry, frame, shader, target));
            match bound {
                Ok(()) => log::debug!("[UBO] Bound {} to {}", buffer, shader),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Placement of a named field
    pub fn field(&self, buffer: &str, field: &str) -> Option<UniformField> {
        self.entries.get(buffer)?.fields.get(field).copied()
    }

    /// Handle of the buffer used by `frame`
    pub fn buffer(&self, name: &str, frame: usize) -> Option<vk::Buffer> {
        let entry = self.entries.get(name)?;
        entry.buffers.get(frame % entry.buffers.len()).map(|buffer| buffer.handle())
    }

    /// Size of each buffer of the set
    pub fn buffer_size(&self, name: &str) -> Option<vk::DeviceSize> {
        self.entries.get(name).map(|entry| entry.size)
    }

    /// Whether a buffer set has the name
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Buffer set names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drop a buffer set; outstanding updaters keep their buffers alive
    pub fn remove(&mut self, name: &str) -> Result<(), UniformBufferError> {
        self.entries.remove(name).map(|_| ()).ok_or_else(|| {
            log::error!("[UBO] Uniform buffer not found: {}", name);
            UniformBufferError::NotFound(name.to_string())
        })
    }

    /// Drop every buffer set
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessDevice;
    use crate::render::shader::reflection::ShaderResourceInfo;
    use crate::render::shader::spirv_builder::{ModuleBuilder, Stage};
    use std::path::PathBuf;

    crate::uniform_block! {
        struct GameArgs {
            time: f32,
            time_delta: f32,
        }
    }

    crate::uniform_block! {
        struct Camera {
            view: [f32; 16],
            eye: [f32; 4],
        }
    }

    fn manager(device: &Arc<HeadlessDevice>) -> UniformBufferManager {
        let mut ubos = UniformBufferManager::new(device.clone(), 2);
        ubos.create_buffers::<GameArgs>(
            UniformBufferCreateInfo::new("GameArgs", 0, 0).with_fields(&["Time", "TimeDelta"]),
            None,
        )
        .unwrap();
        ubos
    }

    fn contents(device: &HeadlessDevice, ubos: &UniformBufferManager, name: &str, frame: usize) -> Vec<u8> {
        device.buffer_contents(ubos.buffer(name, frame).unwrap()).unwrap()
    }

    fn shader_assets(device: &Arc<HeadlessDevice>) -> AssetRegistry {
        let mut fragment = ModuleBuilder::new(Stage::Fragment);
        fragment
            .uniform_buffer("GameArgs", 0, 0, &[("Time", 4), ("TimeDelta", 4)])
            .uniform_buffer("Camera", 0, 1, &[("view", 64), ("eye", 16)]);
        let info = ShaderResourceInfo::default().with_uniform_buffer(0, 1, true);

        let mut assets = AssetRegistry::new();
        assets
            .add(
                "lensing",
                Shader::from_binaries(
                    device.clone(),
                    vec![(PathBuf::from("lensing.frag.spv"), fragment.build())],
                    &info,
                    2,
                )
                .unwrap(),
            )
            .unwrap();
        assets
    }

    fn bound_buffer(device: &HeadlessDevice, shader: &mut Shader, frame: usize, set: usize, binding: u32) -> Option<vk::Buffer> {
        let target = shader.descriptor_sets(frame)[set];
        match device.descriptor(target, binding)? {
            DescriptorResources::Buffers(infos) => infos.first().map(|info| info.buffer),
            DescriptorResources::Images(_) => None,
        }
    }

    #[test]
    fn test_block_fields_follow_struct_layout() {
        let fields = Camera::fields();
        assert_eq!(fields.len(), 2);
        assert_eq!((fields[1].name, fields[1].offset, fields[1].size), ("eye", 64, 16));
    }

    #[test]
    fn test_update_touches_only_its_frame() {
        let device = Arc::new(HeadlessDevice::new());
        let ubos = manager(&device);

        let args = GameArgs {
            time: 1.5,
            time_delta: 0.016,
        };
        ubos.update_entire_buffer(0, "GameArgs", &args).unwrap();

        assert_eq!(contents(&device, &ubos, "GameArgs", 0), bytemuck::bytes_of(&args));
        assert!(contents(&device, &ubos, "GameArgs", 1).iter().all(|byte| *byte == 0));
    }

    #[test]
    fn test_update_all_frames() {
        let device = Arc::new(HeadlessDevice::new());
        let ubos = manager(&device);
        let args = GameArgs {
            time: 3.0,
            time_delta: 0.5,
        };
        ubos.update_entire_buffers("GameArgs", &args).unwrap();
        for frame in 0..2 {
            assert_eq!(contents(&device, &ubos, "GameArgs", frame), bytemuck::bytes_of(&args));
        }
    }

    #[test]
    fn test_field_updater_writes_at_field_offset() {
        let device = Arc::new(HeadlessDevice::new());
        let ubos = manager(&device);

        let updater = ubos.field_updater::<f32>(1, "GameArgs", "TimeDelta").unwrap();
        assert_eq!(updater.offset(), 4);
        updater.submit(&2.0).unwrap();

        let bytes = contents(&device, &ubos, "GameArgs", 1);
        assert_eq!(&bytes[4..8], &2.0f32.to_ne_bytes());
        assert_eq!(&bytes[0..4], &[0; 4]);
        assert_eq!(ubos.field_updaters::<f32>("GameArgs", "Time").unwrap().len(), 2);
    }

    #[test]
    fn test_updater_outlives_removal() {
        let device = Arc::new(HeadlessDevice::new());
        let mut ubos = manager(&device);
        let updater = ubos.field_updater::<f32>(0, "GameArgs", "Time").unwrap();

        ubos.remove("GameArgs").unwrap();
        assert_eq!(device.live_objects().buffers, 1);
        updater.submit(&1.0).unwrap();

        drop(updater);
        assert!(device.live_objects().is_empty());
    }

    #[test]
    fn test_errors() {
        let device = Arc::new(HeadlessDevice::new());
        let mut ubos = manager(&device);

        assert_eq!(
            ubos.create_buffers::<GameArgs>(UniformBufferCreateInfo::new("GameArgs", 0, 0), None),
            Err(UniformBufferError::DuplicateName("GameArgs".to_string()))
        );
        assert!(matches!(
            ubos.create_buffers::<GameArgs>(UniformBufferCreateInfo::new("Other", 0, 0).with_fields(&["a"]), None),
            Err(UniformBufferError::FieldCountMismatch { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            ubos.update_entire_buffer(0, "GameArgs", &Camera::default()),
            Err(UniformBufferError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ubos.field_updater::<[f32; 2]>(0, "GameArgs", "Time"),
            Err(UniformBufferError::FieldSizeMismatch { expected: 4, found: 8, .. })
        ));
        assert!(matches!(
            ubos.field_updater::<f32>(0, "GameArgs", "time"),
            Err(UniformBufferError::FieldNotFound { .. })
        ));
        assert!(matches!(
            ubos.update_entire_buffer(2, "GameArgs", &GameArgs::default()),
            Err(UniformBufferError::FrameOutOfRange { frame: 2, .. })
        ));
        assert_eq!(
            ubos.update_entire_buffers("Nope", &GameArgs::default()),
            Err(UniformBufferError::NotFound("Nope".to_string()))
        );
    }

    #[test]
    fn test_rust_field_names_by_default() {
        let device = Arc::new(HeadlessDevice::new());
        let mut ubos = UniformBufferManager::new(device.clone(), 2);
        ubos.create_buffers::<Camera>(UniformBufferCreateInfo::new("Camera", 0, 1), Some(1))
            .unwrap();

        assert_eq!(ubos.field("Camera", "eye").map(|f| f.offset), Some(64));
        assert_eq!(ubos.buffer("Camera", 0), ubos.buffer("Camera", 1));
        assert_eq!(device.live_objects().buffers, 1);
    }

    #[test]
    fn test_dynamic_alignment_pads_fields() {
        let device = Arc::new(HeadlessDevice::with_uniform_alignment(64));
        let mut ubos = UniformBufferManager::new(device, 2);
        ubos.create_buffers::<GameArgs>(UniformBufferCreateInfo::new("GameArgs", 0, 0).dynamic(), None)
            .unwrap();

        assert_eq!(ubos.field("GameArgs", "time").map(|f| f.alignment), Some(64));
        assert_eq!(ubos.buffer_size("GameArgs"), Some(128));
    }

    #[test]
    fn test_bind_to_buffers_per_frame() {
        let device = Arc::new(HeadlessDevice::new());
        let mut assets = shader_assets(&device);
        let mut ubos = manager(&device);
        ubos.create_buffers::<Camera>(UniformBufferCreateInfo::new("Camera", 0, 1).dynamic(), None)
            .unwrap();

        ubos.bind_to_buffers(&["lensing"], "GameArgs", &mut assets).unwrap();
        ubos.bind_to_buffers(&["lensing"], "Camera", &mut assets).unwrap();

        let shader = assets.get_mut::<Shader>("lensing").unwrap();
        for frame in 0..2 {
            assert_eq!(bound_buffer(&device, shader, frame, 0, 0), ubos.buffer("GameArgs", frame));
            assert_eq!(bound_buffer(&device, shader, frame, 0, 1), ubos.buffer("Camera", frame));
        }
        assert_eq!(
            shader.reflection().binding(0, 1).map(|b| b.kind),
            Some(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        );
    }

    #[test]
    fn test_bind_misses() {
        let device = Arc::new(HeadlessDevice::new());
        let mut assets = shader_assets(&device);
        let ubos = manager(&device);

        assert_eq!(
            ubos.bind_to_buffers(&["missing", "lensing"], "GameArgs", &mut assets),
            Err(UniformBufferError::ShaderNotFound("missing".to_string()))
        );
        let shader = assets.get_mut::<Shader>("lensing").unwrap();
        assert_eq!(bound_buffer(&device, shader, 1, 0, 0), ubos.buffer("GameArgs", 1));

        assert!(matches!(
            ubos.bind_to_buffer(0, "lensing", "Nope", &mut assets),
            Err(UniformBufferError::NotFound(_))
        ));
        assert!(matches!(
            ubos.bind_to_buffer(0, "missing", "GameArgs", &mut assets),
            Err(UniformBufferError::ShaderNotFound(_))
        ));
    }

    #[test]
    fn test_bind_without_matching_binding() {
        let device = Arc::new(HeadlessDevice::new());
        let mut assets = shader_assets(&device);
        let mut ubos = manager(&device);
        ubos.create_buffers::<GameArgs>(UniformBufferCreateInfo::new("Lens", 2, 7), None)
            .unwrap();

        let expected = UniformBufferError::BindingNotFound {
            shader: "lensing".to_string(),
            set: 2,
            binding: 7,
        };
        assert_eq!(ubos.bind_to_buffer(0, "lensing", "Lens", &mut assets), Err(expected.clone()));
        assert_eq!(ubos.bind_to_buffers(&["lensing"], "Lens", &mut assets), Err(expected.clone()));
        assert_eq!(
            ubos.bind_shaders_to_buffer(1, &["lensing"], "Lens", &mut assets),
            Err(expected)
        );
    }

    #[test]
    fn test_bind_one_frame_across_shaders() {
        let device = Arc::new(HeadlessDevice::new());
        let mut assets = shader_assets(&device);
        let mut disk = ModuleBuilder::new(Stage::Fragment);
        disk.uniform_buffer("GameArgs", 0, 0, &[("Time", 4), ("TimeDelta", 4)]);
        assets
            .add(
                "disk",
                Shader::from_binaries(
                    device.clone(),
                    vec![(PathBuf::from("disk.frag.spv"), disk.build())],
                    &ShaderResourceInfo::default(),
                    2,
                )
                .unwrap(),
            )
            .unwrap();
        let ubos = manager(&device);

        assert_eq!(
            ubos.bind_shaders_to_buffer(1, &["lensing", "missing", "disk"], "GameArgs", &mut assets),
            Err(UniformBufferError::ShaderNotFound("missing".to_string()))
        );
        for name in ["lensing", "disk"] {
            let shader = assets.get_mut::<Shader>(name).unwrap();
            assert_eq!(bound_buffer(&device, shader, 1, 0, 0), ubos.buffer("GameArgs", 1));
            assert_eq!(bound_buffer(&device, shader, 0, 0, 0), None);
        }

        assert!(matches!(
            ubos.bind_shaders_to_buffer(2, &["disk"], "GameArgs", &mut assets),
            Err(UniformBufferError::FrameOutOfRange { frame: 2, .. })
        ));
    }

    #[test]
    fn test_descriptor_range_covers_padded_size() {
        let device = Arc::new(HeadlessDevice::with_uniform_alignment(64));
        let mut assets = shader_assets(&device);
        let mut ubos = UniformBufferManager::new(device.clone(), 2);
        ubos.create_buffers::<GameArgs>(UniformBufferCreateInfo::new("GameArgs", 0, 0).dynamic(), None)
            .unwrap();
        assert!(ubos.buffer_size("GameArgs").unwrap() > std::mem::size_of::<GameArgs>() as vk::DeviceSize);

        ubos.bind_to_buffer(0, "lensing", "GameArgs", &mut assets).unwrap();

        let shader = assets.get_mut::<Shader>("lensing").unwrap();
        let target = shader.descriptor_sets(0)[0];
        let Some(DescriptorResources::Buffers(infos)) = device.descriptor(target, 0) else {
            panic!("no buffer written at set 0 binding 0");
        };
        assert_eq!(infos[0].range, 128);
        assert_eq!(Some(infos[0].range), ubos.buffer_size("GameArgs"));
    }
}
