//! Named asset registry
//!
//! Assets live in one typed store per kind. Names are unique across the
//! whole registry, so a shader and a texture cannot both be called `sky`.
//! Removing an asset drops it, which releases its GPU objects.

pub mod texture;

use std::collections::HashMap;
use std::marker::PhantomData;

use slotmap::{DefaultKey, SlotMap};
use thiserror::Error;

use crate::render::shader::{Shader, ShaderError};
use crate::render::VulkanError;

pub use texture::Texture;

/// Asset registry failures
#[derive(Error, Debug)]
pub enum AssetError {
    /// Another asset already uses the name
    #[error("Asset name already in use: {0}")]
    DuplicateName(String),

    /// No asset of the requested kind has the name
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Source data could not be decoded
    #[error("Failed to load {name}: {reason}")]
    LoadFailed {
        /// Asset or file name
        name: String,
        /// Decoder message
        reason: String,
    },

    /// Shader construction failed
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),

    /// Device object creation failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// Typed reference to an asset in its store
pub struct AssetHandle<T> {
    key: DefaultKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AssetHandle<T> {}

impl<T> PartialEq for AssetHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for AssetHandle<T> {}

impl<T> std::fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AssetHandle").field(&self.key).finish()
    }
}

/// Storage for one asset kind
pub struct AssetStore<T> {
    items: SlotMap<DefaultKey, T>,
    names: HashMap<String, DefaultKey>,
}

impl<T> Default for AssetStore<T> {
    fn default() -> Self {
        Self {
            items: SlotMap::new(),
            names: HashMap::new(),
        }
    }
}

impl<T> AssetStore<T> {
    fn insert(&mut self, name: String, asset: T) -> AssetHandle<T> {
        let key = self.items.insert(asset);
        self.names.insert(name, key);
        AssetHandle {
            key,
            _marker: PhantomData,
        }
    }

    fn remove(&mut self, name: &str) -> Option<T> {
        let key = self.names.remove(name)?;
        self.items.remove(key)
    }

    fn clear(&mut self) {
        self.names.clear();
        self.items.clear();
    }

    /// Number of stored assets
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A kind of asset with its own store in the registry
pub trait Asset: Sized + 'static {
    /// Kind name used in log messages
    const KIND: &'static str;

    /// This kind's store
    fn store(registry: &AssetRegistry) -> &AssetStore<Self>;

    /// This kind's store, mutably
    fn store_mut(registry: &mut AssetRegistry) -> &mut AssetStore<Self>;
}

impl Asset for Shader {
    const KIND: &'static str = "shader";

    fn store(registry: &AssetRegistry) -> &AssetStore<Self> {
        &registry.shaders
    }

    fn store_mut(registry: &mut AssetRegistry) -> &mut AssetStore<Self> {
        &mut registry.shaders
    }
}

impl Asset for Texture {
    const KIND: &'static str = "texture";

    fn store(registry: &AssetRegistry) -> &AssetStore<Self> {
        &registry.textures
    }

    fn store_mut(registry: &mut AssetRegistry) -> &mut AssetStore<Self> {
        &mut registry.textures
    }
}

/// Named shaders and textures
#[derive(Default)]
pub struct AssetRegistry {
    shaders: AssetStore<Shader>,
    textures: AssetStore<Texture>,
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry").field("names", &self.names()).finish()
    }
}

impl AssetRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any store uses `name`
    pub fn contains(&self, name: &str) -> bool {
        self.shaders.names.contains_key(name) || self.textures.names.contains_key(name)
    }

    /// Store an asset under a unique name
    pub fn add<T: Asset>(&mut self, name: impl Into<String>, asset: T) -> Result<AssetHandle<T>, AssetError> {
        let name = name.into();
        if self.contains(&name) {
            log::error!("[ASSET] {} name already in use: {}", T::KIND, name);
            return Err(AssetError::DuplicateName(name));
        }
        log::debug!("[ASSET] Added {} {}", T::KIND, name);
        Ok(T::store_mut(self).insert(name, asset))
    }

    /// Construct and store an asset; the name is checked before `construct` runs
    pub fn add_with<T, E>(
        &mut self,
        name: impl Into<String>,
        construct: impl FnOnce() -> Result<T, E>,
    ) -> Result<AssetHandle<T>, AssetError>
    where
        T: Asset,
        AssetError: From<E>,
    {
        let name = name.into();
        if self.contains(&name) {
            log::error!("[ASSET] {} name already in use: {}", T::KIND, name);
            return Err(AssetError::DuplicateName(name));
        }
        let asset = construct().map_err(|e| {
            let e = AssetError::from(e);
            log::error!("[ASSET] Failed to create {} {}: {}", T::KIND, name, e);
            e
        })?;
        self.add(name, asset)
    }

    /// Look up an asset by name
    pub fn get<T: Asset>(&self, name: &str) -> Option<&T> {
        let store = T::store(self);
        store.items.get(*store.names.get(name)?)
    }

    /// Look up an asset by name, mutably
    pub fn get_mut<T: Asset>(&mut self, name: &str) -> Option<&mut T> {
        let store = T::store_mut(self);
        let key = *store.names.get(name)?;
        store.items.get_mut(key)
    }

    /// Look up an asset by handle; `None` once it has been removed
    pub fn get_by_handle<T: Asset>(&self, handle: AssetHandle<T>) -> Option<&T> {
        T::store(self).items.get(handle.key)
    }

    /// Take an asset out of the registry
    pub fn remove<T: Asset>(&mut self, name: &str) -> Option<T> {
        let removed = T::store_mut(self).remove(name);
        if removed.is_some() {
            log::debug!("[ASSET] Removed {} {}", T::KIND, name);
        }
        removed
    }

    /// Drop whatever asset has `name`; returns whether one existed
    pub fn remove_any(&mut self, name: &str) -> bool {
        self.remove::<Shader>(name).is_some() || self.remove::<Texture>(name).is_some()
    }

    /// Store of one kind
    pub fn store<T: Asset>(&self) -> &AssetStore<T> {
        T::store(self)
    }

    /// Every asset name, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .shaders
            .names
            .keys()
            .chain(self.textures.names.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Total number of assets
    pub fn len(&self) -> usize {
        self.shaders.len() + self.textures.len()
    }

    /// Whether the registry holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every asset, shaders first
    pub fn clear(&mut self) {
        log::debug!("[ASSET] Clearing {} assets", self.len());
        self.shaders.clear();
        self.textures.clear();
    }
}
