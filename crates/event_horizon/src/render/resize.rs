//! Surface resize notification
//!
//! Objects whose device state depends on the surface extent (graphics
//! pipelines with baked viewports) register a pair of hooks. When the
//! surface is recreated every destroy hook runs first, then every create
//! hook with the new extent, both in registration order.

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::render::VulkanResult;

new_key_type! {
    /// Handle returned by [`SurfaceResizeNotifier::register`]
    pub struct HookToken;
}

/// Runs after the surface has been recreated
pub type SurfaceCreatedHook = Box<dyn FnMut(vk::Extent2D) -> VulkanResult<()>>;

/// Runs before the surface is torn down
pub type SurfaceDestroyedHook = Box<dyn FnMut()>;

struct ResizeHook {
    owner: String,
    on_created: SurfaceCreatedHook,
    on_destroyed: SurfaceDestroyedHook,
}

/// Registry of resize hooks
#[derive(Default)]
pub struct SurfaceResizeNotifier {
    hooks: SlotMap<HookToken, ResizeHook>,
    order: Vec<HookToken>,
    extent: Option<vk::Extent2D>,
}

impl std::fmt::Debug for SurfaceResizeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceResizeNotifier")
            .field("owners", &self.owners())
            .field("extent", &self.extent)
            .finish()
    }
}

impl SurfaceResizeNotifier {
    /// Create an empty notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook pair under `owner`
    pub fn register(
        &mut self,
        owner: impl Into<String>,
        on_created: impl FnMut(vk::Extent2D) -> VulkanResult<()> + 'static,
        on_destroyed: impl FnMut() + 'static,
    ) -> HookToken {
        let owner = owner.into();
        log::debug!("[RESIZE] Registering hooks for {}", owner);
        let token = self.hooks.insert(ResizeHook {
            owner,
            on_created: Box::new(on_created),
            on_destroyed: Box::new(on_destroyed),
        });
        self.order.push(token);
        token
    }

    /// Remove one hook pair; returns whether it was registered
    pub fn unregister(&mut self, token: HookToken) -> bool {
        let removed = self.hooks.remove(token).is_some();
        if removed {
            self.order.retain(|t| *t != token);
        }
        removed
    }

    /// Remove every hook pair registered under `owner`, returning how many
    pub fn unregister_owner(&mut self, owner: &str) -> usize {
        let tokens: Vec<HookToken> = self
            .order
            .iter()
            .copied()
            .filter(|token| self.hooks.get(*token).is_some_and(|hook| hook.owner == owner))
            .collect();
        for token in &tokens {
            self.unregister(*token);
        }
        tokens.len()
    }

    /// Owners in registration order
    pub fn owners(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|token| self.hooks.get(*token))
            .map(|hook| hook.owner.as_str())
            .collect()
    }

    /// Registered hook pairs
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Extent passed to the last [`surface_created`](Self::surface_created)
    pub fn current_extent(&self) -> Option<vk::Extent2D> {
        self.extent
    }

    /// Run every destroy hook
    pub fn surface_destroyed(&mut self) {
        log::debug!("[RESIZE] Surface destroyed ({} hooks)", self.order.len());
        for token in &self.order {
            if let Some(hook) = self.hooks.get_mut(*token) {
                (hook.on_destroyed)();
            }
        }
        self.extent = None;
    }

    /// Run every create hook with the new extent
    ///
    /// All hooks run even when one fails; the first error is returned.
    pub fn surface_created(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        log::debug!(
            "[RESIZE] Surface created {}x{} ({} hooks)",
            extent.width,
            extent.height,
            self.order.len()
        );
        self.extent = Some(extent);

        let mut first_error = None;
        for token in &self.order {
            let Some(hook) = self.hooks.get_mut(*token) else {
                continue;
            };
            if let Err(e) = (hook.on_created)(extent) {
                log::error!("[RESIZE] Hook for {} failed: {}", hook.owner, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Destroy then recreate everything for a new extent
    pub fn notify_resize(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        self.surface_destroyed();
        self.surface_created(extent)
    }
}
