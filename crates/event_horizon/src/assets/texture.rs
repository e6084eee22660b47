//! Sampled 2D textures

use std::path::Path;
use std::sync::Arc;

use ash::vk;

use super::AssetError;
use crate::render::backend::{DescriptorResources, GpuDevice, GpuImage, TextureUpload};
use crate::render::barriers::{BarrierError, ImageLayoutState, TrackedImage};

/// An RGBA8 texture with view and sampler, released on drop
pub struct Texture {
    gpu: GpuImage,
    tracked: TrackedImage,
    device: Arc<dyn GpuDevice>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("gpu", &self.gpu)
            .field("state", &self.tracked.state())
            .finish_non_exhaustive()
    }
}

impl Texture {
    /// Decode an image file (PNG or JPEG) and upload it
    pub fn from_file(device: Arc<dyn GpuDevice>, path: &Path) -> Result<Self, AssetError> {
        log::debug!("[ASSET] Loading texture {:?}", path);
        let decoded = image::open(path)
            .map_err(|e| {
                log::error!("[ASSET] Failed to decode {:?}: {}", path, e);
                AssetError::LoadFailed {
                    name: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Self::from_rgba8(device, width, height, decoded.as_raw())
    }

    /// Upload tightly packed RGBA8 pixels
    pub fn from_rgba8(device: Arc<dyn GpuDevice>, width: u32, height: u32, pixels: &[u8]) -> Result<Self, AssetError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(AssetError::LoadFailed {
                name: format!("{}x{} rgba8", width, height),
                reason: format!("expected {} bytes of pixel data, got {}", expected, pixels.len()),
            });
        }

        let gpu = device.create_texture(&TextureUpload {
            extent: vk::Extent2D { width, height },
            format: vk::Format::R8G8B8A8_SRGB,
            pixels,
        })?;
        let tracked = TrackedImage::with_state(gpu.image, vk::ImageAspectFlags::COLOR, gpu.layout);
        log::debug!("[ASSET] Texture {:?} uploaded ({}x{})", gpu.image, width, height);

        Ok(Self { gpu, tracked, device })
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.gpu.extent
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.gpu.format
    }

    /// Image view handle
    pub fn view(&self) -> vk::ImageView {
        self.gpu.view
    }

    /// Sampler handle
    pub fn sampler(&self) -> vk::Sampler {
        self.gpu.sampler
    }

    /// Current layout
    pub fn layout_state(&self) -> ImageLayoutState {
        self.tracked.state()
    }

    /// Descriptor for a combined image sampler; the image must be shader readable
    pub fn descriptor_info(&self) -> Result<vk::DescriptorImageInfo, BarrierError> {
        self.tracked.require(ImageLayoutState::ShaderReadOnly)?;
        Ok(vk::DescriptorImageInfo {
            sampler: self.gpu.sampler,
            image_view: self.gpu.view,
            image_layout: ImageLayoutState::ShaderReadOnly.layout(),
        })
    }

    /// [`descriptor_info`](Self::descriptor_info) ready for a descriptor write
    pub fn descriptor_resources(&self) -> Result<DescriptorResources, BarrierError> {
        Ok(DescriptorResources::Images(vec![self.descriptor_info()?]))
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device.destroy_texture(&self.gpu);
    }
}
