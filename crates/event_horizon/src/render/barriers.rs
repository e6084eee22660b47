//! Image layout tracking
//!
//! Every image that takes part in a layout transition carries its current
//! layout as an [`ImageLayoutState`]. Transitions are requested against that
//! state, so a barrier is derived from where the image actually is rather than
//! from where the caller believes it is. Readers call [`TrackedImage::require`]
//! before use to catch a missing transition.

use ash::vk;
use thiserror::Error;

/// Layout-related usage errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    /// The image was used in a layout it has not been transitioned to
    #[error("Image {image:?} used as {expected:?} while in {actual:?}")]
    UseBeforeTransition {
        /// Image handle
        image: vk::Image,
        /// Layout the use requires
        expected: ImageLayoutState,
        /// Layout the image is in
        actual: ImageLayoutState,
    },
}

/// Typed image layout with the access and stage masks that go with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayoutState {
    /// Contents undefined, initial state
    Undefined,
    /// Destination of a copy or blit
    TransferDst,
    /// Source of a copy or blit
    TransferSrc,
    /// Sampled by fragment or compute shaders
    ShaderReadOnly,
    /// Written as a colour attachment
    ColorAttachment,
    /// Read and written as a depth attachment
    DepthAttachment,
    /// Storage image access from compute
    General,
    /// Handed to the presentation engine
    Present,
}

impl ImageLayoutState {
    /// Vulkan layout
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::General => vk::ImageLayout::GENERAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Accesses performed while in this layout
    pub fn access_mask(self) -> vk::AccessFlags {
        match self {
            Self::Undefined | Self::Present => vk::AccessFlags::empty(),
            Self::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
            Self::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            Self::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
            Self::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        }
    }

    /// Pipeline stages performing those accesses
    pub fn stage_mask(self) -> vk::PipelineStageFlags {
        match self {
            Self::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
            Self::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            Self::TransferDst | Self::TransferSrc => vk::PipelineStageFlags::TRANSFER,
            Self::ShaderReadOnly => {
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
            }
            Self::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthAttachment => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            }
            Self::General => vk::PipelineStageFlags::COMPUTE_SHADER,
        }
    }
}

/// One pending layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Image being transitioned
    pub image: vk::Image,
    /// Aspect of the image
    pub aspect: vk::ImageAspectFlags,
    /// Layout before the barrier
    pub from: ImageLayoutState,
    /// Layout after the barrier
    pub to: ImageLayoutState,
}

impl LayoutTransition {
    /// Image memory barrier covering all mips and layers
    pub fn image_barrier(&self) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(self.from.layout())
            .new_layout(self.to.layout())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })
            .src_access_mask(self.from.access_mask())
            .dst_access_mask(self.to.access_mask())
            .build()
    }
}

/// An image handle together with its current layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedImage {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    state: ImageLayoutState,
}

impl TrackedImage {
    /// Track a freshly created image
    pub fn new(image: vk::Image, aspect: vk::ImageAspectFlags) -> Self {
        Self::with_state(image, aspect, ImageLayoutState::Undefined)
    }

    /// Track an image whose layout is already known
    pub fn with_state(image: vk::Image, aspect: vk::ImageAspectFlags, state: ImageLayoutState) -> Self {
        Self { image, aspect, state }
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Current layout
    pub fn state(&self) -> ImageLayoutState {
        self.state
    }

    /// Move to `to`, returning the barrier to record, or `None` if already there
    ///
    /// `General` to `General` still yields a barrier: storage writes need a
    /// write-after-write dependency even though the layout does not change.
    pub fn transition(&mut self, to: ImageLayoutState) -> Option<LayoutTransition> {
        if self.state == to && to != ImageLayoutState::General {
            return None;
        }
        let transition = LayoutTransition {
            image: self.image,
            aspect: self.aspect,
            from: self.state,
            to,
        };
        self.state = to;
        Some(transition)
    }

    /// Fail unless the image is in `expected`
    pub fn require(&self, expected: ImageLayoutState) -> Result<(), BarrierError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BarrierError::UseBeforeTransition {
                image: self.image,
                expected,
                actual: self.state,
            })
        }
    }
}

/// Transitions recorded together in one `vkCmdPipelineBarrier`
#[derive(Debug, Default)]
pub struct BarrierBatch {
    transitions: Vec<LayoutTransition>,
    src_stage_mask: vk::PipelineStageFlags,
    dst_stage_mask: vk::PipelineStageFlags,
}

impl BarrierBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition `image` and add the resulting barrier, if any
    pub fn transition(&mut self, image: &mut TrackedImage, to: ImageLayoutState) {
        if let Some(transition) = image.transition(to) {
            self.src_stage_mask |= transition.from.stage_mask();
            self.dst_stage_mask |= transition.to.stage_mask();
            self.transitions.push(transition);
        }
    }

    /// Whether nothing needs recording
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Recorded transitions in order
    pub fn transitions(&self) -> &[LayoutTransition] {
        &self.transitions
    }

    /// Union of source stages
    pub fn src_stage_mask(&self) -> vk::PipelineStageFlags {
        self.src_stage_mask
    }

    /// Union of destination stages
    pub fn dst_stage_mask(&self) -> vk::PipelineStageFlags {
        self.dst_stage_mask
    }

    /// Image barriers for `vkCmdPipelineBarrier`
    pub fn image_barriers(&self) -> Vec<vk::ImageMemoryBarrier> {
        self.transitions.iter().map(LayoutTransition::image_barrier).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn image() -> TrackedImage {
        TrackedImage::new(vk::Image::from_raw(7), vk::ImageAspectFlags::COLOR)
    }

    #[test]
    fn test_upload_sequence() {
        let mut texture = image();
        let mut batch = BarrierBatch::new();
        batch.transition(&mut texture, ImageLayoutState::TransferDst);
        assert_eq!(texture.state(), ImageLayoutState::TransferDst);
        assert_eq!(batch.src_stage_mask(), vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(batch.dst_stage_mask(), vk::PipelineStageFlags::TRANSFER);

        let barrier = batch.image_barriers()[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);

        let transition = texture.transition(ImageLayoutState::ShaderReadOnly).unwrap();
        assert_eq!(transition.from, ImageLayoutState::TransferDst);
        assert!(texture.require(ImageLayoutState::ShaderReadOnly).is_ok());
    }

    #[test]
    fn test_redundant_transition_is_skipped() {
        let mut texture = image();
        texture.transition(ImageLayoutState::ShaderReadOnly);
        assert!(texture.transition(ImageLayoutState::ShaderReadOnly).is_none());

        let mut batch = BarrierBatch::new();
        batch.transition(&mut texture, ImageLayoutState::ShaderReadOnly);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_general_to_general_keeps_barrier() {
        let mut storage = image();
        storage.transition(ImageLayoutState::General);
        assert!(storage.transition(ImageLayoutState::General).is_some());
    }

    #[test]
    fn test_use_before_transition() {
        let texture = image();
        assert_eq!(
            texture.require(ImageLayoutState::ShaderReadOnly),
            Err(BarrierError::UseBeforeTransition {
                image: texture.image(),
                expected: ImageLayoutState::ShaderReadOnly,
                actual: ImageLayoutState::Undefined,
            })
        );
    }

    #[test]
    fn test_color_to_transfer_to_compute_chain() {
        let mut target = TrackedImage::with_state(
            vk::Image::from_raw(9),
            vk::ImageAspectFlags::COLOR,
            ImageLayoutState::ColorAttachment,
        );
        let mut batch = BarrierBatch::new();
        batch.transition(&mut target, ImageLayoutState::TransferSrc);
        batch.transition(&mut target, ImageLayoutState::ShaderReadOnly);

        let states: Vec<_> = batch.transitions().iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            states,
            vec![
                (ImageLayoutState::ColorAttachment, ImageLayoutState::TransferSrc),
                (ImageLayoutState::TransferSrc, ImageLayoutState::ShaderReadOnly),
            ]
        );
    }
}
