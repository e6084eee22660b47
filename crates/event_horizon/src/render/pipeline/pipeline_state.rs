//! Graphics pipeline state snapshots
//!
//! A [`GraphicsPipelineState`] holds every fixed-function setting a graphics
//! pipeline is built from. The pipeline manager keeps one per pipeline and
//! mutates its viewport and scissor when the surface is resized, then
//! rebuilds from it.

use ash::vk;

use crate::render::shader::reflection::{VertexInputAttribute, VertexInputBinding};
use crate::render::shader::ShaderStage;

/// Blending modes for different rendering effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Blending disabled
    #[default]
    Opaque,
    /// Standard alpha blending
    Alpha,
    /// Additive blending, for glow and accretion disk emission
    Additive,
    /// Pre-multiplied alpha
    Premultiplied,
}

impl BlendMode {
    /// Color blend attachment state writing all channels
    pub fn attachment(self) -> vk::PipelineColorBlendAttachmentState {
        let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
        let (src, dst) = match self {
            Self::Opaque => return builder.blend_enable(false).build(),
            Self::Alpha => (vk::BlendFactor::SRC_ALPHA, vk::BlendFactor::ONE_MINUS_SRC_ALPHA),
            Self::Additive => (vk::BlendFactor::SRC_ALPHA, vk::BlendFactor::ONE),
            Self::Premultiplied => (vk::BlendFactor::ONE, vk::BlendFactor::ONE_MINUS_SRC_ALPHA),
        };
        builder
            .blend_enable(true)
            .src_color_blend_factor(src)
            .dst_color_blend_factor(dst)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    }
}

/// Polygon rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolygonMode {
    /// Solid rendering
    #[default]
    Fill,
    /// Wireframe mode
    Line,
    /// Point cloud mode
    Point,
}

impl PolygonMode {
    /// Vulkan polygon mode
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            Self::Fill => vk::PolygonMode::FILL,
            Self::Line => vk::PolygonMode::LINE,
            Self::Point => vk::PolygonMode::POINT,
        }
    }
}

/// Face culling modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
}

impl CullMode {
    /// Vulkan cull mode flags
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::Front => vk::CullModeFlags::FRONT,
            Self::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Everything a graphics pipeline is created from
#[derive(Debug, Clone)]
pub struct GraphicsPipelineState {
    /// Shader stages, filled in from the shader at creation
    pub stages: Vec<ShaderStage>,
    /// Vertex buffer bindings, filled in from the shader at creation
    pub vertex_bindings: Vec<VertexInputBinding>,
    /// Vertex attributes, filled in from the shader at creation
    pub vertex_attributes: Vec<VertexInputAttribute>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Baked viewport
    pub viewport: vk::Viewport,
    /// Baked scissor
    pub scissor: vk::Rect2D,
    /// Polygon fill mode
    pub polygon_mode: PolygonMode,
    /// Face culling
    pub cull_mode: CullMode,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Enable depth testing
    pub depth_test: bool,
    /// Enable depth writing
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare: vk::CompareOp,
    /// Blending of every color attachment
    pub blend_mode: BlendMode,
    /// Color attachments written by the fragment stage
    pub color_attachment_count: u32,
    /// Rasterization samples
    pub samples: vk::SampleCountFlags,
    /// States left dynamic; see [`Self::effective_dynamic_states`]
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Subpass index
    pub subpass: u32,
}

impl Default for GraphicsPipelineState {
    fn default() -> Self {
        Self::opaque(vk::RenderPass::null())
    }
}

impl GraphicsPipelineState {
    /// Depth-tested, back-face culled geometry
    pub fn opaque(render_pass: vk::RenderPass) -> Self {
        Self {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            blend_mode: BlendMode::Opaque,
            color_attachment_count: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            dynamic_states: Vec::new(),
            render_pass,
            subpass: 0,
        }
    }

    /// Alpha blended geometry: depth tested but not written, no culling
    pub fn transparent(render_pass: vk::RenderPass) -> Self {
        Self {
            depth_write: false,
            cull_mode: CullMode::None,
            blend_mode: BlendMode::Alpha,
            ..Self::opaque(render_pass)
        }
    }

    /// Full-screen pass (lensing, bloom, tone mapping): no vertex input, depth or culling
    pub fn fullscreen(render_pass: vk::RenderPass) -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            cull_mode: CullMode::None,
            ..Self::opaque(render_pass)
        }
    }

    /// Bake a Y-flipped viewport and full scissor for `extent`
    ///
    /// The viewport starts at the bottom edge with a negative height so
    /// clip-space Y points up.
    pub fn apply_surface_extent(&mut self, extent: vk::Extent2D) {
        let height = extent.height as f32;
        self.viewport = vk::Viewport {
            x: 0.0,
            y: height,
            width: extent.width as f32,
            height: -height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
    }

    /// Whether a non-empty surface extent has been baked in
    pub fn has_surface_extent(&self) -> bool {
        self.scissor.extent.width > 0 && self.scissor.extent.height > 0
    }

    /// Dynamic states the pipeline is built with
    ///
    /// Until a surface extent is applied, viewport and scissor are added so
    /// a pipeline created before the first resize never bakes a zero-sized
    /// viewport. The caller sets both at record time in that case.
    pub fn effective_dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = self.dynamic_states.clone();
        if !self.has_surface_extent() {
            for state in [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR] {
                if !states.contains(&state) {
                    states.push(state);
                }
            }
        }
        states
    }

    /// Whether the baked viewport would be used as-is and is empty
    pub fn bakes_empty_viewport(&self) -> bool {
        let dynamic = self.effective_dynamic_states();
        (!dynamic.contains(&vk::DynamicState::VIEWPORT) && self.viewport.width <= 0.0)
            || (!dynamic.contains(&vk::DynamicState::SCISSOR) && !self.has_surface_extent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_surface_extent_flips_viewport() {
        let mut state = GraphicsPipelineState::default();
        state.apply_surface_extent(vk::Extent2D { width: 1920, height: 1080 });

        assert_relative_eq!(state.viewport.y, 1080.0);
        assert_relative_eq!(state.viewport.width, 1920.0);
        assert_relative_eq!(state.viewport.height, -1080.0);
        assert_relative_eq!(state.viewport.max_depth, 1.0);
        assert_eq!(state.scissor.extent, vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn test_viewport_dynamic_until_extent_applied() {
        let mut state = GraphicsPipelineState::fullscreen(vk::RenderPass::null());
        assert!(!state.has_surface_extent());
        assert_eq!(
            state.effective_dynamic_states(),
            [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
        assert!(!state.bakes_empty_viewport());

        state.dynamic_states.push(vk::DynamicState::LINE_WIDTH);
        state.apply_surface_extent(vk::Extent2D { width: 640, height: 480 });
        assert_eq!(state.effective_dynamic_states(), [vk::DynamicState::LINE_WIDTH]);
        assert!(!state.bakes_empty_viewport());

        state.apply_surface_extent(vk::Extent2D { width: 0, height: 0 });
        assert!(state.effective_dynamic_states().contains(&vk::DynamicState::VIEWPORT));
    }

    #[test]
    fn test_presets() {
        let transparent = GraphicsPipelineState::transparent(vk::RenderPass::null());
        assert!(transparent.depth_test && !transparent.depth_write);
        assert_eq!(transparent.blend_mode, BlendMode::Alpha);
        assert_eq!(transparent.cull_mode.to_vk(), vk::CullModeFlags::NONE);

        let fullscreen = GraphicsPipelineState::fullscreen(vk::RenderPass::null());
        assert!(!fullscreen.depth_test);
        assert_eq!(fullscreen.blend_mode.attachment().blend_enable, vk::FALSE);
    }

    #[test]
    fn test_additive_blend_adds_destination() {
        let attachment = BlendMode::Additive.attachment();
        assert_eq!(attachment.blend_enable, vk::TRUE);
        assert_eq!(attachment.dst_color_blend_factor, vk::BlendFactor::ONE);
    }
}
