//! Root signatures and pipeline state objects.
//!
//! A [`RootSignature`] is a pipeline layout made only of push-constant ranges.
//! Per-object data lives in constant buffers that shaders reach through their
//! device address, so a range rarely holds more than a pointer.
//!
//! [`PipelineState`] objects are built with [`GraphicsPipelineBuilder`] for
//! the single vertex layout meshes use: one `vec3` position per vertex at
//! binding 0. Rendering uses dynamic rendering, so pipelines are created
//! against a color attachment format instead of a render pass.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_rhi::device::Device;
//! use tessera_rhi::pipeline::{GraphicsPipelineBuilder, PushConstantRange, ShaderVisibility};
//! use tessera_rhi::shader::Shader;
//! use tessera_rhi::vk;
//!
//! # fn example(device: Arc<Device>, vs: &Shader, ps: &Shader) -> tessera_rhi::RhiResult<()> {
//! let signature = device.create_root_signature(&[PushConstantRange {
//!     visibility: ShaderVisibility::Vertex,
//!     offset: 0,
//!     size: 8,
//! }])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new("ColorRed")
//!     .vertex_shader(vs)
//!     .pixel_shader(ps)
//!     .color_format(vk::Format::B8G8R8A8_UNORM)
//!     .build(device, &signature)?;
//! # Ok(())
//! # }
//! ```

use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};

/// Push-constant bytes every implementation guarantees.
pub const MAX_PUSH_CONSTANT_BYTES: u32 = 128;

/// Byte stride of the position-only vertex layout.
pub const POSITION_STRIDE: u32 = size_of::<[f32; 3]>() as u32;

/// Shader stages that can read a push-constant range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    Vertex,
    Pixel,
    All,
}

impl ShaderVisibility {
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderVisibility::Pixel => vk::ShaderStageFlags::FRAGMENT,
            ShaderVisibility::All => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// One push-constant range of a root signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub visibility: ShaderVisibility,
    pub offset: u32,
    pub size: u32,
}

impl PushConstantRange {
    /// First byte past the range.
    #[inline]
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }

    fn to_vk(self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.visibility.stage_flags(),
            offset: self.offset,
            size: self.size,
        }
    }
}

/// Check push-constant ranges against the portable limits.
///
/// Offsets and sizes must be multiples of 4, sizes non-zero, and every range
/// must end within [`MAX_PUSH_CONSTANT_BYTES`].
pub fn validate_push_constant_ranges(ranges: &[PushConstantRange]) -> RhiResult<()> {
    for (i, range) in ranges.iter().enumerate() {
        let reason = if range.size == 0 {
            Some("size is zero")
        } else if range.offset % 4 != 0 || range.size % 4 != 0 {
            Some("offset and size must be multiples of 4")
        } else if range.end() > MAX_PUSH_CONSTANT_BYTES {
            Some("range ends past the push constant limit")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(RhiError::PipelineError(format!(
                "push constant range {i} ({}..{}): {reason}",
                range.offset,
                range.end()
            )));
        }
    }
    Ok(())
}

/// Pipeline layout built from push-constant ranges.
pub struct RootSignature {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    ranges: Vec<PushConstantRange>,
}

impl RootSignature {
    /// # Errors
    ///
    /// [`RhiError::PipelineError`] when a range breaks the limits checked by
    /// [`validate_push_constant_ranges`].
    pub fn new(device: Arc<Device>, ranges: &[PushConstantRange]) -> RhiResult<Self> {
        validate_push_constant_ranges(ranges).inspect_err(|e| error!("Invalid root signature: {e}"))?;

        let vk_ranges: Vec<vk::PushConstantRange> = ranges.iter().map(|r| r.to_vk()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&vk_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!("Root signature created with {} range(s)", ranges.len());

        Ok(Self {
            device,
            layout,
            ranges: ranges.to_vec(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn ranges(&self) -> &[PushConstantRange] {
        &self.ranges
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Root signature destroyed");
    }
}

/// Compiled graphics pipeline.
pub struct PipelineState {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    name: String,
}

impl PipelineState {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Pipeline state '{}' destroyed", self.name);
    }
}

/// Vertex input for position-only meshes: binding 0, one `vec3` at location 0.
pub fn position_only_layout() -> (vk::VertexInputBindingDescription, vk::VertexInputAttributeDescription) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: POSITION_STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attribute = vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: 0,
    };
    (binding, attribute)
}

/// Builder for opaque triangle-list pipelines without depth.
pub struct GraphicsPipelineBuilder<'a> {
    name: String,
    vertex_shader: Option<&'a Shader>,
    pixel_shader: Option<&'a Shader>,
    color_format: Option<vk::Format>,
    cull_mode: vk::CullModeFlags,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex_shader: None,
            pixel_shader: None,
            color_format: None,
            cull_mode: vk::CullModeFlags::NONE,
        }
    }

    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    pub fn pixel_shader(mut self, shader: &'a Shader) -> Self {
        self.pixel_shader = Some(shader);
        self
    }

    /// Format of the render target the pipeline draws into.
    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_format = Some(format);
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    /// # Errors
    ///
    /// [`RhiError::PipelineError`] when a shader or the color format is
    /// missing, or a shader is bound to the wrong stage.
    pub fn build(self, device: Arc<Device>, signature: &RootSignature) -> RhiResult<PipelineState> {
        let vertex_shader = self.vertex_shader.ok_or_else(|| {
            RhiError::PipelineError(format!("'{}': vertex shader is required", self.name))
        })?;
        let pixel_shader = self.pixel_shader.ok_or_else(|| {
            RhiError::PipelineError(format!("'{}': pixel shader is required", self.name))
        })?;
        let color_format = self.color_format.ok_or_else(|| {
            RhiError::PipelineError(format!("'{}': color format is required", self.name))
        })?;

        if vertex_shader.stage() != ShaderStage::Vertex || pixel_shader.stage() != ShaderStage::Pixel {
            return Err(RhiError::PipelineError(format!(
                "'{}': shaders bound to the wrong stages ({}, {})",
                self.name,
                vertex_shader.stage(),
                pixel_shader.stage()
            )));
        }

        let stages = [
            vertex_shader.stage_create_info(),
            pixel_shader.stage_create_info(),
        ];

        let (binding, attribute) = position_only_layout();
        let bindings = [binding];
        let attributes = [attribute];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(self.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default();

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(signature.handle())
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device.handle().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_, e)| {
            error!("Failed to create pipeline state '{}': {e}", self.name);
            RhiError::PipelineError(format!("'{}': {e}", self.name))
        })?;

        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError(format!("'{}': no pipeline returned", self.name))
        })?;

        info!("Pipeline state '{}' created", self.name);

        Ok(PipelineState {
            device,
            pipeline,
            name: self.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(offset: u32, size: u32) -> PushConstantRange {
        PushConstantRange {
            visibility: ShaderVisibility::Vertex,
            offset,
            size,
        }
    }

    #[test]
    fn test_visibility_stage_flags() {
        assert_eq!(ShaderVisibility::Vertex.stage_flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderVisibility::Pixel.stage_flags(), vk::ShaderStageFlags::FRAGMENT);
        assert!(ShaderVisibility::All
            .stage_flags()
            .contains(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_address_range_is_valid() {
        assert!(validate_push_constant_ranges(&[range(0, 8)]).is_ok());
        assert!(validate_push_constant_ranges(&[range(0, 8), range(8, 120)]).is_ok());
        assert!(validate_push_constant_ranges(&[]).is_ok());
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        for bad in [range(0, 0), range(2, 8), range(0, 6), range(64, 68)] {
            assert!(
                matches!(
                    validate_push_constant_ranges(&[bad]),
                    Err(RhiError::PipelineError(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_range_end_saturates() {
        assert_eq!(range(16, 8).end(), 24);
        assert_eq!(range(u32::MAX, 8).end(), u32::MAX);
    }

    #[test]
    fn test_position_only_layout() {
        let (binding, attribute) = position_only_layout();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 12);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(attribute.format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attribute.offset, 0);
    }
}
