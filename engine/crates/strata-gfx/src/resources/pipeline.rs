use ash::vk;
use itertools::Itertools;

use crate::{
    basic::format::Format,
    error::{GfxError, GfxResult},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
    resources::{
        handles::{DescriptorSetHandle, ShaderHandle},
        render_pass::RenderTarget,
        sampler::CompareFunc,
        shader::GfxShaderProgram,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: Format,
    pub offset: u32,
}

/// 单个 vertex buffer binding 的布局
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new(stride: u32, attributes: Vec<VertexAttribute>) -> Self {
        Self { stride, attributes }
    }

    /// 没有顶点输入，顶点在 shader 中生成
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn validate(&self) -> GfxResult<()> {
        if let Some(location) = self.attributes.iter().map(|a| a.location).duplicates().next() {
            return Err(GfxError::UnsupportedUsage(format!("vertex attribute location {location} is declared twice")));
        }
        if let Some(a) = self.attributes.iter().find(|a| a.offset >= self.stride) {
            return Err(GfxError::UnsupportedUsage(format!(
                "vertex attribute {} offset {} is outside the stride {}",
                a.location, a.offset, self.stride
            )));
        }
        if let Some(a) = self.attributes.iter().find(|a| a.format.is_depth() || a.format.is_compressed()) {
            return Err(GfxError::UnsupportedUsage(format!("{:?} cannot be a vertex format", a.format)));
        }
        Ok(())
    }

    pub fn binding_descriptions(&self) -> Vec<vk::VertexInputBindingDescription> {
        if self.is_empty() {
            return Vec::new();
        }
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: 0,
                format: a.format.to_vk(),
                offset: a.offset,
            })
            .collect_vec()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    /// tessellation 使用，每个 patch 的控制点数量
    PatchList(u32),
}
impl PrimitiveTopology {
    #[inline]
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Self::PointList => vk::PrimitiveTopology::POINT_LIST,
            Self::LineList => vk::PrimitiveTopology::LINE_LIST,
            Self::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Self::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Self::PatchList(_) => vk::PrimitiveTopology::PATCH_LIST,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    /// 按照 OpenGL 的传统，将 CCW 视为 front face
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: Option<DepthBias>,
    pub line_width: f32,
}
impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_bias: None,
            line_width: 1.0,
        }
    }
}

impl RasterizerState {
    /// device 不支持 wide lines 时线宽固定为 1
    pub fn to_vk(&self, wide_lines: bool) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        let bias = self.depth_bias.unwrap_or_default();
        let line_width = if wide_lines { self.line_width } else { 1.0 };
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(match self.fill_mode {
                FillMode::Solid => vk::PolygonMode::FILL,
                FillMode::Wireframe => vk::PolygonMode::LINE,
            })
            .cull_mode(match self.cull_mode {
                CullMode::None => vk::CullModeFlags::NONE,
                CullMode::Front => vk::CullModeFlags::FRONT,
                CullMode::Back => vk::CullModeFlags::BACK,
            })
            .front_face(match self.front_face {
                FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
                FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            })
            .depth_bias_enable(self.depth_bias.is_some())
            .depth_bias_constant_factor(bias.constant_factor)
            .depth_bias_clamp(bias.clamp)
            .depth_bias_slope_factor(bias.slope_factor)
            .line_width(line_width)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}
impl StencilOp {
    #[inline]
    pub fn to_vk(self) -> vk::StencilOp {
        match self {
            Self::Keep => vk::StencilOp::KEEP,
            Self::Zero => vk::StencilOp::ZERO,
            Self::Replace => vk::StencilOp::REPLACE,
            Self::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            Self::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            Self::Invert => vk::StencilOp::INVERT,
            Self::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
            Self::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
        }
    }
}

/// 正面与背面使用相同的模板操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub compare: CompareFunc,
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub reference: u32,
    pub read_mask: u32,
    pub write_mask: u32,
}
impl Default for StencilState {
    fn default() -> Self {
        Self {
            compare: CompareFunc::Always,
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            reference: 0,
            read_mask: 0xff,
            write_mask: 0xff,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    /// None 表示关闭深度测试
    pub depth_test: Option<CompareFunc>,
    pub depth_write: bool,
    /// None 表示关闭模板测试
    pub stencil: Option<StencilState>,
}
impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: Some(CompareFunc::Less),
            depth_write: true,
            stencil: None,
        }
    }
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            depth_test: None,
            depth_write: false,
            stencil: None,
        }
    }

    pub fn to_vk(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        let stencil = self.stencil.unwrap_or_default();
        let face = vk::StencilOpState {
            fail_op: stencil.fail_op.to_vk(),
            pass_op: stencil.pass_op.to_vk(),
            depth_fail_op: stencil.depth_fail_op.to_vk(),
            compare_op: stencil.compare.to_vk(),
            compare_mask: stencil.read_mask,
            write_mask: stencil.write_mask,
            reference: stencil.reference,
        };
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test.is_some())
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_test.map_or(vk::CompareOp::NEVER, CompareFunc::to_vk))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(self.stencil.is_some())
            .front(face)
            .back(face)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}
impl BlendFactor {
    #[inline]
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            Self::Zero => vk::BlendFactor::ZERO,
            Self::One => vk::BlendFactor::ONE,
            Self::SrcColor => vk::BlendFactor::SRC_COLOR,
            Self::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            Self::DstColor => vk::BlendFactor::DST_COLOR,
            Self::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            Self::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            Self::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            Self::DstAlpha => vk::BlendFactor::DST_ALPHA,
            Self::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}
impl BlendOp {
    #[inline]
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            Self::Add => vk::BlendOp::ADD,
            Self::Subtract => vk::BlendOp::SUBTRACT,
            Self::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            Self::Min => vk::BlendOp::MIN,
            Self::Max => vk::BlendOp::MAX,
        }
    }
}

/// 所有 color 附件共用同一个 blend 配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}
impl Default for BlendState {
    fn default() -> Self {
        Self::opaque()
    }
}

impl BlendState {
    pub fn opaque() -> Self {
        Self {
            enabled: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }

    /// 传统的 src-alpha 混合
    pub fn alpha_blend() -> Self {
        Self {
            enabled: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            alpha_op: BlendOp::Add,
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.enabled)
            .src_color_blend_factor(self.src_color.to_vk())
            .dst_color_blend_factor(self.dst_color.to_vk())
            .color_blend_op(self.color_op.to_vk())
            .src_alpha_blend_factor(self.src_alpha.to_vk())
            .dst_alpha_blend_factor(self.dst_alpha.to_vk())
            .alpha_blend_op(self.alpha_op.to_vk())
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub shader: ShaderHandle,
    pub vertex_layout: VertexLayout,
    pub descriptor_set: Option<DescriptorSetHandle>,
    pub target: RenderTarget,
    pub topology: PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub blend: BlendState,
}

impl PipelineDesc {
    pub fn new(shader: ShaderHandle, vertex_layout: VertexLayout, target: RenderTarget) -> Self {
        Self {
            shader,
            vertex_layout,
            descriptor_set: None,
            target,
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            blend: BlendState::default(),
        }
    }

    /// # params
    /// - `has_tessellation`: shader program 是否包含 tessellation 阶段
    pub fn validate(&self, has_tessellation: bool) -> GfxResult<()> {
        self.vertex_layout.validate()?;
        match (self.topology, has_tessellation) {
            (PrimitiveTopology::PatchList(0), true) => {
                Err(GfxError::UnsupportedUsage("patch list needs at least one control point".to_string()))
            }
            (PrimitiveTopology::PatchList(_), true) => Ok(()),
            (PrimitiveTopology::PatchList(_), false) => {
                Err(GfxError::UnsupportedUsage("patch list topology needs tessellation stages".to_string()))
            }
            (_, true) => Err(GfxError::UnsupportedUsage("tessellation stages need patch list topology".to_string())),
            (_, false) => Ok(()),
        }
    }
}

/// pipeline 创建时需要的 render pass 信息
#[derive(Clone, Copy, Debug)]
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    pub color_attachment_count: u32,
    pub has_depth: bool,
}

/// 独占一个 pipeline layout
pub struct GfxPipeline {
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
}

// new & init
impl GfxPipeline {
    pub fn new(
        core: &GfxCore,
        desc: &PipelineDesc,
        program: &GfxShaderProgram,
        set_layout: Option<vk::DescriptorSetLayout>,
        target: &PipelineTarget,
        name: &str,
    ) -> GfxResult<Self> {
        let stage_flags = program.stage_flags();
        desc.validate(stage_flags.contains(vk::ShaderStageFlags::TESSELLATION_CONTROL))?;

        let device = &core.device;
        let set_layouts = set_layout.into_iter().collect_vec();
        let layout_ci = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&layout_ci, None) }
            .map_err(|e| GfxError::session("create_pipeline_layout", e))?;
        device.set_object_debug_name(layout, format!("GfxPipelineLayout::{name}"));

        let shader_stages = program.stage_create_infos();

        let binding_desc = desc.vertex_layout.binding_descriptions();
        let attribute_desc = desc.vertex_layout.attribute_descriptions();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_desc)
            .vertex_attribute_descriptions(&attribute_desc);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology.to_vk())
            .primitive_restart_enable(false);

        let tessellation_info = match desc.topology {
            PrimitiveTopology::PatchList(points) => {
                Some(vk::PipelineTessellationStateCreateInfo::default().patch_control_points(points))
            }
            _ => None,
        };

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let rasterize_info = desc.rasterizer.to_vk(core.physical_device.features.wide_lines == vk::TRUE);
        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(target.samples);

        let depth_stencil_info = if target.has_depth {
            desc.depth_stencil.to_vk()
        } else {
            DepthStencilState::disabled().to_vk()
        };

        // 混合设置：需要为每个 color attachment 分别指定
        let blend_states = vec![desc.blend.to_vk(); target.color_attachment_count as usize];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_states)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_info)
            .multisample_state(&msaa_info)
            .depth_stencil_state(&depth_stencil_info)
            .color_blend_state(&color_blend_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout)
            .render_pass(target.render_pass)
            .subpass(0);
        if let Some(tessellation_info) = tessellation_info.as_ref() {
            pipeline_info = pipeline_info.tessellation_state(tessellation_info);
        }

        let handle = match unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(GfxError::session("create_graphics_pipelines", e));
            }
        };

        let pipeline = Self { handle, layout };
        device.set_debug_name(&pipeline, name);
        Ok(pipeline)
    }
}

// getters
impl GfxPipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

// destroy
impl GfxPipeline {
    pub fn destroy(self, core: &GfxCore) {
        unsafe {
            core.device.destroy_pipeline(self.handle, None);
            core.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

impl DebugType for GfxPipeline {
    fn debug_type_name() -> &'static str {
        "GfxGraphicsPipeline"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn position_color_layout() -> VertexLayout {
        VertexLayout::new(
            24,
            vec![
                VertexAttribute {
                    location: 0,
                    format: Format::R32G32B32Float,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: Format::R32G32B32Float,
                    offset: 12,
                },
            ],
        )
    }

    fn shader_handle() -> ShaderHandle {
        SlotMap::<ShaderHandle, ()>::with_key().insert(())
    }

    #[test]
    fn test_vertex_layout() {
        let layout = position_color_layout();
        assert!(layout.validate().is_ok());
        assert_eq!(layout.binding_descriptions()[0].stride, 24);
        let attributes = layout.attribute_descriptions();
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[1].offset, 12);

        assert!(VertexLayout::default().binding_descriptions().is_empty());

        let mut bad = position_color_layout();
        bad.attributes[1].location = 0;
        assert!(bad.validate().is_err());

        let mut bad = position_color_layout();
        bad.attributes[1].offset = 24;
        assert!(bad.validate().is_err());

        let mut bad = position_color_layout();
        bad.attributes[0].format = Format::D32Float;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_topology_matches_tessellation() {
        let mut desc = PipelineDesc::new(shader_handle(), position_color_layout(), RenderTarget::Swapchain);
        assert!(desc.validate(false).is_ok());
        assert!(desc.validate(true).is_err());

        desc.topology = PrimitiveTopology::PatchList(3);
        assert!(desc.validate(true).is_ok());
        assert!(desc.validate(false).is_err());

        desc.topology = PrimitiveTopology::PatchList(0);
        assert!(desc.validate(true).is_err());
    }

    #[test]
    fn test_depth_stencil_state() {
        let info = DepthStencilState::default().to_vk();
        assert_eq!(info.depth_test_enable, vk::TRUE);
        assert_eq!(info.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(info.stencil_test_enable, vk::FALSE);

        let state = DepthStencilState {
            stencil: Some(StencilState {
                pass_op: StencilOp::Replace,
                reference: 1,
                ..Default::default()
            }),
            ..DepthStencilState::disabled()
        };
        let info = state.to_vk();
        assert_eq!(info.depth_test_enable, vk::FALSE);
        assert_eq!(info.stencil_test_enable, vk::TRUE);
        assert_eq!(info.front.pass_op, vk::StencilOp::REPLACE);
        assert_eq!(info.back.reference, 1);
    }

    #[test]
    fn test_rasterizer_state() {
        let state = RasterizerState {
            fill_mode: FillMode::Wireframe,
            cull_mode: CullMode::None,
            line_width: 2.0,
            depth_bias: Some(DepthBias {
                constant_factor: 1.25,
                clamp: 0.0,
                slope_factor: 1.75,
            }),
            ..Default::default()
        };
        let info = state.to_vk(false);
        assert_eq!(info.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(info.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(info.line_width, 1.0);
        assert_eq!(info.depth_bias_enable, vk::TRUE);
        assert_eq!(state.to_vk(true).line_width, 2.0);
    }

    #[test]
    fn test_blend_state() {
        let opaque = BlendState::opaque().to_vk();
        assert_eq!(opaque.blend_enable, vk::FALSE);
        assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);

        let alpha = BlendState::alpha_blend().to_vk();
        assert_eq!(alpha.blend_enable, vk::TRUE);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }
}
