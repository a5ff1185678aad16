use ash::vk;
use itertools::Itertools;

use crate::{
    basic::format::{Format, sample_count_to_vk},
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
    resources::{
        handles::RenderPassHandle,
        texture::{GfxTexture, ImageParams, TextureUsage},
    },
};

/// 渲染目标：当前帧的 swapchain image，或者一个离屏 render pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RenderTarget {
    #[default]
    Swapchain,
    Offscreen(RenderPassHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderPassDesc {
    pub width: u32,
    pub height: u32,
    pub color_format: Format,
    pub color_attachment_count: u32,
    pub depth_stencil_format: Option<Format>,
    /// 大于 1 时为每个 color 附件额外创建单采样的 resolve 目标
    pub sample_count: u32,
}

impl RenderPassDesc {
    pub fn validate(&self) -> GfxResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GfxError::UnsupportedUsage("render pass extent is empty".to_string()));
        }
        if self.color_attachment_count == 0 && self.depth_stencil_format.is_none() {
            return Err(GfxError::UnsupportedUsage("render pass has no attachments".to_string()));
        }
        if self.color_attachment_count > 0 && (self.color_format.is_depth() || self.color_format == Format::Undefined)
        {
            return Err(GfxError::UnsupportedUsage(format!("{:?} is not a color format", self.color_format)));
        }
        if let Some(depth) = self.depth_stencil_format
            && !depth.is_depth()
        {
            return Err(GfxError::UnsupportedUsage(format!("{depth:?} is not a depth/stencil format")));
        }
        if sample_count_to_vk(self.sample_count).is_none() {
            return Err(GfxError::UnsupportedUsage(format!("invalid sample count {}", self.sample_count)));
        }
        Ok(())
    }

    #[inline]
    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }
}

/// 附件的排列顺序：color（多重采样时为多采样附件）、resolve、depth/stencil
pub fn attachment_layout(desc: &RenderPassDesc) -> (Vec<u32>, Vec<u32>, Option<u32>) {
    let color_count = desc.color_attachment_count;
    let colors = (0..color_count).collect_vec();
    let resolves = if desc.is_multisampled() {
        (color_count..2 * color_count).collect_vec()
    } else {
        Vec::new()
    };
    let depth = desc.depth_stencil_format.map(|_| color_count + resolves.len() as u32);
    (colors, resolves, depth)
}

/// 离屏 render pass，附件纹理由 pass 持有
pub struct GfxRenderPass {
    handle: vk::RenderPass,
    framebuffer: vk::Framebuffer,

    /// 单采样的 color 目标，pass 结束后可以被采样
    color_textures: Vec<GfxTexture>,
    /// 多重采样时实际被写入的 color 附件
    msaa_textures: Vec<GfxTexture>,
    depth_texture: Option<GfxTexture>,

    desc: RenderPassDesc,
    samples: vk::SampleCountFlags,
}

// new & init
impl GfxRenderPass {
    pub fn new(core: &GfxCore, desc: &RenderPassDesc, name: &str) -> GfxResult<Self> {
        desc.validate()?;
        let samples = sample_count_to_vk(desc.sample_count).unwrap_or(vk::SampleCountFlags::TYPE_1);
        if !core.physical_device.framebuffer_sample_counts().contains(samples) {
            return Err(GfxError::UnsupportedUsage(format!(
                "render pass sample count {} is not supported",
                desc.sample_count
            )));
        }

        let mut pass = Self {
            handle: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            color_textures: Vec::new(),
            msaa_textures: Vec::new(),
            depth_texture: None,
            desc: *desc,
            samples,
        };
        if let Err(e) = pass.create_objects(core, name) {
            pass.destroy(core);
            return Err(e);
        }
        core.device.set_debug_name(&pass, name);
        Ok(pass)
    }

    fn create_objects(&mut self, core: &GfxCore, name: &str) -> GfxResult<()> {
        let desc = self.desc;
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let color_format = desc.color_format.to_vk();

        // 1. 附件纹理
        let color_usage = TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLED;
        for i in 0..desc.color_attachment_count {
            let params = ImageParams::attachment_2d(
                color_format,
                extent,
                color_usage.to_vk(),
                vk::SampleCountFlags::TYPE_1,
                vk::ImageAspectFlags::COLOR,
            );
            self.color_textures.push(GfxTexture::create(core, &params, &format!("{name}-color-{i}"))?);

            if desc.is_multisampled() {
                let params = ImageParams::attachment_2d(
                    color_format,
                    extent,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    self.samples,
                    vk::ImageAspectFlags::COLOR,
                );
                self.msaa_textures.push(GfxTexture::create(core, &params, &format!("{name}-color-msaa-{i}"))?);
            }
        }
        if let Some(depth_format) = desc.depth_stencil_format {
            let params = ImageParams::attachment_2d(
                depth_format.to_vk(),
                extent,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                self.samples,
                depth_format.aspect_mask(),
            );
            self.depth_texture = Some(GfxTexture::create(core, &params, &format!("{name}-depth"))?);
        }

        // 2. render pass
        let (color_indices, resolve_indices, depth_index) = attachment_layout(&desc);
        let mut attachments = Vec::new();
        for _ in &color_indices {
            attachments.push(if desc.is_multisampled() {
                vk::AttachmentDescription::default()
                    .format(color_format)
                    .samples(self.samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            } else {
                Self::sampled_color_attachment(color_format, vk::AttachmentLoadOp::CLEAR)
            });
        }
        for _ in &resolve_indices {
            attachments.push(Self::sampled_color_attachment(color_format, vk::AttachmentLoadOp::DONT_CARE));
        }
        if let Some(depth_format) = desc.depth_stencil_format {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(depth_format.to_vk())
                    .samples(self.samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        let color_refs = color_indices
            .iter()
            .map(|&attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect_vec();
        let resolve_refs = resolve_indices
            .iter()
            .map(|&attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect_vec();
        let depth_ref = depth_index.map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        // 前一次使用者对附件的读取需要在本次写入之前完成；pass 结束后 fragment shader 可以采样
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                )
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        let render_pass_ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);
        self.handle =
            unsafe { core.device.create_render_pass(&render_pass_ci, None) }.or_session_failed("create_render_pass")?;

        // 3. framebuffer，视图顺序与附件顺序一致
        let color_views = if desc.is_multisampled() { &self.msaa_textures } else { &self.color_textures };
        let resolve_views: &[GfxTexture] = if desc.is_multisampled() { &self.color_textures } else { &[] };
        let views = color_views
            .iter()
            .chain(resolve_views)
            .chain(self.depth_texture.as_ref())
            .map(|t| t.view())
            .collect_vec();

        let framebuffer_ci = vk::FramebufferCreateInfo::default()
            .render_pass(self.handle)
            .attachments(&views)
            .width(desc.width)
            .height(desc.height)
            .layers(1);
        self.framebuffer =
            unsafe { core.device.create_framebuffer(&framebuffer_ci, None) }.or_session_failed("create_framebuffer")?;
        core.device.set_object_debug_name(self.framebuffer, format!("GfxFramebuffer::{name}"));

        Ok(())
    }

    fn sampled_color_attachment(format: vk::Format, load_op: vk::AttachmentLoadOp) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }
}

// getters
impl GfxRenderPass {
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
    #[inline]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.desc.width,
            height: self.desc.height,
        }
    }
    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
    #[inline]
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
    /// pass 结束之后可以被采样的 color 纹理
    #[inline]
    pub fn color_texture(&self, index: usize) -> Option<&GfxTexture> {
        self.color_textures.get(index)
    }
    #[inline]
    pub fn depth_texture(&self) -> Option<&GfxTexture> {
        self.depth_texture.as_ref()
    }
    /// begin render pass 时每个附件需要一个 clear value
    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.color_textures.len() + self.msaa_textures.len() + usize::from(self.depth_texture.is_some())
    }
}

// destroy
impl GfxRenderPass {
    pub fn destroy(self, core: &GfxCore) {
        unsafe {
            if self.framebuffer != vk::Framebuffer::null() {
                core.device.destroy_framebuffer(self.framebuffer, None);
            }
            if self.handle != vk::RenderPass::null() {
                core.device.destroy_render_pass(self.handle, None);
            }
        }
        self.color_textures.into_iter().chain(self.msaa_textures).chain(self.depth_texture).for_each(|t| t.destroy(core));
    }
}

impl DebugType for GfxRenderPass {
    fn debug_type_name() -> &'static str {
        "GfxRenderPass"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(color_count: u32, depth: Option<Format>, samples: u32) -> RenderPassDesc {
        RenderPassDesc {
            width: 512,
            height: 512,
            color_format: Format::R8G8B8A8Unorm,
            color_attachment_count: color_count,
            depth_stencil_format: depth,
            sample_count: samples,
        }
    }

    #[test]
    fn test_attachment_layout_single_sample() {
        let (colors, resolves, depth) = attachment_layout(&desc(2, Some(Format::D32Float), 1));
        assert_eq!(colors, vec![0, 1]);
        assert!(resolves.is_empty());
        assert_eq!(depth, Some(2));
    }

    #[test]
    fn test_attachment_layout_multisampled() {
        let (colors, resolves, depth) = attachment_layout(&desc(2, Some(Format::D24UnormS8Uint), 4));
        assert_eq!(colors, vec![0, 1]);
        assert_eq!(resolves, vec![2, 3]);
        assert_eq!(depth, Some(4));

        let (_, _, depth) = attachment_layout(&desc(1, None, 4));
        assert_eq!(depth, None);
    }

    #[test]
    fn test_validation() {
        assert!(desc(1, None, 1).validate().is_ok());
        assert!(desc(0, None, 1).validate().is_err());
        assert!(desc(0, Some(Format::D32Float), 1).validate().is_ok());
        assert!(desc(1, Some(Format::R8G8B8A8Unorm), 1).validate().is_err());
        assert!(desc(1, None, 3).validate().is_err());

        let mut depth_as_color = desc(1, None, 1);
        depth_as_color.color_format = Format::D32Float;
        assert!(depth_as_color.validate().is_err());
    }
}
