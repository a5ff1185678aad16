use ash::vk;
use ash::vk::Handle;
use itertools::Itertools;

use crate::{
    basic::format::vk_depth_aspect_mask,
    commands::{command_queue::GfxCommandQueue, semaphore::GfxSemaphore},
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
    resources::texture::{GfxTexture, ImageParams},
    swapchain::{negotiation::SwapchainSettings, surface::GfxSurface},
};

/// acquire next image 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired { index: u32, suboptimal: bool },
    /// 需要重建 swapchain 之后才能继续渲染
    OutOfDate,
    /// 超时或者暂时没有可用的 image，跳过这一帧
    NotReady,
}

/// swapchain 以及依附于它的深度缓冲、render pass 和 framebuffer
///
/// resize 时整体销毁再重建，device 和 surface 保持不变
pub struct GfxRenderSwapchain {
    handle: vk::SwapchainKHR,

    /// 这里的 image 并非手动创建的，因此无法使用 GfxTexture 类型
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,

    depth: Option<GfxTexture>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    settings: SwapchainSettings,
    depth_format: vk::Format,
}

// new & init
impl GfxRenderSwapchain {
    /// 创建顺序：swapchain -> image views -> depth -> render pass -> framebuffers
    ///
    /// 任何一步失败都会释放已经创建的对象
    pub fn new(core: &GfxCore, surface: &GfxSurface, settings: &SwapchainSettings) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxRenderSwapchain::new");

        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth: None,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            settings: *settings,
            depth_format: core.depth_format(),
        };
        if let Err(e) = swapchain.create_objects(core, surface) {
            swapchain.destroy(core);
            return Err(e);
        }

        log::info!(
            "swapchain created: {}x{}, {} images, {:?}, {:?}",
            settings.extent.width,
            settings.extent.height,
            swapchain.images.len(),
            settings.surface_format.format,
            settings.present_mode
        );
        Ok(swapchain)
    }

    fn create_objects(&mut self, core: &GfxCore, surface: &GfxSurface) -> GfxResult<()> {
        let device = &core.device;
        let settings = self.settings;

        // 1. swapchain
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(settings.image_usage)
            .pre_transform(settings.pre_transform)
            .composite_alpha(settings.composite_alpha)
            .present_mode(settings.present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true);
        self.handle = unsafe { device.swapchain.create_swapchain(&create_info, None) }
            .or_session_failed("create_swapchain")?;
        device.set_debug_name(&*self, "main");

        // 2. images 与 views
        self.images =
            unsafe { device.swapchain.get_swapchain_images(self.handle) }.or_session_failed("get_swapchain_images")?;
        for (idx, image) in self.images.iter().enumerate() {
            device.set_object_debug_name(*image, format!("swapchain-image-{idx}"));

            let view_ci = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(settings.surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.create_image_view(&view_ci, None) }.or_session_failed("create_image_view")?;
            device.set_object_debug_name(view, format!("swapchain-view-{idx}"));
            self.image_views.push(view);
        }

        // 3. 深度缓冲，与 surface 尺寸一致
        let depth_params = ImageParams::attachment_2d(
            self.depth_format,
            settings.extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::SampleCountFlags::TYPE_1,
            vk_depth_aspect_mask(self.depth_format),
        );
        self.depth = Some(GfxTexture::create(core, &depth_params, "swapchain-depth")?);

        // 4. render pass
        self.render_pass = Self::create_render_pass(core, settings.surface_format.format, self.depth_format)?;

        // 5. 每个 image 一个 framebuffer
        let depth_view = self.depth.as_ref().map(|d| d.view()).unwrap_or_default();
        for (idx, view) in self.image_views.iter().enumerate() {
            let attachments = [*view, depth_view];
            let framebuffer_ci = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(settings.extent.width)
                .height(settings.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_ci, None) }
                .or_session_failed("create_framebuffer")?;
            device.set_object_debug_name(framebuffer, format!("swapchain-framebuffer-{idx}"));
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn create_render_pass(
        core: &GfxCore,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GfxResult<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref))
            .depth_stencil_attachment(&depth_ref);

        // image 在 acquire 信号之后才能写入，与 submit 时等待的 stage 一致
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let render_pass_ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));
        let render_pass =
            unsafe { core.device.create_render_pass(&render_pass_ci, None) }.or_session_failed("create_render_pass")?;
        core.device.set_object_debug_name(render_pass, "swapchain-render-pass");
        Ok(render_pass)
    }
}

// getters
impl GfxRenderSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
    #[inline]
    pub fn image(&self, index: usize) -> Option<vk::Image> {
        self.images.get(index).copied()
    }
    #[inline]
    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).copied()
    }
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.settings.surface_format.format
    }
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.settings.present_mode
    }
    #[inline]
    pub fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }
}

// tools
impl GfxRenderSwapchain {
    /// timeout: nano seconds
    pub fn acquire_next_image(
        &self,
        core: &GfxCore,
        semaphore: &GfxSemaphore,
        timeout: u64,
    ) -> GfxResult<AcquireResult> {
        let result = unsafe {
            core.device.swapchain.acquire_next_image(self.handle, timeout, semaphore.handle(), vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireResult::NotReady),
            Err(e) => Err(GfxError::session("acquire_next_image", e)),
        }
    }

    /// 返回 true 表示 swapchain 已经过期或者不再最优，需要重建
    pub fn present(
        &self,
        core: &GfxCore,
        queue: &GfxCommandQueue,
        wait_semaphore: &GfxSemaphore,
        index: u32,
    ) -> GfxResult<bool> {
        let wait_semaphores = [wait_semaphore.handle()];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.handle));

        match unsafe { core.device.swapchain.queue_present(queue.handle(), &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GfxError::session("queue_present", e)),
        }
    }
}

// destroy
impl GfxRenderSwapchain {
    /// 销毁顺序：depth -> framebuffers -> render pass -> image views -> swapchain
    pub fn destroy(mut self, core: &GfxCore) {
        let device = &core.device;
        if let Some(depth) = self.depth.take() {
            depth.destroy(core);
        }
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if !self.render_pass.is_null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if !self.handle.is_null() {
                device.swapchain.destroy_swapchain(self.handle, None);
            }
        }
        self.render_pass = vk::RenderPass::null();
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
        log::info!("swapchain destroyed");
    }
}
impl Drop for GfxRenderSwapchain {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxRenderSwapchain must be destroyed before being dropped");
    }
}

impl DebugType for GfxRenderSwapchain {
    fn debug_type_name() -> &'static str {
        "GfxSwapchain"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

/// 检查一次 create / resize 之后每个 backbuffer 都有对应的 framebuffer、command list 和 fence
pub fn check_slot_counts(images: usize, framebuffers: usize, command_lists: usize, fences: usize) -> GfxResult<()> {
    if [framebuffers, command_lists, fences].iter().all(|&n| n == images) && images > 0 {
        return Ok(());
    }
    Err(GfxError::UnsupportedConfiguration(format!(
        "per-backbuffer objects out of sync: images {images}, framebuffers {framebuffers}, command lists {command_lists}, fences {fences}"
    )))
}

/// image index 对应的 slot 序列，便于日志输出
pub fn describe_slots(count: usize) -> String {
    (0..count).map(|i| format!("#{i}")).join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_counts() {
        assert!(check_slot_counts(3, 3, 3, 3).is_ok());
        assert!(check_slot_counts(3, 3, 2, 3).is_err());
        assert!(check_slot_counts(2, 3, 3, 3).is_err());
        assert!(check_slot_counts(0, 0, 0, 0).is_err());
    }

    #[test]
    fn test_describe_slots() {
        assert_eq!(describe_slots(3), "#0, #1, #2");
        assert_eq!(describe_slots(0), "");
    }
}
