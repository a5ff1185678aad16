use ash::vk;
use itertools::Itertools;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::{
    backend::{
        ClearValues, CommandListLevel, FrameStatus, GfxBackend, QueueKind, RenderPassContents, ResizeOutcome,
        ScissorRect, Viewport,
    },
    basic::color::LabelColor,
    commands::{
        command_list::GfxCommandList, command_pool::GfxCommandPool, command_queue::GfxCommandQueue,
        fence::GfxFence, frame_sync::GfxFrameSync, submit_info::GfxSubmitInfo,
    },
    config::GfxConfig,
    error::{GfxError, GfxResult},
    gfx_core::GfxCore,
    graphics::GraphicsApi,
    resources::{
        buffer::{BufferDesc, BufferUsage, GfxBuffer},
        descriptor_set::{DescriptorBinding, DescriptorKind, DescriptorSetDesc, GfxDescriptorSet, ResolvedDescriptor},
        handles::{
            BufferHandle, CommandListHandle, CommandPoolHandle, DescriptorSetHandle, PipelineHandle,
            RenderPassHandle, SamplerHandle, ShaderHandle, TextureHandle,
        },
        pipeline::{GfxPipeline, PipelineDesc, PipelineTarget},
        registry::GfxResourceRegistry,
        render_pass::{GfxRenderPass, RenderPassDesc, RenderTarget, attachment_layout},
        sampler::{GfxSampler, SamplerDesc},
        shader::{GfxShaderProgram, ShaderDesc},
        texture::{GfxTexture, TextureDesc},
    },
    swapchain::{
        lifecycle::SwapchainLifecycle,
        negotiation::{SwapchainRequest, SwapchainSettings},
        render_swapchain::{AcquireResult, GfxRenderSwapchain, check_slot_counts, describe_slots},
        surface::GfxSurface,
    },
};

/// 一代 swapchain 以及与 backbuffer 一一对应的对象
///
/// 第 i 个 image 使用第 i 个 fence 和第 i 个 command list，resize 时整体重建
struct SwapchainFrames {
    swapchain: GfxRenderSwapchain,
    sync: GfxFrameSync,
    /// 存放在 registry 中，从 core 的 graphics pool 分配
    command_lists: Vec<CommandListHandle>,
}

impl SwapchainFrames {
    fn create(
        core: &GfxCore,
        surface: &GfxSurface,
        settings: &SwapchainSettings,
        registry: &mut GfxResourceRegistry,
    ) -> GfxResult<Self> {
        let swapchain = GfxRenderSwapchain::new(core, surface, settings)?;
        let slot_count = swapchain.image_count();

        let sync = match GfxFrameSync::new(&core.device, slot_count) {
            Ok(sync) => sync,
            Err(e) => {
                swapchain.destroy(core);
                return Err(e);
            }
        };

        let lists = Self::allocate_lists(core, slot_count).and_then(|lists| {
            match check_slot_counts(slot_count, swapchain.framebuffer_count(), lists.len(), sync.fence_count()) {
                Ok(()) => Ok(lists),
                Err(e) => {
                    lists.into_iter().for_each(|l| l.free(&core.device));
                    Err(e)
                }
            }
        });
        let lists = match lists {
            Ok(lists) => lists,
            Err(e) => {
                sync.destroy(&core.device);
                swapchain.destroy(core);
                return Err(e);
            }
        };

        log::info!(
            "swapchain {}x{} with frame slots [{}]",
            swapchain.extent().width,
            swapchain.extent().height,
            describe_slots(slot_count)
        );
        let command_lists = lists.into_iter().map(|l| registry.command_lists.insert(l)).collect_vec();
        Ok(Self {
            swapchain,
            sync,
            command_lists,
        })
    }

    fn allocate_lists(core: &GfxCore, count: usize) -> GfxResult<Vec<GfxCommandList>> {
        let mut lists = Vec::with_capacity(count);
        for i in 0..count {
            let list = GfxCommandList::allocate(
                &core.device,
                core.graphics_pool.handle(),
                CommandListLevel::Primary,
                &format!("frame-{i}"),
            );
            match list {
                Ok(list) => lists.push(list),
                Err(e) => {
                    lists.into_iter().for_each(|l| l.free(&core.device));
                    return Err(e);
                }
            }
        }
        Ok(lists)
    }

    #[inline]
    fn slot_of(&self, list: CommandListHandle) -> Option<usize> {
        self.command_lists.iter().position(|&l| l == list)
    }

    /// 调用前需要保证 device idle
    fn destroy(self, core: &GfxCore, registry: &mut GfxResourceRegistry) {
        for handle in self.command_lists {
            if let Ok(list) = registry.command_lists.remove(handle) {
                list.free(&core.device);
            }
        }
        self.sync.destroy(&core.device);
        self.swapchain.destroy(core);
    }
}

/// 当前帧在 acquire 与 present 之间的进度
#[derive(Clone, Copy, Debug, Default)]
struct FrameState {
    image_index: Option<u32>,
    submitted: bool,
    frame_count: u64,
}

impl FrameState {
    fn acquired(&mut self, index: u32) {
        self.image_index = Some(index);
        self.submitted = false;
    }

    fn presented(&mut self) {
        self.image_index = None;
        self.submitted = false;
        self.frame_count += 1;
    }

    /// 放弃还没有 present 的帧，返回它占用的 image
    fn abandon(&mut self) -> Option<u32> {
        self.submitted = false;
        self.image_index.take()
    }
}

/// 解析之后的渲染目标
struct ResolvedTarget {
    render_pass: vk::RenderPass,
    /// swapchain 还没有 acquire 时为 None
    framebuffer: Option<vk::Framebuffer>,
    extent: vk::Extent2D,
    clear_values: Vec<vk::ClearValue>,
}

/// Vulkan 后端
///
/// 创建时不访问 gpu；[`GfxBackend::initialize`] 按照 surface -> device -> swapchain 的顺序创建，
/// [`GfxBackend::destroy`] 按相反的顺序释放
pub struct VulkanBackend {
    config: GfxConfig,
    width: u32,
    height: u32,

    /// 同时持有 surface
    core: Option<GfxCore>,
    frames: Option<SwapchainFrames>,
    registry: GfxResourceRegistry,

    lifecycle: SwapchainLifecycle,
    frame: FrameState,
    /// 没有窗口，只能使用资源工厂与立即提交
    headless: bool,
}

// new & init
impl VulkanBackend {
    pub fn new(config: GfxConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            config,
            core: None,
            frames: None,
            registry: GfxResourceRegistry::new(),
            lifecycle: SwapchainLifecycle::new(),
            frame: FrameState::default(),
            headless: false,
        }
    }

    /// 只创建 device，不创建 surface 和 swapchain；用于离屏计算、上传与测试
    pub fn initialize_headless(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::initialize_headless");
        if self.core.is_some() {
            return Err(GfxError::UnsupportedUsage("graphics backend is already initialized".to_string()));
        }

        let core = GfxCore::new(&self.config.app_name, None, self.config.validation, self.config.multisampling)
            .map_err(GfxError::into_init)?;
        self.core = Some(core);
        self.headless = true;
        self.frame = FrameState::default();
        log::info!("vulkan backend initialized without a window");
        Ok(())
    }

    fn swapchain_request(&self, extent: vk::Extent2D) -> SwapchainRequest {
        SwapchainRequest {
            extent,
            vsync: self.config.vsync,
            fullscreen: self.config.fullscreen,
            backbuffer_count: self.config.backbuffer_count,
        }
    }
}

// getters
impl VulkanBackend {
    #[inline]
    pub fn config(&self) -> &GfxConfig {
        &self.config
    }

    #[inline]
    pub fn is_headless(&self) -> bool {
        self.headless
    }

    /// 已经 present 的帧数
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame.frame_count
    }

    /// 当前 swapchain 的 image 数量；没有 swapchain 时为 0
    #[inline]
    pub fn backbuffer_count(&self) -> usize {
        self.frames.as_ref().map_or(0, |f| f.swapchain.image_count())
    }

    #[inline]
    pub fn live_resource_count(&self) -> usize {
        self.registry.live_count()
    }
}

// tools
impl VulkanBackend {
    #[inline]
    fn frame_slot(&self, list: CommandListHandle) -> Option<usize> {
        self.frames.as_ref()?.slot_of(list)
    }

    /// `render()` 使用的默认帧：只有一个 clear pass
    fn record_clear_frame(&mut self) -> GfxResult<FrameStatus> {
        let list = self.swapchain_command_list()?;
        let extent = self.frames.as_ref().map(|f| f.swapchain.extent()).ok_or(GfxError::FrameNotAcquired)?;

        self.begin_commands(list)?;
        let core = initialized(&self.core)?;
        let cmd = self.registry.command_lists.get(list)?.handle();
        core.device.begin_label(cmd, &format!("frame-{}", self.frame.frame_count), LabelColor::COLOR_FRAME);
        self.begin_render_pass(list, RenderTarget::Swapchain, &ClearValues::default(), RenderPassContents::Inline)?;
        self.set_viewport(list, &Viewport::full(extent.width, extent.height))?;
        self.set_scissor(list, &ScissorRect::full(extent.width, extent.height))?;
        self.end_render_pass(list)?;
        initialized(&self.core)?.device.end_label(cmd);
        self.end_commands(list)?;
        self.submit(list)?;
        self.present()
    }

    /// 帧边界上重建 swapchain
    ///
    /// surface 的尺寸为 0 时保留旧的 swapchain 并返回 false，下一帧重试
    fn recreate_swapchain(&mut self, target: vk::Extent2D) -> GfxResult<bool> {
        let _span = tracy_client::span!("VulkanBackend::recreate_swapchain");
        let core = initialized(&self.core)?;
        let surface = core.surface().ok_or(GfxError::NotInitialized)?;

        core.device.wait_idle()?;
        let support = surface.query_support(core.physical_device.handle)?;
        let settings = SwapchainSettings::negotiate(&support, &self.swapchain_request(target))?;
        if settings.is_zero_extent() {
            log::debug!("surface extent is zero, swapchain recreation is deferred");
            self.lifecycle.abort_resize(target);
            return Ok(false);
        }

        if let Some(frames) = self.frames.take() {
            frames.destroy(core, &mut self.registry);
        }
        let frames = SwapchainFrames::create(core, surface, &settings, &mut self.registry)?;
        let extent = frames.swapchain.extent();
        self.frames = Some(frames);
        self.lifecycle.finish_resize(extent);
        self.width = extent.width;
        self.height = extent.height;
        log::info!("swapchain recreated: {}x{}", extent.width, extent.height);
        Ok(true)
    }
}

#[inline]
fn initialized(core: &Option<GfxCore>) -> GfxResult<&GfxCore> {
    core.as_ref().ok_or(GfxError::NotInitialized)
}

/// 正在录制的 list 对应的 command buffer
fn recording_list(
    registry: &GfxResourceRegistry,
    list: CommandListHandle,
    operation: &'static str,
) -> GfxResult<vk::CommandBuffer> {
    let list = registry.command_lists.get(list)?;
    list.ensure_recording(operation)?;
    Ok(list.handle())
}

/// list 所属 pool 对应的 queue；core 自己的 pool 属于 graphics queue
fn queue_for_pool<'a>(core: &'a GfxCore, registry: &GfxResourceRegistry, pool: vk::CommandPool) -> &'a GfxCommandQueue {
    registry
        .command_pools
        .iter()
        .find(|(_, p)| p.handle() == pool)
        .map_or(&core.graphics_queue, |(_, p)| core.queue_for_family(p.queue_family().queue_family_index))
}

/// 使用临时 fence 提交并阻塞等待
fn submit_and_wait(core: &GfxCore, queue: &GfxCommandQueue, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
    let _span = tracy_client::span!("submit_and_wait");
    let fence = GfxFence::new(&core.device, false, "immediate")?;
    let result = queue
        .submit(&core.device, &[GfxSubmitInfo::new(&[command_buffer])], Some(&fence))
        .and_then(|_| fence.wait(&core.device));
    fence.destroy(&core.device);
    result
}

/// 从 graphics pool 分配一个临时的 command list，录制、提交并等待完成
fn one_time_exec(core: &GfxCore, name: &str, record: impl FnOnce(vk::CommandBuffer)) -> GfxResult<()> {
    let mut list =
        GfxCommandList::allocate(&core.device, core.graphics_pool.handle(), CommandListLevel::Primary, name)?;
    let result = list
        .begin(&core.device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)
        .and_then(|_| {
            core.device.begin_label(list.handle(), name, LabelColor::COLOR_CMD);
            record(list.handle());
            core.device.end_label(list.handle());
            list.end(&core.device)
        })
        .and_then(|_| submit_and_wait(core, &core.graphics_queue, list.handle()));
    list.free(&core.device);
    result
}

/// 把新建纹理从初始 layout 转换到可以被采样的 layout
fn transition_to_sampled(core: &GfxCore, texture: &GfxTexture) -> GfxResult<()> {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(texture.initial_layout())
        .new_layout(texture.sampled_layout())
        .src_access_mask(vk::AccessFlags::HOST_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(texture.image())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: texture.aspect(),
            base_mip_level: 0,
            level_count: texture.mip_levels(),
            base_array_layer: 0,
            layer_count: 1,
        });
    one_time_exec(core, "texture-layout", |cmd| unsafe {
        core.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::VERTEX_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    })
}

#[inline]
fn color_clear_value(color: glam::Vec4) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: color.to_array(),
        },
    }
}

#[inline]
fn depth_clear_value(clear: &ClearValues) -> vk::ClearValue {
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: clear.depth,
            stencil: clear.stencil,
        },
    }
}

fn resolve_target(
    frames: Option<&SwapchainFrames>,
    image_index: Option<u32>,
    registry: &GfxResourceRegistry,
    target: RenderTarget,
    clear: &ClearValues,
) -> GfxResult<ResolvedTarget> {
    match target {
        RenderTarget::Swapchain => {
            let frames = frames.ok_or(GfxError::FrameNotAcquired)?;
            let swapchain = &frames.swapchain;
            Ok(ResolvedTarget {
                render_pass: swapchain.render_pass(),
                framebuffer: image_index.and_then(|i| swapchain.framebuffer(i as usize)),
                extent: swapchain.extent(),
                clear_values: vec![color_clear_value(clear.color), depth_clear_value(clear)],
            })
        }
        RenderTarget::Offscreen(handle) => {
            let pass = registry.render_passes.get(handle)?;
            let (colors, resolves, depth) = attachment_layout(pass.desc());
            let mut clear_values = colors
                .iter()
                .chain(resolves.iter())
                .map(|_| color_clear_value(clear.color))
                .collect_vec();
            if depth.is_some() {
                clear_values.push(depth_clear_value(clear));
            }
            Ok(ResolvedTarget {
                render_pass: pass.handle(),
                framebuffer: Some(pass.framebuffer()),
                extent: pass.extent(),
                clear_values,
            })
        }
    }
}

/// 把 descriptor 中的句柄解析为 native 对象，同时检查资源的用途
fn resolve_descriptor(registry: &GfxResourceRegistry, binding: &DescriptorBinding) -> GfxResult<ResolvedDescriptor> {
    match binding.kind {
        DescriptorKind::UniformBuffer(handle) => {
            let buffer = registry.buffers.get(handle)?;
            if buffer.desc().usage != BufferUsage::Uniform {
                return Err(GfxError::UnsupportedUsage(format!(
                    "binding {} expects a uniform buffer, got {:?}",
                    binding.binding,
                    buffer.desc().usage
                )));
            }
            Ok(ResolvedDescriptor::UniformBuffer {
                buffer: buffer.handle(),
                range: buffer.size(),
            })
        }
        DescriptorKind::CombinedTextureSampler(texture, sampler) => {
            let texture = registry.textures.get(texture)?;
            if !texture.usage().contains(vk::ImageUsageFlags::SAMPLED) {
                return Err(GfxError::UnsupportedUsage(format!(
                    "binding {}: texture {} is not created with sampled usage",
                    binding.binding,
                    texture.name()
                )));
            }
            Ok(ResolvedDescriptor::CombinedTextureSampler {
                view: texture.view(),
                sampler: registry.samplers.get(sampler)?.handle(),
                layout: texture.sampled_layout(),
            })
        }
        DescriptorKind::RenderPassAttachment(pass, index, sampler) => {
            let texture = registry
                .render_passes
                .get(pass)?
                .color_texture(index as usize)
                .ok_or(GfxError::InvalidHandle("render pass attachment"))?;
            Ok(ResolvedDescriptor::CombinedTextureSampler {
                view: texture.view(),
                sampler: registry.samplers.get(sampler)?.handle(),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
        }
    }
}

impl GfxBackend for VulkanBackend {
    // ---------------------------------------------------------------------------------------------
    // 生命周期

    fn api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn initialize(&mut self, window: RawWindowHandle, display: RawDisplayHandle) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::initialize");
        if self.core.is_some() {
            return Err(GfxError::UnsupportedUsage("graphics backend is already initialized".to_string()));
        }

        let core = GfxCore::new(
            &self.config.app_name,
            Some((display, window)),
            self.config.validation,
            self.config.multisampling,
        )
        .map_err(GfxError::into_init)?;
        let Some(surface) = core.surface() else {
            core.destroy();
            return Err(GfxError::NotInitialized);
        };

        let requested = vk::Extent2D {
            width: self.width,
            height: self.height,
        };
        let settings = surface
            .query_support(core.physical_device.handle)
            .and_then(|support| SwapchainSettings::negotiate(&support, &self.swapchain_request(requested)));
        let settings = match settings {
            Ok(settings) => settings,
            Err(e) => {
                core.destroy();
                return Err(e.into_init());
            }
        };

        if settings.is_zero_extent() {
            log::warn!("surface extent is zero at initialization, swapchain creation is deferred");
            self.lifecycle.created(settings.extent);
            self.lifecycle.abort_resize(requested);
        } else {
            match SwapchainFrames::create(&core, surface, &settings, &mut self.registry) {
                Ok(frames) => {
                    let extent = frames.swapchain.extent();
                    self.lifecycle.created(extent);
                    self.width = extent.width;
                    self.height = extent.height;
                    self.frames = Some(frames);
                }
                Err(e) => {
                    core.destroy();
                    return Err(e.into_init());
                }
            }
        }

        self.core = Some(core);
        self.headless = false;
        self.frame = FrameState::default();
        log::info!("vulkan backend initialized: {}x{}", self.width, self.height);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    fn resize(&mut self, width: u32, height: u32) -> GfxResult<ResizeOutcome> {
        self.width = width;
        self.height = height;
        if self.core.is_none() {
            // 作为初始尺寸使用
            return Ok(ResizeOutcome::Scheduled);
        }
        if self.headless {
            return Ok(ResizeOutcome::Ignored);
        }

        let outcome = self.lifecycle.request_resize(vk::Extent2D { width, height });
        log::debug!("resize to {width}x{height}: {outcome:?}");
        Ok(outcome)
    }

    fn is_resized(&self) -> bool {
        self.lifecycle.needs_recreate()
    }

    fn is_prepared(&self) -> bool {
        self.core.is_some() && !self.headless && self.frames.is_some() && self.lifecycle.is_up_to_date()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn destroy(&mut self) {
        let Some(core) = self.core.take() else {
            return;
        };
        let _span = tracy_client::span!("VulkanBackend::destroy");

        if let Err(e) = core.device.wait_idle() {
            log::warn!("wait idle before destroy failed: {e}");
        }
        if let Some(frames) = self.frames.take() {
            frames.destroy(&core, &mut self.registry);
        }
        self.registry.destroy_all(&core);
        core.destroy();

        self.lifecycle.destroyed();
        self.frame = FrameState::default();
        self.headless = false;
        log::info!("vulkan backend destroyed");
    }

    // ---------------------------------------------------------------------------------------------
    // 帧

    fn render(&mut self, elapsed_time: f32) -> GfxResult<FrameStatus> {
        let _span = tracy_client::span!("VulkanBackend::render");
        log::trace!("frame {} elapsed {elapsed_time:.4}s", self.frame.frame_count);

        let status = self.acquire_next_swapchain_image()?;
        if status != FrameStatus::Ready {
            return Ok(status);
        }

        let result = self.record_clear_frame();
        if result.is_err() {
            self.abandon_frame();
        }
        result
    }

    fn acquire_next_swapchain_image(&mut self) -> GfxResult<FrameStatus> {
        let _span = tracy_client::span!("VulkanBackend::acquire_next_swapchain_image");
        if self.core.is_none() {
            return Err(GfxError::NotInitialized);
        }
        if self.headless {
            return Err(GfxError::UnsupportedUsage("a context without a window has no swapchain".to_string()));
        }
        if self.lifecycle.is_failed() {
            return Err(GfxError::DeviceLost {
                what: "swapchain recreation",
            });
        }
        if self.frame.image_index.is_some() {
            log::warn!("the previous frame was acquired but never presented");
            self.abandon_frame();
        }

        if let Some(target) = self.lifecycle.take_pending() {
            match self.recreate_swapchain(target) {
                Ok(true) => {}
                Ok(false) => return Ok(FrameStatus::Minimized),
                Err(e) => {
                    log::error!("swapchain recreation failed: {e}");
                    self.lifecycle.fail_resize();
                    return Err(e);
                }
            }
        }
        if self.lifecycle.needs_recreate() {
            return Ok(FrameStatus::Minimized);
        }

        let core = initialized(&self.core)?;
        let Some(frames) = self.frames.as_mut() else {
            return Ok(FrameStatus::Minimized);
        };
        let acquired =
            frames.swapchain.acquire_next_image(core, frames.sync.image_acquired(), self.config.acquire_timeout_ns())?;
        match acquired {
            AcquireResult::OutOfDate => {
                log::debug!("swapchain is out of date, recreate at the next frame");
                self.lifecycle.mark_out_of_date();
                Ok(FrameStatus::OutOfDate)
            }
            AcquireResult::NotReady => Ok(FrameStatus::NotReady),
            AcquireResult::Acquired { index, suboptimal } => {
                if suboptimal {
                    self.lifecycle.mark_out_of_date();
                }
                frames.sync.wait_and_reset(&core.device, index as usize)?;
                self.frame.acquired(index);
                Ok(FrameStatus::Ready)
            }
        }
    }

    /// 放弃当前帧：image 已经 acquire，semaphore 的 signal 无法撤回，
    /// 因此把 swapchain 标记为过期，下一帧开始时连同同步对象一起重建
    fn abandon_frame(&mut self) {
        if let Some(index) = self.frame.abandon() {
            log::warn!("frame on swapchain image {index} is abandoned, swapchain will be recreated");
            self.lifecycle.mark_out_of_date();
        }
    }

    fn swapchain_command_list(&self) -> GfxResult<CommandListHandle> {
        let index = self.frame.image_index.ok_or(GfxError::FrameNotAcquired)?;
        self.frames
            .as_ref()
            .and_then(|f| f.command_lists.get(index as usize).copied())
            .ok_or(GfxError::FrameNotAcquired)
    }

    fn submit(&mut self, list: CommandListHandle) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::submit");
        let core = initialized(&self.core)?;
        let cmd = self.registry.command_lists.get(list)?;
        if cmd.level() == CommandListLevel::Secondary {
            return Err(GfxError::UnsupportedUsage(
                "secondary command lists are executed by a primary list, not submitted".to_string(),
            ));
        }
        cmd.check_submittable()?;

        match (self.frame_slot(list), self.frames.as_mut()) {
            (Some(slot), Some(frames)) => {
                if self.frame.image_index != Some(slot as u32) {
                    return Err(GfxError::FrameNotAcquired);
                }
                let sync = &mut frames.sync;
                sync.ensure_recordable(slot)?;
                let info = GfxSubmitInfo::new(&[cmd.handle()])
                    .wait(sync.image_acquired(), vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .signal(sync.render_complete());
                core.graphics_queue.submit(&core.device, &[info], Some(sync.fence(slot)?))?;
                sync.mark_submitted(slot)?;
                self.frame.submitted = true;
            }
            _ => {
                let queue = queue_for_pool(core, &self.registry, cmd.pool());
                queue.submit(&core.device, &[GfxSubmitInfo::new(&[cmd.handle()])], None)?;
            }
        }

        self.registry.command_lists.get_mut(list)?.mark_submitted();
        Ok(())
    }

    fn submit_immediate(&mut self, list: CommandListHandle) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::submit_immediate");
        if self.frame_slot(list).is_some() {
            return Err(GfxError::UnsupportedUsage(
                "frame command lists are submitted through the frame synchronization".to_string(),
            ));
        }
        let core = initialized(&self.core)?;
        let cmd = self.registry.command_lists.get(list)?;
        if cmd.level() == CommandListLevel::Secondary {
            return Err(GfxError::UnsupportedUsage("secondary command lists cannot be submitted".to_string()));
        }
        cmd.check_submittable()?;

        submit_and_wait(core, queue_for_pool(core, &self.registry, cmd.pool()), cmd.handle())?;
        self.registry.command_lists.get_mut(list)?.mark_submitted();
        Ok(())
    }

    fn present(&mut self) -> GfxResult<FrameStatus> {
        let _span = tracy_client::span!("VulkanBackend::present");
        let index = self.frame.image_index.ok_or(GfxError::FrameNotAcquired)?;
        if !self.frame.submitted {
            self.abandon_frame();
            return Err(GfxError::UnsupportedUsage(
                "the frame command list must be submitted before present".to_string(),
            ));
        }
        let core = initialized(&self.core)?;
        let frames = self.frames.as_ref().ok_or(GfxError::FrameNotAcquired)?;

        let stale = frames.swapchain.present(core, &core.graphics_queue, frames.sync.render_complete(), index);
        self.frame.presented();

        if stale? {
            log::debug!("swapchain is out of date or suboptimal after present");
            self.lifecycle.mark_out_of_date();
            Ok(FrameStatus::OutOfDate)
        } else {
            Ok(FrameStatus::Presented)
        }
    }

    fn wait_idle(&self) -> GfxResult<()> {
        initialized(&self.core)?.device.wait_idle()
    }

    // ---------------------------------------------------------------------------------------------
    // 资源工厂

    fn create_buffer(&mut self, desc: &BufferDesc, name: &str) -> GfxResult<BufferHandle> {
        let core = initialized(&self.core)?;
        let buffer = GfxBuffer::new(core, desc, name)?;
        log::debug!("create buffer {name}: {:?} {} bytes", desc.usage, buffer.size());
        Ok(self.registry.buffers.insert(buffer))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.buffers.remove(buffer)?.destroy(core);
        Ok(())
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> GfxResult<&mut [u8]> {
        let core = initialized(&self.core)?;
        self.registry.buffers.get_mut(buffer)?.map(core)
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.buffers.get_mut(buffer)?.unmap(core)
    }

    fn create_texture(&mut self, desc: &TextureDesc, name: &str) -> GfxResult<TextureHandle> {
        let core = initialized(&self.core)?;
        let texture = GfxTexture::new(core, desc, name)?;
        if texture.usage().contains(vk::ImageUsageFlags::SAMPLED)
            && let Err(e) = transition_to_sampled(core, &texture)
        {
            texture.destroy(core);
            return Err(e);
        }
        log::debug!("create texture {name}: {:?} {}x{}x{}", desc.format, desc.width, desc.height, desc.depth);
        Ok(self.registry.textures.insert(texture))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.textures.remove(texture)?.destroy(core);
        Ok(())
    }

    fn map_texture(&mut self, texture: TextureHandle) -> GfxResult<&mut [u8]> {
        let core = initialized(&self.core)?;
        self.registry.textures.get_mut(texture)?.map(core)
    }

    fn unmap_texture(&mut self, texture: TextureHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.textures.get_mut(texture)?.unmap(core)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc, name: &str) -> GfxResult<SamplerHandle> {
        let core = initialized(&self.core)?;
        let sampler = GfxSampler::new(core, desc, name)?;
        Ok(self.registry.samplers.insert(sampler))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.samplers.remove(sampler)?.destroy(core);
        Ok(())
    }

    fn create_shader(&mut self, desc: &ShaderDesc, name: &str) -> GfxResult<ShaderHandle> {
        let core = initialized(&self.core)?;
        let program = GfxShaderProgram::new(core, desc, name)?;
        Ok(self.registry.shaders.insert(program))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.shaders.remove(shader)?.destroy(core);
        Ok(())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc, name: &str) -> GfxResult<RenderPassHandle> {
        let core = initialized(&self.core)?;
        let mut desc = *desc;
        if desc.sample_count == 0 {
            desc.sample_count = core.sample_count().1;
        }
        let pass = GfxRenderPass::new(core, &desc, name)?;
        log::debug!(
            "create render pass {name}: {}x{}, {} attachment(s), {}x msaa",
            desc.width,
            desc.height,
            pass.attachment_count(),
            desc.sample_count
        );
        Ok(self.registry.render_passes.insert(pass))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.render_passes.remove(render_pass)?.destroy(core);
        Ok(())
    }

    fn create_descriptor_set(&mut self, desc: &DescriptorSetDesc, name: &str) -> GfxResult<DescriptorSetHandle> {
        let core = initialized(&self.core)?;
        desc.validate()?;
        let resolved = desc
            .bindings
            .iter()
            .map(|binding| resolve_descriptor(&self.registry, binding))
            .collect::<GfxResult<Vec<_>>>()?;
        let set = GfxDescriptorSet::new(core, desc, &resolved, name)?;
        Ok(self.registry.descriptor_sets.insert(set))
    }

    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.descriptor_sets.remove(set)?.destroy(core);
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc, name: &str) -> GfxResult<PipelineHandle> {
        let core = initialized(&self.core)?;
        let program = self.registry.shaders.get(desc.shader)?;
        let set_layout = desc
            .descriptor_set
            .map(|set| self.registry.descriptor_sets.get(set).map(|s| s.layout()))
            .transpose()?;

        // swapchain 重建之后 render pass 保持兼容，pipeline 不需要重建
        let target = match desc.target {
            RenderTarget::Swapchain => {
                let frames = self.frames.as_ref().ok_or_else(|| {
                    GfxError::UnsupportedUsage("pipeline targets the swapchain, but there is none".to_string())
                })?;
                PipelineTarget {
                    render_pass: frames.swapchain.render_pass(),
                    samples: vk::SampleCountFlags::TYPE_1,
                    color_attachment_count: 1,
                    has_depth: true,
                }
            }
            RenderTarget::Offscreen(handle) => {
                let pass = self.registry.render_passes.get(handle)?;
                PipelineTarget {
                    render_pass: pass.handle(),
                    samples: pass.samples(),
                    color_attachment_count: pass.desc().color_attachment_count,
                    has_depth: pass.desc().depth_stencil_format.is_some(),
                }
            }
        };

        let pipeline = GfxPipeline::new(core, desc, program, set_layout, &target, name)?;
        Ok(self.registry.pipelines.insert(pipeline))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.pipelines.remove(pipeline)?.destroy(core);
        Ok(())
    }

    fn create_command_pool(&mut self, queue: QueueKind, name: &str) -> GfxResult<CommandPoolHandle> {
        let core = initialized(&self.core)?;
        let family = match queue {
            QueueKind::Graphics => core.graphics_queue().queue_family().clone(),
            QueueKind::Compute => core.compute_queue().queue_family().clone(),
        };
        let pool = GfxCommandPool::new(&core.device, family, name)?;
        Ok(self.registry.command_pools.insert(pool))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let pool = self.registry.command_pools.remove(pool)?;
        let lists = self.registry.command_lists.extract_if(|l| l.pool() == pool.handle());
        if !lists.is_empty() {
            log::debug!("free {} command list(s) together with their pool", lists.len());
        }
        lists.into_iter().for_each(|l| l.free(&core.device));
        pool.destroy(&core.device);
        Ok(())
    }

    fn create_command_list(
        &mut self,
        pool: CommandPoolHandle,
        level: CommandListLevel,
        name: &str,
    ) -> GfxResult<CommandListHandle> {
        let core = initialized(&self.core)?;
        let pool = self.registry.command_pools.get(pool)?.handle();
        let list = GfxCommandList::allocate(&core.device, pool, level, name)?;
        Ok(self.registry.command_lists.insert(list))
    }

    fn destroy_command_list(&mut self, list: CommandListHandle) -> GfxResult<()> {
        if self.frame_slot(list).is_some() {
            return Err(GfxError::UnsupportedUsage("frame command lists are owned by the swapchain".to_string()));
        }
        let core = initialized(&self.core)?;
        self.registry.command_lists.remove(list)?.free(&core.device);
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // 命令录制

    fn begin_commands(&mut self, list: CommandListHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        if let Some(frames) = self.frames.as_ref()
            && let Some(slot) = frames.slot_of(list)
        {
            if self.frame.image_index != Some(slot as u32) {
                return Err(GfxError::FrameNotAcquired);
            }
            frames.sync.ensure_recordable(slot)?;
        }

        let cmd = self.registry.command_lists.get_mut(list)?;
        if cmd.level() == CommandListLevel::Secondary {
            return Err(GfxError::UnsupportedUsage(
                "secondary command lists are begun with a render target".to_string(),
            ));
        }
        cmd.begin(&core.device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)
    }

    fn begin_secondary_commands(&mut self, list: CommandListHandle, target: RenderTarget) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let resolved =
            resolve_target(self.frames.as_ref(), self.frame.image_index, &self.registry, target, &ClearValues::default())?;
        let inheritance = vk::CommandBufferInheritanceInfo::default()
            .render_pass(resolved.render_pass)
            .subpass(0)
            .framebuffer(resolved.framebuffer.unwrap_or(vk::Framebuffer::null()));

        let cmd = self.registry.command_lists.get_mut(list)?;
        if cmd.level() != CommandListLevel::Secondary {
            return Err(GfxError::UnsupportedUsage("begin_secondary_commands needs a secondary list".to_string()));
        }
        cmd.begin(
            &core.device,
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            Some(&inheritance),
        )
    }

    fn end_commands(&mut self, list: CommandListHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        self.registry.command_lists.get_mut(list)?.end(&core.device)
    }

    fn begin_render_pass(
        &mut self,
        list: CommandListHandle,
        target: RenderTarget,
        clear: &ClearValues,
        contents: RenderPassContents,
    ) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let resolved = resolve_target(self.frames.as_ref(), self.frame.image_index, &self.registry, target, clear)?;
        let framebuffer = resolved.framebuffer.ok_or(GfxError::FrameNotAcquired)?;

        let cmd = self.registry.command_lists.get(list)?;
        cmd.ensure_recording("begin_render_pass")?;
        if cmd.level() != CommandListLevel::Primary {
            return Err(GfxError::UnsupportedUsage("render passes are begun on primary lists".to_string()));
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(resolved.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: resolved.extent,
            })
            .clear_values(&resolved.clear_values);
        let subpass_contents = match contents {
            RenderPassContents::Inline => vk::SubpassContents::INLINE,
            RenderPassContents::SecondaryLists => vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        };
        let label = match target {
            RenderTarget::Swapchain => "swapchain-pass",
            RenderTarget::Offscreen(_) => "offscreen-pass",
        };

        core.device.begin_label(cmd.handle(), label, LabelColor::COLOR_PASS);
        unsafe { core.device.cmd_begin_render_pass(cmd.handle(), &begin_info, subpass_contents) };
        Ok(())
    }

    fn end_render_pass(&mut self, list: CommandListHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "end_render_pass")?;
        unsafe { core.device.cmd_end_render_pass(cmd) };
        core.device.end_label(cmd);
        Ok(())
    }

    fn set_viewport(&mut self, list: CommandListHandle, viewport: &Viewport) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "set_viewport")?;
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { core.device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport)) };
        Ok(())
    }

    fn set_scissor(&mut self, list: CommandListHandle, scissor: &ScissorRect) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "set_scissor")?;
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { core.device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&rect)) };
        Ok(())
    }

    fn bind_pipeline(&mut self, list: CommandListHandle, pipeline: PipelineHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "bind_pipeline")?;
        let pipeline = self.registry.pipelines.get(pipeline)?;
        unsafe { core.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle()) };
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        list: CommandListHandle,
        pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    ) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "bind_descriptor_set")?;
        let layout = self.registry.pipelines.get(pipeline)?.layout();
        let set = self.registry.descriptor_sets.get(set)?.handle();
        unsafe {
            core.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                std::slice::from_ref(&set),
                &[],
            )
        };
        Ok(())
    }

    fn bind_vertex_buffers(
        &mut self,
        list: CommandListHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
    ) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "bind_vertex_buffers")?;
        if buffers.is_empty() {
            return Err(GfxError::UnsupportedUsage("no vertex buffers to bind".to_string()));
        }
        let handles = buffers
            .iter()
            .map(|&handle| {
                let buffer = self.registry.buffers.get(handle)?;
                match buffer.desc().usage {
                    BufferUsage::Vertex => Ok(buffer.handle()),
                    other => Err(GfxError::UnsupportedUsage(format!("{other:?} buffer bound as a vertex buffer"))),
                }
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let offsets = vec![0; handles.len()];
        unsafe { core.device.cmd_bind_vertex_buffers(cmd, first_binding, &handles, &offsets) };
        Ok(())
    }

    fn bind_index_buffer(&mut self, list: CommandListHandle, buffer: BufferHandle) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "bind_index_buffer")?;
        let buffer = self.registry.buffers.get(buffer)?;
        let BufferUsage::Index(format) = buffer.desc().usage else {
            return Err(GfxError::UnsupportedUsage(format!(
                "{:?} buffer bound as an index buffer",
                buffer.desc().usage
            )));
        };
        unsafe { core.device.cmd_bind_index_buffer(cmd, buffer.handle(), 0, format.to_vk()) };
        Ok(())
    }

    fn draw(&mut self, list: CommandListHandle, vertex_count: u32, first_vertex: u32) -> GfxResult<()> {
        self.draw_instanced(list, vertex_count, 1, first_vertex, 0)
    }

    fn draw_indexed(
        &mut self,
        list: CommandListHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "draw_indexed")?;
        unsafe { core.device.cmd_draw_indexed(cmd, index_count, 1, first_index, vertex_offset, 0) };
        Ok(())
    }

    fn draw_instanced(
        &mut self,
        list: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "draw")?;
        unsafe { core.device.cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance) };
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        list: CommandListHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let cmd = recording_list(&self.registry, list, "copy_buffer")?;
        let src = self.registry.buffers.get(src)?;
        let dst = self.registry.buffers.get(dst)?;
        if size == 0 || size > src.size() || size > dst.size() {
            return Err(GfxError::UnsupportedUsage(format!(
                "cannot copy {size} bytes from a {} byte buffer into a {} byte buffer",
                src.size(),
                dst.size()
            )));
        }
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { core.device.cmd_copy_buffer(cmd, src.handle(), dst.handle(), std::slice::from_ref(&region)) };
        Ok(())
    }

    fn execute_commands(&mut self, list: CommandListHandle, secondaries: &[CommandListHandle]) -> GfxResult<()> {
        let core = initialized(&self.core)?;
        let primary = self.registry.command_lists.get(list)?;
        primary.ensure_recording("execute_commands")?;
        if primary.level() != CommandListLevel::Primary {
            return Err(GfxError::UnsupportedUsage("only primary lists can execute secondary lists".to_string()));
        }
        if secondaries.is_empty() {
            return Err(GfxError::UnsupportedUsage("no secondary lists to execute".to_string()));
        }

        let handles = secondaries
            .iter()
            .map(|&handle| {
                let secondary = self.registry.command_lists.get(handle)?;
                if secondary.level() != CommandListLevel::Secondary {
                    return Err(GfxError::UnsupportedUsage(format!(
                        "{} is not a secondary command list",
                        secondary.name()
                    )));
                }
                secondary.check_submittable()?;
                Ok(secondary.handle())
            })
            .collect::<GfxResult<Vec<_>>>()?;
        unsafe { core.device.cmd_execute_commands(primary.handle(), &handles) };

        for &handle in secondaries {
            self.registry.command_lists.get_mut(handle)?.mark_submitted();
        }
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        GfxBackend::destroy(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::format::IndexFormat;

    fn headless_backend() -> VulkanBackend {
        strata_crate_tools::init_log::init_log();
        tracy_client::Client::start();

        let mut backend = VulkanBackend::new(GfxConfig {
            validation: true,
            ..Default::default()
        });
        backend.initialize_headless().unwrap();
        backend
    }

    #[test]
    fn test_calls_before_initialize() {
        tracy_client::Client::start();
        let mut backend = VulkanBackend::new(GfxConfig::default());
        assert!(!backend.is_initialized());
        assert!(!backend.is_prepared());
        assert!(matches!(backend.acquire_next_swapchain_image(), Err(GfxError::NotInitialized)));
        assert!(matches!(backend.create_buffer(&BufferDesc::uniform(64, true), "ub"), Err(GfxError::NotInitialized)));
        assert!(matches!(backend.swapchain_command_list(), Err(GfxError::FrameNotAcquired)));
        assert!(matches!(backend.present(), Err(GfxError::FrameNotAcquired)));

        // 重复销毁不会出错
        backend.destroy();
        backend.destroy();
    }

    #[test]
    fn test_frame_state_abandon() {
        let mut frame = FrameState::default();
        assert_eq!(frame.abandon(), None);

        frame.acquired(2);
        frame.submitted = true;
        assert_eq!(frame.abandon(), Some(2));
        assert_eq!(frame.image_index, None);
        assert!(!frame.submitted);
        assert_eq!(frame.frame_count, 0);

        frame.acquired(0);
        frame.presented();
        assert_eq!(frame.image_index, None);
        assert_eq!(frame.frame_count, 1);
    }

    #[test]
    fn test_unsubmitted_frame_is_abandoned() {
        tracy_client::Client::start();
        let mut backend = VulkanBackend::new(GfxConfig::default());
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        backend.lifecycle.created(extent);
        backend.frame.acquired(1);

        // 录制失败之后直接 present：这一帧被放弃，swapchain 在下一帧重建
        assert!(matches!(backend.present(), Err(GfxError::UnsupportedUsage(_))));
        assert_eq!(backend.frame.image_index, None);
        assert!(backend.is_resized());
        assert_eq!(backend.lifecycle.take_pending(), Some(extent));

        // 没有未完成的帧时什么也不做
        backend.lifecycle.finish_resize(extent);
        backend.abandon_frame();
        assert!(!backend.is_resized());
        assert!(matches!(backend.present(), Err(GfxError::FrameNotAcquired)));
    }

    #[test]
    fn test_resize_before_initialize_sets_initial_size() {
        let mut backend = VulkanBackend::new(GfxConfig::default());
        assert_eq!((backend.width(), backend.height()), (1280, 720));

        assert_eq!(backend.resize(800, 600).unwrap(), ResizeOutcome::Scheduled);
        assert_eq!((backend.width(), backend.height()), (800, 600));
        assert!(!backend.is_resized());
    }

    #[test]
    #[ignore = "needs a vulkan capable gpu"]
    fn test_upload_and_read_back() {
        let mut backend = headless_backend();
        assert!(backend.is_headless());
        assert!(matches!(backend.acquire_next_swapchain_image(), Err(GfxError::UnsupportedUsage(_))));

        let src = backend.create_buffer(&BufferDesc::uniform(256, true), "src").unwrap();
        let dst = backend.create_buffer(&BufferDesc::vertex(256, 16, true), "dst").unwrap();

        let values: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
        backend.map_buffer(src).unwrap()[..256].copy_from_slice(bytemuck::cast_slice(&values));
        backend.unmap_buffer(src).unwrap();

        let pool = backend.create_command_pool(QueueKind::Graphics, "upload").unwrap();
        let list = backend.create_command_list(pool, CommandListLevel::Primary, "upload").unwrap();
        backend.begin_commands(list).unwrap();
        backend.copy_buffer(list, src, dst, 256).unwrap();
        backend.end_commands(list).unwrap();
        backend.submit_immediate(list).unwrap();

        let read_back: Vec<f32> = bytemuck::cast_slice(&backend.map_buffer(dst).unwrap()[..256]).to_vec();
        assert_eq!(read_back, values);
        backend.unmap_buffer(dst).unwrap();

        // 同一次录制只能提交一次
        assert!(matches!(backend.submit_immediate(list), Err(GfxError::CommandListState { .. })));

        backend.destroy_command_pool(pool).unwrap();
        assert!(matches!(backend.destroy_command_list(list), Err(GfxError::InvalidHandle(_))));
        backend.destroy_buffer(src).unwrap();
        backend.destroy_buffer(dst).unwrap();
        assert_eq!(backend.live_resource_count(), 0);
        backend.destroy();
    }

    #[test]
    #[ignore = "needs a vulkan capable gpu"]
    fn test_handle_misuse() {
        let mut backend = headless_backend();

        let buffer = backend.create_buffer(&BufferDesc::index(64, IndexFormat::U16, false), "ib").unwrap();
        assert!(matches!(backend.map_buffer(buffer), Err(GfxError::NotHostVisible(_))));
        backend.destroy_buffer(buffer).unwrap();
        assert!(matches!(backend.destroy_buffer(buffer), Err(GfxError::InvalidHandle(_))));

        let pool = backend.create_command_pool(QueueKind::Compute, "misuse").unwrap();
        let list = backend.create_command_list(pool, CommandListLevel::Primary, "misuse").unwrap();
        // 未 begin 就录制
        let other = backend.create_buffer(&BufferDesc::vertex(64, 16, true), "vb").unwrap();
        assert!(matches!(backend.copy_buffer(list, other, other, 64), Err(GfxError::CommandListState { .. })));
        assert!(matches!(backend.end_commands(list), Err(GfxError::CommandListState { .. })));

        backend.begin_commands(list).unwrap();
        assert!(matches!(backend.copy_buffer(list, other, other, 128), Err(GfxError::UnsupportedUsage(_))));
        backend.end_commands(list).unwrap();
        backend.submit_immediate(list).unwrap();

        // 泄漏的资源在 destroy 时统一回收
        backend.destroy();
        assert!(!backend.is_initialized());
    }
}
