use std::ffi::CStr;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::{
    commands::{
        command_pool::GfxCommandPool,
        command_queue::{GfxCommandQueue, QueueFamily},
    },
    error::{GfxResult, VkResultExt},
    foundation::{
        debug_messenger::GfxDebugMsger,
        device::GfxDevice,
        instance::GfxInstance,
        mem_allocator::GfxMemAllocator,
        physical_device::{GfxPhysicalDevice, choose_sample_count},
    },
    swapchain::surface::GfxSurface,
};

/// Vulkan 核心对象
///
/// 创建顺序：entry -> instance -> debug messenger -> surface -> physical device -> device -> allocator -> queue
/// -> command pool，销毁顺序与之相反。resize 不会触碰这里的任何对象。
pub struct GfxCore {
    pub(crate) vk_entry: ash::Entry,
    pub(crate) instance: GfxInstance,
    debug_msger: Option<GfxDebugMsger>,
    /// 没有窗口时为 None；graphics family 需要能在它上面 present
    pub(crate) surface: Option<GfxSurface>,

    pub(crate) physical_device: GfxPhysicalDevice,
    pub(crate) device: GfxDevice,
    pub(crate) allocator: GfxMemAllocator,

    pub(crate) graphics_queue: GfxCommandQueue,
    pub(crate) compute_queue: Option<GfxCommandQueue>,

    /// 帧命令列表、立即提交都从这里分配
    pub(crate) graphics_pool: GfxCommandPool,
    pub(crate) compute_pool: Option<GfxCommandPool>,

    /// 经过 gpu 能力修正后的 MSAA 采样数
    sample_count: (vk::SampleCountFlags, u32),
}

/// device 之下的对象，创建失败时需要单独回收
struct DeviceChildren {
    allocator: GfxMemAllocator,
    graphics_queue: GfxCommandQueue,
    compute_queue: Option<GfxCommandQueue>,
    graphics_pool: GfxCommandPool,
    compute_pool: Option<GfxCommandPool>,
}

// new & init
impl GfxCore {
    /// # params
    /// - `window`: 用于创建 surface 以及查询 surface 所需的 instance extension；`None` 表示 headless
    /// - `multisampling`: 请求的采样数，gpu 不支持时向下取整
    pub fn new(
        app_name: &str,
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
        validation: bool,
        multisampling: u32,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxCore::new");

        let vk_entry = unsafe { ash::Entry::load() }?;

        let required_exts: Vec<&'static CStr> = match window {
            Some((display, _)) => ash_window::enumerate_required_extensions(display)
                .or_init_failed("query surface instance extensions")?
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(*ext) })
                .collect(),
            None => Vec::new(),
        };

        let instance = GfxInstance::new(&vk_entry, app_name, &required_exts, validation)?;

        let debug_msger = if instance.debug_utils_enabled() {
            match GfxDebugMsger::new(&vk_entry, &instance.ash_instance) {
                Ok(msger) => Some(msger),
                Err(e) => {
                    instance.destroy();
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface = window
            .map(|(display, window)| GfxSurface::new(&vk_entry, &instance.ash_instance, display, window))
            .transpose();
        let surface = match surface {
            Ok(surface) => surface,
            Err(e) => {
                if let Some(msger) = debug_msger {
                    msger.destroy();
                }
                instance.destroy();
                return Err(e);
            }
        };

        let supports_present = |pdevice: vk::PhysicalDevice, family: u32| {
            surface.as_ref().is_none_or(|surface| surface.supports_present(pdevice, family))
        };
        let physical_device = GfxPhysicalDevice::pick(&instance.ash_instance, supports_present);
        let device_objects = physical_device.and_then(|physical_device| {
            let device = GfxDevice::new(&instance, &physical_device)?;
            match Self::create_device_children(&instance, &physical_device, &device) {
                Ok(children) => Ok((physical_device, device, children)),
                Err(e) => {
                    device.destroy();
                    Err(e)
                }
            }
        });
        let (physical_device, device, children) = match device_objects {
            Ok(objects) => objects,
            Err(e) => {
                if let Some(surface) = surface {
                    surface.destroy();
                }
                if let Some(msger) = debug_msger {
                    msger.destroy();
                }
                instance.destroy();
                return Err(e.into_init());
            }
        };
        if let Some(surface) = &surface {
            device.set_debug_name(surface, "main");
        }

        let sample_count = choose_sample_count(multisampling, physical_device.framebuffer_sample_counts());
        if sample_count.1 != multisampling.max(1) {
            log::warn!("multisampling {}x is not supported, use {}x instead", multisampling, sample_count.1);
        }

        let DeviceChildren {
            allocator,
            graphics_queue,
            compute_queue,
            graphics_pool,
            compute_pool,
        } = children;

        Ok(Self {
            vk_entry,
            instance,
            debug_msger,
            surface,
            physical_device,
            device,
            allocator,
            graphics_queue,
            compute_queue,
            graphics_pool,
            compute_pool,
            sample_count,
        })
    }

    fn create_device_children(
        instance: &GfxInstance,
        physical_device: &GfxPhysicalDevice,
        device: &GfxDevice,
    ) -> GfxResult<DeviceChildren> {
        let allocator = GfxMemAllocator::new(&instance.ash_instance, physical_device.handle, &device.device)?;

        let queue_family = |name: &str, index: u32| {
            let props = &physical_device.queue_family_properties[index as usize];
            QueueFamily {
                name: name.to_string(),
                queue_family_index: index,
                queue_flags: props.queue_flags,
                queue_count: props.queue_count,
            }
        };
        let graphics_family = queue_family("graphics", physical_device.queue_families.graphics);
        let compute_family = physical_device.queue_families.compute.map(|index| queue_family("compute", index));

        let graphics_pool = match GfxCommandPool::new(device, graphics_family.clone(), "graphics") {
            Ok(pool) => pool,
            Err(e) => {
                allocator.destroy();
                return Err(e);
            }
        };
        let compute_pool = match compute_family.clone().map(|family| GfxCommandPool::new(device, family, "compute")) {
            Some(Err(e)) => {
                graphics_pool.destroy(device);
                allocator.destroy();
                return Err(e);
            }
            Some(Ok(pool)) => Some(pool),
            None => None,
        };

        Ok(DeviceChildren {
            allocator,
            graphics_queue: GfxCommandQueue::new(device, graphics_family),
            compute_queue: compute_family.map(|family| GfxCommandQueue::new(device, family)),
            graphics_pool,
            compute_pool,
        })
    }
}

// getters
impl GfxCore {
    #[inline]
    pub fn entry(&self) -> &ash::Entry {
        &self.vk_entry
    }
    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.instance
    }
    #[inline]
    pub fn surface(&self) -> Option<&GfxSurface> {
        self.surface.as_ref()
    }
    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.physical_device
    }
    #[inline]
    pub fn device(&self) -> &GfxDevice {
        &self.device
    }
    #[inline]
    pub fn allocator(&self) -> &GfxMemAllocator {
        &self.allocator
    }
    #[inline]
    pub fn graphics_queue(&self) -> &GfxCommandQueue {
        &self.graphics_queue
    }
    /// 没有独立的 compute family 时退化为 graphics queue
    #[inline]
    pub fn compute_queue(&self) -> &GfxCommandQueue {
        self.compute_queue.as_ref().unwrap_or(&self.graphics_queue)
    }
    /// queue family 对应的 queue，未知的 family 视为 graphics
    pub fn queue_for_family(&self, queue_family_index: u32) -> &GfxCommandQueue {
        match &self.compute_queue {
            Some(queue) if queue.queue_family().queue_family_index == queue_family_index => queue,
            _ => &self.graphics_queue,
        }
    }
    #[inline]
    pub fn graphics_pool(&self) -> &GfxCommandPool {
        &self.graphics_pool
    }
    #[inline]
    pub fn compute_pool(&self) -> &GfxCommandPool {
        self.compute_pool.as_ref().unwrap_or(&self.graphics_pool)
    }
    #[inline]
    pub fn sample_count(&self) -> (vk::SampleCountFlags, u32) {
        self.sample_count
    }
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.physical_device.depth_format
    }
}

// tools
impl GfxCore {
    /// 从候选中找到第一个在给定 tiling 下具备 `features` 的格式
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|format| {
            let props = self.format_properties(*format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                _ => props.optimal_tiling_features.contains(features),
            }
        })
    }

    #[inline]
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance.ash_instance.get_physical_device_format_properties(self.physical_device.handle, format)
        }
    }
}

// destroy
impl GfxCore {
    /// 调用前需要保证 device idle，并且所有从 device 创建的对象（包括 swapchain）都已销毁
    pub fn destroy(self) {
        log::info!("destroying GfxCore");

        if let Some(pool) = self.compute_pool {
            pool.destroy(&self.device);
        }
        self.graphics_pool.destroy(&self.device);

        self.allocator.destroy();
        self.device.destroy();
        // device 析构时会检查 destroy 是否被调用
        drop(self.device);

        if let Some(surface) = self.surface {
            surface.destroy();
        }
        if let Some(msger) = self.debug_msger {
            msger.destroy();
        }
        self.instance.destroy();
    }
}
