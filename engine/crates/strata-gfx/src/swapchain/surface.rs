use ash::vk;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
};

/// surface 在 device 的整个生命周期内都存在，resize 只会重建 swapchain
pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

/// 某个 gpu 对 surface 的支持情况，每次创建 swapchain 前重新查询
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

// new & init
impl GfxSurface {
    /// 只依赖 instance，需要在选择 queue family 之前创建
    pub fn new(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
    ) -> GfxResult<Self> {
        let surface_pf = ash::khr::surface::Instance::new(vk_entry, instance);

        let handle =
            unsafe { ash_window::create_surface(vk_entry, instance, raw_display_handle, raw_window_handle, None) }
                .or_init_failed("create surface")?;

        Ok(GfxSurface { handle, pf: surface_pf })
    }
}

// getters
impl GfxSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// 实时获取 surface capabilities，窗口尺寸变化后结果也会变化
    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle) }
            .or_session_failed("get_physical_device_surface_capabilities")
    }

    pub fn query_support(&self, pdevice: vk::PhysicalDevice) -> GfxResult<SurfaceSupport> {
        let capabilities = self.capabilities(pdevice)?;
        let formats = unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle) }
            .or_session_failed("get_physical_device_surface_formats")?;
        let present_modes = unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle) }
            .or_session_failed("get_physical_device_surface_present_modes")?;

        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub fn supports_present(&self, pdevice: vk::PhysicalDevice, queue_family_index: u32) -> bool {
        unsafe { self.pf.get_physical_device_surface_support(pdevice, queue_family_index, self.handle) }
            .unwrap_or(false)
    }
}

// destroy
impl GfxSurface {
    /// 需要在 swapchain 之后、instance 之前销毁
    pub fn destroy(self) {
        log::info!("destroying GfxSurface");
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

impl DebugType for GfxSurface {
    fn debug_type_name() -> &'static str {
        "GfxSurface"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}
