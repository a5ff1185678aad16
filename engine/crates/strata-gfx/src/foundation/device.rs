use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::ops::Deref;

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, instance::GfxInstance, physical_device::GfxPhysicalDevice},
};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及 swapchain、debug utils 扩展的函数指针。
/// 只在 context 销毁时销毁，resize 不会影响 device。
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 交换链扩展 API
    pub(crate) swapchain: ash::khr::swapchain::Device,
    /// 调试工具扩展 API，只有在 instance 开启了 debug utils 时才存在
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,

    debug_marker_enabled: bool,

    #[cfg(debug_assertions)]
    destroyed: Cell<bool>,
}

// 构造与销毁
impl GfxDevice {
    pub fn new(instance: &GfxInstance, pdevice: &GfxPhysicalDevice) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxDevice::new");

        // 只创建选出的 queue family，compute family 与 graphics 相同时不重复创建
        let priorities = [1.0_f32];
        let queue_create_infos = std::iter::once(pdevice.queue_families.graphics)
            .chain(pdevice.queue_families.compute)
            .map(|family| vk::DeviceQueueCreateInfo::default().queue_family_index(family).queue_priorities(&priorities))
            .collect_vec();

        let device_exts = Self::device_exts(pdevice, instance.validation_enabled())?;
        log::info!("device exts: {}", device_exts.iter().map(|e| format!("\n\t{e:?}")).join(""));
        let debug_marker_enabled = device_exts.contains(&ash::ext::debug_marker::NAME);
        let device_ext_ptrs = device_exts.iter().map(|e| e.as_ptr()).collect_vec();

        let features = Self::enabled_features(&pdevice.features);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_ext_ptrs)
            .enabled_features(&features);

        let device = unsafe { instance.ash_instance.create_device(pdevice.handle, &device_create_info, None) }
            .or_init_failed("create device")?;

        let swapchain = ash::khr::swapchain::Device::new(&instance.ash_instance, &device);
        let debug_utils = instance
            .debug_utils_enabled()
            .then(|| ash::ext::debug_utils::Device::new(&instance.ash_instance, &device));

        Ok(Self {
            device,
            swapchain,
            debug_utils,
            debug_marker_enabled,

            #[cfg(debug_assertions)]
            destroyed: Cell::new(false),
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");

        #[cfg(debug_assertions)]
        self.destroyed.set(true);

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// 创建过程的辅助函数
impl GfxDevice {
    /// 必要的 physical device core features，只开启 gpu 实际支持的部分
    fn enabled_features(supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .geometry_shader(supported.geometry_shader == vk::TRUE)
            .tessellation_shader(supported.tessellation_shader == vk::TRUE)
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
    }

    /// device extensions
    ///
    /// - swapchain：必须
    /// - debug marker：只有在开启 validation 且 gpu 支持时开启
    /// - portability subset：gpu 支持时必须开启
    fn device_exts(pdevice: &GfxPhysicalDevice, validation: bool) -> GfxResult<Vec<&'static CStr>> {
        if !pdevice.supports_extension(ash::khr::swapchain::NAME) {
            return Err(GfxError::init("gpu does not support VK_KHR_swapchain", vk::Result::ERROR_EXTENSION_NOT_PRESENT));
        }
        let mut exts = vec![ash::khr::swapchain::NAME];

        if validation && pdevice.supports_extension(ash::ext::debug_marker::NAME) {
            exts.push(ash::ext::debug_marker::NAME);
        }
        if pdevice.supports_extension(ash::khr::portability_subset::NAME) {
            exts.push(ash::khr::portability_subset::NAME);
        }
        Ok(exts)
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }
    #[inline]
    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }
    #[inline]
    pub fn debug_marker_enabled(&self) -> bool {
        self.debug_marker_enabled
    }
}

// tools
impl GfxDevice {
    /// 没有开启 debug utils 时什么也不做
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name.as_ref()) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        self.set_object_debug_name(handle.vk_handle(), format!("{}::{}", T::debug_type_name(), name.as_ref()));
    }

    pub fn begin_label(&self, command_buffer: vk::CommandBuffer, label: &str, color: glam::Vec4) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(label) else {
            return;
        };
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                command_buffer,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(color.into()),
            );
        }
    }

    pub fn end_label(&self, command_buffer: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(command_buffer) };
        }
    }

    /// 只允许在 resize 和销毁时使用
    #[inline]
    pub fn wait_idle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxDevice::wait_idle");
        unsafe { self.device.device_wait_idle() }.or_session_failed("device_wait_idle")
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
impl Drop for GfxDevice {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed.get(), "GfxDevice must be destroyed before being dropped.");
    }
}
impl DebugType for GfxDevice {
    fn debug_type_name() -> &'static str {
        "GfxDevice"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.device.handle()
    }
}
