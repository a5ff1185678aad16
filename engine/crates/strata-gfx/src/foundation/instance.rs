use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::GfxDebugMsger,
};

pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,

    /// validation layer 是否真正开启（请求了但不可用时为 false）
    validation_enabled: bool,
    /// debug utils 扩展是否开启，决定能否设置 debug name 和创建 messenger
    debug_utils_enabled: bool,
}

// new & init
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// # params
    /// - `required_exts`: 创建 surface 所必须的 extension，缺失时初始化失败
    /// - `validation`: 请求开启 validation layer；不可用时给出警告并继续
    pub fn new(
        entry: &ash::Entry,
        app_name: &str,
        required_exts: &[&'static CStr],
        validation: bool,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxInstance::new");

        let app_name = CString::new(app_name).unwrap_or_else(|_| c"strata".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_1)
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"strata")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .or_init_failed("enumerate instance extensions")?;
        let available_exts = available_exts
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect_vec();

        let (mut enabled_exts, missing) = partition_supported(required_exts, &available_exts);
        if let Some(missing) = missing.first() {
            return Err(GfxError::init(
                format!("required instance extension {missing:?} is missing"),
                vk::Result::ERROR_EXTENSION_NOT_PRESENT,
            ));
        }

        let mut optional_exts = vec![vk::KHR_PORTABILITY_ENUMERATION_NAME];
        if validation {
            optional_exts.push(vk::EXT_DEBUG_UTILS_NAME);
        }
        let (supported_optional, missing_optional) = partition_supported(&optional_exts, &available_exts);
        for ext in missing_optional.iter().filter(|ext| **ext == vk::EXT_DEBUG_UTILS_NAME) {
            log::warn!("instance extension {ext:?} is not available, debug names and messages are disabled");
        }
        enabled_exts.extend(supported_optional);
        let debug_utils_enabled = enabled_exts.contains(&vk::EXT_DEBUG_UTILS_NAME);
        let portability = enabled_exts.contains(&vk::KHR_PORTABILITY_ENUMERATION_NAME);

        let mut enabled_layers = Vec::new();
        if validation {
            let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
                .or_init_failed("enumerate instance layers")?;
            let available_layers = available_layers
                .iter()
                .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }.to_owned())
                .collect_vec();
            let (layers, missing) = partition_supported(&[VALIDATION_LAYER_NAME], &available_layers);
            if !missing.is_empty() {
                log::warn!("validation requested but {:?} is not installed, continue without it", VALIDATION_LAYER_NAME);
            }
            enabled_layers = layers;
        }
        let validation_enabled = !enabled_layers.is_empty();

        log::info!("instance extensions: {}", enabled_exts.iter().map(|e| format!("\n\t{e:?}")).join(""));
        log::info!("instance layers: {}", enabled_layers.iter().map(|l| format!("\n\t{l:?}")).join(""));

        let ext_ptrs: Vec<*const c_char> = enabled_exts.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = enabled_layers.iter().map(|l| l.as_ptr()).collect();

        let flags = if portability {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };
        let mut instance_ci = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs);

        // 为 instance info 添加 debug messenger，覆盖 instance 自身的创建与销毁
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        if debug_utils_enabled {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        let ash_instance = unsafe { entry.create_instance(&instance_ci, None) }.or_init_failed("create instance")?;

        Ok(Self {
            ash_instance,
            validation_enabled,
            debug_utils_enabled,
        })
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    #[inline]
    pub fn debug_utils_enabled(&self) -> bool {
        self.debug_utils_enabled
    }
}

// destroy
impl GfxInstance {
    pub fn destroy(self) {
        log::info!("destroying GfxInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

/// 把请求的名字分成 (可用, 缺失) 两组，保持请求的顺序
pub(crate) fn partition_supported(
    requested: &[&'static CStr],
    available: &[CString],
) -> (Vec<&'static CStr>, Vec<&'static CStr>) {
    requested.iter().copied().partition(|name| available.iter().any(|a| a.as_c_str() == *name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_supported_keeps_order() {
        let available = vec![c"VK_KHR_surface".to_owned(), c"VK_EXT_debug_utils".to_owned()];
        let requested = [vk::EXT_DEBUG_UTILS_NAME, vk::KHR_PORTABILITY_ENUMERATION_NAME, c"VK_KHR_surface"];

        let (enabled, missing) = partition_supported(&requested, &available);
        assert_eq!(enabled, vec![vk::EXT_DEBUG_UTILS_NAME, c"VK_KHR_surface"]);
        assert_eq!(missing, vec![vk::KHR_PORTABILITY_ENUMERATION_NAME]);
    }

    #[test]
    fn test_missing_validation_layer_is_detected() {
        let (layers, missing) = partition_supported(&[VALIDATION_LAYER_NAME], &[]);
        assert!(layers.is_empty());
        assert_eq!(missing, vec![VALIDATION_LAYER_NAME]);
    }
}
