use ash::vk;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// binary semaphore
///
/// # Destroy
/// 不实现 Drop，需要手动 destroy
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
}

// 创建与销毁
impl GfxSemaphore {
    pub fn new(device: &GfxDevice, debug_name: &str) -> GfxResult<Self> {
        let semaphore = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .or_session_failed("create_semaphore")?;

        let semaphore = Self { semaphore };
        device.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    #[inline]
    pub fn destroy(self, device: &GfxDevice) {
        unsafe {
            device.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.semaphore
    }
}
