use ash::vk;

use crate::{
    commands::command_queue::QueueFamily,
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    queue_family: QueueFamily,

    debug_name: String,
}

// 创建与销毁
impl GfxCommandPool {
    /// 创建时带上 RESET_COMMAND_BUFFER，使单个 command buffer 可以被单独 reset
    pub fn new(device: &GfxDevice, queue_family: QueueFamily, debug_name: &str) -> GfxResult<Self> {
        let pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family.queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
        }
        .or_session_failed("create_command_pool")?;

        let command_pool = Self {
            handle: pool,
            queue_family,
            debug_name: debug_name.to_string(),
        };
        device.set_debug_name(&command_pool, debug_name);
        Ok(command_pool)
    }

    pub fn destroy(self, device: &GfxDevice) {
        log::debug!("destroying command pool {}", self.debug_name);
        unsafe {
            device.destroy_command_pool(self.handle, None);
        }
    }
}

// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}
