use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{fence::GfxFence, submit_info::GfxSubmitInfo},
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// # destroy
///
/// queue 随 device 一起销毁
pub struct GfxCommandQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: QueueFamily,
}
impl DebugType for GfxCommandQueue {
    fn debug_type_name() -> &'static str {
        "GfxQueue"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.vk_queue
    }
}

// new & init
impl GfxCommandQueue {
    pub fn new(device: &GfxDevice, queue_family: QueueFamily) -> Self {
        let vk_queue = unsafe { device.get_device_queue(queue_family.queue_family_index, 0) };
        let queue = Self { vk_queue, queue_family };
        device.set_debug_name(&queue, &queue.queue_family.name);
        queue
    }
}

// getter
impl GfxCommandQueue {
    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.vk_queue
    }
}

// tools
impl GfxCommandQueue {
    pub fn submit(&self, device: &GfxDevice, batches: &[GfxSubmitInfo], fence: Option<&GfxFence>) -> GfxResult<()> {
        // batches 需要存活到 queue_submit 之后，submit_infos 引用了它们内部的数组
        let submit_infos = batches.iter().map(|b| b.submit_info()).collect_vec();
        unsafe { device.queue_submit(self.vk_queue, &submit_infos, fence.map_or(vk::Fence::null(), |f| f.handle())) }
            .or_session_failed("queue_submit")
    }

    /// vkQueueWaitIdle 与等待一个 fence 的开销相同
    #[inline]
    pub fn wait_idle(&self, device: &GfxDevice) -> GfxResult<()> {
        unsafe { device.queue_wait_idle(self.vk_queue) }.or_session_failed("queue_wait_idle")
    }
}
