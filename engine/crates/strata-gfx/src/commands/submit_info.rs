use ash::vk;

use crate::commands::semaphore::GfxSemaphore;

/// 对 vk::SubmitInfo 的封装，持有其引用的数组，更易用
#[derive(Default)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBuffer>,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,
}

impl GfxSubmitInfo {
    pub fn new(command_buffers: &[vk::CommandBuffer]) -> Self {
        Self {
            command_buffers: command_buffers.to_vec(),
            ..Default::default()
        }
    }

    /// 返回的结构体引用 self 内部的数组
    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo<'_> {
        vk::SubmitInfo::default()
            .command_buffers(&self.command_buffers)
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .signal_semaphores(&self.signal_semaphores)
    }

    /// 在 stage 之前等待 semaphore
    #[inline]
    pub fn wait(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait_semaphores.push(semaphore.handle());
        self.wait_stages.push(stage);
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: &GfxSemaphore) -> Self {
        self.signal_semaphores.push(semaphore.handle());
        self
    }

    #[inline]
    pub fn wait_count(&self) -> usize {
        self.wait_semaphores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_submit_info_arrays_match() {
        let cmd = vk::CommandBuffer::from_raw(0x10);
        let info = GfxSubmitInfo::new(&[cmd]);
        let raw = info.submit_info();
        assert_eq!(raw.command_buffer_count, 1);
        assert_eq!(raw.wait_semaphore_count, 0);
        assert_eq!(raw.signal_semaphore_count, 0);
        assert_eq!(info.wait_count(), 0);
    }
}
