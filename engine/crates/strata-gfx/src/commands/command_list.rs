use ash::vk;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListLevel {
    Primary,
    /// 只能在 render pass 内被 primary list 执行
    Secondary,
}
impl CommandListLevel {
    #[inline]
    pub fn to_vk(self) -> vk::CommandBufferLevel {
        match self {
            Self::Primary => vk::CommandBufferLevel::PRIMARY,
            Self::Secondary => vk::CommandBufferLevel::SECONDARY,
        }
    }
}

/// command list 的录制状态
///
/// ```text
/// Initial --begin--> Recording --end--> Executable --submit--> Pending
///    ^                                      |                     |
///    +------------------ begin (reset) -----+---------------------+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListState {
    Initial,
    Recording,
    Executable,
    Pending,
}

impl CommandListState {
    pub fn begin(self) -> GfxResult<Self> {
        match self {
            Self::Recording => Err(self.violation("begin", "not Recording")),
            _ => Ok(Self::Recording),
        }
    }

    pub fn end(self) -> GfxResult<Self> {
        match self {
            Self::Recording => Ok(Self::Executable),
            _ => Err(self.violation("end", "Recording")),
        }
    }

    /// 每次 end 之后只能提交一次
    pub fn submit(self) -> GfxResult<Self> {
        match self {
            Self::Executable => Ok(Self::Pending),
            _ => Err(self.violation("submit", "Executable")),
        }
    }

    /// 录制命令之前的检查
    pub fn ensure_recording(self, operation: &'static str) -> GfxResult<()> {
        match self {
            Self::Recording => Ok(()),
            _ => Err(self.violation(operation, "Recording")),
        }
    }

    fn violation(self, operation: &'static str, expected: &'static str) -> GfxError {
        GfxError::CommandListState {
            operation,
            expected,
            actual: self,
        }
    }
}

/// 不实现 Drop，需要通过 [`GfxCommandList::free`] 归还给 command pool
pub struct GfxCommandList {
    handle: vk::CommandBuffer,
    /// free 时需要 command pool
    pool: vk::CommandPool,
    level: CommandListLevel,
    state: CommandListState,

    name: String,
}

// new & init
impl GfxCommandList {
    pub fn allocate(
        device: &GfxDevice,
        pool: vk::CommandPool,
        level: CommandListLevel,
        name: &str,
    ) -> GfxResult<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(level.to_vk())
            .command_buffer_count(1);

        let handle = unsafe { device.allocate_command_buffers(&info) }
            .or_session_failed("allocate_command_buffers")?
            .into_iter()
            .next()
            .ok_or(GfxError::Vulkan {
                what: "allocate_command_buffers",
                result: vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            })?;

        let list = Self {
            handle,
            pool,
            level,
            state: CommandListState::Initial,
            name: name.to_string(),
        };
        device.set_debug_name(&list, name);
        Ok(list)
    }
}

// getters
impl GfxCommandList {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }
    #[inline]
    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }
    #[inline]
    pub fn level(&self) -> CommandListLevel {
        self.level
    }
    #[inline]
    pub fn state(&self) -> CommandListState {
        self.state
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// 录制
impl GfxCommandList {
    /// reset 对应的 command buffer，并开始录制
    ///
    /// secondary list 需要提供 inheritance 信息（所在的 render pass）
    pub fn begin(
        &mut self,
        device: &GfxDevice,
        usage: vk::CommandBufferUsageFlags,
        inheritance: Option<&vk::CommandBufferInheritanceInfo>,
    ) -> GfxResult<()> {
        let next = self.state.begin()?;

        unsafe { device.reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty()) }
            .or_session_failed("reset_command_buffer")?;

        let mut begin_info = vk::CommandBufferBeginInfo::default().flags(usage);
        if let Some(inheritance) = inheritance {
            begin_info = begin_info.inheritance_info(inheritance);
        }
        unsafe { device.begin_command_buffer(self.handle, &begin_info) }.or_session_failed("begin_command_buffer")?;

        self.state = next;
        Ok(())
    }

    pub fn end(&mut self, device: &GfxDevice) -> GfxResult<()> {
        let next = self.state.end()?;
        unsafe { device.end_command_buffer(self.handle) }.or_session_failed("end_command_buffer")?;
        self.state = next;
        Ok(())
    }

    /// 在真正提交之前检查状态，提交成功后调用 [`Self::mark_submitted`]
    #[inline]
    pub fn check_submittable(&self) -> GfxResult<()> {
        self.state.submit().map(|_| ())
    }

    #[inline]
    pub fn mark_submitted(&mut self) {
        self.state = CommandListState::Pending;
    }

    #[inline]
    pub fn ensure_recording(&self, operation: &'static str) -> GfxResult<()> {
        self.state.ensure_recording(operation)
    }
}

// destroy
impl GfxCommandList {
    /// 释放 command buffer 在 command pool 中所占用的内存
    pub fn free(self, device: &GfxDevice) {
        unsafe {
            device.free_command_buffers(self.pool, std::slice::from_ref(&self.handle));
        }
    }
}

impl DebugType for GfxCommandList {
    fn debug_type_name() -> &'static str {
        "GfxCommandList"
    }

    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_end_submit_once() {
        let state = CommandListState::Initial;
        let state = state.begin().unwrap();
        let state = state.end().unwrap();
        assert_eq!(state, CommandListState::Executable);

        let state = state.submit().unwrap();
        assert_eq!(state, CommandListState::Pending);

        // 同一次录制的结果只能提交一次
        let err = state.submit().unwrap_err();
        assert!(matches!(
            err,
            GfxError::CommandListState {
                actual: CommandListState::Pending,
                ..
            }
        ));

        // 再次 begin 之后重新进入录制
        assert_eq!(state.begin().unwrap(), CommandListState::Recording);
    }

    #[test]
    fn test_recording_misuse() {
        // 未 begin 就 end
        assert!(CommandListState::Initial.end().is_err());
        // 重复 begin
        assert!(CommandListState::Recording.begin().is_err());
        // 录制中不能提交
        assert!(CommandListState::Recording.submit().is_err());
        // 录制状态之外不能录制命令
        assert!(CommandListState::Executable.ensure_recording("cmd_draw").is_err());
        assert!(CommandListState::Recording.ensure_recording("cmd_draw").is_ok());
    }

    #[test]
    fn test_rerecord_without_submit() {
        // 录制完成但未提交时，允许直接重新录制
        let state = CommandListState::Initial.begin().unwrap().end().unwrap();
        assert_eq!(state.begin().unwrap(), CommandListState::Recording);
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(CommandListLevel::Primary.to_vk(), vk::CommandBufferLevel::PRIMARY);
        assert_eq!(CommandListLevel::Secondary.to_vk(), vk::CommandBufferLevel::SECONDARY);
    }
}
