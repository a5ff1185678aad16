use ash::vk;

use crate::commands::{command_list::CommandListState, frame_sync::SlotFenceState};

pub type GfxResult<T> = Result<T, GfxError>;

/// GFX 层的错误分类
///
/// - 初始化阶段的致命错误：`InitializationFailed`、`Loader`
/// - 运行中的致命错误：`DeviceLost`、`Vulkan`
/// - 调用者违反约定：`NotHostVisible`、`InvalidHandle`、`CommandListState`、`FenceGate`、
///   `FrameNotAcquired`、`NotInitialized`
/// - 不支持的用法或配置：`UnsupportedUsage`、`UnsupportedConfiguration`
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("graphics initialization failed: {what}: {result}")]
    InitializationFailed { what: String, result: vk::Result },

    #[error("failed to load the vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("device lost during {what}")]
    DeviceLost { what: &'static str },

    #[error("vulkan call {what} failed: {result}")]
    Vulkan { what: &'static str, result: vk::Result },

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("unsupported usage: {0}")]
    UnsupportedUsage(String),

    #[error("{0} is not host visible and cannot be mapped")]
    NotHostVisible(&'static str),

    #[error("stale or unknown {0} handle")]
    InvalidHandle(&'static str),

    #[error("command list is {actual:?}, but {operation} requires {expected}")]
    CommandListState {
        operation: &'static str,
        expected: &'static str,
        actual: CommandListState,
    },

    #[error("frame slot {slot} fence is {state:?}, cannot {operation}")]
    FenceGate {
        slot: usize,
        state: SlotFenceState,
        operation: &'static str,
    },

    #[error("no swapchain image has been acquired for the current frame")]
    FrameNotAcquired,

    #[error("graphics backend is not initialized")]
    NotInitialized,

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GfxError {
    /// 初始化阶段的错误，附带失败对象的描述
    pub fn init(what: impl Into<String>, result: vk::Result) -> Self {
        Self::InitializationFailed {
            what: what.into(),
            result,
        }
    }

    /// 运行阶段的 native 调用失败；DEVICE_LOST 单独归类
    pub fn session(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { what },
            _ => Self::Vulkan { what, result },
        }
    }

    /// initialize 过程中发生的 native 调用失败统一归为初始化失败
    pub fn into_init(self) -> Self {
        match self {
            Self::Vulkan { what, result } => Self::init(what, result),
            Self::DeviceLost { what } => Self::init(what, vk::Result::ERROR_DEVICE_LOST),
            other => other,
        }
    }

    /// 是否为不可恢复的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailed { .. }
                | Self::Loader(_)
                | Self::DeviceLost { .. }
                | Self::Vulkan { .. }
                | Self::UnsupportedConfiguration(_)
        )
    }
}

/// 在调用点立即把 `VkResult` 转换为 [`GfxError`]
pub trait VkResultExt<T> {
    /// 初始化阶段使用
    fn or_init_failed(self, what: impl Into<String>) -> GfxResult<T>;
    /// 运行阶段使用
    fn or_session_failed(self, what: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[inline]
    fn or_init_failed(self, what: impl Into<String>) -> GfxResult<T> {
        self.map_err(|result| GfxError::init(what, result))
    }

    #[inline]
    fn or_session_failed(self, what: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::session(what, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_distinct() {
        let err = GfxError::session("queue_submit", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, GfxError::DeviceLost { what: "queue_submit" }));
        assert!(err.is_fatal());

        let err = GfxError::session("queue_submit", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(err, GfxError::Vulkan { .. }));
    }

    #[test]
    fn test_contract_violations_are_not_fatal() {
        assert!(!GfxError::NotHostVisible("buffer").is_fatal());
        assert!(!GfxError::InvalidHandle("texture").is_fatal());
        assert!(!GfxError::FrameNotAcquired.is_fatal());
    }

    #[test]
    fn test_vk_result_ext() {
        let ok: ash::prelude::VkResult<u32> = Ok(3);
        assert_eq!(ok.or_init_failed("device").ok(), Some(3));

        let failed: ash::prelude::VkResult<u32> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        let err = failed.or_init_failed("create device").unwrap_err();
        assert!(err.to_string().contains("create device"));
    }
}
