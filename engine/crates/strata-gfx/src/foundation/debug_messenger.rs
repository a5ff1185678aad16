use std::ffi::CStr;
use std::sync::RwLock;

use ash::vk;
use bitflags::bitflags;

use crate::error::{GfxResult, VkResultExt};

bitflags! {
    /// 诊断消息的严重程度，可以组合（例如 PERFORMANCE | WARNING）
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DiagnosticSeverity: u32 {
        const ERROR = 1 << 0;
        const WARNING = 1 << 1;
        const PERFORMANCE = 1 << 2;
        const INFO = 1 << 3;
        const DEBUG = 1 << 4;
    }
}

pub type DiagnosticCallback = Box<dyn Fn(DiagnosticSeverity, &str) + Send + Sync>;

/// 进程内唯一的诊断回调；为 None 时输出到 log
static DIAGNOSTIC_CALLBACK: RwLock<Option<DiagnosticCallback>> = RwLock::new(None);

/// 替换进程级的诊断回调，传入 None 恢复为输出到 log
pub fn set_diagnostic_callback(callback: Option<DiagnosticCallback>) {
    let mut slot = DIAGNOSTIC_CALLBACK.write().unwrap_or_else(|e| e.into_inner());
    *slot = callback;
}

/// 把一条诊断消息交给当前的回调
pub fn report_diagnostic(severity: DiagnosticSeverity, message: &str) {
    let slot = DIAGNOSTIC_CALLBACK.read().unwrap_or_else(|e| e.into_inner());
    match slot.as_ref() {
        Some(callback) => callback(severity, message),
        None => log_diagnostic(severity, message),
    }
}

fn log_diagnostic(severity: DiagnosticSeverity, message: &str) {
    let prefix = diagnostic_prefix(severity);
    if severity.contains(DiagnosticSeverity::ERROR) {
        log::error!("{prefix}: {message}");
    } else if severity.intersects(DiagnosticSeverity::WARNING | DiagnosticSeverity::PERFORMANCE) {
        log::warn!("{prefix}: {message}");
    } else if severity.contains(DiagnosticSeverity::INFO) {
        log::info!("{prefix}: {message}");
    } else {
        log::debug!("{prefix}: {message}");
    }
}

/// 按照严重程度从高到低选择消息前缀
pub fn diagnostic_prefix(severity: DiagnosticSeverity) -> &'static str {
    if severity.contains(DiagnosticSeverity::ERROR) {
        "ERROR"
    } else if severity.contains(DiagnosticSeverity::PERFORMANCE) {
        "PERFORMANCE"
    } else if severity.contains(DiagnosticSeverity::WARNING) {
        "WARNING"
    } else if severity.contains(DiagnosticSeverity::INFO) {
        "INFO"
    } else {
        "DEBUG"
    }
}

/// vulkan 的 severity 和 message type 合并为一个 [`DiagnosticSeverity`]
pub fn severity_from_vk(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
) -> DiagnosticSeverity {
    let mut result = DiagnosticSeverity::empty();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        result |= DiagnosticSeverity::ERROR;
    }
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        result |= DiagnosticSeverity::WARNING;
    }
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        result |= DiagnosticSeverity::INFO;
    }
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE) {
        result |= DiagnosticSeverity::DEBUG;
    }
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        result |= DiagnosticSeverity::PERFORMANCE;
    }
    result
}

pub struct GfxDebugMsger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

// new & init
impl GfxDebugMsger {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .or_init_failed("create debug utils messenger")?;

        Ok(Self { loader, messenger })
    }

    /// 用于创建 debug messenger 的结构体，也会挂在 instance 创建信息上，覆盖 instance 创建与销毁期间的消息
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

// destroy
impl GfxDebugMsger {
    pub fn destroy(self) {
        log::info!("destroying GfxDebugMsger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// debug messenger 的回调函数
/// # Safety
/// 由 validation layer 调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let msg = if p_callback_data.is_null() || unsafe { (*p_callback_data).p_message.is_null() } {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr((*p_callback_data).p_message).to_string_lossy() }
    };

    let formatted = format_validation_message(msg.as_ref());
    report_diagnostic(severity_from_vk(message_severity, message_type), &format!("[{message_type:?}] {formatted}"));

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// 有些 layer 输出 json，其中 MainMessage 字段带有换行符，需要单独输出
fn format_validation_message(msg: &str) -> String {
    let Ok(serde_json::Value::Object(mut obj)) = serde_json::from_str::<serde_json::Value>(msg) else {
        return msg.to_string();
    };
    let main_msg = obj.remove("MainMessage");
    let main_msg = main_msg.as_ref().and_then(|v| v.as_str()).unwrap_or_default();
    let rest = serde_json::to_string_pretty(&obj).unwrap_or_default();
    format!("{main_msg}\n{rest}")
}

/// 可以设置 debug name 的 vulkan 对象
pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle + Copy;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::sync::Mutex;

    #[test]
    fn test_severity_from_vk() {
        let s = severity_from_vk(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        );
        assert_eq!(s, DiagnosticSeverity::WARNING | DiagnosticSeverity::PERFORMANCE);
        assert_eq!(diagnostic_prefix(s), "PERFORMANCE");

        let s = severity_from_vk(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        );
        assert_eq!(s, DiagnosticSeverity::ERROR);
        assert_eq!(diagnostic_prefix(s), "ERROR");

        let s = severity_from_vk(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
        );
        assert_eq!(diagnostic_prefix(s), "DEBUG");
    }

    struct NamedSemaphore(vk::Semaphore);
    impl DebugType for NamedSemaphore {
        fn debug_type_name() -> &'static str {
            "NamedSemaphore"
        }
        fn vk_handle(&self) -> impl vk::Handle + Copy {
            self.0
        }
    }

    // 与 GfxDevice::set_object_debug_name 的约束一致
    fn raw_twice<T: vk::Handle + Copy>(handle: T) -> (u64, u64) {
        (handle.as_raw(), handle.as_raw())
    }

    #[test]
    fn test_debug_handle_is_copy() {
        let named = NamedSemaphore(vk::Semaphore::from_raw(42));
        assert_eq!(raw_twice(named.vk_handle()), (42, 42));
        assert_eq!(NamedSemaphore::debug_type_name(), "NamedSemaphore");
    }

    #[test]
    fn test_json_message_is_split() {
        let formatted = format_validation_message(r#"{"MainMessage": "line1\nline2", "MessageID": 7}"#);
        assert!(formatted.starts_with("line1\nline2"));
        assert!(formatted.contains("MessageID"));

        assert_eq!(format_validation_message("plain text"), "plain text");
    }

    #[test]
    fn test_custom_callback_receives_messages() {
        // 回调是进程级的，只在这一个测试中替换
        static RECEIVED: Mutex<Vec<(DiagnosticSeverity, String)>> = Mutex::new(Vec::new());

        set_diagnostic_callback(Some(Box::new(|severity, msg| {
            RECEIVED.lock().unwrap().push((severity, msg.to_string()));
        })));
        report_diagnostic(DiagnosticSeverity::WARNING, "hello");
        set_diagnostic_callback(None);
        report_diagnostic(DiagnosticSeverity::INFO, "goes to log");

        let received = RECEIVED.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (DiagnosticSeverity::WARNING, "hello".to_string()));
    }
}
