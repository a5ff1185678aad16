use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GfxResult;

/// 图形系统的配置
///
/// 缺省字段使用 [`Default`] 中的值，因此配置文件只需要写出需要修改的项：
/// ```toml
/// graphics = "vulkan"
/// width = 1280
/// height = 720
/// vsync = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    /// 后端名称：vulkan / d3d12 / metal，大小写不敏感
    pub graphics: String,
    /// 初始的交换链尺寸
    pub width: u32,
    pub height: u32,
    /// 全屏：影响窗口样式和 surface transform 的选择
    pub fullscreen: bool,
    /// 打开时使用阻塞式的 present mode
    pub vsync: bool,
    /// 期望的 MSAA 采样数，不支持时向下取最近的可用值
    pub multisampling: u32,
    /// 开启 validation layer 和诊断回调
    pub validation: bool,
    /// 期望的 backbuffer 数量，最终会被 surface 能力约束
    pub backbuffer_count: u32,
    /// acquire next image 的超时时间（毫秒），None 表示无限等待
    pub acquire_timeout_ms: Option<u64>,
    /// 传给 instance 的应用名称
    pub app_name: String,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            graphics: "vulkan".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            vsync: true,
            multisampling: 1,
            validation: cfg!(debug_assertions),
            backbuffer_count: 3,
            acquire_timeout_ms: None,
            app_name: "strata".to_string(),
        }
    }
}

// new & init
impl GfxConfig {
    pub fn from_toml_str(text: &str) -> GfxResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> GfxResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::info!("load gfx config from {}:\n{:#?}", path.as_ref().display(), config);
        Ok(config)
    }

    /// 文件不存在时使用默认配置，文件存在但格式错误时返回错误
    pub fn load_or_default(path: impl AsRef<Path>) -> GfxResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            log::info!("gfx config {} not found, use default", path.as_ref().display());
            Ok(Self::default())
        }
    }
}

// getters
impl GfxConfig {
    /// acquire 使用的超时时间（纳秒）
    #[inline]
    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms.map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = GfxConfig::from_toml_str(
            r#"
            graphics = "D3D12"
            width = 1920
            vsync = false
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics, "D3D12");
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 720);
        assert!(!config.vsync);
        assert_eq!(config.backbuffer_count, 3);
        assert_eq!(config.acquire_timeout_ms, None);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = GfxConfig::from_toml_str("width = \"wide\"").unwrap_err();
        assert!(matches!(err, crate::error::GfxError::Config(_)));
    }

    #[test]
    fn test_acquire_timeout() {
        let mut config = GfxConfig::default();
        assert_eq!(config.acquire_timeout_ns(), u64::MAX);

        config.acquire_timeout_ms = Some(16);
        assert_eq!(config.acquire_timeout_ns(), 16_000_000);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = GfxConfig::load_or_default("/definitely/not/here/strata.toml").unwrap();
        assert_eq!(config, GfxConfig::default());
    }
}
