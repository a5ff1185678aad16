use std::ops::{Deref, DerefMut};

use crate::{backend::GfxBackend, config::GfxConfig, vulkan::backend::VulkanBackend};

/// 可选的图形 API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    Vulkan,
    D3D12,
    Metal,
}

impl GraphicsApi {
    /// 大小写不敏感，识别常见的别名
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Some(Self::Vulkan),
            "d3d12" | "dx12" | "direct3d12" => Some(Self::D3D12),
            "metal" | "mtl" => Some(Self::Metal),
            _ => None,
        }
    }

    /// 当前构建在所有平台上都以 Vulkan 为默认后端
    #[inline]
    pub fn platform_default() -> Self {
        Self::Vulkan
    }

    /// 当前构建中是否包含这个后端
    #[inline]
    pub fn is_available(self) -> bool {
        matches!(self, Self::Vulkan)
    }

    /// 配置中的名称无法识别，或者对应的后端不可用时，回退到平台默认值
    pub fn select(name: &str) -> Self {
        match Self::parse(name) {
            Some(api) if api.is_available() => api,
            Some(api) => {
                let fallback = Self::platform_default();
                log::warn!("graphics api {api:?} is not available in this build, fall back to {fallback:?}");
                fallback
            }
            None => {
                let fallback = Self::platform_default();
                log::warn!("unknown graphics api {name:?}, fall back to {fallback:?}");
                fallback
            }
        }
    }
}

/// 显式持有的图形上下文
///
/// 根据配置选择唯一的后端，其余调用通过 `Deref` 转发到 [`GfxBackend`]
pub struct Graphics {
    api: GraphicsApi,
    backend: Box<dyn GfxBackend>,
}

// new & init
impl Graphics {
    pub fn new(config: GfxConfig) -> Self {
        let api = GraphicsApi::select(&config.graphics);
        log::info!("graphics api: {api:?}");

        let backend: Box<dyn GfxBackend> = match api {
            GraphicsApi::Vulkan => Box::new(VulkanBackend::new(config)),
            // 不可用的后端在 select 中已经回退
            GraphicsApi::D3D12 | GraphicsApi::Metal => Box::new(VulkanBackend::new(config)),
        };
        Self { api, backend }
    }
}

// getters
impl Graphics {
    #[inline]
    pub fn api(&self) -> GraphicsApi {
        self.api
    }
}

impl Deref for Graphics {
    type Target = dyn GfxBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}
impl DerefMut for Graphics {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.backend.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(GraphicsApi::parse("Vulkan"), Some(GraphicsApi::Vulkan));
        assert_eq!(GraphicsApi::parse(" VK "), Some(GraphicsApi::Vulkan));
        assert_eq!(GraphicsApi::parse("DX12"), Some(GraphicsApi::D3D12));
        assert_eq!(GraphicsApi::parse("direct3d12"), Some(GraphicsApi::D3D12));
        assert_eq!(GraphicsApi::parse("mtl"), Some(GraphicsApi::Metal));
        assert_eq!(GraphicsApi::parse("opengl"), None);
    }

    #[test]
    fn test_unavailable_backend_falls_back() {
        assert_eq!(GraphicsApi::select("D3D12"), GraphicsApi::Vulkan);
        assert_eq!(GraphicsApi::select("metal"), GraphicsApi::Vulkan);
        assert_eq!(GraphicsApi::select("software"), GraphicsApi::platform_default());
        assert_eq!(GraphicsApi::select("vulkan"), GraphicsApi::Vulkan);
    }

    #[test]
    fn test_facade_selects_vulkan_for_d3d12() {
        let config = GfxConfig {
            graphics: "D3D12".to_string(),
            ..Default::default()
        };
        let graphics = Graphics::new(config);
        assert_eq!(graphics.api(), GraphicsApi::Vulkan);
        assert_eq!(graphics.backend.api(), GraphicsApi::Vulkan);
        assert!(!graphics.is_initialized());
        assert_eq!(graphics.width(), 1280);
        assert_eq!(graphics.height(), 720);
    }
}
