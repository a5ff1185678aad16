//! 创建 swapchain 前，根据 surface 的能力确定各项参数
//!
//! 这里都是纯函数，不访问 gpu。

use ash::vk;

use crate::{
    error::{GfxError, GfxResult},
    swapchain::surface::SurfaceSupport,
};

/// surface 只报告一个 UNDEFINED 格式时，表示可以任意选择
const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// 调用者对 swapchain 的请求
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainRequest {
    pub extent: vk::Extent2D,
    pub vsync: bool,
    pub fullscreen: bool,
    pub backbuffer_count: u32,
}

/// 协商之后的 swapchain 参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub image_usage: vk::ImageUsageFlags,
}

impl SwapchainSettings {
    pub fn negotiate(support: &SurfaceSupport, request: &SwapchainRequest) -> GfxResult<Self> {
        let caps = &support.capabilities;

        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| GfxError::UnsupportedConfiguration("surface reports no formats".to_string()))?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(request.vsync, &support.present_modes),
            image_count: choose_image_count(request.backbuffer_count, caps),
            extent: choose_extent(caps, request.extent),
            pre_transform: choose_pre_transform(caps, request.fullscreen),
            composite_alpha: choose_composite_alpha(caps),
            image_usage: choose_image_usage(caps),
        })
    }

    /// 最小化的窗口 extent 为 0，此时不能创建 swapchain
    #[inline]
    pub fn is_zero_extent(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

/// - 只有一个 UNDEFINED：使用 B8G8R8A8_UNORM + SRGB_NONLINEAR
/// - 否则优先选择 B8G8R8A8_UNORM + SRGB_NONLINEAR
/// - 否则选择第一个
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(PREFERRED_SURFACE_FORMAT),
        _ => formats.iter().copied().find(|f| *f == PREFERRED_SURFACE_FORMAT).or(formats.first().copied()),
    }
}

/// vsync 使用 FIFO；否则依次尝试 MAILBOX、IMMEDIATE，最后回到一定支持的 FIFO
pub fn choose_present_mode(vsync: bool, modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// 把请求的数量限制在 `[min_image_count, max_image_count]` 内，`max_image_count == 0` 表示没有上限
pub fn choose_image_count(requested: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = requested.max(caps.min_image_count);
    if caps.max_image_count > 0 { count.min(caps.max_image_count) } else { count }
}

/// 窗口模式下优先使用 identity；全屏时沿用 surface 当前的 transform
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR, fullscreen: bool) -> vk::SurfaceTransformFlagsKHR {
    if !fullscreen && caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|flag| caps.supported_composite_alpha.contains(*flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// 确定 swapchain 的 extent
///
/// 如果 current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    let surface_extent = caps.current_extent;
    if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
        vk::Extent2D {
            width: requested.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: requested.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else {
        surface_extent
    }
}

/// COLOR_ATTACHMENT 是必须的；TRANSFER_SRC 用于截图与调试工具，支持时才开启
pub fn choose_image_usage(caps: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_surface_format_undefined_means_free_choice() {
        let chosen = choose_surface_format(&[surface_format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen, PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn test_surface_format_preference() {
        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM), surface_format(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);

        let formats = [surface_format(vk::Format::R8G8B8A8_SRGB), surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);

        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(true, &all), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(false, &all), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(false, &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(choose_present_mode(false, &[vk::PresentModeKHR::FIFO]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_image_count_within_bounds() {
        for (min, max) in [(2, 3), (2, 8), (3, 0), (1, 1)] {
            let caps = caps(min, max);
            for requested in 0..10 {
                let n = choose_image_count(requested, &caps);
                assert!(n >= min);
                assert!(max == 0 || n <= max);
            }
        }
        assert_eq!(choose_image_count(3, &caps(2, 8)), 3);
        assert_eq!(choose_image_count(5, &caps(2, 3)), 3);
        assert_eq!(choose_image_count(1, &caps(2, 0)), 2);
    }

    #[test]
    fn test_pre_transform() {
        let caps = caps(2, 3);
        assert_eq!(choose_pre_transform(&caps, false), vk::SurfaceTransformFlagsKHR::IDENTITY);
        assert_eq!(choose_pre_transform(&caps, true), vk::SurfaceTransformFlagsKHR::ROTATE_90);

        let mut no_identity = caps;
        no_identity.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&no_identity, false), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn test_extent() {
        let mut caps = caps(2, 3);
        let requested = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(choose_extent(&caps, requested), caps.current_extent);

        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(choose_extent(&caps, requested), requested);
        assert_eq!(
            choose_extent(
                &caps,
                vk::Extent2D {
                    width: 10_000,
                    height: 0
                }
            ),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn test_composite_alpha_and_usage() {
        let mut caps = caps(2, 3);
        assert_eq!(choose_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::OPAQUE);
        assert!(choose_image_usage(&caps).contains(vk::ImageUsageFlags::TRANSFER_SRC));

        caps.supported_composite_alpha = vk::CompositeAlphaFlagsKHR::INHERIT;
        caps.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        assert_eq!(choose_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::INHERIT);
        assert_eq!(choose_image_usage(&caps), vk::ImageUsageFlags::COLOR_ATTACHMENT);
    }

    #[test]
    fn test_negotiate_minimized_surface() {
        let mut support = SurfaceSupport {
            capabilities: caps(2, 3),
            formats: vec![surface_format(vk::Format::B8G8R8A8_UNORM)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        support.capabilities.current_extent = vk::Extent2D { width: 0, height: 0 };
        let request = SwapchainRequest {
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            vsync: true,
            fullscreen: false,
            backbuffer_count: 3,
        };
        let settings = SwapchainSettings::negotiate(&support, &request).unwrap();
        assert!(settings.is_zero_extent());
        assert_eq!(settings.image_count, 3);
    }
}
