use ash::vk;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}
impl Filter {
    #[inline]
    pub fn to_vk(self) -> vk::Filter {
        match self {
            Self::Nearest => vk::Filter::NEAREST,
            Self::Linear => vk::Filter::LINEAR,
        }
    }

    #[inline]
    pub fn to_vk_mipmap(self) -> vk::SamplerMipmapMode {
        match self {
            Self::Nearest => vk::SamplerMipmapMode::NEAREST,
            Self::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
}
impl AddressMode {
    #[inline]
    pub fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            Self::Wrap => vk::SamplerAddressMode::REPEAT,
            Self::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
            Self::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            Self::Border => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BorderColor {
    #[default]
    BlackTransparent,
    BlackOpaque,
    WhiteOpaque,
}
impl BorderColor {
    #[inline]
    pub fn to_vk(self) -> vk::BorderColor {
        match self {
            Self::BlackTransparent => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            Self::BlackOpaque => vk::BorderColor::FLOAT_OPAQUE_BLACK,
            Self::WhiteOpaque => vk::BorderColor::FLOAT_OPAQUE_WHITE,
        }
    }
}

/// 深度测试、模板测试与 shadow sampler 共用的比较函数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CompareFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}
impl CompareFunc {
    #[inline]
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            Self::Never => vk::CompareOp::NEVER,
            Self::Less => vk::CompareOp::LESS,
            Self::Equal => vk::CompareOp::EQUAL,
            Self::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            Self::Greater => vk::CompareOp::GREATER,
            Self::NotEqual => vk::CompareOp::NOT_EQUAL,
            Self::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            Self::Always => vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mip_filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub border_color: BorderColor,
    /// 为 Some 时是 comparison sampler
    pub compare: Option<CompareFunc>,
    /// 为 Some 时开启各向异性过滤，值会被限制在 device 的上限内
    pub anisotropy: Option<f32>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mip_filter: Filter::Linear,
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            address_w: AddressMode::Wrap,
            border_color: BorderColor::BlackTransparent,
            compare: None,
            anisotropy: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

impl SamplerDesc {
    /// device 不支持各向异性时关闭，否则限制到 `max_anisotropy`
    pub fn effective_anisotropy(&self, supported: bool, max_anisotropy: f32) -> Option<f32> {
        let requested = self.anisotropy.filter(|a| *a > 1.0)?;
        if !supported {
            log::warn!("sampler anisotropy {requested} requested but the device does not support it");
            return None;
        }
        Some(requested.min(max_anisotropy))
    }
}

pub struct GfxSampler {
    handle: vk::Sampler,
    desc: SamplerDesc,
}

// new & init
impl GfxSampler {
    pub fn new(core: &GfxCore, desc: &SamplerDesc, name: &str) -> GfxResult<Self> {
        let anisotropy = desc.effective_anisotropy(
            core.physical_device.features.sampler_anisotropy == vk::TRUE,
            core.physical_device.limits().max_sampler_anisotropy,
        );

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter.to_vk())
            .min_filter(desc.min_filter.to_vk())
            .mipmap_mode(desc.mip_filter.to_vk_mipmap())
            .address_mode_u(desc.address_u.to_vk())
            .address_mode_v(desc.address_v.to_vk())
            .address_mode_w(desc.address_w.to_vk())
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.unwrap_or(CompareFunc::Always).to_vk())
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color.to_vk())
            .unnormalized_coordinates(false);

        let handle = unsafe { core.device.create_sampler(&create_info, None) }.or_session_failed("create_sampler")?;
        let sampler = Self { handle, desc: *desc };
        core.device.set_debug_name(&sampler, name);
        Ok(sampler)
    }
}

// getters
impl GfxSampler {
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
    #[inline]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

// destroy
impl GfxSampler {
    pub fn destroy(self, core: &GfxCore) {
        unsafe { core.device.destroy_sampler(self.handle, None) }
    }
}

impl DebugType for GfxSampler {
    fn debug_type_name() -> &'static str {
        "GfxSampler"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anisotropy_clamped_to_device() {
        let desc = SamplerDesc {
            anisotropy: Some(16.0),
            ..Default::default()
        };
        assert_eq!(desc.effective_anisotropy(true, 8.0), Some(8.0));
        assert_eq!(desc.effective_anisotropy(false, 8.0), None);

        let desc = SamplerDesc {
            anisotropy: Some(1.0),
            ..Default::default()
        };
        assert_eq!(desc.effective_anisotropy(true, 8.0), None);
        assert_eq!(SamplerDesc::default().effective_anisotropy(true, 8.0), None);
    }

    #[test]
    fn test_mappings() {
        assert_eq!(AddressMode::Border.to_vk(), vk::SamplerAddressMode::CLAMP_TO_BORDER);
        assert_eq!(Filter::Nearest.to_vk_mipmap(), vk::SamplerMipmapMode::NEAREST);
        assert_eq!(CompareFunc::GreaterOrEqual.to_vk(), vk::CompareOp::GREATER_OR_EQUAL);
    }
}
