use ash::vk;
use serde::{Deserialize, Serialize};

/// 与图形 API 无关的像素格式
///
/// 每个后端负责把它映射到 native 格式，Vulkan 的映射见 [`Format::to_vk`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Undefined,
    R8Unorm,
    R16Unorm,
    R16Float,
    R32Uint,
    R32Float,
    R8G8Unorm,
    R16G16Unorm,
    R16G16Float,
    R32G32Uint,
    R32G32Float,
    R8G8B8Unorm,
    R16G16B16Unorm,
    R16G16B16Float,
    R32G32B32Uint,
    R32G32B32Float,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    R16G16B16A16Unorm,
    R16G16B16A16Float,
    R32G32B32A32Uint,
    R32G32B32A32Float,
    D16Unorm,
    X8D24UnormPack32,
    D32Float,
    S8Uint,
    D16UnormS8Uint,
    D24UnormS8Uint,
    D32FloatS8Uint,
    /// DXT1
    Bc1,
    /// DXT3
    Bc2,
    /// DXT5
    Bc3,
    Bc4,
    Bc5,
    Bc6h,
    Bc7,
    /// ETC1 RGB8，按 ETC2 RGB8 解码
    Etc1,
    Etc2,
    Etc2A,
    Etc2A1,
    Astc4x4,
}

impl Format {
    pub fn to_vk(self) -> vk::Format {
        match self {
            Self::Undefined => vk::Format::UNDEFINED,
            Self::R8Unorm => vk::Format::R8_UNORM,
            Self::R16Unorm => vk::Format::R16_UNORM,
            Self::R16Float => vk::Format::R16_SFLOAT,
            Self::R32Uint => vk::Format::R32_UINT,
            Self::R32Float => vk::Format::R32_SFLOAT,
            Self::R8G8Unorm => vk::Format::R8G8_UNORM,
            Self::R16G16Unorm => vk::Format::R16G16_UNORM,
            Self::R16G16Float => vk::Format::R16G16_SFLOAT,
            Self::R32G32Uint => vk::Format::R32G32_UINT,
            Self::R32G32Float => vk::Format::R32G32_SFLOAT,
            Self::R8G8B8Unorm => vk::Format::R8G8B8_UNORM,
            Self::R16G16B16Unorm => vk::Format::R16G16B16_UNORM,
            Self::R16G16B16Float => vk::Format::R16G16B16_SFLOAT,
            Self::R32G32B32Uint => vk::Format::R32G32B32_UINT,
            Self::R32G32B32Float => vk::Format::R32G32B32_SFLOAT,
            Self::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::R16G16B16A16Unorm => vk::Format::R16G16B16A16_UNORM,
            Self::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
            Self::R32G32B32A32Uint => vk::Format::R32G32B32A32_UINT,
            Self::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
            Self::D16Unorm => vk::Format::D16_UNORM,
            Self::X8D24UnormPack32 => vk::Format::X8_D24_UNORM_PACK32,
            Self::D32Float => vk::Format::D32_SFLOAT,
            Self::S8Uint => vk::Format::S8_UINT,
            Self::D16UnormS8Uint => vk::Format::D16_UNORM_S8_UINT,
            Self::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Self::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
            Self::Bc1 => vk::Format::BC1_RGBA_UNORM_BLOCK,
            Self::Bc2 => vk::Format::BC2_UNORM_BLOCK,
            Self::Bc3 => vk::Format::BC3_UNORM_BLOCK,
            Self::Bc4 => vk::Format::BC4_UNORM_BLOCK,
            Self::Bc5 => vk::Format::BC5_UNORM_BLOCK,
            Self::Bc6h => vk::Format::BC6H_UFLOAT_BLOCK,
            Self::Bc7 => vk::Format::BC7_UNORM_BLOCK,
            Self::Etc1 | Self::Etc2 => vk::Format::ETC2_R8G8B8_UNORM_BLOCK,
            Self::Etc2A => vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK,
            Self::Etc2A1 => vk::Format::ETC2_R8G8B8A1_UNORM_BLOCK,
            Self::Astc4x4 => vk::Format::ASTC_4X4_UNORM_BLOCK,
        }
    }

    /// 交换链与深度格式协商得到的是 native 格式，需要反向映射给调用者
    pub fn from_vk(format: vk::Format) -> Option<Self> {
        let format = match format {
            vk::Format::UNDEFINED => Self::Undefined,
            vk::Format::B8G8R8A8_UNORM => Self::B8G8R8A8Unorm,
            vk::Format::B8G8R8A8_SRGB => Self::B8G8R8A8Srgb,
            vk::Format::R8G8B8A8_UNORM => Self::R8G8B8A8Unorm,
            vk::Format::R8G8B8A8_SRGB => Self::R8G8B8A8Srgb,
            vk::Format::R16G16B16A16_SFLOAT => Self::R16G16B16A16Float,
            vk::Format::D16_UNORM => Self::D16Unorm,
            vk::Format::X8_D24_UNORM_PACK32 => Self::X8D24UnormPack32,
            vk::Format::D32_SFLOAT => Self::D32Float,
            vk::Format::S8_UINT => Self::S8Uint,
            vk::Format::D16_UNORM_S8_UINT => Self::D16UnormS8Uint,
            vk::Format::D24_UNORM_S8_UINT => Self::D24UnormS8Uint,
            vk::Format::D32_SFLOAT_S8_UINT => Self::D32FloatS8Uint,
            _ => return None,
        };
        Some(format)
    }

    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Self::D16Unorm
                | Self::X8D24UnormPack32
                | Self::D32Float
                | Self::D16UnormS8Uint
                | Self::D24UnormS8Uint
                | Self::D32FloatS8Uint
        )
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::S8Uint | Self::D16UnormS8Uint | Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }

    #[inline]
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::Bc1
                | Self::Bc2
                | Self::Bc3
                | Self::Bc4
                | Self::Bc5
                | Self::Bc6h
                | Self::Bc7
                | Self::Etc1
                | Self::Etc2
                | Self::Etc2A
                | Self::Etc2A1
                | Self::Astc4x4
        )
    }

    /// image view 使用的 aspect
    pub fn aspect_mask(self) -> vk::ImageAspectFlags {
        match (self.is_depth(), self.has_stencil()) {
            (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            (true, false) => vk::ImageAspectFlags::DEPTH,
            (false, true) => vk::ImageAspectFlags::STENCIL,
            (false, false) => vk::ImageAspectFlags::COLOR,
        }
    }
}

/// 深度格式的 native 版本 aspect 计算
pub fn vk_depth_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    Format::from_vk(format).map_or(vk::ImageAspectFlags::DEPTH, |f| f.aspect_mask())
}

/// index buffer 中索引的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexFormat {
    U16,
    U32,
}
impl IndexFormat {
    #[inline]
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            Self::U16 => vk::IndexType::UINT16,
            Self::U32 => vk::IndexType::UINT32,
        }
    }

    /// 每个索引占用的字节数
    #[inline]
    pub fn stride(self) -> u32 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// 把采样数转换为 vulkan 的 flag，只接受 2 的幂且不超过 64
pub fn sample_count_to_vk(samples: u32) -> Option<vk::SampleCountFlags> {
    let flag = match samples {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => return None,
    };
    Some(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_stencil_aspects() {
        assert_eq!(Format::D32Float.aspect_mask(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            Format::D24UnormS8Uint.aspect_mask(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(Format::S8Uint.aspect_mask(), vk::ImageAspectFlags::STENCIL);
        assert_eq!(Format::R8G8B8A8Unorm.aspect_mask(), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_swapchain_formats_map_back() {
        for format in [Format::B8G8R8A8Unorm, Format::R8G8B8A8Srgb, Format::D32FloatS8Uint, Format::D16Unorm] {
            assert_eq!(Format::from_vk(format.to_vk()), Some(format));
        }
        // 压缩格式不会出现在交换链中
        assert_eq!(Format::from_vk(vk::Format::BC7_UNORM_BLOCK), None);
    }

    #[test]
    fn test_index_stride() {
        assert_eq!(IndexFormat::U16.stride(), 2);
        assert_eq!(IndexFormat::U32.stride(), 4);
        assert_eq!(IndexFormat::U16.to_vk(), vk::IndexType::UINT16);
    }

    #[test]
    fn test_sample_count() {
        assert_eq!(sample_count_to_vk(4), Some(vk::SampleCountFlags::TYPE_4));
        assert_eq!(sample_count_to_vk(3), None);
        assert_eq!(sample_count_to_vk(0), None);
    }
}
