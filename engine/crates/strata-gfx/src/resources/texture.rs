use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::{
    basic::format::{Format, sample_count_to_vk},
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    Texture1D,
    Texture2D,
    Texture3D,
}
impl TextureType {
    #[inline]
    pub fn image_type(self) -> vk::ImageType {
        match self {
            Self::Texture1D => vk::ImageType::TYPE_1D,
            Self::Texture2D => vk::ImageType::TYPE_2D,
            Self::Texture3D => vk::ImageType::TYPE_3D,
        }
    }

    #[inline]
    pub fn view_type(self) -> vk::ImageViewType {
        match self {
            Self::Texture1D => vk::ImageViewType::TYPE_1D,
            Self::Texture2D => vk::ImageViewType::TYPE_2D,
            Self::Texture3D => vk::ImageViewType::TYPE_3D,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}
impl TextureUsage {
    /// 被采样的纹理总是需要上传与回读，额外加上 transfer 用途
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        let mut usage = vk::ImageUsageFlags::empty();
        for (flag, vk_flag) in [
            (Self::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
            (Self::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_DST),
            (Self::SAMPLED, vk::ImageUsageFlags::SAMPLED),
            (Self::STORAGE, vk::ImageUsageFlags::STORAGE),
            (Self::COLOR_ATTACHMENT, vk::ImageUsageFlags::COLOR_ATTACHMENT),
            (Self::DEPTH_STENCIL_ATTACHMENT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
        ] {
            if self.contains(flag) {
                usage |= vk_flag;
            }
        }
        if usage.contains(vk::ImageUsageFlags::SAMPLED) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }
        usage
    }
}

/// image usage 对应的 format feature
pub fn required_format_features(usage: vk::ImageUsageFlags) -> vk::FormatFeatureFlags {
    let mut features = vk::FormatFeatureFlags::empty();
    if usage.contains(vk::ImageUsageFlags::SAMPLED) {
        features |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::STORAGE) {
        features |= vk::FormatFeatureFlags::STORAGE_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        features |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        features |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    features
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub texture_type: TextureType,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub usage: TextureUsage,
    pub sample_count: u32,
    /// host visible 的纹理使用 linear tiling，可以被 map
    pub host_visible: bool,
}

impl TextureDesc {
    pub fn texture_1d(width: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Texture1D,
            format,
            width,
            height: 1,
            depth: 1,
            mip_levels: 1,
            usage,
            sample_count: 1,
            host_visible: false,
        }
    }

    pub fn texture_2d(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Texture2D,
            height,
            ..Self::texture_1d(width, format, usage)
        }
    }

    pub fn texture_3d(width: u32, height: u32, depth: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Texture3D,
            height,
            depth,
            ..Self::texture_1d(width, format, usage)
        }
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    #[inline]
    pub fn with_host_visible(mut self, host_visible: bool) -> Self {
        self.host_visible = host_visible;
        self
    }

    #[inline]
    pub fn tiling(&self) -> vk::ImageTiling {
        if self.host_visible { vk::ImageTiling::LINEAR } else { vk::ImageTiling::OPTIMAL }
    }

    /// 不依赖 gpu 的检查
    pub fn validate(&self) -> GfxResult<()> {
        if self.format == Format::Undefined {
            return Err(GfxError::UnsupportedUsage("texture format is undefined".to_string()));
        }
        if self.width == 0 || self.height == 0 || self.depth == 0 || self.mip_levels == 0 {
            return Err(GfxError::UnsupportedUsage(format!(
                "texture extent {}x{}x{} with {} mips is empty",
                self.width, self.height, self.depth, self.mip_levels
            )));
        }
        if self.usage.is_empty() {
            return Err(GfxError::UnsupportedUsage("texture has no usage".to_string()));
        }
        if sample_count_to_vk(self.sample_count).is_none() {
            return Err(GfxError::UnsupportedUsage(format!("invalid sample count {}", self.sample_count)));
        }
        let is_attachment = self.usage.intersects(TextureUsage::COLOR_ATTACHMENT | TextureUsage::DEPTH_STENCIL_ATTACHMENT);
        if self.sample_count > 1 && (self.texture_type != TextureType::Texture2D || !is_attachment) {
            return Err(GfxError::UnsupportedUsage("only 2D attachments can be multisampled".to_string()));
        }
        if self.host_visible && self.sample_count > 1 {
            return Err(GfxError::UnsupportedUsage("host visible textures cannot be multisampled".to_string()));
        }
        Ok(())
    }
}

/// 创建 vk image 所需的全部参数，swapchain 的深度附件也通过它创建
#[derive(Clone, Copy, Debug)]
pub struct ImageParams {
    pub image_type: vk::ImageType,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub aspect: vk::ImageAspectFlags,
    pub host_visible: bool,
}

impl ImageParams {
    pub fn attachment_2d(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        samples: vk::SampleCountFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            usage,
            samples,
            aspect,
            host_visible: false,
        }
    }
}

/// image + 显存 + 默认的 image view
pub struct GfxTexture {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,

    params: ImageParams,
    /// map 之后可访问的字节数
    memory_size: vk::DeviceSize,
    mapped_ptr: Option<*mut u8>,

    name: String,
}

// new & init
impl GfxTexture {
    pub fn new(core: &GfxCore, desc: &TextureDesc, name: &str) -> GfxResult<Self> {
        desc.validate()?;

        let format = desc.format.to_vk();
        let tiling = desc.tiling();
        let usage = desc.usage.to_vk();

        let required = required_format_features(usage);
        let format_props = core.format_properties(format);
        let available = match tiling {
            vk::ImageTiling::LINEAR => format_props.linear_tiling_features,
            _ => format_props.optimal_tiling_features,
        };
        if !available.contains(required) {
            return Err(GfxError::UnsupportedUsage(format!(
                "format {:?} with {:?} tiling does not support {:?}",
                desc.format, tiling, desc.usage
            )));
        }

        let image_format_props = unsafe {
            core.instance.ash_instance.get_physical_device_image_format_properties(
                core.physical_device.handle,
                format,
                desc.texture_type.image_type(),
                tiling,
                usage,
                vk::ImageCreateFlags::empty(),
            )
        }
        .map_err(|result| {
            GfxError::UnsupportedUsage(format!("image format {:?} is not supported: {result}", desc.format))
        })?;

        // 限制 mip 数量
        let mip_levels = if desc.mip_levels > 1 {
            desc.mip_levels.min(image_format_props.max_mip_levels)
        } else {
            desc.mip_levels
        };
        let samples = sample_count_to_vk(desc.sample_count).unwrap_or(vk::SampleCountFlags::TYPE_1);
        if !image_format_props.sample_counts.contains(samples) {
            return Err(GfxError::UnsupportedUsage(format!(
                "format {:?} does not support {} samples",
                desc.format, desc.sample_count
            )));
        }

        let params = ImageParams {
            image_type: desc.texture_type.image_type(),
            view_type: desc.texture_type.view_type(),
            format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
            },
            mip_levels,
            usage,
            samples,
            aspect: desc.format.aspect_mask(),
            host_visible: desc.host_visible,
        };
        Self::create(core, &params, name)
    }

    pub fn create(core: &GfxCore, params: &ImageParams, name: &str) -> GfxResult<Self> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(params.image_type)
            .format(params.format)
            .extent(params.extent)
            .mip_levels(params.mip_levels)
            .array_layers(1)
            .samples(params.samples)
            .tiling(if params.host_visible { vk::ImageTiling::LINEAR } else { vk::ImageTiling::OPTIMAL })
            .usage(params.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(if params.host_visible {
                vk::ImageLayout::PREINITIALIZED
            } else {
                vk::ImageLayout::UNDEFINED
            });
        let alloc_ci = if params.host_visible {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            }
        } else {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            }
        };

        let (image, mut allocation) =
            unsafe { core.allocator.create_image(&image_ci, &alloc_ci) }.or_session_failed("create_image")?;

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(params.view_type)
            .format(params.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: params.aspect,
                base_mip_level: 0,
                level_count: params.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { core.device.create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(result) => {
                unsafe { core.allocator.destroy_image(image, &mut allocation) };
                return Err(GfxError::session("create_image_view", result));
            }
        };

        let memory_size = unsafe { core.device.get_image_memory_requirements(image) }.size;

        let texture = Self {
            image,
            allocation,
            view,
            params: *params,
            memory_size,
            mapped_ptr: None,
            name: name.to_string(),
        };
        core.device.set_debug_name(&texture, name);
        core.device.set_object_debug_name(view, format!("GfxImageView::{name}"));
        Ok(texture)
    }
}

// getters
impl GfxTexture {
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.params.format
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.params.extent
    }
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.params.mip_levels
    }
    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.params.samples
    }
    #[inline]
    pub fn host_visible(&self) -> bool {
        self.params.host_visible
    }
    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.params.usage
    }
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.params.aspect
    }
    /// 被采样时所处的 layout；linear 纹理需要保持 host 可写，因此使用 GENERAL
    #[inline]
    pub fn sampled_layout(&self) -> vk::ImageLayout {
        if self.params.host_visible { vk::ImageLayout::GENERAL } else { vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL }
    }
    /// 创建时的初始 layout
    #[inline]
    pub fn initial_layout(&self) -> vk::ImageLayout {
        if self.params.host_visible { vk::ImageLayout::PREINITIALIZED } else { vk::ImageLayout::UNDEFINED }
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// tools
impl GfxTexture {
    /// 只有 host visible 的纹理可以 map，重复 map 返回同一块内存
    pub fn map(&mut self, core: &GfxCore) -> GfxResult<&mut [u8]> {
        if !self.params.host_visible {
            return Err(GfxError::NotHostVisible("texture"));
        }
        let ptr = match self.mapped_ptr {
            Some(ptr) => ptr,
            None => {
                let ptr = unsafe { core.allocator.map_memory(&mut self.allocation) }.or_session_failed("map_memory")?;
                self.mapped_ptr = Some(ptr);
                ptr
            }
        };
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.memory_size as usize) })
    }

    pub fn unmap(&mut self, core: &GfxCore) -> GfxResult<()> {
        if !self.params.host_visible {
            return Err(GfxError::NotHostVisible("texture"));
        }
        if self.mapped_ptr.take().is_some() {
            core.allocator.flush_allocation(&self.allocation, 0, vk::WHOLE_SIZE).or_session_failed("flush_allocation")?;
            unsafe { core.allocator.unmap_memory(&mut self.allocation) };
        }
        Ok(())
    }
}

// destroy
impl GfxTexture {
    pub fn destroy(mut self, core: &GfxCore) {
        log::debug!("destroying GfxTexture: {}", self.name);
        unsafe {
            if self.mapped_ptr.take().is_some() {
                core.allocator.unmap_memory(&mut self.allocation);
            }
            core.device.destroy_image_view(self.view, None);
            core.allocator.destroy_image(self.image, &mut self.allocation);
        }
        self.image = vk::Image::null();
    }
}
impl Drop for GfxTexture {
    fn drop(&mut self) {
        debug_assert!(self.image.is_null(), "GfxTexture {} must be destroyed before being dropped", self.name);
    }
}

impl DebugType for GfxTexture {
    fn debug_type_name() -> &'static str {
        "GfxTexture"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampled_usage_adds_transfer() {
        let usage = TextureUsage::SAMPLED.to_vk();
        assert!(usage.contains(
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
        ));

        let usage = TextureUsage::COLOR_ATTACHMENT.to_vk();
        assert_eq!(usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
    }

    #[test]
    fn test_required_features() {
        let usage = (TextureUsage::SAMPLED | TextureUsage::DEPTH_STENCIL_ATTACHMENT).to_vk();
        assert_eq!(
            required_format_features(usage),
            vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        );
        // transfer 用途不额外要求 format feature
        assert!(required_format_features(vk::ImageUsageFlags::TRANSFER_DST).is_empty());
    }

    #[test]
    fn test_desc_validation() {
        let desc = TextureDesc::texture_2d(256, 256, Format::R8G8B8A8Unorm, TextureUsage::SAMPLED);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.tiling(), vk::ImageTiling::OPTIMAL);
        assert_eq!(desc.clone().with_host_visible(true).tiling(), vk::ImageTiling::LINEAR);

        let empty = TextureDesc::texture_2d(0, 256, Format::R8G8B8A8Unorm, TextureUsage::SAMPLED);
        assert!(matches!(empty.validate(), Err(GfxError::UnsupportedUsage(_))));

        let undefined = TextureDesc::texture_2d(4, 4, Format::Undefined, TextureUsage::SAMPLED);
        assert!(undefined.validate().is_err());

        let bad_samples = desc.clone().with_sample_count(3);
        assert!(bad_samples.validate().is_err());

        // 只有 attachment 才能多重采样
        assert!(desc.clone().with_sample_count(4).validate().is_err());
        let msaa = TextureDesc::texture_2d(64, 64, Format::R8G8B8A8Unorm, TextureUsage::COLOR_ATTACHMENT)
            .with_sample_count(4);
        assert!(msaa.validate().is_ok());
    }

    #[test]
    fn test_texture_types() {
        let desc = TextureDesc::texture_3d(8, 8, 8, Format::R16G16B16A16Float, TextureUsage::STORAGE);
        assert_eq!(desc.texture_type.image_type(), vk::ImageType::TYPE_3D);
        assert_eq!(desc.texture_type.view_type(), vk::ImageViewType::TYPE_3D);

        let desc = TextureDesc::texture_1d(8, Format::R32Float, TextureUsage::SAMPLED);
        assert_eq!((desc.height, desc.depth), (1, 1));
    }
}
