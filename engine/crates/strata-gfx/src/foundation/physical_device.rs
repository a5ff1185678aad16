use std::ffi::{CStr, CString};

use ash::vk;
use itertools::Itertools;

use crate::error::{GfxError, GfxResult, VkResultExt};

/// 深度格式的候选，按优先级排列
pub const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// device 使用的 queue family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub graphics: u32,
    /// 只有当 compute family 和 graphics family 不同时才有值
    pub compute: Option<u32>,
}

/// 表示一张物理显卡，以及创建时刻的能力快照
pub struct GfxPhysicalDevice {
    pub(crate) handle: vk::PhysicalDevice,

    pub basic_props: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_family_properties: Vec<vk::QueueFamilyProperties>,
    pub device_extensions: Vec<CString>,

    /// 选出的深度格式
    pub depth_format: vk::Format,
    pub queue_families: QueueFamilySelection,
}

// new & init
impl GfxPhysicalDevice {
    /// 枚举所有 gpu，选出分数最高的一个
    ///
    /// `supports_present(pdevice, family)` 用于选择 graphics family
    pub fn pick(
        instance: &ash::Instance,
        supports_present: impl Fn(vk::PhysicalDevice, u32) -> bool,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxPhysicalDevice::pick");

        let pdevices =
            unsafe { instance.enumerate_physical_devices() }.or_init_failed("enumerate physical devices")?;

        let scores = pdevices
            .iter()
            .map(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(*pdevice) };
                let features = unsafe { instance.get_physical_device_features(*pdevice) };
                let score = score_device(&props, &features);
                log::info!("found gpu: {:?}, score: {}", device_name(&props), score);
                score
            })
            .collect_vec();

        let best = pick_best(&scores).ok_or_else(|| {
            GfxError::init("no physical device meets the requirements", vk::Result::ERROR_INCOMPATIBLE_DRIVER)
        })?;
        Self::new(instance, pdevices[best], |family| supports_present(pdevices[best], family))
    }

    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        supports_present: impl Fn(u32) -> bool,
    ) -> GfxResult<Self> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let features = unsafe { instance.get_physical_device_features(pdevice) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(pdevice) };
        let queue_family_properties = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };

        // 找到当前 gpu 支持的 extensions，并打印出来
        let device_extensions = unsafe { instance.enumerate_device_extension_properties(pdevice) }
            .or_init_failed("enumerate device extensions")?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect_vec();
        log::debug!("device supports extensions: {}", device_extensions.iter().map(|e| format!("\n\t{e:?}")).join(""));

        let queue_families = select_queue_families(&queue_family_properties, supports_present)?;

        let depth_format = choose_depth_format(DEPTH_FORMAT_CANDIDATES, |format| unsafe {
            instance.get_physical_device_format_properties(pdevice, format).optimal_tiling_features
        })
        .ok_or_else(|| GfxError::init("no supported depth/stencil format", vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;

        log::info!(
            "selected gpu: {:?}, queue families: {:?}, depth format: {:?}",
            device_name(&basic_props),
            queue_families,
            depth_format
        );

        Ok(Self {
            handle: pdevice,
            basic_props,
            features,
            memory_properties,
            queue_family_properties,
            device_extensions,
            depth_format,
            queue_families,
        })
    }
}

// getters
impl GfxPhysicalDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }

    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.device_extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// color 与 depth framebuffer 都支持的采样数
    #[inline]
    pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
        self.limits().framebuffer_color_sample_counts & self.limits().framebuffer_depth_sample_counts
    }
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> std::borrow::Cow<'_, str> {
    unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy()
}

/// gpu 的打分规则：
/// - 缺少 geometry shader 的 gpu 得 0 分，不可用
/// - 独立显卡 +1000
/// - 加上支持的最大 2D 图像尺寸
pub fn score_device(props: &vk::PhysicalDeviceProperties, features: &vk::PhysicalDeviceFeatures) -> u32 {
    if features.geometry_shader == vk::FALSE {
        return 0;
    }
    let mut score = 0;
    if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }
    score + props.limits.max_image_dimension2_d
}

/// 分数最高的 gpu 的下标，分数相同时取枚举顺序靠前的；全部为 0 分时返回 None
pub fn pick_best(scores: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score == 0 {
            continue;
        }
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// graphics：第一个同时支持 GRAPHICS 与 present 的 family，present 使用同一个 family
///
/// compute：优先选择不支持 GRAPHICS 的专用 compute family，否则选择第一个支持 COMPUTE 的 family；
/// 和 graphics family 相同时不单独创建
///
/// 没有能 present 的 graphics family 时返回 `UnsupportedConfiguration`；headless 时 `supports_present` 恒为 true
pub fn select_queue_families(
    props: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> GfxResult<QueueFamilySelection> {
    let find = |pred: &dyn Fn(u32, vk::QueueFlags) -> bool| {
        (0..props.len() as u32).find(|&i| {
            let p = &props[i as usize];
            p.queue_count > 0 && pred(i, p.queue_flags)
        })
    };

    let Some(graphics) = find(&|i, flags| flags.contains(vk::QueueFlags::GRAPHICS) && supports_present(i)) else {
        return Err(match find(&|_, flags| flags.contains(vk::QueueFlags::GRAPHICS)) {
            Some(graphics) => GfxError::UnsupportedConfiguration(format!(
                "no queue family supports both graphics and present (graphics family {graphics} cannot present)"
            )),
            None => GfxError::init("gpu has no graphics queue family", vk::Result::ERROR_FEATURE_NOT_PRESENT),
        });
    };
    let compute = find(&|_, flags| flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS))
        .or_else(|| find(&|_, flags| flags.contains(vk::QueueFlags::COMPUTE)))
        .filter(|&compute| compute != graphics);

    Ok(QueueFamilySelection { graphics, compute })
}

/// 选出第一个支持 optimal tiling 深度附件的格式
pub fn choose_depth_format(
    candidates: &[vk::Format],
    optimal_features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| optimal_features(format).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
}

/// 把请求的采样数向下取到最近的受支持值
///
/// # return
/// (vulkan flag, 实际采样数)
pub fn choose_sample_count(requested: u32, supported: vk::SampleCountFlags) -> (vk::SampleCountFlags, u32) {
    let mut count = requested.clamp(1, 64).next_power_of_two();
    if count > requested.max(1) {
        count /= 2;
    }
    while count > 1 {
        let flag = vk::SampleCountFlags::from_raw(count);
        if supported.contains(flag) {
            return (flag, count);
        }
        count /= 2;
    }
    (vk::SampleCountFlags::TYPE_1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(device_type: vk::PhysicalDeviceType, max_dim: u32) -> vk::PhysicalDeviceProperties {
        let mut props = vk::PhysicalDeviceProperties::default();
        props.device_type = device_type;
        props.limits.max_image_dimension2_d = max_dim;
        props
    }

    fn features(geometry_shader: bool) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default().geometry_shader(geometry_shader)
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_score_device() {
        let discrete = score_device(&props(vk::PhysicalDeviceType::DISCRETE_GPU, 16384), &features(true));
        let integrated = score_device(&props(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384), &features(true));
        assert_eq!(discrete, 1000 + 16384);
        assert_eq!(integrated, 16384);

        // 缺少必须的 feature
        assert_eq!(score_device(&props(vk::PhysicalDeviceType::DISCRETE_GPU, 16384), &features(false)), 0);
    }

    #[test]
    fn test_pick_best_tie_takes_first() {
        assert_eq!(pick_best(&[10, 30, 30, 5]), Some(1));
        assert_eq!(pick_best(&[0, 0]), None);
        assert_eq!(pick_best(&[]), None);
        assert_eq!(pick_best(&[0, 7]), Some(1));
    }

    #[test]
    fn test_queue_family_selection() {
        let shared = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert_eq!(select_queue_families(&shared, |_| true).unwrap(), QueueFamilySelection { graphics: 0, compute: None });

        let dedicated = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(
            select_queue_families(&dedicated, |_| true).unwrap(),
            QueueFamilySelection { graphics: 1, compute: Some(2) }
        );

        let err = select_queue_families(&[family(vk::QueueFlags::COMPUTE)], |_| true).unwrap_err();
        assert!(matches!(err, GfxError::InitializationFailed { .. }));
    }

    #[test]
    fn test_graphics_family_follows_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];

        assert_eq!(select_queue_families(&families, |_| true).unwrap().graphics, 0);

        // 只有第二个 graphics family 能 present 时选择它，compute 与之相同不单独创建
        let selection = select_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(selection, QueueFamilySelection { graphics: 1, compute: None });

        let err = select_queue_families(&families, |_| false).unwrap_err();
        assert!(matches!(err, GfxError::UnsupportedConfiguration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_depth_format_priority() {
        let format = choose_depth_format(DEPTH_FORMAT_CANDIDATES, |format| match format {
            vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM => vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            _ => vk::FormatFeatureFlags::empty(),
        });
        assert_eq!(format, Some(vk::Format::D24_UNORM_S8_UINT));

        assert_eq!(choose_depth_format(DEPTH_FORMAT_CANDIDATES, |_| vk::FormatFeatureFlags::empty()), None);
    }

    #[test]
    fn test_sample_count_degrades() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(choose_sample_count(4, supported), (vk::SampleCountFlags::TYPE_4, 4));
        assert_eq!(choose_sample_count(8, supported), (vk::SampleCountFlags::TYPE_4, 4));
        // 非 2 的幂向下取整
        assert_eq!(choose_sample_count(3, supported), (vk::SampleCountFlags::TYPE_2, 2));
        assert_eq!(choose_sample_count(0, supported), (vk::SampleCountFlags::TYPE_1, 1));
    }
}
