use std::ops::Deref;

use ash::vk;

use crate::error::{GfxResult, VkResultExt};

/// vk-mem 分配器
///
/// 需要在 device 之后创建，在 device 之前销毁
pub struct GfxMemAllocator {
    inner: vk_mem::Allocator,
}

impl GfxMemAllocator {
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> GfxResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_1;

        let inner = unsafe { vk_mem::Allocator::new(vma_ci) }.or_init_failed("create memory allocator")?;
        Ok(Self { inner })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxMemAllocator");
        // 通过 drop 触发 vmaDestroyAllocator
        drop(self.inner);
    }
}

impl Deref for GfxMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
