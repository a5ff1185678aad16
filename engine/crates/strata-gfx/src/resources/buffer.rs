use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::{
    basic::format::IndexFormat,
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
};

/// uniform buffer 的大小按这个值向上取整
pub const UNIFORM_BUFFER_ALIGNMENT: vk::DeviceSize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index(IndexFormat),
    Uniform,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub usage: BufferUsage,
    pub size: vk::DeviceSize,
    /// 单个元素的字节数：vertex 为顶点大小，index 为索引大小，uniform 为整个 buffer
    pub stride: u32,
    pub host_visible: bool,
}

impl BufferDesc {
    pub fn vertex(size: vk::DeviceSize, stride: u32, host_visible: bool) -> Self {
        Self {
            usage: BufferUsage::Vertex,
            size,
            stride,
            host_visible,
        }
    }

    pub fn index(size: vk::DeviceSize, format: IndexFormat, host_visible: bool) -> Self {
        Self {
            usage: BufferUsage::Index(format),
            size,
            stride: format.stride(),
            host_visible,
        }
    }

    pub fn uniform(size: vk::DeviceSize, host_visible: bool) -> Self {
        Self {
            usage: BufferUsage::Uniform,
            size,
            // 超过 u32 的 uniform 会在 resolved_size 中被拒绝
            stride: u32::try_from(size).unwrap_or(u32::MAX),
            host_visible,
        }
    }

    /// transfer 用途总是开启，用于上传与回读
    pub fn vk_usage(&self) -> vk::BufferUsageFlags {
        let usage = match self.usage {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index(_) => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        };
        usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
    }

    /// 实际分配的大小；uniform buffer 向上取整到 256，并且不能超过 device 的 uniform range 上限
    pub fn resolved_size(&self, max_uniform_range: u32) -> GfxResult<vk::DeviceSize> {
        if self.size == 0 {
            return Err(GfxError::UnsupportedUsage("buffer size is zero".to_string()));
        }
        match self.usage {
            BufferUsage::Uniform => {
                let size = self.size.div_ceil(UNIFORM_BUFFER_ALIGNMENT) * UNIFORM_BUFFER_ALIGNMENT;
                if size > max_uniform_range as vk::DeviceSize {
                    return Err(GfxError::UnsupportedUsage(format!(
                        "uniform buffer of {size} bytes exceeds the device limit of {max_uniform_range} bytes"
                    )));
                }
                Ok(size)
            }
            _ => Ok(self.size),
        }
    }
}

pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    desc: BufferDesc,

    mapped_ptr: Option<*mut u8>,

    name: String,
}

// new & init
impl GfxBuffer {
    /// - host visible：HOST_VISIBLE | HOST_COHERENT，可以 map
    /// - 否则优先使用 device local memory
    pub fn new(core: &GfxCore, desc: &BufferDesc, name: &str) -> GfxResult<Self> {
        let size = desc.resolved_size(core.physical_device.limits().max_uniform_buffer_range)?;

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(desc.vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = if desc.host_visible {
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

        let (handle, allocation) =
            unsafe { core.allocator.create_buffer(&buffer_ci, &alloc_ci) }.or_session_failed("create_buffer")?;

        let buffer = Self {
            handle,
            allocation,
            desc: BufferDesc { size, ..*desc },
            mapped_ptr: None,
            name: name.to_string(),
        };
        core.device.set_debug_name(&buffer, name);
        Ok(buffer)
    }
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }
    /// 取整之后的大小
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }
    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped_ptr.is_some()
    }
}

// tools
impl GfxBuffer {
    /// 只有 host visible 的 buffer 可以 map，重复 map 返回同一块内存
    pub fn map(&mut self, core: &GfxCore) -> GfxResult<&mut [u8]> {
        if !self.desc.host_visible {
            return Err(GfxError::NotHostVisible("buffer"));
        }
        let ptr = match self.mapped_ptr {
            Some(ptr) => ptr,
            None => {
                let ptr = unsafe { core.allocator.map_memory(&mut self.allocation) }.or_session_failed("map_memory")?;
                self.mapped_ptr = Some(ptr);
                ptr
            }
        };
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.desc.size as usize) })
    }

    /// 写入的数据在 unmap 时 flush
    pub fn unmap(&mut self, core: &GfxCore) -> GfxResult<()> {
        if !self.desc.host_visible {
            return Err(GfxError::NotHostVisible("buffer"));
        }
        if self.mapped_ptr.take().is_some() {
            core.allocator.flush_allocation(&self.allocation, 0, self.desc.size).or_session_failed("flush_allocation")?;
            unsafe { core.allocator.unmap_memory(&mut self.allocation) };
        }
        Ok(())
    }
}

// destroy
impl GfxBuffer {
    pub fn destroy(mut self, core: &GfxCore) {
        log::debug!("destroying GfxBuffer: {}", self.name);
        unsafe {
            if self.mapped_ptr.take().is_some() {
                core.allocator.unmap_memory(&mut self.allocation);
            }
            core.allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
        self.handle = vk::Buffer::null();
    }
}
impl Drop for GfxBuffer {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxBuffer {} must be destroyed before being dropped", self.name);
    }
}

impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_size_rounds_up() {
        let desc = BufferDesc::uniform(1, true);
        assert_eq!(desc.resolved_size(65536).unwrap(), 256);

        let desc = BufferDesc::uniform(256, true);
        assert_eq!(desc.resolved_size(65536).unwrap(), 256);

        let desc = BufferDesc::uniform(257, false);
        assert_eq!(desc.resolved_size(65536).unwrap(), 512);
    }

    #[test]
    fn test_uniform_size_limit() {
        let desc = BufferDesc::uniform(16384, true);
        assert!(desc.resolved_size(16384).is_ok());
        assert!(matches!(
            BufferDesc::uniform(16385, true).resolved_size(16384),
            Err(GfxError::UnsupportedUsage(_))
        ));
    }

    #[test]
    fn test_oversized_uniform_stride_is_clamped() {
        let size = u64::from(u32::MAX) + 1;
        let desc = BufferDesc::uniform(size, true);
        assert_eq!(desc.stride, u32::MAX);
        assert!(matches!(desc.resolved_size(u32::MAX), Err(GfxError::UnsupportedUsage(_))));

        assert_eq!(BufferDesc::uniform(300, true).stride, 300);
    }

    #[test]
    fn test_vertex_and_index_size_unchanged() {
        assert_eq!(BufferDesc::vertex(100, 12, false).resolved_size(256).unwrap(), 100);

        let desc = BufferDesc::index(6, IndexFormat::U16, false);
        assert_eq!(desc.stride, 2);
        assert_eq!(desc.resolved_size(256).unwrap(), 6);
        assert!(BufferDesc::vertex(0, 12, false).resolved_size(256).is_err());
    }

    #[test]
    fn test_usage_flags() {
        let usage = BufferDesc::index(6, IndexFormat::U32, false).vk_usage();
        assert!(usage.contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));

        let usage = BufferDesc::uniform(64, true).vk_usage();
        assert!(usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC));
    }
}
