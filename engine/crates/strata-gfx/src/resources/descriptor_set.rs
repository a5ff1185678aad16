use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    foundation::debug_messenger::DebugType,
    gfx_core::GfxCore,
    resources::handles::{BufferHandle, RenderPassHandle, SamplerHandle, TextureHandle},
};

bitflags::bitflags! {
    /// 绑定对哪些 shader 阶段可见
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;

        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::TESSELLATION_CONTROL.bits()
            | Self::TESSELLATION_EVALUATION.bits()
            | Self::GEOMETRY.bits()
            | Self::FRAGMENT.bits();
    }
}

impl ShaderStages {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        let pairs = [
            (Self::VERTEX, vk::ShaderStageFlags::VERTEX),
            (Self::TESSELLATION_CONTROL, vk::ShaderStageFlags::TESSELLATION_CONTROL),
            (Self::TESSELLATION_EVALUATION, vk::ShaderStageFlags::TESSELLATION_EVALUATION),
            (Self::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
            (Self::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        ];
        for (stage, vk_stage) in pairs {
            if self.contains(stage) {
                flags |= vk_stage;
            }
        }
        flags
    }
}

/// 绑定的资源，通过资源工厂返回的句柄指定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer(BufferHandle),
    CombinedTextureSampler(TextureHandle, SamplerHandle),
    /// 离屏 render pass 的第 n 个 color 附件，在 pass 结束之后采样
    RenderPassAttachment(RenderPassHandle, u32, SamplerHandle),
}

impl DescriptorKind {
    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedTextureSampler(..) | Self::RenderPassAttachment(..) => {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: ShaderStages,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSetDesc {
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetDesc {
    pub fn new(bindings: Vec<DescriptorBinding>) -> Self {
        Self { bindings }
    }

    pub fn validate(&self) -> GfxResult<()> {
        if self.bindings.is_empty() {
            return Err(GfxError::UnsupportedUsage("descriptor set has no bindings".to_string()));
        }
        if let Some(dup) = self.bindings.iter().map(|b| b.binding).duplicates().next() {
            return Err(GfxError::UnsupportedUsage(format!("descriptor binding {dup} is declared twice")));
        }
        if let Some(b) = self.bindings.iter().find(|b| b.stages.is_empty()) {
            return Err(GfxError::UnsupportedUsage(format!("descriptor binding {} is visible to no stage", b.binding)));
        }
        Ok(())
    }

    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(b.stages.to_vk())
            })
            .collect_vec()
    }

    /// 每种 descriptor 类型需要的数量，用于创建 descriptor pool
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.bindings
            .iter()
            .map(|b| b.kind.descriptor_type())
            .counts()
            .into_iter()
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: count as u32,
            })
            .sorted_by_key(|size| size.ty.as_raw())
            .collect_vec()
    }
}

/// 句柄解析之后得到的 native 资源
#[derive(Clone, Copy, Debug)]
pub enum ResolvedDescriptor {
    UniformBuffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    CombinedTextureSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

/// 每个 descriptor set 独占一个 layout 和一个 pool，销毁时一起释放
pub struct GfxDescriptorSet {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    handle: vk::DescriptorSet,

    desc: DescriptorSetDesc,
}

// new & init
impl GfxDescriptorSet {
    /// # params
    /// - `resolved`: 与 `desc.bindings` 一一对应
    pub fn new(
        core: &GfxCore,
        desc: &DescriptorSetDesc,
        resolved: &[ResolvedDescriptor],
        name: &str,
    ) -> GfxResult<Self> {
        desc.validate()?;
        debug_assert_eq!(desc.bindings.len(), resolved.len());

        let device = &core.device;
        let layout_bindings = desc.layout_bindings();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_ci, None) }
            .or_session_failed("create_descriptor_set_layout")?;

        let pool_sizes = desc.pool_sizes();
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes);
        let pool = match unsafe { device.create_descriptor_pool(&pool_ci, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(GfxError::session("create_descriptor_pool", e));
            }
        };

        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        let handle = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(GfxError::session("allocate_descriptor_sets", e));
            }
        };

        let set = Self {
            layout,
            pool,
            handle,
            desc: desc.clone(),
        };
        set.write(core, resolved);
        device.set_debug_name(&set, name);
        device.set_object_debug_name(layout, format!("GfxDescriptorSetLayout::{name}"));
        Ok(set)
    }

    fn write(&self, core: &GfxCore, resolved: &[ResolvedDescriptor]) {
        // info 需要在 update 期间保持有效，先全部收集起来
        let buffer_infos = resolved
            .iter()
            .map(|r| match *r {
                ResolvedDescriptor::UniformBuffer { buffer, range } => vk::DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range,
                },
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();
        let image_infos = resolved
            .iter()
            .map(|r| match *r {
                ResolvedDescriptor::CombinedTextureSampler { view, sampler, layout } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();

        let writes = self
            .desc
            .bindings
            .iter()
            .zip(resolved)
            .enumerate()
            .map(|(i, (binding, r))| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.handle)
                    .dst_binding(binding.binding)
                    .descriptor_type(binding.kind.descriptor_type());
                match r {
                    ResolvedDescriptor::UniformBuffer { .. } => {
                        write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    ResolvedDescriptor::CombinedTextureSampler { .. } => {
                        write.image_info(std::slice::from_ref(&image_infos[i]))
                    }
                }
            })
            .collect_vec();

        unsafe { core.device.update_descriptor_sets(&writes, &[]) };
    }
}

// getters
impl GfxDescriptorSet {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
    #[inline]
    pub fn desc(&self) -> &DescriptorSetDesc {
        &self.desc
    }
}

// destroy
impl GfxDescriptorSet {
    /// descriptor set 跟随 pool 一起释放
    pub fn destroy(self, core: &GfxCore) {
        unsafe {
            core.device.destroy_descriptor_pool(self.pool, None);
            core.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

impl DebugType for GfxDescriptorSet {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorSet"
    }
    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn handles() -> (BufferHandle, TextureHandle, SamplerHandle) {
        let mut buffers = SlotMap::<BufferHandle, ()>::with_key();
        let mut textures = SlotMap::<TextureHandle, ()>::with_key();
        let mut samplers = SlotMap::<SamplerHandle, ()>::with_key();
        (buffers.insert(()), textures.insert(()), samplers.insert(()))
    }

    #[test]
    fn test_layout_and_pool_sizes() {
        let (buffer, texture, sampler) = handles();
        let desc = DescriptorSetDesc::new(vec![
            DescriptorBinding {
                binding: 0,
                kind: DescriptorKind::UniformBuffer(buffer),
                stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
            },
            DescriptorBinding {
                binding: 1,
                kind: DescriptorKind::CombinedTextureSampler(texture, sampler),
                stages: ShaderStages::FRAGMENT,
            },
            DescriptorBinding {
                binding: 2,
                kind: DescriptorKind::CombinedTextureSampler(texture, sampler),
                stages: ShaderStages::FRAGMENT,
            },
        ]);
        assert!(desc.validate().is_ok());

        let layout = desc.layout_bindings();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(layout[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        let sizes = desc.pool_sizes();
        assert_eq!(sizes.len(), 2);
        let count_of = |ty| sizes.iter().find(|s| s.ty == ty).map(|s| s.descriptor_count);
        assert_eq!(count_of(vk::DescriptorType::UNIFORM_BUFFER), Some(1));
        assert_eq!(count_of(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(2));
    }

    #[test]
    fn test_validation() {
        let (buffer, _, _) = handles();
        let binding = DescriptorBinding {
            binding: 0,
            kind: DescriptorKind::UniformBuffer(buffer),
            stages: ShaderStages::VERTEX,
        };
        assert!(DescriptorSetDesc::default().validate().is_err());
        assert!(DescriptorSetDesc::new(vec![binding, binding]).validate().is_err());

        let hidden = DescriptorBinding {
            stages: ShaderStages::empty(),
            ..binding
        };
        assert!(DescriptorSetDesc::new(vec![hidden]).validate().is_err());
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(ShaderStages::ALL_GRAPHICS.to_vk(), vk::ShaderStageFlags::ALL_GRAPHICS);
        assert_eq!(ShaderStages::GEOMETRY.to_vk(), vk::ShaderStageFlags::GEOMETRY);
    }
}
