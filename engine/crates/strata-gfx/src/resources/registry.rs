use slotmap::{Key, SlotMap};

use crate::{
    commands::{command_list::GfxCommandList, command_pool::GfxCommandPool},
    error::{GfxError, GfxResult},
    gfx_core::GfxCore,
    resources::{
        buffer::GfxBuffer,
        descriptor_set::GfxDescriptorSet,
        handles::{
            BufferHandle, CommandListHandle, CommandPoolHandle, DescriptorSetHandle, PipelineHandle,
            RenderPassHandle, SamplerHandle, ShaderHandle, TextureHandle,
        },
        pipeline::GfxPipeline,
        render_pass::GfxRenderPass,
        sampler::GfxSampler,
        shader::GfxShaderProgram,
        texture::GfxTexture,
    },
};

/// 一类资源的存储，key 失效之后查询返回 [`GfxError::InvalidHandle`]
pub struct ResourcePool<K: Key, V> {
    items: SlotMap<K, V>,
    kind: &'static str,
}

impl<K: Key, V> ResourcePool<K, V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            items: SlotMap::with_key(),
            kind,
        }
    }

    #[inline]
    pub fn insert(&mut self, value: V) -> K {
        self.items.insert(value)
    }

    #[inline]
    pub fn get(&self, key: K) -> GfxResult<&V> {
        self.items.get(key).ok_or(GfxError::InvalidHandle(self.kind))
    }

    #[inline]
    pub fn get_mut(&mut self, key: K) -> GfxResult<&mut V> {
        self.items.get_mut(key).ok_or(GfxError::InvalidHandle(self.kind))
    }

    /// 同一个 key 第二次 remove 返回 InvalidHandle
    #[inline]
    pub fn remove(&mut self, key: K) -> GfxResult<V> {
        self.items.remove(key).ok_or(GfxError::InvalidHandle(self.kind))
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.items.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.items.iter()
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// 移除满足条件的所有资源
    pub fn extract_if(&mut self, mut pred: impl FnMut(&V) -> bool) -> Vec<V> {
        let keys = self.items.iter().filter(|(_, v)| pred(v)).map(|(k, _)| k).collect::<Vec<_>>();
        keys.into_iter().filter_map(|k| self.items.remove(k)).collect()
    }

    /// 取出剩余的全部资源，非空时认为是泄漏并给出警告
    pub fn drain_leaked(&mut self) -> Vec<V> {
        if !self.items.is_empty() {
            log::warn!("{} {} resource(s) still alive at teardown, destroying them", self.items.len(), self.kind);
        }
        self.items.drain().map(|(_, v)| v).collect()
    }
}

/// 资源工厂创建的全部对象，句柄只在这里解析
pub struct GfxResourceRegistry {
    pub buffers: ResourcePool<BufferHandle, GfxBuffer>,
    pub textures: ResourcePool<TextureHandle, GfxTexture>,
    pub samplers: ResourcePool<SamplerHandle, GfxSampler>,
    pub shaders: ResourcePool<ShaderHandle, GfxShaderProgram>,
    pub render_passes: ResourcePool<RenderPassHandle, GfxRenderPass>,
    pub pipelines: ResourcePool<PipelineHandle, GfxPipeline>,
    pub descriptor_sets: ResourcePool<DescriptorSetHandle, GfxDescriptorSet>,
    pub command_pools: ResourcePool<CommandPoolHandle, GfxCommandPool>,
    pub command_lists: ResourcePool<CommandListHandle, GfxCommandList>,
}

impl Default for GfxResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl GfxResourceRegistry {
    pub fn new() -> Self {
        Self {
            buffers: ResourcePool::new("buffer"),
            textures: ResourcePool::new("texture"),
            samplers: ResourcePool::new("sampler"),
            shaders: ResourcePool::new("shader"),
            render_passes: ResourcePool::new("render pass"),
            pipelines: ResourcePool::new("pipeline"),
            descriptor_sets: ResourcePool::new("descriptor set"),
            command_pools: ResourcePool::new("command pool"),
            command_lists: ResourcePool::new("command list"),
        }
    }
}

// getters
impl GfxResourceRegistry {
    pub fn live_count(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.samplers.len()
            + self.shaders.len()
            + self.render_passes.len()
            + self.pipelines.len()
            + self.descriptor_sets.len()
            + self.command_pools.len()
            + self.command_lists.len()
    }
}

// destroy
impl GfxResourceRegistry {
    /// 按依赖的逆序销毁：先 pipeline 与 descriptor set，再它们引用的资源，最后 command pool
    ///
    /// 调用前 device 必须处于 idle
    pub fn destroy_all(&mut self, core: &GfxCore) {
        let _span = tracy_client::span!("GfxResourceRegistry::destroy_all");

        self.pipelines.drain_leaked().into_iter().for_each(|p| p.destroy(core));
        self.descriptor_sets.drain_leaked().into_iter().for_each(|s| s.destroy(core));
        self.render_passes.drain_leaked().into_iter().for_each(|p| p.destroy(core));
        self.shaders.drain_leaked().into_iter().for_each(|s| s.destroy(core));
        self.samplers.drain_leaked().into_iter().for_each(|s| s.destroy(core));
        self.textures.drain_leaked().into_iter().for_each(|t| t.destroy(core));
        self.buffers.drain_leaked().into_iter().for_each(|b| b.destroy(core));
        self.command_lists.drain_leaked().into_iter().for_each(|l| l.free(&core.device));
        self.command_pools.drain_leaked().into_iter().for_each(|p| p.destroy(&core.device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_is_reported() {
        let mut pool = ResourcePool::<BufferHandle, u32>::new("buffer");
        let handle = pool.insert(7);
        assert_eq!(*pool.get(handle).unwrap(), 7);

        assert_eq!(pool.remove(handle).unwrap(), 7);
        assert!(matches!(pool.remove(handle), Err(GfxError::InvalidHandle("buffer"))));
        assert!(matches!(pool.get(handle), Err(GfxError::InvalidHandle("buffer"))));

        // 复用同一个槽位的新资源不会被旧句柄访问到
        let new_handle = pool.insert(8);
        assert_ne!(handle, new_handle);
        assert!(pool.get(handle).is_err());
        assert_eq!(*pool.get(new_handle).unwrap(), 8);
    }

    #[test]
    fn test_default_handle_is_invalid() {
        let pool = ResourcePool::<TextureHandle, ()>::new("texture");
        assert!(matches!(pool.get(TextureHandle::default()), Err(GfxError::InvalidHandle("texture"))));
    }

    #[test]
    fn test_extract_if_and_drain() {
        let mut pool = ResourcePool::<CommandListHandle, u32>::new("command list");
        let a = pool.insert(1);
        pool.insert(2);
        pool.insert(1);

        let mut extracted = pool.extract_if(|v| *v == 1);
        extracted.sort();
        assert_eq!(extracted, vec![1, 1]);
        assert!(!pool.contains(a));
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.drain_leaked(), vec![2]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_empty_registry() {
        assert_eq!(GfxResourceRegistry::new().live_count(), 0);
    }
}
