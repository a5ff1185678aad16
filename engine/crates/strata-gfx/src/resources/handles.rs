//! 资源工厂返回给调用者的句柄
//!
//! 句柄是带代数的 key，可以随意复制；资源销毁之后旧的句柄不会再匹配到任何资源。

use slotmap::new_key_type;

new_key_type! {
    pub struct BufferHandle;
    pub struct TextureHandle;
    pub struct SamplerHandle;
    pub struct ShaderHandle;
    pub struct RenderPassHandle;
    pub struct PipelineHandle;
    pub struct DescriptorSetHandle;
    pub struct CommandPoolHandle;
    pub struct CommandListHandle;
}
