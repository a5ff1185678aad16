//! 所有图形后端共同实现的接口
//!
//! [`crate::graphics::Graphics`] 只持有一个 `Box<dyn GfxBackend>`，所有调用都经由这里转发。

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::{
    basic::color::LabelColor,
    error::GfxResult,
    graphics::GraphicsApi,
    resources::{
        buffer::BufferDesc,
        descriptor_set::DescriptorSetDesc,
        handles::{
            BufferHandle, CommandListHandle, CommandPoolHandle, DescriptorSetHandle, PipelineHandle,
            RenderPassHandle, SamplerHandle, ShaderHandle, TextureHandle,
        },
        pipeline::PipelineDesc,
        render_pass::{RenderPassDesc, RenderTarget},
        sampler::SamplerDesc,
        shader::ShaderDesc,
        texture::TextureDesc,
    },
};

pub use crate::commands::command_list::CommandListLevel;
pub use crate::swapchain::lifecycle::ResizeRequest as ResizeOutcome;

/// 一帧中各个阶段的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// 已经拿到 backbuffer，可以录制
    Ready,
    /// 已经提交并 present
    Presented,
    /// swapchain 过期，下一帧开始时重建；这一帧被跳过
    OutOfDate,
    /// acquire 超时或暂无可用 image，这一帧被跳过
    NotReady,
    /// 窗口尺寸为 0，等待非 0 尺寸之前不渲染
    Minimized,
}

impl FrameStatus {
    /// 这一帧没有被渲染
    #[inline]
    pub fn is_skipped(self) -> bool {
        matches!(self, Self::OutOfDate | Self::NotReady | Self::Minimized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: glam::Vec4,
    pub depth: f32,
    pub stencil: u32,
}
impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: LabelColor::CLEAR,
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}
impl Viewport {
    /// 覆盖整个渲染目标
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum QueueKind {
    #[default]
    Graphics,
    /// 没有独立的 compute family 时使用 graphics queue
    Compute,
}

/// render pass 内的命令来自当前 list 还是 secondary list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RenderPassContents {
    #[default]
    Inline,
    SecondaryLists,
}

/// 图形后端
///
/// 单线程使用，所有方法都在持有 context 的渲染线程上调用
pub trait GfxBackend {
    // ---------------------------------------------------------------------------------------------
    // 生命周期

    fn api(&self) -> GraphicsApi;

    /// 依次创建 surface、device、swapchain、command list 和同步对象
    fn initialize(&mut self, window: RawWindowHandle, display: RawDisplayHandle) -> GfxResult<()>;

    fn is_initialized(&self) -> bool;

    /// 记录新的尺寸，实际的重建发生在下一帧开始时
    fn resize(&mut self, width: u32, height: u32) -> GfxResult<ResizeOutcome>;

    /// 有尚未处理的 resize
    fn is_resized(&self) -> bool;

    /// swapchain 可用，并且没有待处理的 resize
    fn is_prepared(&self) -> bool;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// 释放所有对象，之后只能重新 initialize；可以重复调用
    fn destroy(&mut self);

    // ---------------------------------------------------------------------------------------------
    // 帧

    /// 使用默认的 clear pass 渲染一帧：acquire -> record -> submit -> present
    fn render(&mut self, elapsed_time: f32) -> GfxResult<FrameStatus>;

    /// 在帧边界处理挂起的 resize，然后 acquire 下一张 backbuffer 并等待对应 slot 的 fence
    fn acquire_next_swapchain_image(&mut self) -> GfxResult<FrameStatus>;

    /// 当前 backbuffer 对应的 primary command list
    fn swapchain_command_list(&self) -> GfxResult<CommandListHandle>;

    /// 放弃已经 acquire 但还没有 present 的帧，swapchain 在下一帧开始时重建；没有这样的帧时什么也不做
    ///
    /// `render` 出错时，以及在上一帧没有 present 的情况下再次 acquire 时会自动调用
    fn abandon_frame(&mut self);

    /// 当前帧的 command list 按照帧同步协议提交；其它 list 直接提交到其所属的 queue
    fn submit(&mut self, list: CommandListHandle) -> GfxResult<()>;

    /// 提交并等待执行完成，用于上传与回读
    fn submit_immediate(&mut self, list: CommandListHandle) -> GfxResult<()>;

    fn present(&mut self) -> GfxResult<FrameStatus>;

    fn wait_idle(&self) -> GfxResult<()>;

    // ---------------------------------------------------------------------------------------------
    // 资源工厂

    fn create_buffer(&mut self, desc: &BufferDesc, name: &str) -> GfxResult<BufferHandle>;
    fn destroy_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()>;
    fn map_buffer(&mut self, buffer: BufferHandle) -> GfxResult<&mut [u8]>;
    fn unmap_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()>;

    fn create_texture(&mut self, desc: &TextureDesc, name: &str) -> GfxResult<TextureHandle>;
    fn destroy_texture(&mut self, texture: TextureHandle) -> GfxResult<()>;
    fn map_texture(&mut self, texture: TextureHandle) -> GfxResult<&mut [u8]>;
    fn unmap_texture(&mut self, texture: TextureHandle) -> GfxResult<()>;

    fn create_sampler(&mut self, desc: &SamplerDesc, name: &str) -> GfxResult<SamplerHandle>;
    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> GfxResult<()>;

    fn create_shader(&mut self, desc: &ShaderDesc, name: &str) -> GfxResult<ShaderHandle>;
    fn destroy_shader(&mut self, shader: ShaderHandle) -> GfxResult<()>;

    /// `desc.sample_count` 为 0 时使用 context 协商出的采样数
    fn create_render_pass(&mut self, desc: &RenderPassDesc, name: &str) -> GfxResult<RenderPassHandle>;
    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) -> GfxResult<()>;

    fn create_descriptor_set(&mut self, desc: &DescriptorSetDesc, name: &str) -> GfxResult<DescriptorSetHandle>;
    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) -> GfxResult<()>;

    fn create_pipeline(&mut self, desc: &PipelineDesc, name: &str) -> GfxResult<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()>;

    fn create_command_pool(&mut self, queue: QueueKind, name: &str) -> GfxResult<CommandPoolHandle>;
    /// 同时释放从这个 pool 分配的所有 list
    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) -> GfxResult<()>;
    fn create_command_list(
        &mut self,
        pool: CommandPoolHandle,
        level: CommandListLevel,
        name: &str,
    ) -> GfxResult<CommandListHandle>;
    fn destroy_command_list(&mut self, list: CommandListHandle) -> GfxResult<()>;

    // ---------------------------------------------------------------------------------------------
    // 命令录制

    fn begin_commands(&mut self, list: CommandListHandle) -> GfxResult<()>;
    /// secondary list 继承 `target` 的 render pass
    fn begin_secondary_commands(&mut self, list: CommandListHandle, target: RenderTarget) -> GfxResult<()>;
    fn end_commands(&mut self, list: CommandListHandle) -> GfxResult<()>;

    fn begin_render_pass(
        &mut self,
        list: CommandListHandle,
        target: RenderTarget,
        clear: &ClearValues,
        contents: RenderPassContents,
    ) -> GfxResult<()>;
    fn end_render_pass(&mut self, list: CommandListHandle) -> GfxResult<()>;

    fn set_viewport(&mut self, list: CommandListHandle, viewport: &Viewport) -> GfxResult<()>;
    fn set_scissor(&mut self, list: CommandListHandle, scissor: &ScissorRect) -> GfxResult<()>;

    fn bind_pipeline(&mut self, list: CommandListHandle, pipeline: PipelineHandle) -> GfxResult<()>;
    fn bind_descriptor_set(
        &mut self,
        list: CommandListHandle,
        pipeline: PipelineHandle,
        set: DescriptorSetHandle,
    ) -> GfxResult<()>;
    fn bind_vertex_buffers(
        &mut self,
        list: CommandListHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
    ) -> GfxResult<()>;
    /// 索引格式来自 buffer 创建时的描述
    fn bind_index_buffer(&mut self, list: CommandListHandle, buffer: BufferHandle) -> GfxResult<()>;

    fn draw(&mut self, list: CommandListHandle, vertex_count: u32, first_vertex: u32) -> GfxResult<()>;
    fn draw_indexed(
        &mut self,
        list: CommandListHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> GfxResult<()>;
    fn draw_instanced(
        &mut self,
        list: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()>;

    /// 从 `src` 开头复制 `size` 字节到 `dst` 开头
    fn copy_buffer(
        &mut self,
        list: CommandListHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> GfxResult<()>;

    fn execute_commands(&mut self, list: CommandListHandle, secondaries: &[CommandListHandle]) -> GfxResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_frames() {
        assert!(FrameStatus::Minimized.is_skipped());
        assert!(FrameStatus::OutOfDate.is_skipped());
        assert!(!FrameStatus::Presented.is_skipped());
        assert!(!FrameStatus::Ready.is_skipped());
    }

    #[test]
    fn test_full_viewport() {
        let viewport = Viewport::full(1280, 720);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.max_depth, 1.0);
        assert_eq!(ScissorRect::full(1280, 720).height, 720);
        assert_eq!(ClearValues::default().depth, 1.0);
    }
}
