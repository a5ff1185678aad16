use ash::vk;

/// ```text
/// Uninitialized --create--> Created --take_pending--> Resizing --finish_resize--> Created
///                              |                          |
///                              |                          +--abort_resize--> Created (pending 保留)
///                              |                          +--fail_resize---> Failed
///                              +--------destroyed-------> Destroyed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SwapchainState {
    Uninitialized,
    Created,
    Resizing,
    /// 重建失败，旧的 swapchain 已经销毁；只能 destroy 之后重新初始化
    Failed,
    Destroyed,
}

/// resize 请求的处理结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResizeRequest {
    /// 与当前（或已经挂起的）尺寸相同，并且 swapchain 没有过期
    Ignored,
    /// 在下一帧开始时重建
    Scheduled,
    /// 尺寸为 0（窗口最小化），记录下来但不重建，直到收到非 0 尺寸
    Deferred,
}

/// 记录 swapchain 的状态，以及等待在帧边界上处理的 resize
///
/// 只负责决策，不持有任何 gpu 对象
#[derive(Clone, Debug)]
pub struct SwapchainLifecycle {
    state: SwapchainState,
    current: vk::Extent2D,
    pending: Option<vk::Extent2D>,
    /// acquire/present 报告了 out of date 或 suboptimal，相同尺寸也需要重建
    out_of_date: bool,
}

impl Default for SwapchainLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl SwapchainLifecycle {
    pub fn new() -> Self {
        Self {
            state: SwapchainState::Uninitialized,
            current: vk::Extent2D::default(),
            pending: None,
            out_of_date: false,
        }
    }

    /// 第一次创建成功
    pub fn created(&mut self, extent: vk::Extent2D) {
        self.state = SwapchainState::Created;
        self.current = extent;
        self.pending = None;
        self.out_of_date = false;
    }
}

// getters
impl SwapchainLifecycle {
    #[inline]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    #[inline]
    pub fn current_extent(&self) -> vk::Extent2D {
        self.current
    }

    #[inline]
    pub fn pending_extent(&self) -> Option<vk::Extent2D> {
        self.pending
    }

    /// 有挂起的 resize 或者 swapchain 已过期
    #[inline]
    pub fn needs_recreate(&self) -> bool {
        self.pending.is_some() || self.out_of_date
    }

    /// swapchain 已创建且没有需要处理的 resize
    #[inline]
    pub fn is_up_to_date(&self) -> bool {
        self.state == SwapchainState::Created && !self.needs_recreate()
    }
}

// update
impl SwapchainLifecycle {
    /// 重建失败之后不再接受新的尺寸
    pub fn request_resize(&mut self, extent: vk::Extent2D) -> ResizeRequest {
        if self.state == SwapchainState::Failed {
            return ResizeRequest::Ignored;
        }
        let same_as_pending = self.pending == Some(extent);
        let same_as_current = self.pending.is_none() && self.current == extent && !self.out_of_date;
        if same_as_pending || same_as_current {
            return ResizeRequest::Ignored;
        }

        self.pending = Some(extent);
        if is_zero(extent) { ResizeRequest::Deferred } else { ResizeRequest::Scheduled }
    }

    /// 对应 acquire/present 报告的过期，强制在下一帧边界重建
    pub fn mark_out_of_date(&mut self) {
        self.out_of_date = true;
    }

    /// 在帧边界调用：如果需要并且可以重建，进入 Resizing 并返回目标尺寸
    ///
    /// 目标尺寸为 0 时保持挂起，返回 None
    pub fn take_pending(&mut self) -> Option<vk::Extent2D> {
        if self.state != SwapchainState::Created || !self.needs_recreate() {
            return None;
        }
        let target = self.pending.unwrap_or(self.current);
        if is_zero(target) {
            return None;
        }

        self.state = SwapchainState::Resizing;
        self.pending = None;
        self.out_of_date = false;
        Some(target)
    }

    #[inline]
    pub fn finish_resize(&mut self, extent: vk::Extent2D) {
        self.created(extent);
    }

    /// surface 当前无法创建 swapchain（例如最小化），旧的 swapchain 保持不变，稍后重试
    pub fn abort_resize(&mut self, target: vk::Extent2D) {
        self.state = SwapchainState::Created;
        self.pending = Some(target);
    }

    /// 重建过程中出错
    pub fn fail_resize(&mut self) {
        self.state = SwapchainState::Failed;
        self.pending = None;
        self.out_of_date = false;
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.state == SwapchainState::Failed
    }

    pub fn destroyed(&mut self) {
        self.state = SwapchainState::Destroyed;
        self.pending = None;
        self.out_of_date = false;
    }
}

#[inline]
fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn created(width: u32, height: u32) -> SwapchainLifecycle {
        let mut lifecycle = SwapchainLifecycle::new();
        lifecycle.created(extent(width, height));
        lifecycle
    }

    #[test]
    fn test_same_extent_is_noop() {
        let mut lifecycle = created(1280, 720);
        assert_eq!(lifecycle.request_resize(extent(1280, 720)), ResizeRequest::Ignored);
        assert!(lifecycle.take_pending().is_none());
        assert!(lifecycle.is_up_to_date());
    }

    #[test]
    fn test_repeated_pending_request_is_noop() {
        let mut lifecycle = created(1280, 720);
        assert_eq!(lifecycle.request_resize(extent(800, 600)), ResizeRequest::Scheduled);
        assert_eq!(lifecycle.request_resize(extent(800, 600)), ResizeRequest::Ignored);

        assert_eq!(lifecycle.take_pending(), Some(extent(800, 600)));
        assert_eq!(lifecycle.state(), SwapchainState::Resizing);
        lifecycle.finish_resize(extent(800, 600));
        assert_eq!(lifecycle.state(), SwapchainState::Created);
        assert_eq!(lifecycle.current_extent(), extent(800, 600));
    }

    #[test]
    fn test_resize_back_to_current_extent_still_applies() {
        let mut lifecycle = created(1280, 720);
        lifecycle.request_resize(extent(800, 600));
        // 挂起了别的尺寸，再改回原尺寸也需要处理
        assert_eq!(lifecycle.request_resize(extent(1280, 720)), ResizeRequest::Scheduled);
        assert_eq!(lifecycle.take_pending(), Some(extent(1280, 720)));
    }

    #[test]
    fn test_zero_extent_is_deferred() {
        let mut lifecycle = created(1280, 720);
        assert_eq!(lifecycle.request_resize(extent(0, 0)), ResizeRequest::Deferred);
        assert!(lifecycle.needs_recreate());
        assert!(lifecycle.take_pending().is_none());
        assert_eq!(lifecycle.state(), SwapchainState::Created);

        assert_eq!(lifecycle.request_resize(extent(1024, 768)), ResizeRequest::Scheduled);
        assert_eq!(lifecycle.take_pending(), Some(extent(1024, 768)));
    }

    #[test]
    fn test_out_of_date_forces_same_extent() {
        let mut lifecycle = created(1280, 720);
        lifecycle.mark_out_of_date();
        assert!(!lifecycle.is_up_to_date());
        assert_eq!(lifecycle.request_resize(extent(1280, 720)), ResizeRequest::Scheduled);
        assert_eq!(lifecycle.take_pending(), Some(extent(1280, 720)));

        let mut lifecycle = created(1280, 720);
        lifecycle.mark_out_of_date();
        assert_eq!(lifecycle.take_pending(), Some(extent(1280, 720)));
    }

    #[test]
    fn test_abort_keeps_pending() {
        let mut lifecycle = created(1280, 720);
        lifecycle.request_resize(extent(640, 480));
        let target = lifecycle.take_pending().unwrap();
        lifecycle.abort_resize(target);
        assert_eq!(lifecycle.state(), SwapchainState::Created);
        assert_eq!(lifecycle.pending_extent(), Some(extent(640, 480)));
        assert_eq!(lifecycle.take_pending(), Some(extent(640, 480)));
    }

    #[test]
    fn test_failed_resize_is_terminal() {
        let mut lifecycle = created(1280, 720);
        lifecycle.request_resize(extent(800, 600));
        assert_eq!(lifecycle.take_pending(), Some(extent(800, 600)));
        lifecycle.fail_resize();

        assert!(lifecycle.is_failed());
        assert!(!lifecycle.is_up_to_date());
        assert!(!lifecycle.needs_recreate());
        // 新的尺寸不会被挂起，也不会再触发重建
        assert_eq!(lifecycle.request_resize(extent(640, 480)), ResizeRequest::Ignored);
        assert!(lifecycle.take_pending().is_none());

        // 重新初始化之后恢复正常
        lifecycle.destroyed();
        lifecycle.created(extent(640, 480));
        assert!(lifecycle.is_up_to_date());
        assert_eq!(lifecycle.request_resize(extent(800, 600)), ResizeRequest::Scheduled);
    }

    #[test]
    fn test_not_created() {
        let mut lifecycle = SwapchainLifecycle::new();
        lifecycle.request_resize(extent(800, 600));
        assert!(lifecycle.take_pending().is_none());

        let mut lifecycle = created(800, 600);
        lifecycle.destroyed();
        lifecycle.mark_out_of_date();
        assert!(lifecycle.take_pending().is_none());
        assert_eq!(lifecycle.state(), SwapchainState::Destroyed);
    }
}
