use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{fence::GfxFence, semaphore::GfxSemaphore},
    error::{GfxError, GfxResult},
    foundation::device::GfxDevice,
};

/// 每个 backbuffer slot 的 fence 在 CPU 侧看到的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotFenceState {
    /// 已经 signal（创建时或等待完成后），可以 reset
    Signaled,
    /// 已 reset，可以录制并提交
    Reset,
    /// 已随提交交给 GPU，需要先等待
    InFlight,
}

/// 维护每个 slot 的 fence 状态，保证：
/// - wait 一定发生在 reset 之前
/// - reset 一定发生在录制之前
/// - 一个 slot 的上一次提交完成之前不会被重新录制
#[derive(Clone, Debug)]
pub struct FenceTracker {
    states: Vec<SlotFenceState>,
}

impl FenceTracker {
    /// fence 创建时就是 signaled，第一帧不会阻塞
    pub fn new(slot_count: usize) -> Self {
        Self {
            states: vec![SlotFenceState::Signaled; slot_count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, slot: usize) -> GfxResult<SlotFenceState> {
        self.states.get(slot).copied().ok_or(GfxError::InvalidHandle("frame slot"))
    }

    /// 已 reset 但还没提交的 fence 永远不会 signal，等待它会死锁
    pub fn waited(&mut self, slot: usize) -> GfxResult<()> {
        self.wait_with(slot, || Ok(()))
    }

    /// 先检查状态再执行 `wait`，只有等待成功才记为 Signaled
    pub fn wait_with(&mut self, slot: usize, wait: impl FnOnce() -> GfxResult<()>) -> GfxResult<()> {
        self.transition(slot, "wait", |s| matches!(s, SlotFenceState::Signaled | SlotFenceState::InFlight))?;
        wait()?;
        self.states[slot] = SlotFenceState::Signaled;
        Ok(())
    }

    pub fn reset(&mut self, slot: usize) -> GfxResult<()> {
        self.transition(slot, "reset before wait", |s| s == SlotFenceState::Signaled)?;
        self.states[slot] = SlotFenceState::Reset;
        Ok(())
    }

    /// slot 的 command list 只有在 fence 已 reset 时才能被 reset 和录制
    pub fn ensure_recordable(&self, slot: usize) -> GfxResult<()> {
        self.transition(slot, "record before reset", |s| s == SlotFenceState::Reset)
    }

    pub fn submitted(&mut self, slot: usize) -> GfxResult<()> {
        self.transition(slot, "submit", |s| s == SlotFenceState::Reset)?;
        self.states[slot] = SlotFenceState::InFlight;
        Ok(())
    }

    fn transition(
        &self,
        slot: usize,
        operation: &'static str,
        allowed: impl Fn(SlotFenceState) -> bool,
    ) -> GfxResult<()> {
        let state = self.state(slot)?;
        if allowed(state) {
            Ok(())
        } else {
            Err(GfxError::FenceGate { slot, state, operation })
        }
    }
}

/// 一代交换链所对应的同步对象
///
/// - 每个 backbuffer 一个 fence，创建时为 signaled
/// - 两个在帧之间循环使用的 semaphore：image acquired 与 render complete
pub struct GfxFrameSync {
    fences: Vec<GfxFence>,
    image_acquired: GfxSemaphore,
    render_complete: GfxSemaphore,

    tracker: FenceTracker,
}

// new & init
impl GfxFrameSync {
    pub fn new(device: &GfxDevice, slot_count: usize) -> GfxResult<Self> {
        let mut fences = Vec::with_capacity(slot_count);
        for i in 0..slot_count {
            match GfxFence::new(device, true, &format!("frame-{i}")) {
                Ok(fence) => fences.push(fence),
                Err(e) => {
                    fences.into_iter().for_each(|f| f.destroy(device));
                    return Err(e);
                }
            }
        }

        let semaphores = GfxSemaphore::new(device, "image-acquired")
            .and_then(|acquired| match GfxSemaphore::new(device, "render-complete") {
                Ok(complete) => Ok((acquired, complete)),
                Err(e) => {
                    acquired.destroy(device);
                    Err(e)
                }
            });
        let (image_acquired, render_complete) = match semaphores {
            Ok(semaphores) => semaphores,
            Err(e) => {
                fences.into_iter().for_each(|f| f.destroy(device));
                return Err(e);
            }
        };

        Ok(Self {
            fences,
            image_acquired,
            render_complete,
            tracker: FenceTracker::new(slot_count),
        })
    }
}

// getters
impl GfxFrameSync {
    #[inline]
    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }
    #[inline]
    pub fn image_acquired(&self) -> &GfxSemaphore {
        &self.image_acquired
    }
    #[inline]
    pub fn render_complete(&self) -> &GfxSemaphore {
        &self.render_complete
    }
    #[inline]
    pub fn fence(&self, slot: usize) -> GfxResult<&GfxFence> {
        self.fences.get(slot).ok_or(GfxError::InvalidHandle("frame slot"))
    }
    #[inline]
    pub fn tracker(&self) -> &FenceTracker {
        &self.tracker
    }
    #[inline]
    pub fn fence_handles(&self) -> Vec<vk::Fence> {
        self.fences.iter().map(|f| f.handle()).collect_vec()
    }
}

// update
impl GfxFrameSync {
    /// 等待 slot 上一次的提交完成，然后 reset 它的 fence
    ///
    /// 放弃的帧会让整个 swapchain 连同同步对象重建，这里不会遇到已 reset 的 fence
    pub fn wait_and_reset(&mut self, device: &GfxDevice, slot: usize) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxFrameSync::wait_and_reset");

        let fence = self.fences.get(slot).ok_or(GfxError::InvalidHandle("frame slot"))?;
        self.tracker.wait_with(slot, || fence.wait(device))?;

        self.tracker.reset(slot)?;
        self.fence(slot)?.reset(device)
    }

    #[inline]
    pub fn ensure_recordable(&self, slot: usize) -> GfxResult<()> {
        self.tracker.ensure_recordable(slot)
    }

    #[inline]
    pub fn mark_submitted(&mut self, slot: usize) -> GfxResult<()> {
        self.tracker.submitted(slot)
    }
}

// destroy
impl GfxFrameSync {
    /// 调用前需要保证 GPU 不再使用这些对象（resize 或销毁时的 device idle）
    pub fn destroy(self, device: &GfxDevice) {
        log::debug!("destroying frame sync with {} fences", self.fences.len());
        self.fences.into_iter().for_each(|f| f.destroy(device));
        self.image_acquired.destroy(device);
        self.render_complete.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_does_not_block() {
        let mut tracker = FenceTracker::new(3);
        assert_eq!(tracker.len(), 3);
        for slot in 0..3 {
            assert_eq!(tracker.state(slot).unwrap(), SlotFenceState::Signaled);
            tracker.waited(slot).unwrap();
            tracker.reset(slot).unwrap();
        }
    }

    #[test]
    fn test_wait_reset_record_submit_cycle() {
        let mut tracker = FenceTracker::new(2);
        for _frame in 0..4 {
            for slot in 0..2 {
                tracker.waited(slot).unwrap();
                tracker.reset(slot).unwrap();
                tracker.ensure_recordable(slot).unwrap();
                tracker.submitted(slot).unwrap();
                assert_eq!(tracker.state(slot).unwrap(), SlotFenceState::InFlight);
            }
        }
    }

    #[test]
    fn test_reset_requires_wait() {
        let mut tracker = FenceTracker::new(1);
        tracker.waited(0).unwrap();
        tracker.reset(0).unwrap();
        tracker.submitted(0).unwrap();

        // 上一次提交还在 GPU 上，不能 reset，也不能录制
        assert!(matches!(
            tracker.reset(0),
            Err(GfxError::FenceGate {
                state: SlotFenceState::InFlight,
                ..
            })
        ));
        assert!(tracker.ensure_recordable(0).is_err());
    }

    #[test]
    fn test_record_requires_reset() {
        let tracker = FenceTracker::new(1);
        assert!(matches!(
            tracker.ensure_recordable(0),
            Err(GfxError::FenceGate {
                state: SlotFenceState::Signaled,
                ..
            })
        ));
    }

    #[test]
    fn test_wait_on_reset_fence_is_rejected() {
        let mut tracker = FenceTracker::new(1);
        tracker.waited(0).unwrap();
        tracker.reset(0).unwrap();
        assert!(tracker.waited(0).is_err());
    }

    #[test]
    fn test_failed_wait_keeps_in_flight() {
        let mut tracker = FenceTracker::new(1);
        tracker.waited(0).unwrap();
        tracker.reset(0).unwrap();
        tracker.submitted(0).unwrap();

        let err = tracker.wait_with(0, || Err(GfxError::DeviceLost { what: "wait_for_fences" }));
        assert!(matches!(err, Err(GfxError::DeviceLost { .. })));
        assert_eq!(tracker.state(0).unwrap(), SlotFenceState::InFlight);
        assert!(tracker.reset(0).is_err());

        tracker.wait_with(0, || Ok(())).unwrap();
        assert_eq!(tracker.state(0).unwrap(), SlotFenceState::Signaled);
    }

    #[test]
    fn test_wait_is_not_run_for_reset_fence() {
        let mut tracker = FenceTracker::new(1);
        tracker.waited(0).unwrap();
        tracker.reset(0).unwrap();

        let mut called = false;
        assert!(tracker.wait_with(0, || {
            called = true;
            Ok(())
        })
        .is_err());
        assert!(!called);
    }

    #[test]
    fn test_unknown_slot() {
        let mut tracker = FenceTracker::new(2);
        assert!(matches!(tracker.waited(5), Err(GfxError::InvalidHandle(_))));
    }
}
