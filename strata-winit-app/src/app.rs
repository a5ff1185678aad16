use std::time::Instant;

use anyhow::Context;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use strata_gfx::{backend::FrameStatus, config::GfxConfig, graphics::Graphics};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowId},
};

/// 两次 tick 之间经过的时间
pub struct FrameClock {
    last: Instant,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self { last: Instant::now() }
    }

    /// 返回距离上一次 tick 的秒数
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        elapsed
    }
}

pub struct WinitApp {
    graphics: Graphics,
    fullscreen: bool,
    title: String,

    window: Option<Window>,
    clock: FrameClock,

    /// 事件循环内部发生的致命错误，在 run 返回时交给调用者
    error: Option<anyhow::Error>,
}

// 总的 main 函数
impl WinitApp {
    /// 整个程序的入口，阻塞到窗口关闭
    pub fn run(config: GfxConfig) -> anyhow::Result<()> {
        let event_loop = EventLoop::new().context("create event loop")?;

        let mut app = Self {
            fullscreen: config.fullscreen,
            title: config.app_name.clone(),
            graphics: Graphics::new(config),
            window: None,
            clock: FrameClock::new(),
            error: None,
        };

        event_loop.run_app(&mut app).context("run event loop")?;
        log::info!("end run.");

        app.destroy();
        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// new & init
impl WinitApp {
    /// 在 window 创建之后调用，初始化图形上下文
    fn init_after_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let size = PhysicalSize::new(self.graphics.width(), self.graphics.height());
        let mut window_attr = Window::default_attributes().with_title(self.title.clone()).with_inner_size(size);
        if self.fullscreen {
            window_attr = window_attr.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = event_loop.create_window(window_attr).context("create window")?;
        if self.fullscreen && window.fullscreen().is_none() {
            log::warn!("fullscreen is not available on this platform, use a window instead");
        }

        let display = window.display_handle().context("get display handle")?.as_raw();
        let raw_window = window.window_handle().context("get window handle")?.as_raw();

        // 窗口系统可能不会按照请求的尺寸创建窗口
        let actual = window.inner_size();
        self.graphics.resize(actual.width, actual.height)?;
        self.graphics.initialize(raw_window, display)?;

        self.window = Some(window);
        self.clock = FrameClock::new();
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{error:#}");
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }
}

// update
impl WinitApp {
    fn redraw(&mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("WinitApp::redraw");
        let elapsed = self.clock.tick();

        match self.graphics.render(elapsed) {
            Ok(status) => {
                if status.is_skipped() && status != FrameStatus::Minimized {
                    log::debug!("frame skipped: {status:?}");
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                log::warn!("frame failed: {e}");
                Ok(())
            }
        }
    }
}

// destroy
impl WinitApp {
    /// 图形上下文需要在 window 之前销毁，surface 引用了 window
    fn destroy(&mut self) {
        self.graphics.destroy();
        self.window = None;
    }
}

// 各种 winit 的事件处理
impl ApplicationHandler for WinitApp {
    // 建议在这里创建 window 和 Renderer
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        log::info!("winit event: resumed");

        if let Err(e) = self.init_after_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => match self.graphics.resize(size.width, size.height) {
                Ok(outcome) => log::debug!("window resized to {}x{}: {outcome:?}", size.width, size.height),
                Err(e) => log::warn!("resize failed: {e}"),
            },
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
        if self.graphics.is_initialized()
            && let Err(e) = self.graphics.wait_idle()
        {
            log::warn!("wait idle before exit failed: {e}");
        }
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clock_is_monotonic() {
        let mut clock = FrameClock::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let first = clock.tick();
        assert!(first >= 0.005);

        let second = clock.tick();
        assert!(second >= 0.0);
        assert!(second < first + 1.0);
    }
}
