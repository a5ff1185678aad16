//! Strata GFX 层
//!
//! 在 Vulkan / D3D12 / Metal 之上提供统一的图形设备抽象：
//! - [`graphics::Graphics`]：显式持有的图形上下文，根据配置选择后端，并把调用转发给 [`backend::GfxBackend`]
//! - Vulkan 后端：instance / device / surface / swapchain 的创建顺序、命令池与命令列表、
//!   基于 fence 与 semaphore 的帧同步，以及资源工厂
//!
//! 所有对象都由调用者显式持有和销毁，不存在全局单例（诊断回调除外）。

pub mod backend;
pub mod basic;
pub mod commands;
pub mod config;
pub mod error;
pub mod foundation;
pub mod gfx_core;
pub mod graphics;
pub mod resources;
pub mod swapchain;
pub mod vulkan;
