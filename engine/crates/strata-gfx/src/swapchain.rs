pub mod lifecycle;
pub mod negotiation;
pub mod render_swapchain;
pub mod surface;
