pub mod command_list;
pub mod command_pool;
pub mod command_queue;
pub mod fence;
pub mod frame_sync;
pub mod semaphore;
pub mod submit_info;
