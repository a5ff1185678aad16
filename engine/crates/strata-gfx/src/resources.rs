pub mod buffer;
pub mod descriptor_set;
pub mod handles;
pub mod pipeline;
pub mod registry;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod texture;
