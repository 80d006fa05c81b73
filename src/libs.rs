pub mod binding;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod template;
