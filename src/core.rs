pub mod config;
pub mod display;
pub mod gameloop;
pub mod gpu;
