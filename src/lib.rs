pub mod core;
pub mod libs;
pub mod scene;
pub mod tracer;

// Lets `#[derive(Parameters)]` name this crate from inside it
extern crate self as pass_tracer;

use anyhow::Result;
use rust_embed::Embed;

use crate::core::{config::TracerConfig, gameloop};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Embed)]
#[folder = "src/shader/"]
#[prefix = "/"]
pub struct ShaderAssets;

/// The default `EventLoop` type to avoid having to add the extra unit type
type EventLoop = winit::event_loop::EventLoop<()>;

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

pub fn run(config: TracerConfig) -> Result<()> {
	log::info!("Starting with {:?}", config);

	match &config.offscreen {
		Some(offscreen) => gameloop::run_offscreen(&config, offscreen),
		None => gameloop::run(&config),
	}
}
