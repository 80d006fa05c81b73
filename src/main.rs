use anyhow::Result;
use log::LevelFilter;
use pass_tracer::core::config::TracerConfig;

fn main() -> Result<()> {
	env_logger::Builder::new()
		.filter_level(LevelFilter::Error)
		.filter_module("pass_tracer", LevelFilter::Debug)
		.init();

	pass_tracer::run(TracerConfig::from_args()?)
}
