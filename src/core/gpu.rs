use anyhow::{Context, Result};
use wgpu::{
	Adapter, Backends, Device, DeviceDescriptor, Features, Instance, InstanceDescriptor, InstanceFlags, Limits,
	PowerPreference, Queue, RequestAdapterOptions,
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

pub struct Gpu {
	pub instance: Instance,
	pub adapter: Adapter,
	pub device: Device,
	pub queue: Queue,
}

impl Gpu {
	pub async fn new() -> Result<Self> {
		#[cfg(debug_assertions)]
		// Not running in --release mode, activate validation and debug info for wgpu
		let instance = Instance::new(InstanceDescriptor {
			backends: Backends::PRIMARY,
			flags: InstanceFlags::VALIDATION | InstanceFlags::DEBUG,
			..Default::default()
		});

		#[cfg(not(debug_assertions))]
		let instance = Instance::new(InstanceDescriptor {
			backends: Backends::PRIMARY,
			..Default::default()
		});

		let adapter = instance
			.request_adapter(&RequestAdapterOptions {
				power_preference: PowerPreference::HighPerformance,
				compatible_surface: None,
				force_fallback_adapter: false,
			})
			.await
			.context("Couldn't request a compatible adapter")?;

		log::info!("Using {:?}", adapter.get_info());

		// Filterable 32 bit float targets are optional, the pipeline falls back to 16 bit
		let required_features = adapter.features() & Features::FLOAT32_FILTERABLE;

		let (device, queue) = adapter
			.request_device(
				&DeviceDescriptor {
					required_features,
					required_limits: Limits::default(),
					label: None,
				},
				None,
			)
			.await
			.context("Couldn't request a device")?;

		Ok(Self {
			instance,
			adapter,
			device,
			queue,
		})
	}
}
