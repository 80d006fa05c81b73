use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use log::{debug, info};

use crate::{
	core::config::{PresentationMode, TracerConfig},
	libs::{
		binding::{BindingRegistry, Parameters, UniformKind},
		device::{PassDevice, Resolution},
		pipeline::{PassPipeline, PipelineConfig, Presentation},
		shader::ShaderBuilder,
	},
	scene::{CameraRig, Scene},
	ShaderAssets,
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Pass 0 path traces a batch of samples per pixel, pass 1 averages it into everything
/// traced since the last reset.
#[derive(Parameters, Clone, Debug)]
pub struct TracerParameters {
	pub source: String,
	pub postprocessor: String,

	// Folded into the path shader as constants
	pub batch_size: i32,
	pub bounces: i32,

	pub color: [f32; 3],
	pub t: f32,
	pub w: f32,
	pub h: f32,
	pub focal_length: f32,
	pub aperture: f32,
	pub object_distance: f32,
	pub frame_size: f32,
	pub exposure: f32,
	pub camera_matrix: [f32; 16],
	pub sphere_params: Vec<f32>,
	pub skybox: Option<DynamicImage>,

	pub frame_count: i32,
	pub need_rerender: bool,

	#[parameters(skip)]
	pub camera: CameraRig,
}

impl TracerParameters {
	pub fn new(config: &TracerConfig, scene: &Scene, skybox: Option<DynamicImage>) -> Result<Self> {
		let camera = CameraRig::default();

		let object_distance = match config.object_distance {
			Some(distance) => distance,
			None => scene
				.focus_distance(camera.translation, camera.forward())
				.unwrap_or(4.0),
		};
		debug!("Focusing at {:.3}m", object_distance);

		Ok(Self {
			source: load_shader("path.wgsl")?,
			postprocessor: load_shader("average.wgsl")?,
			batch_size: config.batch_size.max(1),
			bounces: config.bounces.max(0),
			color: [0.1, 0.5, 1.0],
			t: 0.0,
			w: config.resolution.w as f32,
			h: config.resolution.h as f32,
			focal_length: config.focal_length_mm / 1000.0,
			aperture: config.aperture(),
			object_distance,
			frame_size: config.frame_size_mm,
			exposure: config.exposure.exp(),
			camera_matrix: camera.matrix(),
			sphere_params: scene.sphere_params(),
			skybox,
			frame_count: 0,
			need_rerender: false,
			camera,
		})
	}

	/// Throws away what was accumulated so far.
	pub fn reset(&mut self) {
		self.frame_count = 0;
		self.need_rerender = true;
	}

	pub fn set_camera(&mut self, camera: CameraRig) {
		self.camera = camera;
		self.camera_matrix = camera.matrix();
		self.reset();
	}

	pub fn set_object_distance(&mut self, distance: f32) {
		self.object_distance = distance;
		self.reset();
	}
}

/// Which fields of [`TracerParameters`] feed which pass.
pub fn registry() -> BindingRegistry {
	let mut registry = BindingRegistry::new();

	registry
		.source("source", 0)
		.source("postprocessor", 1)
		.bind("color", 0, UniformKind::Vec(3))
		.bind("t", 0, UniformKind::Float)
		.bind("w", 0, UniformKind::Float)
		.bind("h", 0, UniformKind::Float)
		.bind("focal_length", 0, UniformKind::Float)
		.bind("aperture", 0, UniformKind::Float)
		.bind("object_distance", 0, UniformKind::Float)
		.bind("frame_size", 0, UniformKind::Float)
		.bind("exposure", 0, UniformKind::Float)
		.bind("camera_matrix", 0, UniformKind::Mat4 { transposed: false })
		.bind("sphere_params", 0, UniformKind::FloatArray)
		.bind("skybox", 0, UniformKind::Texture)
		.bind("frame_count", 1, UniformKind::Int)
		.bind("need_rerender", 1, UniformKind::Int);

	registry
}

pub fn pipeline_config(config: &TracerConfig) -> Result<PipelineConfig> {
	let presentation = match config.presentation {
		PresentationMode::Direct => Presentation::Direct,
		PresentationMode::Decode => Presentation::Decode(load_shader("decode.wgsl")?),
	};

	Ok(PipelineConfig {
		resolution: config.resolution,
		presentation,
		carry: config.carry,
	})
}

fn load_shader(path: &str) -> Result<String> {
	ShaderBuilder::new()
		.include_path(path)
		.build(&ShaderAssets)
		.with_context(|| format!("Couldn't build shader {}", path))
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// The tracer's pipeline together with the device it draws with and the parameters it
/// draws from.
pub struct Tracer<D> {
	pub device: D,
	pub pipeline: PassPipeline,
	pub params: TracerParameters,
}

impl<D: PassDevice> Tracer<D> {
	pub fn new(mut device: D, config: &TracerConfig) -> Result<Self> {
		let scene = Scene::generate(config.seed, config.sphere_count);
		info!("Scene has {} sphere(s)", scene.spheres.len());

		let skybox = config
			.skybox
			.as_ref()
			.map(|path| image::open(path).with_context(|| format!("Couldn't load skybox {}", path.display())))
			.transpose()?;

		let params = TracerParameters::new(config, &scene, skybox)?;
		let mut pipeline = PassPipeline::new(registry(), pipeline_config(config)?);

		let report = pipeline.compile(&mut device, &params);
		if let Some(err) = report.errors.first() {
			return Err(anyhow!("{}", err)).context("The tracer pipeline didn't compile");
		}

		Ok(Self {
			device,
			pipeline,
			params,
		})
	}

	/// Traces one more frame at time `t` (in seconds) and presents the average so far.
	pub fn frame(&mut self, t: f32) {
		if self.pipeline.refresh(&mut self.device, &self.params).is_some() {
			// Fresh targets, nothing left to average with
			self.params.reset();
		}

		self.params.t = t;
		self.params.frame_count += 1;

		self.pipeline.render(&mut self.device, &self.params);

		self.params.need_rerender = false;
	}

	/// Takes effect at the next frame, which recompiles the path shader.
	pub fn set_batch_size(&mut self, batch_size: i32) {
		self.params.batch_size = batch_size.max(1);
	}

	/// Render targets follow at the next frame.
	pub fn resize(&mut self, size: Resolution) {
		self.params.w = size.w as f32;
		self.params.h = size.h as f32;
		self.pipeline.set_resolution(size);
	}

	pub fn frames_accumulated(&self) -> i32 {
		self.params.frame_count
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::libs::{device::reflection, template};

	fn params() -> TracerParameters {
		let config = TracerConfig {
			object_distance: Some(3.0),
			..Default::default()
		};
		TracerParameters::new(&config, &Scene::generate(1, 8), None).unwrap()
	}

	#[test]
	fn embedded_passes_are_valid_programs() {
		let params = params();
		let registry = registry();

		assert_eq!(registry.pass_count(), 2);
		for pass in 0..registry.pass_count() {
			let raw = registry.source_text(pass, &params).unwrap();
			let source = template::evaluate(raw, &params).unwrap();
			reflection::reflect(&reflection::with_vertex_stage(&source)).unwrap();
		}
	}

	#[test]
	fn batch_size_is_folded_into_the_path_shader() {
		let mut params = params();
		params.batch_size = 12;

		let source = template::evaluate(&params.source, &params).unwrap();
		assert!(source.contains("const BATCH_SIZE: i32 = 12;"));
		assert!(source.contains("const BOUNCES: i32 = 6;"));
	}

	#[test]
	fn every_pass_zero_binding_reads_a_value() {
		let params = params();
		let registry = registry();

		// Everything but the missing skybox
		assert_eq!(registry.bindings(0, &params).len(), registry.declared(0).count() - 1);
		assert_eq!(registry.bindings(1, &params).len(), 2);
	}

	#[test]
	fn decode_presentation_is_valid() {
		let config = pipeline_config(&TracerConfig::default()).unwrap();
		let Presentation::Decode(source) = config.presentation else {
			panic!("expected a decode presenter");
		};

		let reflection = reflection::reflect(&reflection::with_vertex_stage(&source)).unwrap();
		assert!(reflection.resource("src").is_some());
	}

	#[test]
	fn moving_the_camera_restarts_accumulation() {
		let mut params = params();
		params.frame_count = 10;

		params.set_camera(CameraRig {
			ry: 0.5,
			..Default::default()
		});

		assert_eq!(params.frame_count, 0);
		assert!(params.need_rerender);
		assert_eq!(params.camera_matrix, params.camera.matrix());
	}
}
