use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use wgpu::FilterMode;

use crate::libs::{device::Resolution, pipeline::FrameCarry};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Everything the tracer can be told before it starts, read from a RON file.
///
/// Missing keys keep their default value, so a file only needs what it changes:
///
/// ```ron
/// (
///     resolution: (w: 800, h: 600),
///     batch_size: 8,
///     offscreen: Some((frames: 64, output: "render.png")),
/// )
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
	pub title: String,
	pub resolution: Resolution,

	/// Samples per pixel per frame, folded into the path shader at compile time
	pub batch_size: i32,
	pub bounces: i32,

	pub presentation: PresentationMode,
	pub carry: FrameCarry,
	pub filter: Filter,

	pub seed: u64,
	/// Random spheres on top of the fixed ones
	pub sphere_count: usize,
	pub skybox: Option<PathBuf>,

	pub focal_length_mm: f32,
	pub f_number: f32,
	/// `None` focuses on whatever the camera looks at
	pub object_distance: Option<f32>,
	pub frame_size_mm: f32,
	/// In stops
	pub exposure: f32,

	/// Renders a fixed number of frames without a window and saves the result
	pub offscreen: Option<OffscreenConfig>,
}

impl Default for TracerConfig {
	fn default() -> Self {
		Self {
			title: "Pass Tracer".to_owned(),
			resolution: Resolution::default(),
			batch_size: 4,
			bounces: 6,
			presentation: PresentationMode::default(),
			carry: FrameCarry::default(),
			filter: Filter::default(),
			seed: 1,
			sphere_count: 8,
			skybox: None,
			focal_length_mm: 50.0,
			f_number: 2.8,
			object_distance: None,
			frame_size_mm: 36.0,
			exposure: 0.0,
			offscreen: None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffscreenConfig {
	pub frames: u32,
	pub output: PathBuf,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentationMode {
	/// The accumulated radiance is shown clamped
	Direct,
	/// The accumulated radiance goes through a tone mapping program
	#[default]
	Decode,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
	Nearest,
	#[default]
	Linear,
}

impl From<Filter> for FilterMode {
	fn from(filter: Filter) -> Self {
		match filter {
			Filter::Nearest => FilterMode::Nearest,
			Filter::Linear => FilterMode::Linear,
		}
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

impl TracerConfig {
	pub fn from_ron(text: &str) -> Result<Self> {
		ron::from_str(text).context("Couldn't parse the tracer config")
	}

	pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();
		let text = fs::read_to_string(&path).with_context(|| format!("Couldn't read config file {}", path.display()))?;

		Self::from_ron(&text).with_context(|| format!("Invalid config file {}", path.display()))
	}

	/// The config file named by the first command line argument, or the defaults.
	pub fn from_args() -> Result<Self> {
		match std::env::args_os().nth(1) {
			Some(path) => Self::load(path),
			None => Ok(Self::default()),
		}
	}

	/// Lens aperture diameter in meters.
	pub fn aperture(&self) -> f32 {
		self.focal_length_mm / self.f_number.max(f32::EPSILON) / 1000.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_keys_keep_defaults() {
		let config = TracerConfig::from_ron("(batch_size: 16, carry: Copy, offscreen: Some((frames: 3, output: \"out.png\")))")
			.unwrap();

		assert_eq!(config.batch_size, 16);
		assert_eq!(config.carry, FrameCarry::Copy);
		assert_eq!(config.resolution, Resolution::new(1500, 1000));
		assert_eq!(config.presentation, PresentationMode::Decode);
		assert_eq!(
			config.offscreen,
			Some(OffscreenConfig {
				frames: 3,
				output: PathBuf::from("out.png")
			})
		);
	}

	#[test]
	fn unknown_values_are_errors() {
		assert!(TracerConfig::from_ron("(filter: Cubic)").is_err());
	}

	#[test]
	fn aperture_comes_from_focal_length_and_f_number() {
		let config = TracerConfig {
			focal_length_mm: 50.0,
			f_number: 2.0,
			..Default::default()
		};
		assert!((config.aperture() - 0.025).abs() < 1e-6);
	}
}
