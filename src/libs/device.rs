pub mod reflection;
pub mod software;
pub mod wgpu_device;

use derive_more::Display;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "program#{}", _0)]
pub struct ProgramId(pub u32);

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "texture#{}", _0)]
pub struct TextureId(pub u32);

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "framebuffer#{}", _0)]
pub struct FramebufferId(pub u32);

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "quad#{}", _0)]
pub struct QuadId(pub u32);

/// Location of an active uniform inside one linked program. Only meaningful for the
/// program it was resolved from.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "location#{}", _0)]
pub struct UniformLocation(pub u32);

pub type TextureUnit = u32;

/// Size in pixels of a render target or of the screen.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(fmt = "{}x{}", w, h)]
pub struct Resolution {
	pub w: u32,
	pub h: u32,
}

impl Resolution {
	pub const fn new(w: u32, h: u32) -> Self {
		Self { w, h }
	}

	pub fn pixel_count(&self) -> usize {
		self.w as usize * self.h as usize
	}
}

impl Default for Resolution {
	fn default() -> Self {
		Resolution::new(1500, 1000)
	}
}

/// Every object a device hands out, so that it can be given back once it is no
/// longer referenced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceObject {
	Program(ProgramId),
	Texture(TextureId),
	Framebuffer(FramebufferId),
	Quad(QuadId),
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// The arguments of one uniform upload, shaped like the call that performs it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformArgs<'a> {
	Int(i32),
	Float(f32),
	/// 2, 3 or 4 components
	Vec(&'a [f32]),
	FloatArray(&'a [f32]),
	/// 9 floats, column-major unless `transposed`
	Mat3 { transposed: bool, data: &'a [f32] },
	/// 16 floats, column-major unless `transposed`
	Mat4 { transposed: bool, data: &'a [f32] },
	/// Points a sampler uniform at a texture unit
	Sampler(TextureUnit),
}

/// Owned copy of [`UniformArgs`], kept by devices that need to remember the last
/// value of every location.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
	Int(i32),
	Float(f32),
	Vec(Vec<f32>),
	FloatArray(Vec<f32>),
	Mat3 { transposed: bool, data: Vec<f32> },
	Mat4 { transposed: bool, data: Vec<f32> },
	Sampler(TextureUnit),
}

impl From<UniformArgs<'_>> for UniformValue {
	fn from(args: UniformArgs<'_>) -> Self {
		match args {
			UniformArgs::Int(value) => Self::Int(value),
			UniformArgs::Float(value) => Self::Float(value),
			UniformArgs::Vec(values) => Self::Vec(values.to_vec()),
			UniformArgs::FloatArray(values) => Self::FloatArray(values.to_vec()),
			UniformArgs::Mat3 { transposed, data } => Self::Mat3 {
				transposed,
				data: data.to_vec(),
			},
			UniformArgs::Mat4 { transposed, data } => Self::Mat4 {
				transposed,
				data: data.to_vec(),
			},
			UniformArgs::Sampler(unit) => Self::Sampler(unit),
		}
	}
}

impl UniformValue {
	pub fn as_args(&self) -> UniformArgs<'_> {
		match self {
			Self::Int(value) => UniformArgs::Int(*value),
			Self::Float(value) => UniformArgs::Float(*value),
			Self::Vec(values) => UniformArgs::Vec(values),
			Self::FloatArray(values) => UniformArgs::FloatArray(values),
			Self::Mat3 { transposed, data } => UniformArgs::Mat3 {
				transposed: *transposed,
				data,
			},
			Self::Mat4 { transposed, data } => UniformArgs::Mat4 {
				transposed: *transposed,
				data,
			},
			Self::Sampler(unit) => UniformArgs::Sampler(*unit),
		}
	}
}

/// Transposes a square column-major matrix of size `n`.
pub fn transpose(data: &[f32], n: usize) -> Vec<f32> {
	let mut out = data.to_vec();
	for row in 0..n {
		for col in 0..n {
			out[col * n + row] = data[row * n + col];
		}
	}
	out
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// A GL-shaped view of a GPU: objects are referred to by handles, and drawing works on
/// whatever program, framebuffer and texture units are currently bound.
///
/// Every program is a fragment stage paired with the device's own full-screen vertex
/// stage, which forwards the quad position as `uv` in `[0, 1]`, with `uv.y` growing
/// downwards like texture coordinates do.
pub trait PassDevice {
	/// Compiles and links a fragment program. On failure returns the compiler/linker
	/// log.
	fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, String>;

	/// The location of the active uniform `name`, if the program uses it.
	fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

	/// Allocates the full-screen quad vertex buffer and binds it to the program's
	/// position attribute.
	fn create_quad(&mut self, program: ProgramId) -> QuadId;

	/// Allocates a high precision color render target, cleared to zero.
	fn create_target(&mut self, label: &str, size: Resolution) -> TextureId;

	/// Uploads an image into a sampled texture (clamped edges, linear filtering).
	fn create_image_texture(&mut self, label: &str, image: &DynamicImage) -> TextureId;

	fn create_framebuffer(&mut self, target: TextureId) -> FramebufferId;

	/// `None` binds the visible screen.
	fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

	fn use_program(&mut self, program: ProgramId);

	fn bind_texture(&mut self, unit: TextureUnit, texture: TextureId);

	/// Leaves `unit` empty. Samplers pointing at an empty unit read a blank texture.
	fn unbind_texture(&mut self, unit: TextureUnit);

	/// Sets a uniform of the program currently in use.
	fn set_uniform(&mut self, location: UniformLocation, args: UniformArgs<'_>);

	/// Draws the quad as a 4 vertex triangle strip into the bound framebuffer.
	fn draw_quad(&mut self, quad: QuadId);

	fn copy_texture(&mut self, from: TextureId, to: TextureId);

	/// Shows `texture` on the screen as is.
	fn present(&mut self, texture: TextureId);

	/// Hands the screen over to the display once everything for this frame was
	/// issued.
	fn end_frame(&mut self);

	fn release(&mut self, object: DeviceObject);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn transpose_swaps_rows_and_columns() {
		let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
		assert_eq!(transpose(&data, 3), vec![1.0, 4.0, 7.0, 2.0, 5.0, 8.0, 3.0, 6.0, 9.0]);
	}

	#[test]
	fn uniform_value_keeps_call_shape() {
		let data = [0.0; 16];
		let args = UniformArgs::Mat4 {
			transposed: true,
			data: &data,
		};
		let value = UniformValue::from(args);
		assert_eq!(value.as_args(), args);
	}
}
