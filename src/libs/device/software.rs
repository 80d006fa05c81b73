use std::{collections::HashMap, fmt, sync::Arc};

use image::DynamicImage;
use log::{trace, warn};

use super::{
	DeviceObject, FramebufferId, PassDevice, ProgramId, QuadId, Resolution, TextureId, TextureUnit, UniformArgs, UniformLocation,
	UniformValue,
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

pub type Texel = [f32; 4];

pub type FragmentFn = Arc<dyn Fn(&Fragment<'_>) -> Texel + Send + Sync>;

/// A fragment program for the [`SoftwareDevice`]: a native closure run once per pixel,
/// together with the uniforms it reads (samplers included).
#[derive(Clone)]
pub struct SoftwareShader {
	main: FragmentFn,
	uniforms: Vec<String>,
}

impl SoftwareShader {
	pub fn new<F>(main: F) -> Self
	where
		F: Fn(&Fragment<'_>) -> Texel + Send + Sync + 'static,
	{
		Self {
			main: Arc::new(main),
			uniforms: vec![],
		}
	}

	/// Declares `name` as an active uniform of the program.
	pub fn uniform(mut self, name: impl Into<String>) -> Self {
		self.uniforms.push(name.into());
		self
	}
}

impl fmt::Debug for SoftwareShader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SoftwareShader")
			.field("uniforms", &self.uniforms)
			.finish_non_exhaustive()
	}
}

/// One call received by the device, as recorded in its trace.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
	BindFramebuffer(Option<FramebufferId>),
	UseProgram(ProgramId),
	BindTexture {
		unit: TextureUnit,
		texture: TextureId,
	},
	UnbindTexture {
		unit: TextureUnit,
	},
	SetUniform {
		program: ProgramId,
		location: UniformLocation,
		name: String,
		value: UniformValue,
	},
	Draw {
		program: ProgramId,
		framebuffer: Option<FramebufferId>,
	},
	Copy {
		from: TextureId,
		to: TextureId,
	},
	Present(TextureId),
	EndFrame,
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Clone, Debug)]
struct Texture {
	size: Resolution,
	texels: Vec<Texel>,
}

impl Texture {
	fn blank(size: Resolution) -> Self {
		Self {
			size,
			texels: vec![[0.0; 4]; size.pixel_count()],
		}
	}

	fn nearest(&self, uv: [f32; 2]) -> Texel {
		if self.texels.is_empty() {
			return [0.0; 4];
		}

		let x = ((uv[0] * self.size.w as f32).floor() as i64).clamp(0, self.size.w as i64 - 1) as usize;
		let y = ((uv[1] * self.size.h as f32).floor() as i64).clamp(0, self.size.h as i64 - 1) as usize;
		self.texels[y * self.size.w as usize + x]
	}

	fn resampled(&self, size: Resolution) -> Vec<Texel> {
		if size == self.size {
			return self.texels.clone();
		}

		let mut texels = Vec::with_capacity(size.pixel_count());
		for y in 0..size.h {
			for x in 0..size.w {
				texels.push(self.nearest(pixel_uv(x, y, size)));
			}
		}
		texels
	}
}

#[derive(Clone, Debug)]
struct Program {
	label: String,
	shader: SoftwareShader,
	/// Last value set, per location
	values: Vec<Option<UniformValue>>,
}

fn pixel_uv(x: u32, y: u32, size: Resolution) -> [f32; 2] {
	[(x as f32 + 0.5) / size.w as f32, (y as f32 + 0.5) / size.h as f32]
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// The view a [`SoftwareShader`] gets of the pixel it shades.
pub struct Fragment<'a> {
	pub x: u32,
	pub y: u32,
	pub size: Resolution,
	device: &'a SoftwareDevice,
	program: &'a Program,
}

impl Fragment<'_> {
	/// Texture coordinate of the pixel center, `y` growing downwards.
	pub fn uv(&self) -> [f32; 2] {
		pixel_uv(self.x, self.y, self.size)
	}

	pub fn value(&self, name: &str) -> Option<&UniformValue> {
		let location = self.program.shader.uniforms.iter().position(|n| n == name)?;
		self.program.values.get(location)?.as_ref()
	}

	pub fn float(&self, name: &str) -> f32 {
		match self.value(name) {
			Some(UniformValue::Float(value)) => *value,
			Some(UniformValue::Int(value)) => *value as f32,
			_ => 0.0,
		}
	}

	pub fn int(&self, name: &str) -> i32 {
		match self.value(name) {
			Some(UniformValue::Int(value)) => *value,
			_ => 0,
		}
	}

	/// Components of a vector, float array or matrix uniform, as they were uploaded.
	pub fn floats(&self, name: &str) -> &[f32] {
		match self.value(name) {
			Some(UniformValue::Vec(values) | UniformValue::FloatArray(values)) => values,
			Some(UniformValue::Mat3 { data, .. } | UniformValue::Mat4 { data, .. }) => data,
			_ => &[],
		}
	}

	/// Nearest sample of the texture bound to the unit the sampler uniform `name` points
	/// at. Zero when nothing is bound there.
	pub fn sample(&self, name: &str, uv: [f32; 2]) -> Texel {
		let Some(UniformValue::Sampler(unit)) = self.value(name) else {
			return [0.0; 4];
		};

		self.device
			.units
			.get(unit)
			.and_then(|texture| self.device.textures.get(texture))
			.map_or([0.0; 4], |texture| texture.nearest(uv))
	}

	/// Sample of `name` at this pixel.
	pub fn texel(&self, name: &str) -> Texel {
		self.sample(name, self.uv())
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// A reference [`PassDevice`] that rasterises on the CPU.
///
/// Programs are not parsed: the source handed to `compile_program` (trimmed) is looked up
/// among the shaders registered with [`SoftwareDevice::register`].
#[derive(Debug)]
pub struct SoftwareDevice {
	shaders: HashMap<String, SoftwareShader>,

	programs: HashMap<ProgramId, Program>,
	textures: HashMap<TextureId, Texture>,
	framebuffers: HashMap<FramebufferId, TextureId>,
	quads: HashMap<QuadId, ProgramId>,
	next_id: u32,

	framebuffer: Option<FramebufferId>,
	program: Option<ProgramId>,
	units: HashMap<TextureUnit, TextureId>,

	screen: Texture,
	trace: Option<Vec<DeviceCall>>,
}

impl SoftwareDevice {
	pub fn new(screen: Resolution) -> Self {
		Self {
			shaders: HashMap::new(),
			programs: HashMap::new(),
			textures: HashMap::new(),
			framebuffers: HashMap::new(),
			quads: HashMap::new(),
			next_id: 1,
			framebuffer: None,
			program: None,
			units: HashMap::new(),
			screen: Texture::blank(screen),
			trace: None,
		}
	}

	/// Records every state changing call from now on, see [`SoftwareDevice::take_trace`].
	pub fn with_trace(mut self) -> Self {
		self.trace = Some(vec![]);
		self
	}

	/// Makes `shader` the program compiled from `source`.
	pub fn register(&mut self, source: &str, shader: SoftwareShader) -> &mut Self {
		self.shaders.insert(source.trim().to_owned(), shader);
		self
	}

	/// The calls recorded since the last time the trace was taken.
	pub fn take_trace(&mut self) -> Vec<DeviceCall> {
		self.trace.as_mut().map(std::mem::take).unwrap_or_default()
	}

	pub fn screen_size(&self) -> Resolution {
		self.screen.size
	}

	pub fn resize_screen(&mut self, size: Resolution) {
		self.screen = Texture::blank(size);
	}

	pub fn screen(&self) -> &[Texel] {
		&self.screen.texels
	}

	/// `None` outside of the screen.
	pub fn screen_pixel(&self, x: u32, y: u32) -> Option<Texel> {
		if x >= self.screen.size.w || y >= self.screen.size.h {
			return None;
		}

		self.screen.texels.get((y * self.screen.size.w + x) as usize).copied()
	}

	pub fn texture_pixels(&self, texture: TextureId) -> Option<&[Texel]> {
		self.textures.get(&texture).map(|t| t.texels.as_slice())
	}

	/// Number of live objects of every kind, programs first.
	pub fn live_objects(&self) -> [usize; 4] {
		[
			self.programs.len(),
			self.textures.len(),
			self.framebuffers.len(),
			self.quads.len(),
		]
	}

	fn next_id(&mut self) -> u32 {
		let id = self.next_id;
		self.next_id += 1;
		id
	}

	fn record(&mut self, call: DeviceCall) {
		if let Some(trace) = &mut self.trace {
			trace.push(call);
		}
	}

	fn target_size(&self) -> Resolution {
		self.framebuffer
			.and_then(|fb| self.framebuffers.get(&fb))
			.and_then(|texture| self.textures.get(texture))
			.map_or(self.screen.size, |texture| texture.size)
	}
}

impl PassDevice for SoftwareDevice {
	fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, String> {
		let Some(shader) = self.shaders.get(source.trim()).cloned() else {
			let first_line = source.trim().lines().next().unwrap_or_default();
			return Err(format!("{}: no fragment program registered for `{}`", label, first_line));
		};

		let id = ProgramId(self.next_id());
		let values = vec![None; shader.uniforms.len()];
		self.programs.insert(id, Program {
			label: label.to_owned(),
			shader,
			values,
		});

		Ok(id)
	}

	fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
		self.programs
			.get(&program)?
			.shader
			.uniforms
			.iter()
			.position(|n| n == name)
			.map(|i| UniformLocation(i as u32))
	}

	fn create_quad(&mut self, program: ProgramId) -> QuadId {
		let id = QuadId(self.next_id());
		self.quads.insert(id, program);
		id
	}

	fn create_target(&mut self, _label: &str, size: Resolution) -> TextureId {
		let id = TextureId(self.next_id());
		self.textures.insert(id, Texture::blank(size));
		id
	}

	fn create_image_texture(&mut self, _label: &str, image: &DynamicImage) -> TextureId {
		let rgba = image.to_rgba32f();
		let texture = Texture {
			size: Resolution::new(rgba.width(), rgba.height()),
			texels: rgba.pixels().map(|p| p.0).collect(),
		};

		let id = TextureId(self.next_id());
		self.textures.insert(id, texture);
		id
	}

	fn create_framebuffer(&mut self, target: TextureId) -> FramebufferId {
		let id = FramebufferId(self.next_id());
		self.framebuffers.insert(id, target);
		id
	}

	fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
		self.record(DeviceCall::BindFramebuffer(framebuffer));
		self.framebuffer = framebuffer;
	}

	fn use_program(&mut self, program: ProgramId) {
		self.record(DeviceCall::UseProgram(program));
		self.program = Some(program);
	}

	fn bind_texture(&mut self, unit: TextureUnit, texture: TextureId) {
		self.record(DeviceCall::BindTexture { unit, texture });
		self.units.insert(unit, texture);
	}

	fn unbind_texture(&mut self, unit: TextureUnit) {
		self.record(DeviceCall::UnbindTexture { unit });
		self.units.remove(&unit);
	}

	fn set_uniform(&mut self, location: UniformLocation, args: UniformArgs<'_>) {
		let Some(program_id) = self.program else {
			warn!("Uniform {} set with no program in use", location);
			return;
		};
		let Some(program) = self.programs.get_mut(&program_id) else {
			return;
		};
		if location.0 as usize >= program.values.len() {
			warn!("{} has no uniform at {}", program.label, location);
			return;
		}

		let value = UniformValue::from(args);
		program.values[location.0 as usize] = Some(value.clone());

		let name = program.shader.uniforms[location.0 as usize].clone();
		self.record(DeviceCall::SetUniform {
			program: program_id,
			location,
			name,
			value,
		});
	}

	fn draw_quad(&mut self, quad: QuadId) {
		let Some(program_id) = self.program else {
			warn!("Draw of {} with no program in use", quad);
			return;
		};
		if self.quads.get(&quad) != Some(&program_id) {
			trace!("{} was not created for {}", quad, program_id);
		}
		let Some(program) = self.programs.get(&program_id) else {
			return;
		};

		let size = self.target_size();
		let mut texels = Vec::with_capacity(size.pixel_count());
		for y in 0..size.h {
			for x in 0..size.w {
				let fragment = Fragment {
					x,
					y,
					size,
					device: self,
					program,
				};
				texels.push((program.shader.main)(&fragment));
			}
		}

		let target = self.framebuffer.and_then(|fb| self.framebuffers.get(&fb)).copied();
		match target.and_then(|texture| self.textures.get_mut(&texture)) {
			Some(texture) => texture.texels = texels,
			None => self.screen.texels = texels,
		}

		self.record(DeviceCall::Draw {
			program: program_id,
			framebuffer: self.framebuffer,
		});
	}

	fn copy_texture(&mut self, from: TextureId, to: TextureId) {
		self.record(DeviceCall::Copy { from, to });

		let Some(texels) = self.textures.get(&from).map(|t| t.texels.clone()) else {
			return;
		};
		match self.textures.get_mut(&to) {
			Some(target) if target.texels.len() == texels.len() => target.texels = texels,
			_ => warn!("Can't copy {} into {}", from, to),
		}
	}

	fn present(&mut self, texture: TextureId) {
		self.record(DeviceCall::Present(texture));

		if let Some(source) = self.textures.get(&texture) {
			self.screen.texels = source.resampled(self.screen.size);
		}
	}

	fn end_frame(&mut self) {
		self.record(DeviceCall::EndFrame);
	}

	fn release(&mut self, object: DeviceObject) {
		match object {
			DeviceObject::Program(id) => {
				self.programs.remove(&id);
				if self.program == Some(id) {
					self.program = None;
				}
			}
			DeviceObject::Texture(id) => {
				self.textures.remove(&id);
				self.units.retain(|_, texture| *texture != id);
			}
			DeviceObject::Framebuffer(id) => {
				self.framebuffers.remove(&id);
				if self.framebuffer == Some(id) {
					self.framebuffer = None;
				}
			}
			DeviceObject::Quad(id) => {
				self.quads.remove(&id);
			}
		}
	}
}
