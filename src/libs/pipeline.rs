pub mod frame;

use std::{
	hash::{DefaultHasher, Hash, Hasher},
	mem,
};

use derive_more::{Display, Error};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use super::{
	binding::{BindingRegistry, BindingSpec, FieldValue, Parameters, PassIndex, UniformKind},
	device::{DeviceObject, FramebufferId, PassDevice, ProgramId, QuadId, Resolution, TextureId, TextureUnit, UniformLocation},
	template::{self, TemplateError},
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Unit of the pass's own previous-frame output, sampled as `prev`.
pub const PREV_UNIT: TextureUnit = 0;
/// Unit of the preceding pass's fresh output, sampled as `src`.
pub const SRC_UNIT: TextureUnit = 1;
/// Textures declared on the host get consecutive units starting here.
pub const FIRST_CUSTOM_UNIT: TextureUnit = 2;

pub const SRC_SAMPLER: &str = "src";
pub const PREV_SAMPLER: &str = "prev";

/// How a pass's freshly drawn output becomes its previous-frame input for the next
/// frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameCarry {
	/// Two targets per pass trade roles every frame, nothing is copied
	#[default]
	Swap,
	/// The pass always draws into the same target, which is then copied into the
	/// previous-frame target
	Copy,
}

/// How the last pass's output reaches the screen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Presentation {
	/// The device shows the output as is
	#[default]
	Direct,
	/// An extra program (given by its source, templates allowed) draws to the screen,
	/// sampling the output as `src`
	Decode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
	pub resolution: Resolution,
	pub presentation: Presentation,
	pub carry: FrameCarry,
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Why a pass was left out of the pipeline. None of these stop the other passes from
/// compiling.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq, Hash)]
pub enum PassError {
	#[display(fmt = "Source code of pass {} not found", pass)]
	MissingSource { pass: PassIndex },

	#[display(fmt = "Couldn't evaluate the source of pass {}: {}", pass, source)]
	Template { pass: PassIndex, source: TemplateError },

	#[display(fmt = "An error occurred compiling pass {}:\n{}", pass, log)]
	Compile { pass: PassIndex, log: String },

	#[display(fmt = "An error occurred compiling the present program:\n{}", log)]
	Presenter { log: String },
}

/// What a call to [`PassPipeline::compile`] produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileReport {
	/// Indices of the passes that made it into the pipeline, in order
	pub compiled: Vec<PassIndex>,
	pub errors: Vec<PassError>,
}

impl CompileReport {
	pub fn is_complete(&self) -> bool {
		self.errors.is_empty()
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderTarget {
	pub texture: TextureId,
	pub framebuffer: FramebufferId,
}

#[derive(Clone, Debug)]
pub struct ResolvedUniform {
	pub field: String,
	pub spec: BindingSpec,
	pub location: UniformLocation,
}

#[derive(Clone, Debug)]
pub struct CustomTexture {
	pub name: String,
	pub texture: TextureId,
	pub unit: TextureUnit,
	pub location: Option<UniformLocation>,
}

/// Everything the device built for one pass.
#[derive(Clone, Debug)]
pub struct CompiledPass {
	pub index: PassIndex,
	pub program: ProgramId,
	pub quad: QuadId,
	pub uniforms: Vec<ResolvedUniform>,
	pub textures: Vec<CustomTexture>,
	pub src: Option<UniformLocation>,
	pub prev: Option<UniformLocation>,
	targets: [RenderTarget; 2],
	/// Which of `targets` is drawn into next
	current: usize,
}

impl CompiledPass {
	pub fn color_target(&self) -> RenderTarget {
		self.targets[self.current]
	}

	pub fn prev_target(&self) -> RenderTarget {
		self.targets[1 - self.current]
	}

	/// The texture holding what this pass drew last.
	pub fn output(&self, carry: FrameCarry) -> TextureId {
		match carry {
			FrameCarry::Swap => self.prev_target().texture,
			FrameCarry::Copy => self.color_target().texture,
		}
	}

	fn objects(&self) -> Vec<DeviceObject> {
		let mut objects = vec![DeviceObject::Program(self.program), DeviceObject::Quad(self.quad)];
		for target in &self.targets {
			objects.push(DeviceObject::Framebuffer(target.framebuffer));
			objects.push(DeviceObject::Texture(target.texture));
		}
		objects.extend(self.textures.iter().map(|t| DeviceObject::Texture(t.texture)));
		objects
	}
}

#[derive(Clone, Debug)]
pub struct Presenter {
	pub program: ProgramId,
	pub quad: QuadId,
	pub src: Option<UniformLocation>,
}

impl Presenter {
	fn objects(&self) -> Vec<DeviceObject> {
		vec![DeviceObject::Program(self.program), DeviceObject::Quad(self.quad)]
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// A chain of full-screen fragment passes fed from a host parameters object.
///
/// Pass `i` samples pass `i - 1`'s output of the current frame as `src` and its own
/// output of the previous frame as `prev`. The last pass's output is presented.
#[derive(Debug)]
pub struct PassPipeline {
	registry: BindingRegistry,
	config: PipelineConfig,
	passes: Vec<CompiledPass>,
	presenter: Option<Presenter>,
	fingerprint: Option<u64>,
	frame: u64,
}

impl PassPipeline {
	pub fn new(registry: BindingRegistry, config: PipelineConfig) -> Self {
		Self {
			registry,
			config,
			passes: vec![],
			presenter: None,
			fingerprint: None,
			frame: 0,
		}
	}

	pub fn registry(&self) -> &BindingRegistry {
		&self.registry
	}

	/// Changed declarations take effect at the next compile.
	pub fn registry_mut(&mut self) -> &mut BindingRegistry {
		self.fingerprint = None;
		&mut self.registry
	}

	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	/// Takes effect at the next compile.
	pub fn set_resolution(&mut self, resolution: Resolution) {
		if self.config.resolution != resolution {
			self.config.resolution = resolution;
			self.fingerprint = None;
		}
	}

	/// Takes effect at the next compile.
	pub fn set_presentation(&mut self, presentation: Presentation) {
		if self.config.presentation != presentation {
			self.config.presentation = presentation;
			self.fingerprint = None;
		}
	}

	/// Takes effect at the next compile.
	pub fn set_carry(&mut self, carry: FrameCarry) {
		if self.config.carry != carry {
			self.config.carry = carry;
			self.fingerprint = None;
		}
	}

	/// The passes that compiled, in pass order.
	pub fn passes(&self) -> &[CompiledPass] {
		&self.passes
	}

	pub fn pass(&self, index: PassIndex) -> Option<&CompiledPass> {
		self.passes.iter().find(|pass| pass.index == index)
	}

	pub fn presenter(&self) -> Option<&Presenter> {
		self.presenter.as_ref()
	}

	/// What the last pass drew last, which is what gets presented.
	pub fn output(&self) -> Option<TextureId> {
		self.passes.last().map(|pass| pass.output(self.config.carry))
	}

	/// Number of frames rendered since the last compile.
	pub fn frames_rendered(&self) -> u64 {
		self.frame
	}

	/*
	--------------------------------------------------------------------------------
	||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
	--------------------------------------------------------------------------------
	*/

	/// Builds every pass from scratch. Passes that fail are reported and left out, the
	/// others still compile. Objects of the previous compile are released once the new
	/// ones are in place.
	pub fn compile<D, P>(&mut self, device: &mut D, host: &P) -> CompileReport
	where
		D: PassDevice + ?Sized,
		P: Parameters + ?Sized,
	{
		let mut report = CompileReport::default();
		let mut passes = Vec::new();

		let pass_count = self.registry.pass_count();
		debug!("Compiling {} pass(es) at {}", pass_count, self.config.resolution);

		for pass in 0..pass_count {
			match self.compile_pass(device, host, pass) {
				Ok(compiled) => {
					report.compiled.push(pass);
					passes.push(compiled);
				}
				Err(err) => {
					error!("{}", err);
					report.errors.push(err);
				}
			}
		}

		let presenter = match &self.config.presentation {
			Presentation::Direct => None,
			Presentation::Decode(source) => match Self::compile_presenter(device, host, source) {
				Ok(presenter) => Some(presenter),
				Err(err) => {
					error!("{}", err);
					report.errors.push(err);
					None
				}
			},
		};

		let old_passes = mem::replace(&mut self.passes, passes);
		let old_presenter = mem::replace(&mut self.presenter, presenter);

		for object in old_passes
			.iter()
			.flat_map(CompiledPass::objects)
			.chain(old_presenter.iter().flat_map(Presenter::objects))
		{
			device.release(object);
		}

		self.fingerprint = Some(self.fingerprint(host));
		self.frame = 0;

		report
	}

	/// Compiles again if anything the compiled pipeline was built from changed: the
	/// pass count, any evaluated source, the declarations, the images of texture
	/// bindings or the configuration.
	pub fn refresh<D, P>(&mut self, device: &mut D, host: &P) -> Option<CompileReport>
	where
		D: PassDevice + ?Sized,
		P: Parameters + ?Sized,
	{
		if self.fingerprint == Some(self.fingerprint(host)) {
			return None;
		}

		Some(self.compile(device, host))
	}

	/// Gives every object back to the device, leaving an empty pipeline.
	pub fn release<D>(&mut self, device: &mut D)
	where
		D: PassDevice + ?Sized,
	{
		for pass in self.passes.drain(..) {
			for object in pass.objects() {
				device.release(object);
			}
		}

		if let Some(presenter) = self.presenter.take() {
			for object in presenter.objects() {
				device.release(object);
			}
		}

		self.fingerprint = None;
	}

	fn fingerprint<P>(&self, host: &P) -> u64
	where
		P: Parameters + ?Sized,
	{
		let mut hasher = DefaultHasher::new();

		self.config.hash(&mut hasher);

		let pass_count = self.registry.pass_count();
		pass_count.hash(&mut hasher);

		for pass in 0..pass_count {
			self.registry
				.source_text(pass, host)
				.map(|raw| template::evaluate(raw, host))
				.hash(&mut hasher);

			for (field, spec) in self.registry.declared(pass) {
				field.hash(&mut hasher);
				spec.hash(&mut hasher);

				// Images are uploaded at compile time, a new one needs a new texture
				if spec.kind == UniformKind::Texture {
					if let Some(FieldValue::Image(image)) = host.field(field) {
						(image.width(), image.height()).hash(&mut hasher);
						image.color().hash(&mut hasher);
						image.as_bytes().hash(&mut hasher);
					}
				}
			}
		}

		hasher.finish()
	}

	fn compile_pass<D, P>(&self, device: &mut D, host: &P, pass: PassIndex) -> Result<CompiledPass, PassError>
	where
		D: PassDevice + ?Sized,
		P: Parameters + ?Sized,
	{
		let raw = self
			.registry
			.source_text(pass, host)
			.ok_or(PassError::MissingSource { pass })?;

		let source = template::evaluate(raw, host).map_err(|source| PassError::Template { pass, source })?;

		let label = format!("pass {}", pass);
		let program = device
			.compile_program(&label, &source)
			.map_err(|log| PassError::Compile { pass, log })?;

		let quad = device.create_quad(program);

		let mut uniforms = Vec::new();
		let mut textures = Vec::new();
		let mut unit = FIRST_CUSTOM_UNIT;

		for (field, spec) in self.registry.declared(pass) {
			let location = device.uniform_location(program, &spec.name);

			if spec.kind == UniformKind::Texture {
				// Uploaded right away, the unit is fixed for the lifetime of the pass
				match host.field(field) {
					Some(FieldValue::Image(image)) => {
						let texture = device.create_image_texture(&format!("{} {}", label, spec.name), image);
						textures.push(CustomTexture {
							name: spec.name.clone(),
							texture,
							unit,
							location,
						});
						unit += 1;
					}
					_ => warn!("Texture `{}` of pass {} has no image in field `{}`", spec.name, pass, field),
				}
				continue;
			}

			let Some(location) = location else {
				debug!("Uniform `{}` is not active in pass {}", spec.name, pass);
				continue;
			};

			if spec.read(field, host).is_none() {
				warn!(
					"Field `{}` doesn't hold a {:?} value for uniform `{}` of pass {}",
					field, spec.kind, spec.name, pass
				);
			}

			uniforms.push(ResolvedUniform {
				field: field.to_owned(),
				spec: spec.clone(),
				location,
			});
		}

		let size = Resolution::new(self.config.resolution.w.max(1), self.config.resolution.h.max(1));
		let targets = [0, 1].map(|i| {
			let texture = device.create_target(&format!("{} target {}", label, i), size);
			let framebuffer = device.create_framebuffer(texture);
			RenderTarget { texture, framebuffer }
		});

		// Pass 0 has nothing to read as `src`
		let src = if pass > 0 {
			device.uniform_location(program, SRC_SAMPLER)
		} else {
			None
		};
		let prev = device.uniform_location(program, PREV_SAMPLER);

		debug!(
			"Compiled pass {}: {} uniform(s), {} texture(s), src: {}, prev: {}",
			pass,
			uniforms.len(),
			textures.len(),
			src.is_some(),
			prev.is_some()
		);

		Ok(CompiledPass {
			index: pass,
			program,
			quad,
			uniforms,
			textures,
			src,
			prev,
			targets,
			current: 0,
		})
	}

	fn compile_presenter<D, P>(device: &mut D, host: &P, source: &str) -> Result<Presenter, PassError>
	where
		D: PassDevice + ?Sized,
		P: Parameters + ?Sized,
	{
		let source = template::evaluate(source, host).map_err(|err| PassError::Presenter { log: err.to_string() })?;

		let program = device
			.compile_program("present", &source)
			.map_err(|log| PassError::Presenter { log })?;

		Ok(Presenter {
			program,
			quad: device.create_quad(program),
			src: device.uniform_location(program, SRC_SAMPLER),
		})
	}
}
