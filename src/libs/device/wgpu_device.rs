use std::{collections::HashMap, sync::mpsc};

use anyhow::{bail, Context, Result};
use image::{DynamicImage, RgbaImage};
use log::{debug, warn};
use wgpu::{
	util::{BufferInitDescriptor, DeviceExt},
	AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource, Buffer, BufferDescriptor, BufferUsages,
	Color, ColorTargetState, ColorWrites, CommandEncoderDescriptor, ErrorFilter, Extent3d, FilterMode, FragmentState,
	FrontFace, ImageCopyBuffer, ImageCopyTexture, ImageDataLayout, LoadOp, Maintain, MapMode, MultisampleState, Operations,
	Origin3d, PolygonMode, PresentMode, PrimitiveState, PrimitiveTopology, RenderPassColorAttachment, RenderPassDescriptor,
	RenderPipeline, RenderPipelineDescriptor, Sampler, SamplerDescriptor, ShaderModule, ShaderModuleDescriptor, ShaderSource,
	StoreOp, Surface, SurfaceConfiguration, SurfaceError, SurfaceTexture, Texture, TextureAspect, TextureDescriptor,
	TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor, VertexAttribute, VertexBufferLayout,
	VertexState, VertexStepMode, COPY_BYTES_PER_ROW_ALIGNMENT,
};

use super::{
	reflection::{self, Reflection, ResourceKind, SAMPLER_SUFFIX, VERTEX_ENTRY},
	transpose, DeviceObject, FramebufferId, PassDevice, ProgramId, QuadId, Resolution, TextureId, TextureUnit, UniformArgs,
	UniformLocation,
};
use crate::core::gpu::Gpu;

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Full-screen quad as a triangle strip.
/// 1 -- 2
/// | /  |
/// 3 -- 4
#[rustfmt::skip]
const QUAD_VERTICES: [[f32; 2]; 4] = [
	[-1.0,  1.0],
	[ 1.0,  1.0],
	[-1.0, -1.0],
	[ 1.0, -1.0],
];

const QUAD_ATTRIBUTES: [VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

const BLIT_SOURCE: &str = r"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
	return textureSample(src, src_sampler, in.uv);
}
";

/// Unit the device uses for its own present blit, out of reach of the pipeline.
const BLIT_UNIT: TextureUnit = TextureUnit::MAX;

const OFFSCREEN_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

struct GpuTexture {
	texture: Texture,
	view: TextureView,
	sampler: Sampler,
	size: Resolution,
	format: TextureFormat,
}

struct GpuProgram {
	label: String,
	module: ShaderModule,
	reflection: Reflection,
	pipelines: HashMap<TextureFormat, RenderPipeline>,
	/// Backing buffer of every uniform block and storage array, by location
	buffers: HashMap<u32, Buffer>,
	/// Unit each texture location samples from, by location
	units: HashMap<u32, TextureUnit>,
}

#[derive(Copy, Clone)]
struct Blit {
	program: ProgramId,
	quad: QuadId,
	src: UniformLocation,
}

/// Where frames end up.
pub enum Screen {
	Surface {
		surface: Surface<'static>,
		config: SurfaceConfiguration,
	},
	/// An 8 bit texture that can be read back, for headless rendering
	Offscreen(Resolution),
}

enum ScreenTarget {
	Surface {
		surface: Surface<'static>,
		config: SurfaceConfiguration,
		frame: Option<SurfaceTexture>,
	},
	Offscreen(GpuTexture),
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// A [`PassDevice`] over wgpu. Programs are WGSL fragment stages.
///
/// Uniforms are module-scope globals: `var<uniform>` blocks for scalars, vectors and
/// matrices, `var<storage, read>` arrays for float arrays, and `texture_2d<f32>` globals
/// for samplers, paired with an optional `<name>_sampler` sampler global. Each global gets
/// its own buffer, so any group/binding layout works.
pub struct WgpuDevice {
	gpu: Gpu,
	screen: ScreenTarget,
	target_format: TextureFormat,
	filter_mode: FilterMode,
	blank: GpuTexture,
	blit: Option<Blit>,

	programs: HashMap<ProgramId, GpuProgram>,
	textures: HashMap<TextureId, GpuTexture>,
	framebuffers: HashMap<FramebufferId, TextureId>,
	quads: HashMap<QuadId, Buffer>,
	next_id: u32,

	framebuffer: Option<FramebufferId>,
	program: Option<ProgramId>,
	units: HashMap<TextureUnit, TextureId>,
}

impl WgpuDevice {
	pub fn new(gpu: Gpu, screen: Screen, filter_mode: FilterMode) -> Result<Self> {
		// 32 bit float targets can only be sampled with filtering if the adapter allows it
		let target_format = if gpu.device.features().contains(wgpu::Features::FLOAT32_FILTERABLE) {
			TextureFormat::Rgba32Float
		} else {
			TextureFormat::Rgba16Float
		};
		debug!("Render targets use {:?}", target_format);

		let screen = match screen {
			Screen::Surface { surface, config } => {
				surface.configure(&gpu.device, &config);
				ScreenTarget::Surface {
					surface,
					config,
					frame: None,
				}
			}
			Screen::Offscreen(size) => ScreenTarget::Offscreen(create_texture(
				&gpu,
				"screen",
				size,
				OFFSCREEN_FORMAT,
				TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
				FilterMode::Nearest,
			)),
		};

		let blank = create_texture(
			&gpu,
			"blank",
			Resolution::new(1, 1),
			TextureFormat::Rgba8Unorm,
			TextureUsages::empty(),
			FilterMode::Nearest,
		);

		let mut device = Self {
			gpu,
			screen,
			target_format,
			filter_mode,
			blank,
			blit: None,
			programs: HashMap::new(),
			textures: HashMap::new(),
			framebuffers: HashMap::new(),
			quads: HashMap::new(),
			next_id: 1,
			framebuffer: None,
			program: None,
			units: HashMap::new(),
		};

		let program = device
			.compile_program("present blit", BLIT_SOURCE)
			.map_err(|log| anyhow::anyhow!("Couldn't compile the present blit:\n{}", log))?;
		let src = device
			.uniform_location(program, "src")
			.context("The present blit has no `src` texture")?;
		let quad = device.create_quad(program);
		device.blit = Some(Blit { program, quad, src });

		Ok(device)
	}

	/// Configures a window surface the way the display expects it.
	pub fn surface_screen(gpu: &Gpu, surface: Surface<'static>, size: Resolution) -> Result<Screen> {
		// Describes what the surface is compatible with on the given adapter
		let capabilities = surface.get_capabilities(&gpu.adapter);

		let present_mode = if capabilities.present_modes.contains(&PresentMode::Mailbox) {
			PresentMode::Mailbox
		} else {
			PresentMode::AutoNoVsync
		};

		let config = SurfaceConfiguration {
			usage: TextureUsages::RENDER_ATTACHMENT,
			// According to the docs, the first format is normally the preferred one
			format: *capabilities
				.formats
				.first()
				.context("The surface isn't compatible with the adapter")?,
			width: size.w.max(1),
			height: size.h.max(1),
			present_mode,
			desired_maximum_frame_latency: 2,
			alpha_mode: capabilities.alpha_modes.first().copied().unwrap_or_default(),
			view_formats: vec![],
		};

		Ok(Screen::Surface { surface, config })
	}

	pub fn gpu(&self) -> &Gpu {
		&self.gpu
	}

	pub fn target_format(&self) -> TextureFormat {
		self.target_format
	}

	pub fn resize_screen(&mut self, size: Resolution) {
		let size = Resolution::new(size.w.max(1), size.h.max(1));

		match &mut self.screen {
			ScreenTarget::Surface {
				surface,
				config,
				frame,
			} => {
				*frame = None;
				config.width = size.w;
				config.height = size.h;
				surface.configure(&self.gpu.device, config);
			}
			ScreenTarget::Offscreen(texture) => {
				*texture = create_texture(
					&self.gpu,
					"screen",
					size,
					OFFSCREEN_FORMAT,
					TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
					FilterMode::Nearest,
				);
			}
		}
	}

	/// Copies an offscreen screen back to the CPU.
	pub fn read_screen(&self) -> Result<RgbaImage> {
		let ScreenTarget::Offscreen(screen) = &self.screen else {
			bail!("Only an offscreen screen can be read back");
		};

		let Resolution { w, h } = screen.size;
		let unpadded = 4 * w;
		let padded = unpadded.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT;

		let buffer = self.gpu.device.create_buffer(&BufferDescriptor {
			label: Some("Screen readback buffer"),
			size: padded as u64 * h as u64,
			usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
			mapped_at_creation: false,
		});

		let mut encoder = self.gpu.device.create_command_encoder(&CommandEncoderDescriptor {
			label: Some("Screen readback encoder"),
		});
		encoder.copy_texture_to_buffer(
			screen.texture.as_image_copy(),
			ImageCopyBuffer {
				buffer: &buffer,
				layout: ImageDataLayout {
					offset: 0,
					bytes_per_row: Some(padded),
					rows_per_image: Some(h),
				},
			},
			extent(screen.size),
		);
		self.gpu.queue.submit(Some(encoder.finish()));

		let slice = buffer.slice(..);
		let (sender, receiver) = mpsc::channel();
		slice.map_async(MapMode::Read, move |result| {
			let _ = sender.send(result);
		});
		self.gpu.device.poll(Maintain::Wait);
		receiver
			.recv()
			.context("The readback never completed")?
			.context("Couldn't map the readback buffer")?;

		let mut pixels = Vec::with_capacity((unpadded * h) as usize);
		{
			let mapped = slice.get_mapped_range();
			for row in mapped.chunks(padded as usize) {
				pixels.extend_from_slice(&row[..unpadded as usize]);
			}
		}
		buffer.unmap();

		RgbaImage::from_raw(w, h, pixels).context("Readback doesn't match the screen size")
	}

	fn next_id(&mut self) -> u32 {
		let id = self.next_id;
		self.next_id += 1;
		id
	}

	/// The view drawn into by the next draw, acquiring the surface frame if needed.
	fn target_view(&mut self) -> Option<(TextureView, TextureFormat)> {
		if let Some(framebuffer) = self.framebuffer {
			let texture = self.framebuffers.get(&framebuffer).and_then(|t| self.textures.get(t))?;
			return Some((texture.texture.create_view(&TextureViewDescriptor::default()), texture.format));
		}

		match &mut self.screen {
			ScreenTarget::Surface {
				surface,
				config,
				frame,
			} => {
				if frame.is_none() {
					match surface.get_current_texture() {
						Ok(texture) => *frame = Some(texture),
						Err(SurfaceError::Lost | SurfaceError::Outdated) => {
							debug!("Surface lost, reconfiguring");
							surface.configure(&self.gpu.device, config);
							return None;
						}
						Err(err) => {
							warn!("Couldn't acquire the next surface frame: {}", err);
							return None;
						}
					}
				}

				frame
					.as_ref()
					.map(|frame| (frame.texture.create_view(&TextureViewDescriptor::default()), config.format))
			}
			ScreenTarget::Offscreen(texture) => Some((texture.texture.create_view(&TextureViewDescriptor::default()), texture.format)),
		}
	}

	/// Makes sure the program has a pipeline for `format`. Validation errors are logged.
	fn ensure_pipeline(&mut self, id: ProgramId, format: TextureFormat) -> bool {
		let Some(program) = self.programs.get_mut(&id) else {
			return false;
		};
		if program.pipelines.contains_key(&format) {
			return true;
		}

		self.gpu.device.push_error_scope(ErrorFilter::Validation);
		let pipeline = create_pipeline(&self.gpu, &program.label, &program.module, &program.reflection, format);
		if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
			warn!("Couldn't create a {:?} pipeline for {}: {}", format, program.label, err);
			return false;
		}

		program.pipelines.insert(format, pipeline);
		true
	}

	/// The texture sampled through the texture global at `location`. The bound
	/// framebuffer's own target can't be sampled while drawing into it, so it reads as
	/// blank.
	fn unit_texture(&self, program: &GpuProgram, location: u32) -> &GpuTexture {
		let target = self.framebuffer.and_then(|framebuffer| self.framebuffers.get(&framebuffer));

		program
			.units
			.get(&location)
			.and_then(|unit| self.units.get(unit))
			.filter(|texture| Some(*texture) != target)
			.and_then(|texture| self.textures.get(texture))
			.unwrap_or(&self.blank)
	}

	fn bind_groups(&self, program: &GpuProgram, pipeline: &RenderPipeline) -> Vec<BindGroup> {
		let resources = &program.reflection.resources;
		let group_count = resources.iter().map(|r| r.group + 1).max().unwrap_or(0);

		(0..group_count)
			.map(|group| {
				let entries = resources
					.iter()
					.enumerate()
					.filter(|(_, resource)| resource.group == group)
					.filter_map(|(location, resource)| {
						let location = location as u32;
						let resource_binding = match &resource.kind {
							ResourceKind::Uniform { .. } | ResourceKind::Storage { .. } => {
								program.buffers.get(&location)?.as_entire_binding()
							}
							ResourceKind::Texture => BindingResource::TextureView(&self.unit_texture(program, location).view),
							ResourceKind::Sampler => {
								let sampler = resource
									.name
									.strip_suffix(SAMPLER_SUFFIX)
									.and_then(|texture| resources.iter().position(|r| r.name == texture))
									.map_or(&self.blank.sampler, |texture| {
										&self.unit_texture(program, texture as u32).sampler
									});
								BindingResource::Sampler(sampler)
							}
						};

						Some(BindGroupEntry {
							binding: resource.binding,
							resource: resource_binding,
						})
					})
					.collect::<Vec<_>>();

				self.gpu.device.create_bind_group(&BindGroupDescriptor {
					label: Some(&format!("{} bind group {}", program.label, group)),
					layout: &pipeline.get_bind_group_layout(group),
					entries: &entries,
				})
			})
			.collect()
	}
}

impl PassDevice for WgpuDevice {
	fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, String> {
		let source = reflection::with_vertex_stage(source);
		let reflection = reflection::reflect(&source)?;

		self.gpu.device.push_error_scope(ErrorFilter::Validation);

		let module = self.gpu.device.create_shader_module(ShaderModuleDescriptor {
			label: Some(label),
			source: ShaderSource::Wgsl(source.into()),
		});
		let pipeline = create_pipeline(&self.gpu, label, &module, &reflection, self.target_format);

		if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
			return Err(err.to_string());
		}

		let mut buffers = HashMap::new();
		for (location, resource) in reflection.resources.iter().enumerate() {
			let (size, usage) = match resource.kind {
				ResourceKind::Uniform { size } => (size.next_multiple_of(16), BufferUsages::UNIFORM),
				ResourceKind::Storage { stride } => (stride, BufferUsages::STORAGE),
				_ => continue,
			};

			let buffer = self.gpu.device.create_buffer(&BufferDescriptor {
				label: Some(&format!("{} {}", label, resource.name)),
				size: size.max(4),
				usage: usage | BufferUsages::COPY_DST,
				mapped_at_creation: false,
			});
			buffers.insert(location as u32, buffer);
		}

		let id = ProgramId(self.next_id());
		self.programs.insert(id, GpuProgram {
			label: label.to_owned(),
			module,
			reflection,
			pipelines: HashMap::from([(self.target_format, pipeline)]),
			buffers,
			units: HashMap::new(),
		});

		Ok(id)
	}

	fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
		self.programs
			.get(&program)?
			.reflection
			.resources
			.iter()
			.position(|r| r.name == name && r.kind != ResourceKind::Sampler)
			.map(|location| UniformLocation(location as u32))
	}

	fn create_quad(&mut self, program: ProgramId) -> QuadId {
		let label = self
			.programs
			.get(&program)
			.map_or_else(|| "quad".to_owned(), |p| format!("{} quad", p.label));

		let buffer = self.gpu.device.create_buffer_init(&BufferInitDescriptor {
			label: Some(&label),
			contents: bytemuck::cast_slice(&QUAD_VERTICES),
			usage: BufferUsages::VERTEX,
		});

		let id = QuadId(self.next_id());
		self.quads.insert(id, buffer);
		id
	}

	fn create_target(&mut self, label: &str, size: Resolution) -> TextureId {
		// Textures start zeroed
		let texture = create_texture(
			&self.gpu,
			label,
			size,
			self.target_format,
			TextureUsages::RENDER_ATTACHMENT
				| TextureUsages::TEXTURE_BINDING
				| TextureUsages::COPY_SRC
				| TextureUsages::COPY_DST,
			self.filter_mode,
		);

		let id = TextureId(self.next_id());
		self.textures.insert(id, texture);
		id
	}

	fn create_image_texture(&mut self, label: &str, image: &DynamicImage) -> TextureId {
		let rgba = image.to_rgba8();
		let size = Resolution::new(rgba.width().max(1), rgba.height().max(1));

		let texture = create_texture(
			&self.gpu,
			label,
			size,
			TextureFormat::Rgba8UnormSrgb,
			TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
			FilterMode::Linear,
		);

		if rgba.width() > 0 && rgba.height() > 0 {
			self.gpu.queue.write_texture(
				ImageCopyTexture {
					aspect: TextureAspect::All,
					texture: &texture.texture,
					mip_level: 0,
					origin: Origin3d::ZERO,
				},
				&rgba,
				ImageDataLayout {
					offset: 0,
					bytes_per_row: Some(4 * size.w),
					rows_per_image: Some(size.h),
				},
				extent(size),
			);
		}

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
		self.framebuffer = framebuffer;
	}

	fn use_program(&mut self, program: ProgramId) {
		self.program = Some(program);
	}

	fn bind_texture(&mut self, unit: TextureUnit, texture: TextureId) {
		self.units.insert(unit, texture);
	}

	fn unbind_texture(&mut self, unit: TextureUnit) {
		self.units.remove(&unit);
	}

	fn set_uniform(&mut self, location: UniformLocation, args: UniformArgs<'_>) {
		let Some(program) = self.program.and_then(|id| self.programs.get_mut(&id)) else {
			warn!("Uniform {} set with no program in use", location);
			return;
		};
		let Some(resource) = program.reflection.resources.get(location.0 as usize) else {
			warn!("{} has no uniform at {}", program.label, location);
			return;
		};

		match (&resource.kind, args) {
			(ResourceKind::Texture, UniformArgs::Sampler(unit)) => {
				program.units.insert(location.0, unit);
			}
			(ResourceKind::Uniform { size }, args) => {
				let mut bytes = uniform_bytes(args);
				bytes.resize(*size as usize, 0);
				if let Some(buffer) = program.buffers.get(&location.0) {
					self.gpu.queue.write_buffer(buffer, 0, &bytes);
				}
			}
			(ResourceKind::Storage { .. }, args) => {
				let mut bytes = uniform_bytes(args);
				if bytes.is_empty() {
					bytes = vec![0; 4];
				}

				let fits = program
					.buffers
					.get(&location.0)
					.is_some_and(|buffer| buffer.size() == bytes.len() as u64);

				if fits {
					if let Some(buffer) = program.buffers.get(&location.0) {
						self.gpu.queue.write_buffer(buffer, 0, &bytes);
					}
				} else {
					// Storage arrays are sized by what they hold
					let buffer = self.gpu.device.create_buffer_init(&BufferInitDescriptor {
						label: Some(&format!("{} {}", program.label, resource.name)),
						contents: &bytes,
						usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
					});
					program.buffers.insert(location.0, buffer);
				}
			}
			(kind, args) => debug!("{:?} `{}` can't be set from {:?}", kind, resource.name, args),
		}
	}

	fn draw_quad(&mut self, quad: QuadId) {
		let Some(program_id) = self.program else {
			warn!("Draw of {} with no program in use", quad);
			return;
		};
		let Some((view, format)) = self.target_view() else {
			return;
		};
		if !self.ensure_pipeline(program_id, format) {
			return;
		}

		let (Some(program), Some(vertices)) = (self.programs.get(&program_id), self.quads.get(&quad)) else {
			return;
		};
		let Some(pipeline) = program.pipelines.get(&format) else {
			return;
		};
		let bind_groups = self.bind_groups(program, pipeline);

		let mut encoder = self.gpu.device.create_command_encoder(&CommandEncoderDescriptor {
			label: Some(&format!("{} encoder", program.label)),
		});

		{
			let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
				label: Some(&program.label),
				color_attachments: &[Some(RenderPassColorAttachment {
					view: &view,
					resolve_target: None,
					ops: Operations {
						load: LoadOp::Clear(Color::BLACK),
						store: StoreOp::Store,
					},
				})],
				depth_stencil_attachment: None,
				timestamp_writes: None,
				occlusion_query_set: None,
			});

			render_pass.set_pipeline(pipeline);
			for (group, bind_group) in bind_groups.iter().enumerate() {
				render_pass.set_bind_group(group as u32, bind_group, &[]);
			}
			render_pass.set_vertex_buffer(0, vertices.slice(..));
			render_pass.draw(0..4, 0..1);
		}

		self.gpu.queue.submit(Some(encoder.finish()));
	}

	fn copy_texture(&mut self, from: TextureId, to: TextureId) {
		let (Some(source), Some(target)) = (self.textures.get(&from), self.textures.get(&to)) else {
			return;
		};
		if source.size != target.size || source.format != target.format {
			warn!("Can't copy {} into {}", from, to);
			return;
		}

		let mut encoder = self.gpu.device.create_command_encoder(&CommandEncoderDescriptor {
			label: Some("Copy encoder"),
		});
		encoder.copy_texture_to_texture(
			source.texture.as_image_copy(),
			target.texture.as_image_copy(),
			extent(source.size),
		);
		self.gpu.queue.submit(Some(encoder.finish()));
	}

	fn present(&mut self, texture: TextureId) {
		let Some(Blit { program, quad, src }) = self.blit else {
			return;
		};

		let framebuffer = self.framebuffer;
		let current = self.program;

		self.bind_framebuffer(None);
		self.use_program(program);
		self.bind_texture(BLIT_UNIT, texture);
		self.set_uniform(src, UniformArgs::Sampler(BLIT_UNIT));
		self.draw_quad(quad);

		self.units.remove(&BLIT_UNIT);
		self.framebuffer = framebuffer;
		self.program = current;
	}

	fn end_frame(&mut self) {
		if let ScreenTarget::Surface { frame, .. } = &mut self.screen {
			if let Some(frame) = frame.take() {
				frame.present();
			}
		}
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
				if let Some(texture) = self.textures.remove(&id) {
					texture.texture.destroy();
				}
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

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

fn extent(size: Resolution) -> Extent3d {
	Extent3d {
		width: size.w,
		height: size.h,
		depth_or_array_layers: 1,
	}
}

fn create_texture(
	gpu: &Gpu,
	label: &str,
	size: Resolution,
	format: TextureFormat,
	usage: TextureUsages,
	filter: FilterMode,
) -> GpuTexture {
	let texture = gpu.device.create_texture(&TextureDescriptor {
		label: Some(&format!("{} Texture", label)),
		size: extent(size),
		mip_level_count: 1,
		sample_count: 1,
		dimension: TextureDimension::D2,
		format,
		// Everything can be sampled
		usage: usage | TextureUsages::TEXTURE_BINDING,
		view_formats: &[],
	});

	let view = texture.create_view(&TextureViewDescriptor {
		label: Some(&format!("{} Texture View", label)),
		..Default::default()
	});

	let sampler = gpu.device.create_sampler(&SamplerDescriptor {
		label: Some(&format!("{} Sampler", label)),
		address_mode_u: AddressMode::ClampToEdge,
		address_mode_v: AddressMode::ClampToEdge,
		address_mode_w: AddressMode::ClampToEdge,
		mag_filter: filter,
		min_filter: filter,
		mipmap_filter: filter,
		..Default::default()
	});

	GpuTexture {
		texture,
		view,
		sampler,
		size,
		format,
	}
}

fn create_pipeline(
	gpu: &Gpu,
	label: &str,
	module: &ShaderModule,
	reflection: &Reflection,
	format: TextureFormat,
) -> RenderPipeline {
	gpu.device.create_render_pipeline(&RenderPipelineDescriptor {
		label: Some(label),
		// Derived from the shader, bind groups are built from the same reflection
		layout: None,
		vertex: VertexState {
			module,
			entry_point: VERTEX_ENTRY,
			buffers: &[VertexBufferLayout {
				array_stride: std::mem::size_of::<[f32; 2]>() as u64,
				step_mode: VertexStepMode::Vertex,
				attributes: &QUAD_ATTRIBUTES,
			}],
		},
		fragment: Some(FragmentState {
			module,
			entry_point: &reflection.fragment_entry,
			targets: &[Some(ColorTargetState {
				format,
				blend: None,
				write_mask: ColorWrites::ALL,
			})],
		}),
		primitive: PrimitiveState {
			topology: PrimitiveTopology::TriangleStrip,
			strip_index_format: None,
			front_face: FrontFace::Ccw,
			cull_mode: None,
			polygon_mode: PolygonMode::Fill,
			unclipped_depth: false,
			conservative: false,
		},
		depth_stencil: None,
		multisample: MultisampleState {
			count: 1,
			mask: !0,
			alpha_to_coverage_enabled: false,
		},
		multiview: None,
	})
}

/// Bytes of a uniform upload in WGSL host-shareable layout. Matrices end up column-major,
/// with the columns of a 3x3 padded to 4 floats.
pub fn uniform_bytes(args: UniformArgs<'_>) -> Vec<u8> {
	match args {
		UniformArgs::Int(value) => bytemuck::bytes_of(&value).to_vec(),
		UniformArgs::Float(value) => bytemuck::bytes_of(&value).to_vec(),
		UniformArgs::Vec(values) | UniformArgs::FloatArray(values) => bytemuck::cast_slice(values).to_vec(),
		UniformArgs::Mat3 { transposed, data } => {
			let data = if transposed { transpose(data, 3) } else { data.to_vec() };
			let padded = data
				.chunks(3)
				.flat_map(|column| column.iter().copied().chain([0.0]))
				.collect::<Vec<f32>>();
			bytemuck::cast_slice(&padded).to_vec()
		}
		UniformArgs::Mat4 { transposed, data } => {
			let data = if transposed { transpose(data, 4) } else { data.to_vec() };
			bytemuck::cast_slice(&data).to_vec()
		}
		UniformArgs::Sampler(unit) => bytemuck::bytes_of(&(unit as i32)).to_vec(),
	}
}
