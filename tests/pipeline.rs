use image::{DynamicImage, Rgba, RgbaImage};
use pass_tracer::libs::{
	binding::{BindingRegistry, BindingValue, ParameterMap, UniformKind},
	device::{
		software::{DeviceCall, SoftwareDevice, SoftwareShader},
		Resolution, UniformArgs, UniformValue,
	},
	pipeline::{FrameCarry, PassError, PassPipeline, PipelineConfig, Presentation, FIRST_CUSTOM_UNIT, SRC_UNIT},
};
use proptest::prelude::*;

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

const SIZE: Resolution = Resolution::new(4, 2);

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

fn config(carry: FrameCarry) -> PipelineConfig {
	PipelineConfig {
		resolution: SIZE,
		presentation: Presentation::Direct,
		carry,
	}
}

fn device() -> SoftwareDevice {
	let mut device = SoftwareDevice::new(SIZE).with_trace();
	device
		.register("red", SoftwareShader::new(|_| RED))
		.register("green", SoftwareShader::new(|_| [0.0, 1.0, 0.0, 1.0]))
		.register("copy", SoftwareShader::new(|f| f.texel("src")).uniform("src"))
		.register(
			"blend",
			// Half of the previous frame, half white
			SoftwareShader::new(|f| f.texel("prev").map(|c| 0.5 * c + 0.5)).uniform("prev"),
		)
		.register(
			"uniforms",
			SoftwareShader::new(|_| [0.0; 4])
				.uniform("exposure")
				.uniform("color")
				.uniform("camera")
				.uniform("spheres")
				.uniform("prev"),
		)
		.register(
			"textures",
			SoftwareShader::new(|f| f.texel("sky"))
				.uniform("noise")
				.uniform("sky"),
		)
		.register("half", SoftwareShader::new(|f| f.texel("src").map(|c| 0.5 * c)).uniform("src"));
	device
}

fn draws(trace: &[DeviceCall]) -> usize {
	trace.iter().filter(|call| matches!(call, DeviceCall::Draw { .. })).count()
}

fn uniform_pushes(trace: &[DeviceCall]) -> Vec<DeviceCall> {
	trace
		.iter()
		.filter(|call| matches!(call, DeviceCall::SetUniform { .. }))
		.cloned()
		.collect()
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[test]
fn passes_draw_in_order_then_present_once() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("a", "red").set("b", "copy").set("c", "copy");

	let mut registry = BindingRegistry::new();
	registry.source("c", 2).source("a", 0).source("b", 1);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	let report = pipeline.compile(&mut device, &host);
	assert!(report.is_complete());
	assert_eq!(report.compiled, vec![0, 1, 2]);

	device.take_trace();
	pipeline.render(&mut device, &host);
	let trace = device.take_trace();

	let programs = trace
		.iter()
		.filter_map(|call| match call {
			DeviceCall::Draw { program, .. } => Some(*program),
			_ => None,
		})
		.collect::<Vec<_>>();
	let expected = pipeline.passes().iter().map(|pass| pass.program).collect::<Vec<_>>();
	assert_eq!(programs, expected);

	let presents = trace
		.iter()
		.enumerate()
		.filter(|(_, call)| matches!(call, DeviceCall::Present(_)))
		.map(|(i, _)| i)
		.collect::<Vec<_>>();
	let last_draw = trace.iter().rposition(|call| matches!(call, DeviceCall::Draw { .. })).unwrap();
	assert_eq!(presents.len(), 1);
	assert!(presents[0] > last_draw);
	assert_eq!(trace.last(), Some(&DeviceCall::EndFrame));

	assert!(device.screen().iter().all(|texel| *texel == RED));
}

#[test]
fn two_passes_carry_a_solid_color_to_the_screen() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("trace", "red").set("post", "copy");

	let mut registry = BindingRegistry::new();
	registry.source("trace", 0).source("post", 1);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	pipeline.compile(&mut device, &host);
	pipeline.render(&mut device, &host);

	assert_eq!(device.screen().len(), SIZE.pixel_count());
	assert!(device.screen().iter().all(|texel| *texel == RED));
}

#[test]
fn previous_frames_accumulate() {
	for carry in [FrameCarry::Swap, FrameCarry::Copy] {
		let mut device = device();
		let mut host = ParameterMap::new();
		host.set("source", "blend");

		let mut registry = BindingRegistry::new();
		registry.source("source", 0);

		let mut pipeline = PassPipeline::new(registry, config(carry));
		pipeline.compile(&mut device, &host);

		for expected in [0.5, 0.75, 0.875] {
			pipeline.render(&mut device, &host);
			assert_eq!(device.screen_pixel(1, 1).map(|c| c[0]), Some(expected), "{:?}", carry);
		}
		assert_eq!(pipeline.frames_rendered(), 3);
	}
}

#[test]
fn copy_carry_copies_into_the_previous_frame_target() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "blend");

	let mut registry = BindingRegistry::new();
	registry.source("source", 0);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Copy));
	pipeline.compile(&mut device, &host);

	device.take_trace();
	pipeline.render(&mut device, &host);
	let trace = device.take_trace();

	let pass = &pipeline.passes()[0];
	assert!(trace.contains(&DeviceCall::Copy {
		from: pass.color_target().texture,
		to: pass.prev_target().texture,
	}));
	assert_eq!(
		device.texture_pixels(pass.prev_target().texture),
		device.texture_pixels(pass.color_target().texture)
	);
}

#[test]
fn decode_presentation_draws_to_the_screen() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "red");

	let mut registry = BindingRegistry::new();
	registry.source("source", 0);

	let mut pipeline = PassPipeline::new(registry, PipelineConfig {
		presentation: Presentation::Decode("half".to_owned()),
		..config(FrameCarry::Swap)
	});
	assert!(pipeline.compile(&mut device, &host).is_complete());
	assert!(pipeline.presenter().is_some());

	device.take_trace();
	pipeline.render(&mut device, &host);
	let trace = device.take_trace();

	assert!(!trace.iter().any(|call| matches!(call, DeviceCall::Present(_))));
	assert_eq!(draws(&trace), 2);
	assert!(trace.contains(&DeviceCall::Draw {
		program: pipeline.presenter().unwrap().program,
		framebuffer: None,
	}));
	assert_eq!(device.screen_pixel(0, 0), Some([0.5, 0.0, 0.0, 0.5]));
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[test]
fn custom_textures_keep_their_units() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "textures")
		.set("noise", DynamicImage::new_rgba8(2, 2))
		.set("sky", DynamicImage::new_rgba8(1, 1));

	let mut registry = BindingRegistry::new();
	registry
		.source("source", 0)
		.bind("noise", 0, UniformKind::Texture)
		.bind("sky", 0, UniformKind::Texture);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	pipeline.compile(&mut device, &host);

	let units = pipeline.passes()[0]
		.textures
		.iter()
		.map(|texture| (texture.name.as_str(), texture.unit))
		.collect::<Vec<_>>();
	assert_eq!(units, vec![("noise", FIRST_CUSTOM_UNIT), ("sky", FIRST_CUSTOM_UNIT + 1)]);

	let mut frames = vec![];
	for _ in 0..2 {
		device.take_trace();
		pipeline.render(&mut device, &host);
		let custom = device
			.take_trace()
			.into_iter()
			.filter(|call| matches!(call, DeviceCall::BindTexture { unit, .. } if *unit >= FIRST_CUSTOM_UNIT))
			.collect::<Vec<_>>();
		frames.push(custom);
	}

	assert_eq!(frames[0].len(), 2);
	assert_eq!(frames[0], frames[1]);
}

#[test]
fn a_new_image_is_uploaded_on_refresh() {
	let solid = |rgba| DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba(rgba)));

	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "textures").set("sky", solid([255, 0, 0, 255]));

	let mut registry = BindingRegistry::new();
	registry.source("source", 0).bind("sky", 0, UniformKind::Texture);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	assert!(pipeline.refresh(&mut device, &host).is_some());
	pipeline.render(&mut device, &host);
	assert_eq!(device.screen_pixel(0, 0), Some(RED));

	// Same contents in a fresh image keep the compiled pipeline
	host.set("sky", solid([255, 0, 0, 255]));
	assert!(pipeline.refresh(&mut device, &host).is_none());

	host.set("sky", solid([0, 0, 255, 255]));
	assert!(pipeline.refresh(&mut device, &host).is_some());
	pipeline.render(&mut device, &host);
	assert_eq!(device.screen_pixel(0, 0), Some([0.0, 0.0, 1.0, 1.0]));

	// The old upload was given back
	assert_eq!(device.live_objects(), [1, 3, 2, 1]);
}

#[test]
fn unchanged_parameters_push_identical_uniforms() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "uniforms")
		.set("exposure", 1.25_f32)
		.set("color", [0.1_f32, 0.5, 1.0])
		.set("camera", vec![1.0_f32; 16])
		.set("spheres", vec![0.5_f32; 32]);

	let mut registry = BindingRegistry::new();
	registry
		.source("source", 0)
		.bind("exposure", 0, UniformKind::Float)
		.bind("color", 0, UniformKind::Vec(3))
		.bind("camera", 0, UniformKind::Mat4 { transposed: true })
		.bind("spheres", 0, UniformKind::FloatArray);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	pipeline.compile(&mut device, &host);

	device.take_trace();
	pipeline.render(&mut device, &host);
	let first = uniform_pushes(&device.take_trace());
	pipeline.render(&mut device, &host);
	let second = uniform_pushes(&device.take_trace());

	// The four bindings and `prev`
	assert_eq!(first.len(), 5);
	assert_eq!(first, second);
	assert!(first.iter().any(|call| matches!(
		call,
		DeviceCall::SetUniform { value: UniformValue::Mat4 { transposed: true, .. }, .. }
	)));
}

#[test]
fn live_values_are_read_every_frame() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "uniforms").set("exposure", 1.0_f32);

	let mut registry = BindingRegistry::new();
	registry.source("source", 0).bind("exposure", 0, UniformKind::Float);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	pipeline.compile(&mut device, &host);
	pipeline.render(&mut device, &host);

	host.set("exposure", 2.0_f32);
	device.take_trace();
	pipeline.render(&mut device, &host);

	assert!(device.take_trace().contains(&DeviceCall::SetUniform {
		program: pipeline.passes()[0].program,
		location: pipeline.passes()[0].uniforms[0].location,
		name: "exposure".to_owned(),
		value: UniformValue::Float(2.0),
	}));
}

#[test]
fn inert_bindings_are_skipped() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "uniforms")
		// Two floats for a vec3
		.set("color", [1.0_f32, 1.0])
		.set("unused", 3.0_f32);

	let mut registry = BindingRegistry::new();
	registry
		.source("source", 0)
		.bind("color", 0, UniformKind::Vec(3))
		// Not a uniform of the program
		.bind("unused", 0, UniformKind::Float);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	assert!(pipeline.compile(&mut device, &host).is_complete());
	assert_eq!(pipeline.passes()[0].uniforms.len(), 1);

	device.take_trace();
	pipeline.render(&mut device, &host);
	let pushes = uniform_pushes(&device.take_trace());

	// Only `prev`
	assert_eq!(pushes.len(), 1);
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[test]
fn a_missing_pass_leaves_the_others_running() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("first", "green").set("third", "copy");

	let mut registry = BindingRegistry::new();
	registry.source("first", 0).source("third", 2);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	let report = pipeline.compile(&mut device, &host);

	assert_eq!(report.compiled, vec![0, 2]);
	assert_eq!(report.errors, vec![PassError::MissingSource { pass: 1 }]);

	device.take_trace();
	pipeline.render(&mut device, &host);
	let trace = device.take_trace();

	assert_eq!(draws(&trace), 2);
	// Pass 2 has no predecessor this frame
	assert!(!trace
		.iter()
		.any(|call| matches!(call, DeviceCall::BindTexture { unit, .. } if *unit == SRC_UNIT)));
	assert!(trace.iter().any(|call| matches!(call, DeviceCall::Present(_))));
}

#[test]
fn a_pass_after_a_gap_never_reads_its_own_output() {
	let mut device = device();
	device.register("lift", SoftwareShader::new(|f| f.texel("src").map(|c| 0.5 * c + 0.5)).uniform("src"));

	let mut host = ParameterMap::new();
	host.set("first", "red").set("third", "lift");

	let mut registry = BindingRegistry::new();
	registry.source("first", 0).source("third", 2);

	let mut pipeline = PassPipeline::new(registry, PipelineConfig {
		presentation: Presentation::Decode("copy".to_owned()),
		..config(FrameCarry::Copy)
	});
	pipeline.compile(&mut device, &host);

	// The presenter leaves pass 2's output on the `src` unit after every frame
	for _ in 0..3 {
		device.take_trace();
		pipeline.render(&mut device, &host);

		let trace = device.take_trace();
		let third = pipeline.passes()[1].program;
		let draw = trace
			.iter()
			.position(|call| matches!(call, DeviceCall::Draw { program, .. } if *program == third))
			.unwrap();
		assert!(trace[..draw].contains(&DeviceCall::UnbindTexture { unit: SRC_UNIT }));

		assert_eq!(device.screen_pixel(0, 0), Some([0.5; 4]));
	}
}

#[test]
fn failing_passes_are_reported_and_skipped() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("a", "red").set("b", "${nope}").set("c", "not registered").set("d", "copy");

	let mut registry = BindingRegistry::new();
	registry.source("a", 0).source("b", 1).source("c", 2).source("d", 3);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	let report = pipeline.compile(&mut device, &host);

	assert_eq!(report.compiled, vec![0, 3]);
	assert!(matches!(report.errors[0], PassError::Template { pass: 1, .. }));
	assert!(matches!(&report.errors[1], PassError::Compile { pass: 2, log } if log.contains("not registered")));

	pipeline.render(&mut device, &host);
	assert_eq!(pipeline.frames_rendered(), 1);
}

#[test]
fn an_empty_pipeline_renders_nothing() {
	let mut device = device();
	let host = ParameterMap::new();

	let mut pipeline = PassPipeline::new(BindingRegistry::new(), config(FrameCarry::Swap));
	let report = pipeline.compile(&mut device, &host);
	assert!(report.compiled.is_empty());

	device.take_trace();
	pipeline.render(&mut device, &host);
	assert!(device.take_trace().is_empty());
	assert_eq!(pipeline.output(), None);
}

#[test]
fn refresh_recompiles_only_on_change() {
	let mut device = device();
	let mut host = ParameterMap::new();
	host.set("source", "${program}").set("program", "red");

	let mut registry = BindingRegistry::new();
	registry.source("source", 0);

	let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
	assert!(pipeline.refresh(&mut device, &host).is_some());
	assert!(pipeline.refresh(&mut device, &host).is_none());

	// One program, two targets with their framebuffers, one quad
	assert_eq!(device.live_objects(), [1, 2, 2, 1]);

	host.set("program", "green");
	let report = pipeline.refresh(&mut device, &host).unwrap();
	assert!(report.is_complete());
	assert_eq!(device.live_objects(), [1, 2, 2, 1]);

	pipeline.render(&mut device, &host);
	assert_eq!(device.screen_pixel(0, 0), Some([0.0, 1.0, 0.0, 1.0]));

	pipeline.set_resolution(Resolution::new(3, 3));
	assert!(pipeline.refresh(&mut device, &host).is_some());
	let output = pipeline.passes()[0].output(FrameCarry::Swap);
	assert_eq!(device.texture_pixels(output).map(<[_]>::len), Some(9));

	pipeline.release(&mut device);
	assert_eq!(device.live_objects(), [0, 0, 0, 0]);
	assert!(pipeline.passes().is_empty());
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

proptest! {
	#[test]
	fn float_arrays_reach_the_device_unchanged(values in prop::collection::vec(-1.0e6_f32..1.0e6, 1..64)) {
		let mut host = ParameterMap::new();
		host.set("source", "uniforms").set("spheres", values.clone());

		let mut registry = BindingRegistry::new();
		registry.source("source", 0).bind("spheres", 0, UniformKind::FloatArray);

		let bindings = registry.bindings(0, &host);
		prop_assert_eq!(bindings.len(), 1);
		let BindingValue::Args(UniformArgs::FloatArray(read)) = bindings[0].value else {
			panic!("expected a float array");
		};
		prop_assert_eq!(read, values.as_slice());

		let mut device = device();
		let mut pipeline = PassPipeline::new(registry, config(FrameCarry::Swap));
		pipeline.compile(&mut device, &host);
		device.take_trace();
		pipeline.render(&mut device, &host);

		let pushed = uniform_pushes(&device.take_trace())
			.into_iter()
			.find_map(|call| match call {
				DeviceCall::SetUniform { value: UniformValue::FloatArray(pushed), .. } => Some(pushed),
				_ => None,
			});
		prop_assert_eq!(pushed, Some(values));
	}
}
