//! What a WGSL fragment program exposes, found by parsing and validating it with naga.

use naga::{
	front::wgsl,
	proc::Layouter,
	valid::{Capabilities, ValidationFlags, Validator},
	AddressSpace, ShaderStage, TypeInner,
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// The vertex stage every program gets. It forwards the quad corner as `uv`, with `uv.y`
/// growing downwards.
pub const VERTEX_STAGE: &str = r"
struct VertexOutput {
	@builtin(position) position: vec4<f32>,
	@location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec2<f32>) -> VertexOutput {
	var out: VertexOutput;
	out.position = vec4<f32>(a_position, 0.0, 1.0);
	out.uv = vec2<f32>(a_position.x * 0.5 + 0.5, 0.5 - a_position.y * 0.5);
	return out;
}
";

pub const VERTEX_ENTRY: &str = "vs_main";

/// Suffix of the sampler global paired with a texture global, `src` gets `src_sampler`.
pub const SAMPLER_SUFFIX: &str = "_sampler";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
	/// A block in the uniform address space, of the given size in bytes
	Uniform { size: u64 },
	/// A read-only storage array, whose elements have the given stride in bytes
	Storage { stride: u64 },
	Texture,
	Sampler,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
	pub name: String,
	pub group: u32,
	pub binding: u32,
	pub kind: ResourceKind,
}

#[derive(Clone, Debug)]
pub struct Reflection {
	pub fragment_entry: String,
	/// Globals used by either entry point, in declaration order
	pub resources: Vec<Resource>,
}

impl Reflection {
	pub fn resource(&self, name: &str) -> Option<&Resource> {
		self.resources.iter().find(|r| r.name == name)
	}

	/// The sampler that goes with texture `name`, if the program declares one.
	pub fn sampler_of(&self, name: &str) -> Option<&Resource> {
		let sampler = format!("{}{}", name, SAMPLER_SUFFIX);
		self.resources
			.iter()
			.find(|r| r.kind == ResourceKind::Sampler && r.name == sampler)
	}
}

/// Prepends [`VERTEX_STAGE`] to a fragment program.
pub fn with_vertex_stage(fragment: &str) -> String {
	format!("{}\n{}", VERTEX_STAGE, fragment)
}

/// Parses and validates a complete program (vertex stage included). On failure returns
/// the compiler log.
pub fn reflect(source: &str) -> Result<Reflection, String> {
	let module = wgsl::parse_str(source).map_err(|err| err.emit_to_string(source))?;

	let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
		.validate(&module)
		.map_err(|err| format!("{:?}", err))?;

	let fragment_entry = module
		.entry_points
		.iter()
		.find(|entry| entry.stage == ShaderStage::Fragment)
		.map(|entry| entry.name.clone())
		.ok_or_else(|| "the program has no @fragment entry point".to_owned())?;

	let mut layouter = Layouter::default();
	layouter.update(module.to_ctx()).map_err(|err| format!("{:?}", err))?;

	let mut resources = Vec::new();

	for (handle, global) in module.global_variables.iter() {
		let (Some(binding), Some(name)) = (&global.binding, &global.name) else {
			continue;
		};

		let used = (0..module.entry_points.len()).any(|i| !info.get_entry_point(i)[handle].is_empty());
		if !used {
			continue;
		}

		let kind = match (global.space, &module.types[global.ty].inner) {
			(AddressSpace::Uniform, _) => ResourceKind::Uniform {
				size: layouter[global.ty].size as u64,
			},
			(AddressSpace::Storage { .. }, TypeInner::Array { stride, .. }) => ResourceKind::Storage { stride: *stride as u64 },
			(AddressSpace::Handle, TypeInner::Image { .. }) => ResourceKind::Texture,
			(AddressSpace::Handle, TypeInner::Sampler { .. }) => ResourceKind::Sampler,
			(space, _) => return Err(format!("`{}` in {:?} can't be fed by the pipeline", name, space)),
		};

		resources.push(Resource {
			name: name.clone(),
			group: binding.group,
			binding: binding.binding,
			kind,
		});
	}

	Ok(Reflection {
		fragment_entry,
		resources,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	const ACCUMULATE: &str = r"
@group(0) @binding(0) var<uniform> frameCount: i32;
@group(0) @binding(1) var prev: texture_2d<f32>;
@group(0) @binding(2) var prev_sampler: sampler;
@group(0) @binding(3) var<storage, read> spheres: array<f32>;
@group(0) @binding(4) var<uniform> unused: f32;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
	let old = textureSample(prev, prev_sampler, in.uv);
	return old * f32(frameCount) + vec4<f32>(spheres[0]);
}
";

	#[test]
	fn finds_used_globals_only() {
		let reflection = reflect(&with_vertex_stage(ACCUMULATE)).unwrap();
		assert_eq!(reflection.fragment_entry, "fs_main");

		let names = reflection.resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, vec!["frameCount", "prev", "prev_sampler", "spheres"]);

		assert_eq!(reflection.resource("frameCount").unwrap().kind, ResourceKind::Uniform { size: 4 });
		assert_eq!(reflection.resource("spheres").unwrap().kind, ResourceKind::Storage { stride: 4 });
		assert_eq!(reflection.sampler_of("prev").unwrap().binding, 2);
		assert!(reflection.sampler_of("spheres").is_none());
	}

	#[test]
	fn syntax_errors_come_back_as_a_log() {
		let log = reflect(&with_vertex_stage("@fragment fn fs_main( -> {")).unwrap_err();
		assert!(!log.is_empty());
	}

	#[test]
	fn programs_need_a_fragment_stage() {
		assert!(reflect(VERTEX_STAGE).is_err());
	}
}
