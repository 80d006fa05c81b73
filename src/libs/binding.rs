use std::fmt;

use hashlink::LinkedHashMap;
use image::DynamicImage;

use super::device::UniformArgs;

pub use pass_tracer_derive::Parameters;

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

pub type PassIndex = usize;

/// The current value of one host field, borrowed from the host.
#[derive(Copy, Clone, Debug)]
pub enum FieldValue<'a> {
	Bool(bool),
	Int(i32),
	Float(f32),
	Floats(&'a [f32]),
	Text(&'a str),
	Image(&'a DynamicImage),
}

impl fmt::Display for FieldValue<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FieldValue::Bool(value) => write!(f, "{}", value),
			FieldValue::Int(value) => write!(f, "{}", value),
			FieldValue::Float(value) => write!(f, "{}", value),
			FieldValue::Floats(values) => {
				let mut first = true;
				for value in values.iter() {
					if !first {
						f.write_str(",")?;
					}
					first = false;
					write!(f, "{}", value)?;
				}
				Ok(())
			}
			FieldValue::Text(text) => f.write_str(text),
			FieldValue::Image(image) => write!(f, "<image {}x{}>", image.width(), image.height()),
		}
	}
}

/// The object owning the render parameters. The pipeline only ever reads it, through
/// this accessor, at the moment a value is needed.
///
/// Paths are field names, or dotted field names for nested parameter objects.
pub trait Parameters {
	fn field(&self, path: &str) -> Option<FieldValue<'_>>;
}

/// Conversion of a single host field into a [`FieldValue`], used by
/// `#[derive(Parameters)]`.
pub trait AsFieldValue {
	fn as_field_value(&self) -> Option<FieldValue<'_>>;
}

#[rustfmt::skip] impl AsFieldValue for bool          {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Bool(*self))}}
#[rustfmt::skip] impl AsFieldValue for i32           {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Int(*self))}}
#[rustfmt::skip] impl AsFieldValue for f32           {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Float(*self))}}
#[rustfmt::skip] impl AsFieldValue for Vec<f32>      {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Floats(self))}}
#[rustfmt::skip] impl AsFieldValue for String        {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Text(self))}}
#[rustfmt::skip] impl AsFieldValue for &str          {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Text(self))}}
#[rustfmt::skip] impl AsFieldValue for DynamicImage  {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Image(self))}}

#[rustfmt::skip] impl<const N: usize> AsFieldValue for [f32; N] {fn as_field_value(&self) -> Option<FieldValue<'_>> {Some(FieldValue::Floats(self))}}

impl<T: AsFieldValue> AsFieldValue for Option<T> {
	fn as_field_value(&self) -> Option<FieldValue<'_>> {
		self.as_ref().and_then(AsFieldValue::as_field_value)
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// How a bound field is handed to its shader.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
	Int,
	Float,
	/// Fixed arity float vector (2, 3 or 4)
	Vec(u8),
	/// Dynamically sized block of floats
	FloatArray,
	Mat3 { transposed: bool },
	Mat4 { transposed: bool },
	Texture,
}

impl UniformKind {
	/// Shapes a live field value into the upload call of this kind. `None` when the
	/// value doesn't fit the declared kind, or for textures (which are uploaded once
	/// at compile time and only referenced by unit afterwards).
	pub fn args<'a>(&self, value: FieldValue<'a>) -> Option<UniformArgs<'a>> {
		match (self, value) {
			(UniformKind::Int, FieldValue::Int(value)) => Some(UniformArgs::Int(value)),
			(UniformKind::Int, FieldValue::Bool(value)) => Some(UniformArgs::Int(value as i32)),
			(UniformKind::Float, FieldValue::Float(value)) => Some(UniformArgs::Float(value)),
			(UniformKind::Float, FieldValue::Int(value)) => Some(UniformArgs::Float(value as f32)),
			(UniformKind::Vec(n), FieldValue::Floats(values)) if values.len() == *n as usize && (2..=4).contains(n) => {
				Some(UniformArgs::Vec(values))
			}
			(UniformKind::FloatArray, FieldValue::Floats(values)) => Some(UniformArgs::FloatArray(values)),
			(UniformKind::Mat3 { transposed }, FieldValue::Floats(data)) if data.len() == 9 => Some(UniformArgs::Mat3 {
				transposed: *transposed,
				data,
			}),
			(UniformKind::Mat4 { transposed }, FieldValue::Floats(data)) if data.len() == 16 => Some(UniformArgs::Mat4 {
				transposed: *transposed,
				data,
			}),
			_ => None,
		}
	}
}

/// The declaration behind one bound field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingSpec {
	pub pass: PassIndex,
	/// Name of the uniform in the pass's shader
	pub name: String,
	pub kind: UniformKind,
}

/// What a binding currently holds.
#[derive(Copy, Clone, Debug)]
pub enum BindingValue<'a> {
	Args(UniformArgs<'a>),
	Image(&'a DynamicImage),
}

/// A declared binding together with the value its host field holds right now.
#[derive(Copy, Clone, Debug)]
pub struct UniformBinding<'a> {
	pub pass: PassIndex,
	pub name: &'a str,
	pub kind: UniformKind,
	pub value: BindingValue<'a>,
}

impl BindingSpec {
	/// Reads the bound field from the host. `None` if the field is missing or its
	/// value doesn't fit the kind.
	pub fn read<'a, P>(&'a self, field: &str, host: &'a P) -> Option<UniformBinding<'a>>
	where
		P: Parameters + ?Sized,
	{
		let raw = host.field(field)?;

		let value = match (self.kind, raw) {
			(UniformKind::Texture, FieldValue::Image(image)) => BindingValue::Image(image),
			(kind, raw) => BindingValue::Args(kind.args(raw)?),
		};

		Some(UniformBinding {
			pass: self.pass,
			name: &self.name,
			kind: self.kind,
			value,
		})
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Which host fields feed which pass, and which host fields hold each pass's shader
/// source.
///
/// The registry never stores values: every query reads the host.
#[derive(Clone, Debug, Default)]
pub struct BindingRegistry {
	uniforms: LinkedHashMap<String, BindingSpec>,
	sources: LinkedHashMap<String, PassIndex>,
}

impl BindingRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds `field` to the uniform of the same name in `pass`.
	pub fn bind(&mut self, field: impl Into<String>, pass: PassIndex, kind: UniformKind) -> &mut Self {
		let field = field.into();
		let name = field.clone();
		self.bind_as(field, name, pass, kind)
	}

	/// Binds `field` to the uniform `name` in `pass`. Declaring a field again replaces
	/// its previous binding, but keeps its place in declaration order.
	pub fn bind_as(
		&mut self,
		field: impl Into<String>,
		name: impl Into<String>,
		pass: PassIndex,
		kind: UniformKind,
	) -> &mut Self {
		let spec = BindingSpec {
			pass,
			name: name.into(),
			kind,
		};

		let field = field.into();
		match self.uniforms.get_mut(&field) {
			Some(existing) => *existing = spec,
			None => {
				self.uniforms.insert(field, spec);
			}
		}
		self
	}

	/// Declares `field` as the shader source of `pass`.
	pub fn source(&mut self, field: impl Into<String>, pass: PassIndex) -> &mut Self {
		let field = field.into();
		match self.sources.get_mut(&field) {
			Some(existing) => *existing = pass,
			None => {
				self.sources.insert(field, pass);
			}
		}
		self
	}

	/// One past the highest pass that has a source declared.
	pub fn pass_count(&self) -> usize {
		self.sources.values().max().map_or(0, |pass| pass + 1)
	}

	/// The field holding the source of `pass`. With several candidates the latest
	/// declaration wins.
	pub fn source_field(&self, pass: PassIndex) -> Option<&str> {
		self.sources
			.iter()
			.rev()
			.find(|(_, source_pass)| **source_pass == pass)
			.map(|(field, _)| field.as_str())
	}

	/// The current raw source text of `pass`. Empty text counts as no source.
	pub fn source_text<'a, P>(&self, pass: PassIndex, host: &'a P) -> Option<&'a str>
	where
		P: Parameters + ?Sized,
	{
		match host.field(self.source_field(pass)?)? {
			FieldValue::Text(text) if !text.trim().is_empty() => Some(text),
			_ => None,
		}
	}

	/// Declarations of `pass` as `(field, spec)`, in declaration order.
	pub fn declared(&self, pass: PassIndex) -> impl Iterator<Item = (&str, &BindingSpec)> {
		self.uniforms
			.iter()
			.filter(move |(_, spec)| spec.pass == pass)
			.map(|(field, spec)| (field.as_str(), spec))
	}

	/// Every binding of `pass` with its live value. Fields that are missing or hold a
	/// mismatching value are left out.
	pub fn bindings<'a, P>(&'a self, pass: PassIndex, host: &'a P) -> Vec<UniformBinding<'a>>
	where
		P: Parameters + ?Sized,
	{
		self.declared(pass)
			.filter_map(|(field, spec)| spec.read(field, host))
			.collect()
	}

	/// The live binding for uniform `name` of `pass`.
	pub fn binding<'a, P>(&'a self, pass: PassIndex, name: &str, host: &'a P) -> Option<UniformBinding<'a>>
	where
		P: Parameters + ?Sized,
	{
		self.declared(pass)
			.find(|(_, spec)| spec.name == name)
			.and_then(|(field, spec)| spec.read(field, host))
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// An owned field value, for hosts built at runtime.
#[derive(Clone, Debug)]
pub enum ParameterValue {
	Bool(bool),
	Int(i32),
	Float(f32),
	Floats(Vec<f32>),
	Text(String),
	Image(DynamicImage),
}

impl ParameterValue {
	pub fn as_field_value(&self) -> FieldValue<'_> {
		match self {
			ParameterValue::Bool(value) => FieldValue::Bool(*value),
			ParameterValue::Int(value) => FieldValue::Int(*value),
			ParameterValue::Float(value) => FieldValue::Float(*value),
			ParameterValue::Floats(values) => FieldValue::Floats(values),
			ParameterValue::Text(text) => FieldValue::Text(text),
			ParameterValue::Image(image) => FieldValue::Image(image),
		}
	}
}

#[rustfmt::skip] impl From<bool>         for ParameterValue {fn from(value: bool)         -> Self {Self::Bool(value)}}
#[rustfmt::skip] impl From<i32>          for ParameterValue {fn from(value: i32)          -> Self {Self::Int(value)}}
#[rustfmt::skip] impl From<f32>          for ParameterValue {fn from(value: f32)          -> Self {Self::Float(value)}}
#[rustfmt::skip] impl From<Vec<f32>>     for ParameterValue {fn from(value: Vec<f32>)     -> Self {Self::Floats(value)}}
#[rustfmt::skip] impl From<String>       for ParameterValue {fn from(value: String)       -> Self {Self::Text(value)}}
#[rustfmt::skip] impl From<&str>         for ParameterValue {fn from(value: &str)         -> Self {Self::Text(value.to_owned())}}
#[rustfmt::skip] impl From<DynamicImage> for ParameterValue {fn from(value: DynamicImage) -> Self {Self::Image(value)}}

#[rustfmt::skip] impl<const N: usize> From<[f32; N]> for ParameterValue {fn from(value: [f32; N]) -> Self {Self::Floats(value.to_vec())}}

/// A host whose fields are looked up by their full dotted path.
#[derive(Clone, Debug, Default)]
pub struct ParameterMap {
	values: LinkedHashMap<String, ParameterValue>,
}

impl ParameterMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(&mut self, path: impl Into<String>, value: impl Into<ParameterValue>) -> &mut Self {
		let path = path.into();
		let value = value.into();
		match self.values.get_mut(&path) {
			Some(existing) => *existing = value,
			None => {
				self.values.insert(path, value);
			}
		}
		self
	}

	pub fn get(&self, path: &str) -> Option<&ParameterValue> {
		self.values.get(path)
	}

	pub fn get_mut(&mut self, path: &str) -> Option<&mut ParameterValue> {
		self.values.get_mut(path)
	}

	pub fn remove(&mut self, path: &str) -> Option<ParameterValue> {
		self.values.remove(path)
	}
}

impl Parameters for ParameterMap {
	fn field(&self, path: &str) -> Option<FieldValue<'_>> {
		self.values.get(path).map(ParameterValue::as_field_value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn host() -> ParameterMap {
		let mut host = ParameterMap::new();
		host.set("exposure", 1.5_f32)
			.set("frame_count", 3)
			.set("color", [1.0_f32, 0.5, 0.25])
			.set("camera", vec![0.0_f32; 16])
			.set("source", "fn main() {}");
		host
	}

	#[test]
	fn bindings_follow_declaration_order_per_pass() {
		let mut registry = BindingRegistry::new();
		registry
			.bind("exposure", 0, UniformKind::Float)
			.bind("frame_count", 1, UniformKind::Int)
			.bind("color", 0, UniformKind::Vec(3));

		let host = host();
		let names = registry.bindings(0, &host).iter().map(|b| b.name).collect::<Vec<_>>();
		assert_eq!(names, vec!["exposure", "color"]);

		let names = registry.bindings(1, &host).iter().map(|b| b.name).collect::<Vec<_>>();
		assert_eq!(names, vec!["frame_count"]);
	}

	#[test]
	fn redeclaring_a_field_replaces_its_binding() {
		let mut registry = BindingRegistry::new();
		registry.bind("exposure", 0, UniformKind::Float);
		registry.bind_as("exposure", "u_exposure", 1, UniformKind::Float);

		let host = host();
		assert!(registry.bindings(0, &host).is_empty());

		let binding = registry.binding(1, "u_exposure", &host).unwrap();
		assert!(matches!(binding.value, BindingValue::Args(UniformArgs::Float(v)) if v == 1.5));
	}

	#[test]
	fn bindings_read_live_values() {
		let mut registry = BindingRegistry::new();
		registry.bind("frame_count", 0, UniformKind::Int);

		let mut host = host();
		host.set("frame_count", 42);

		let binding = registry.binding(0, "frame_count", &host).unwrap();
		assert!(matches!(binding.value, BindingValue::Args(UniformArgs::Int(42))));
	}

	#[test]
	fn mismatching_values_are_inert() {
		let mut registry = BindingRegistry::new();
		registry
			.bind("color", 0, UniformKind::Vec(2))
			.bind("camera", 0, UniformKind::Mat3 { transposed: false })
			.bind("missing", 0, UniformKind::Float);

		assert!(registry.bindings(0, &host()).is_empty());
	}

	#[test]
	fn matrices_carry_their_transpose_flag() {
		let mut registry = BindingRegistry::new();
		registry.bind("camera", 0, UniformKind::Mat4 { transposed: true });

		let host = host();
		let binding = registry.binding(0, "camera", &host).unwrap();
		assert!(matches!(
			binding.value,
			BindingValue::Args(UniformArgs::Mat4 { transposed: true, data }) if data.len() == 16
		));
	}

	#[test]
	fn pass_count_comes_from_highest_source() {
		let mut registry = BindingRegistry::new();
		assert_eq!(registry.pass_count(), 0);

		registry.source("post", 2).source("source", 0);
		assert_eq!(registry.pass_count(), 3);
		assert_eq!(registry.source_field(0), Some("source"));
		assert_eq!(registry.source_field(1), None);

		let host = host();
		assert_eq!(registry.source_text(0, &host), Some("fn main() {}"));
		assert_eq!(registry.source_text(2, &host), None);
	}

	#[test]
	fn field_values_print_like_template_text() {
		assert_eq!(FieldValue::Int(4).to_string(), "4");
		assert_eq!(FieldValue::Float(1.0).to_string(), "1");
		assert_eq!(FieldValue::Float(0.25).to_string(), "0.25");
		assert_eq!(FieldValue::Floats(&[1.0, 2.5]).to_string(), "1,2.5");
	}

	#[derive(Parameters)]
	struct Lens {
		focal_length: f32,
		f_number: f32,
	}

	#[derive(Parameters)]
	struct Camera {
		#[parameters(nested)]
		lens: Lens,
		r#type: String,
	}

	#[test]
	fn nested_fields_resolve_through_dotted_paths() {
		let camera = Camera {
			lens: Lens {
				focal_length: 0.05,
				f_number: 2.8,
			},
			r#type: "thin".to_owned(),
		};

		assert!(matches!(camera.field("lens.focal_length"), Some(FieldValue::Float(v)) if v == 0.05));
		assert!(matches!(camera.field("type"), Some(FieldValue::Text("thin"))));
		assert!(camera.field("lens").is_none());
		assert!(camera.field("lens.aperture").is_none());
		assert!(camera.field("type.len").is_none());

		let mut registry = BindingRegistry::new();
		registry.bind_as("lens.f_number", "f_number", 0, UniformKind::Float);

		let binding = registry.binding(0, "f_number", &camera).unwrap();
		assert!(matches!(binding.value, BindingValue::Args(UniformArgs::Float(v)) if v == 2.8));

		let source = crate::libs::template::evaluate("let f = ${lens.f_number};", &camera).unwrap();
		assert_eq!(source, "let f = 2.8;");
	}
}
