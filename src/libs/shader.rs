use std::{borrow::Cow, collections::HashSet, mem, ops::Range};

use anyhow::{anyhow, Result};
use hashlink::{LinkedHashMap, LinkedHashSet};
use regex::Regex;
use typed_path::{Utf8UnixPath, Utf8UnixPathBuf};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// An object-safe view over embedded files.
pub trait Assets {
	fn load(&self, file_path: &str) -> Option<Cow<'static, [u8]>>;
}

impl<T: rust_embed::Embed> Assets for T {
	fn load(&self, file_path: &str) -> Option<Cow<'static, [u8]>> {
		<Self as rust_embed::Embed>::get(file_path).map(|file| file.data)
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Assembles shader text out of embedded files, resolving `#include "path"` and
/// `#define KEY value` lines. Anything else, `${...}` placeholders included, is left as is.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct ShaderBuilder {
	include_directives: LinkedHashSet<Shader>,
	define_directives: LinkedHashMap<String, String>,
}

impl ShaderBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn include(&mut self, shader: impl Into<Shader>) -> &mut Self {
		self.include_directives.insert(shader.into());
		self
	}

	pub fn include_path(&mut self, path: &str) -> &mut Self {
		self.include(Shader::Path(Utf8UnixPathBuf::from(path)))
	}

	pub fn define<K, V>(&mut self, key: K, value: V) -> &mut Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		self.define_directives.insert(key.into(), value.into());
		self
	}

	pub fn build<T: Assets>(&mut self, assets: &T) -> Result<String> {
		let mut blacklist = HashSet::new();
		let mut builder = mem::take(self);

		let mut source = String::new();
		for shader in builder.include_directives.drain() {
			source.push_str(&shader.build_recursively(assets, &mut blacklist)?);
		}

		builder.define_directives.extend(take_define_directives(&mut source));
		Ok(builder.apply_define_directives(source))
	}

	fn apply_define_directives(&self, mut source: String) -> String {
		let mut directives = self.define_directives.iter().collect::<Vec<_>>();
		// Longest keys first, so that a key can't eat the start of a longer one
		directives.sort_by(|(key1, _), (key2, _)| key2.len().cmp(&key1.len()).then(key2.cmp(key1)));

		for (key, value) in directives {
			source = source.replace(key.as_str(), value);
		}
		source
	}
}

/// Removes every `#define KEY value` line from the source and returns them.
fn take_define_directives(source: &mut String) -> LinkedHashMap<String, String> {
	let mut define_directives = LinkedHashMap::<String, String>::new();

	let re = Regex::new(r"(?m)^#define (\S+) (.+?)\r?$").unwrap();

	let mut ranges = Vec::<Range<usize>>::new();
	for caps in re.captures_iter(source) {
		ranges.push(caps.get(0).unwrap().range());
		define_directives.insert(caps[1].to_owned(), caps[2].trim().to_owned());
	}

	// Back to front so the earlier ranges stay valid
	for range in ranges.into_iter().rev() {
		source.replace_range(range, "");
	}

	define_directives
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Hash, Debug, Clone, PartialEq, Eq)]
pub enum Shader {
	Source(String),
	Path(Utf8UnixPathBuf),
}

impl Shader {
	fn parent(&self) -> Utf8UnixPathBuf {
		match self {
			Shader::Source(_) => Utf8UnixPathBuf::from("/"),
			Shader::Path(path) => path
				.parent()
				.map(Utf8UnixPath::to_path_buf)
				.unwrap_or_else(|| Utf8UnixPathBuf::from("/")),
		}
	}

	fn raw_source<T: Assets>(&self, assets: &T) -> Result<String> {
		match self {
			Shader::Source(source) => Ok(source.clone()),
			Shader::Path(path) => {
				let path = rooted(path);
				let data = assets
					.load(path.as_str())
					.ok_or_else(|| anyhow!("File not found: {}", path))?;

				String::from_utf8(data.into_owned()).map_err(|_| anyhow!("Invalid UTF8 file: {}", path))
			}
		}
	}

	fn build_recursively<T: Assets>(self, assets: &T, blacklist: &mut HashSet<Shader>) -> Result<String> {
		// Every file is included at most once
		if let Shader::Path(path) = &self {
			if !blacklist.insert(Shader::Path(rooted(path))) {
				return Ok(String::new());
			}
		}

		let parent_path = self.parent();
		let mut source = self.raw_source(assets)?;

		let re = Regex::new(r#"(?m)^#include "(.+?)"\r?$"#).unwrap();
		let includes = re
			.captures_iter(&source)
			.map(|caps| (caps[1].to_owned(), caps.get(0).unwrap().range()))
			.collect::<Vec<_>>();

		// Back to front so the earlier ranges stay valid
		for (path, range) in includes.into_iter().rev() {
			let included = Shader::Path(rooted(&parent_path.join(path.as_str()))).build_recursively(assets, blacklist)?;
			source.replace_range(range, &included);
		}

		Ok(source)
	}
}

/// The absolute, normalized form of an asset path.
fn rooted(path: &Utf8UnixPath) -> Utf8UnixPathBuf {
	Utf8UnixPathBuf::from("/").join(path).normalize()
}

impl From<String> for Shader {
	fn from(value: String) -> Self {
		Shader::Source(value)
	}
}

impl From<&str> for Shader {
	fn from(value: &str) -> Self {
		Shader::Source(value.to_owned())
	}
}

impl From<Utf8UnixPathBuf> for Shader {
	fn from(value: Utf8UnixPathBuf) -> Self {
		Shader::Path(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct TestAssets(Vec<(&'static str, &'static str)>);

	impl Assets for TestAssets {
		fn load(&self, file_path: &str) -> Option<Cow<'static, [u8]>> {
			self.0
				.iter()
				.find(|(path, _)| *path == file_path)
				.map(|(_, source)| Cow::Borrowed(source.as_bytes()))
		}
	}

	fn assets() -> TestAssets {
		TestAssets(vec![
			("/main.wgsl", "#include \"lib/common.wgsl\"\n#include \"lib/common.wgsl\"\nfn main() { PI; }"),
			("/lib/common.wgsl", "#define PI 3.1415\n#include \"../other.wgsl\"\nconst A = PI;"),
			("/other.wgsl", "const B = ${batchSize};"),
		])
	}

	#[test]
	fn includes_resolve_relative_to_the_including_file() {
		let source = ShaderBuilder::new().include_path("main.wgsl").build(&assets()).unwrap();

		assert_eq!(source.matches("const A").count(), 1);
		assert!(source.contains("const B = ${batchSize};"));
		assert!(source.contains("fn main() { 3.1415; }"));
		assert!(!source.contains("#define"));
		assert!(!source.contains("#include"));
	}

	#[test]
	fn explicit_defines_apply_to_every_include() {
		let source = ShaderBuilder::new()
			.include("fn f() -> f32 { return SCALE; }")
			.define("SCALE", "2.0")
			.build(&assets())
			.unwrap();

		assert_eq!(source, "fn f() -> f32 { return 2.0; }");
	}

	#[test]
	fn missing_files_are_errors() {
		let err = ShaderBuilder::new().include_path("nope.wgsl").build(&assets()).unwrap_err();
		assert!(err.to_string().contains("/nope.wgsl"));
	}
}
