use std::sync::OnceLock;

use derive_more::{Display, Error};
use regex::{Captures, Regex};

use super::binding::{FieldValue, Parameters};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Clone, Debug, Display, Error, PartialEq, Eq, Hash)]
pub enum TemplateError {
	#[display(fmt = "`${{{}}}` is not a field path", expression)]
	InvalidExpression {
		expression: String,
	},

	#[display(fmt = "no field `{}` to substitute", path)]
	UnknownField {
		path: String,
	},

	#[display(fmt = "field `{}` has no text form", path)]
	Unprintable {
		path: String,
	},
}

fn placeholder() -> &'static Regex {
	static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
	PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").unwrap())
}

fn field_path() -> &'static Regex {
	static FIELD_PATH: OnceLock<Regex> = OnceLock::new();
	FIELD_PATH.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap())
}

/// Replaces every `${field.path}` in `source` with the text form of that host field.
///
/// Only dotted identifiers are accepted between the braces, nothing gets evaluated.
pub fn evaluate<P>(source: &str, host: &P) -> Result<String, TemplateError>
where
	P: Parameters + ?Sized,
{
	let mut failure = None;

	let evaluated = placeholder().replace_all(source, |caps: &Captures| {
		if failure.is_some() {
			return String::new();
		}

		match substitute(caps[1].trim(), host) {
			Ok(text) => text,
			Err(err) => {
				failure = Some(err);
				String::new()
			}
		}
	});

	match failure {
		Some(err) => Err(err),
		None => Ok(evaluated.into_owned()),
	}
}

fn substitute<P>(path: &str, host: &P) -> Result<String, TemplateError>
where
	P: Parameters + ?Sized,
{
	if !field_path().is_match(path) {
		return Err(TemplateError::InvalidExpression {
			expression: path.to_owned(),
		});
	}

	match host.field(path) {
		None => Err(TemplateError::UnknownField { path: path.to_owned() }),
		Some(FieldValue::Image(_)) => Err(TemplateError::Unprintable { path: path.to_owned() }),
		Some(value) => Ok(value.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::libs::binding::ParameterMap;

	fn host() -> ParameterMap {
		let mut host = ParameterMap::new();
		host.set("batch_size", 8).set("lens.focal", 0.05_f32).set("name", "path");
		host
	}

	#[test]
	fn substitutes_fields_and_nested_paths() {
		let out = evaluate("const N: i32 = ${batch_size};\nlet f = ${ lens.focal };", &host()).unwrap();
		assert_eq!(out, "const N: i32 = 8;\nlet f = 0.05;");
	}

	#[test]
	fn several_placeholders_on_one_line_are_separate() {
		let out = evaluate("${name}_${batch_size}", &host()).unwrap();
		assert_eq!(out, "path_8");
	}

	#[test]
	fn text_without_placeholders_is_unchanged() {
		let source = "fn fs_main() -> vec4<f32> { return vec4(1.0); }";
		assert_eq!(evaluate(source, &host()).unwrap(), source);
	}

	#[test]
	fn expressions_are_rejected() {
		let err = evaluate("${batch_size * 2}", &host()).unwrap_err();
		assert_eq!(
			err,
			TemplateError::InvalidExpression {
				expression: "batch_size * 2".into()
			}
		);

		assert!(matches!(
			evaluate("${alert(1)}", &host()),
			Err(TemplateError::InvalidExpression { .. })
		));
	}

	#[test]
	fn unknown_fields_fail() {
		assert_eq!(
			evaluate("${reflects}", &host()),
			Err(TemplateError::UnknownField {
				path: "reflects".into()
			})
		);
	}
}
