use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{ext::IdentExt, parse_macro_input, Data::Struct, DeriveInput};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Implements `pass_tracer::libs::binding::Parameters` for a struct, so that every
/// named field can be looked up by its name (or by a dotted path for fields marked
/// `#[parameters(nested)]`).
///
/// Fields marked `#[parameters(skip)]` are not visible to the lookup.
#[proc_macro_derive(Parameters, attributes(parameters))]
pub fn parameters_derive(input: TokenStream) -> TokenStream {
	let input = parse_macro_input!(input as DeriveInput);

	let name = input.ident;
	let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

	let fields = match input.data {
		Struct(s) => s.fields,
		_ => {
			return syn::Error::new(Span::call_site(), "Parameters can only be derived for structs")
				.to_compile_error()
				.into()
		}
	};

	let mut arms = Vec::new();

	for field in fields {
		let Some(field_name) = field.ident else {
			return syn::Error::new(Span::call_site(), "All struct fields need an identifier")
				.to_compile_error()
				.into();
		};

		let mut nested = false;
		let mut skip = false;

		for attr in &field.attrs {
			if !attr.path().is_ident("parameters") {
				continue;
			}

			let parsed = attr.parse_nested_meta(|meta| {
				if meta.path.is_ident("nested") {
					nested = true;
					Ok(())
				} else if meta.path.is_ident("skip") {
					skip = true;
					Ok(())
				} else {
					Err(meta.error("expected `nested` or `skip`"))
				}
			});

			if let Err(err) = parsed {
				return err.to_compile_error().into();
			}
		}

		if skip {
			continue;
		}

		let key = field_name.unraw().to_string();

		arms.push(if nested {
			quote!(#key => ::pass_tracer::libs::binding::Parameters::field(&self.#field_name, rest?),)
		} else {
			quote!(#key if rest.is_none() => ::pass_tracer::libs::binding::AsFieldValue::as_field_value(&self.#field_name),)
		});
	}

	let out = quote! {
		impl #impl_generics ::pass_tracer::libs::binding::Parameters for #name #ty_generics #where_clause {
			fn field(&self, path: &str) -> ::core::option::Option<::pass_tracer::libs::binding::FieldValue<'_>> {
				let (head, rest) = match path.split_once('.') {
					::core::option::Option::Some((head, rest)) => (head, ::core::option::Option::Some(rest)),
					::core::option::Option::None => (path, ::core::option::Option::None),
				};

				match head {
					#(#arms)*
					_ => {
						let _ = rest;
						::core::option::Option::None
					}
				}
			}
		}
	};

	// println!("\n{}", out);

	out.into()
}
