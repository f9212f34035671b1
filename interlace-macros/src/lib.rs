//! Proc macros for the interlace systematic concurrency testing runtime.

use convert_case::{Case, Casing};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, ItemFn};

/// Turn a test function into a systematic test: the body runs under
/// `interlace::verify` with the default configuration and the test fails if
/// any schedule produces a bug.
///
/// ```ignore
/// #[interlace::test]
/// fn no_lost_updates() {
///     // spawn operations, send events, assert invariants...
/// }
/// ```
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let attrs = &input.attrs;
    let vis = &input.vis;
    let name = &input.sig.ident;
    let block = &input.block;

    quote! {
        #(#attrs)*
        #[::core::prelude::v1::test]
        #vis fn #name() {
            let report = ::interlace::verify(::interlace::Config::default(), || #block);
            if let Some(bug) = report.first_bug() {
                ::std::panic!("interlace found a bug: {}", bug.failure);
            }
        }
    }
    .into()
}

/// Derive `interlace::actor::Tagged` for an event payload type; the tag is
/// the snake_cased type name.
#[proc_macro_derive(Tagged)]
pub fn derive_tagged(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = &input.ident;
    let tag = ident.to_string().to_case(Case::Snake);
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics ::interlace::actor::Tagged for #ident #ty_generics #where_clause {
            const TAG: &'static str = #tag;
        }
    }
    .into()
}
