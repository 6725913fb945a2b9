// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use proc_macro::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_macro_input, FnArg, ItemFn, Pat};

/// The macro for labeling acceptance test cases.
///
/// Test case functions have the signature `async fn test(ctx:
/// &acc_testcase::TestCtx)`. The macro moves the function body into an
/// async function returning `acc_testcase::Result<()>`, so the body can use
/// the `?` operator and `return Ok(())` to pass early, and replaces the
/// original function with a wrapper that boxes the body's future and maps
/// its result to an `acc_testcase::TestOutcome`. It also creates an entry
/// in the test case inventory that allows the runner to enumerate the test.
#[proc_macro_attribute]
pub fn acc_testcase(_attrib: TokenStream, input: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(input as ItemFn);

    let ctx_ident = match item_fn.sig.inputs.first() {
        Some(FnArg::Typed(arg)) => match &*arg.pat {
            Pat::Ident(pat) if item_fn.sig.inputs.len() == 1 => {
                pat.ident.clone()
            }
            _ => return signature_error(&item_fn),
        },
        _ => return signature_error(&item_fn),
    };

    // Build the inventory record for this test. The `module_path!()` in the
    // generated code allows the test case to report the fully-qualified path to
    // itself regardless of where it's located.
    let fn_ident = item_fn.sig.ident.clone();
    let fn_name = fn_ident.to_string();
    let submit: proc_macro2::TokenStream = quote! {
        acc_testcase::inventory_submit! {
            acc_testcase::TestCase::new(
                module_path!(),
                #fn_name,
                acc_testcase::TestFunction { f: #fn_ident }
            )
        }
    };

    let body_ident = format_ident!("__{}_body", fn_ident);
    let fn_vis = item_fn.vis.clone();
    let fn_attrs = item_fn.attrs.clone();
    let fn_inputs = item_fn.sig.inputs.clone();
    let fn_block = item_fn.block;
    let remade_fn = quote! {
        #(#fn_attrs)*
        #fn_vis fn #fn_ident(
            #ctx_ident: &acc_testcase::TestCtx,
        ) -> acc_testcase::BoxFuture<'_, acc_testcase::TestOutcome> {
            #[allow(unreachable_code)]
            async fn #body_ident(#fn_inputs) -> acc_testcase::Result<()> {
                #fn_block
                Ok(())
            }

            acc_testcase::FutureExt::boxed(async move {
                acc_testcase::TestOutcome::from_result(
                    #body_ident(#ctx_ident).await,
                )
            })
        }
    };

    quote! {
        #remade_fn

        #submit
    }
    .into()
}

fn signature_error(item_fn: &ItemFn) -> TokenStream {
    quote_spanned! {item_fn.sig.span()=>
        compile_error!(
            "test cases must take exactly one argument, `ctx: &TestCtx`"
        );
    }
    .into()
}
