//! Test attributes that fail a hung test instead of hanging the suite.
//!
//! `#[tokio_timeout_test]` runs an async test on a current-thread runtime;
//! `#[timeout]` wraps a synchronous test. Both take an optional budget:
//! a bare integer in seconds, or `ms = N` for milliseconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Ident, ItemFn, LitInt, Token, parse_macro_input};

const DEFAULT_TIMEOUT_MS: u64 = 20_000;

struct Budget {
    millis: u64,
}

impl Parse for Budget {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(Self {
                millis: DEFAULT_TIMEOUT_MS,
            });
        }
        let (lit, scale) = if input.peek(Ident) {
            let unit: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let scale = match unit.to_string().as_str() {
                "ms" => 1,
                "secs" => 1_000,
                _ => return Err(syn::Error::new_spanned(unit, "expected `ms` or `secs`")),
            };
            (input.parse::<LitInt>()?, scale)
        } else {
            (input.parse::<LitInt>()?, 1_000)
        };
        let value: u64 = lit.base10_parse()?;
        if value == 0 {
            return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
        }
        Ok(Self {
            millis: value.saturating_mul(scale),
        })
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let budget = parse_macro_input!(attr as Budget);
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = strip(attrs, is_tokio_test_attribute);
    let millis = budget.millis;
    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_millis(#millis), async move #block)
                .await
                .expect("test timed out");
        });
    };
    expand(attrs, vis, sig, body, millis)
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let budget = parse_macro_input!(attr as Budget);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout expects a synchronous test function; use tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip(attrs, is_test_attribute);
    expand(attrs, vis, sig, quote! { #block }, budget.millis)
}

/// Run `body` on a watchdog thread and fail the test if it overruns.
fn expand(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    body: TokenStream2,
    millis: u64,
) -> TokenStream {
    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let budget = std::time::Duration::from_millis(#millis);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(budget) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test timed out after {:?}", budget)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn strip(attrs: Vec<Attribute>, drop_if: fn(&Attribute) -> bool) -> Vec<Attribute> {
    attrs.into_iter().filter(|attr| !drop_if(attr)).collect()
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}
