use proc_macro2::TokenStream;
use quote::quote;
use syn::{Error, Ident, ItemFn, ReturnType, Type};

const PROFILES: &[&str] = &["current_thread", "multi_thread"];

/// Expands `#[reel_executor::main]` into a blocking entry point.
#[must_use]
pub fn expand_main(args: TokenStream, input: ItemFn) -> TokenStream {
    if input.sig.asyncness.is_none() {
        return Error::new_spanned(
            input.sig.fn_token,
            "#[reel_executor::main] expects an `async fn`",
        )
        .to_compile_error();
    }
    if !input.sig.inputs.is_empty() {
        return Error::new_spanned(&input.sig.inputs, "#[reel_executor::main] takes no arguments")
            .to_compile_error();
    }
    if !returns_result(&input.sig.output) {
        return Error::new_spanned(
            &input.sig.output,
            "#[reel_executor::main] requires the function to return a Result",
        )
        .to_compile_error();
    }

    let profile = match profile(args) {
        Ok(profile) => profile,
        Err(err) => return err.to_compile_error(),
    };

    let ItemFn { attrs, vis, sig, block } = input;
    let name = &sig.ident;
    let output = &sig.output;

    quote! {
        #(#attrs)*
        #vis fn #name() #output {
            let config = ::reel_executor::ExecutorConfig::#profile();
            let executor = ::reel_executor::build_executor(&config)?;
            executor.block_on(async move #block)
        }
    }
}

fn profile(args: TokenStream) -> Result<Ident, Error> {
    if args.is_empty() {
        return Ok(Ident::new(PROFILES[0], proc_macro2::Span::call_site()));
    }
    let ident: Ident = syn::parse2(args)?;
    if PROFILES.iter().any(|p| ident == p) {
        Ok(ident)
    } else {
        Err(Error::new_spanned(
            &ident,
            format!("unknown executor profile `{ident}`, expected one of: {}", PROFILES.join(", ")),
        ))
    }
}

fn returns_result(output: &ReturnType) -> bool {
    match output {
        ReturnType::Type(_, ty) => match &**ty {
            Type::Path(path) => path.path.segments.last().is_some_and(|s| s.ident == "Result"),
            _ => false,
        },
        ReturnType::Default => false,
    }
}
