use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let name = &input.sig.ident;
    let output = &input.sig.output;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    // Ensure the function is async
    if input.sig.asyncness.is_none() {
        return quote! { compile_error!("The #[strand::main] function must be async"); }.into();
    }

    if name != "main" {
        return quote! {
            compile_error!("#[strand::main] can only be applied to the 'main' function");
        }
        .into();
    }

    let result = quote! {
        #(#attrs)*
        #vis fn main() #output {
            // 1. Bootstrap the runtime
            let runtime = strand::runtime::Runtime::new()
                .expect("Failed to initialize runtime");

            // 2. Drive the user's main body; its return value becomes the exit status
            runtime.block_on(async {
                #body
            })
        }
    };
    result.into()
}
