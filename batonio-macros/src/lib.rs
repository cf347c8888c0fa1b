//! Procedural macros for the batonio event loop.
//!
//! - `#[batonio::main]` and `#[batonio::test]` run an `async fn` body to
//!   completion on a fresh event loop,
//! - `join!` polls several futures concurrently on the current task.

mod utils;

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Awaits several futures concurrently and returns their outputs as a
/// tuple, in argument order.
#[proc_macro]
pub fn join(input: TokenStream) -> TokenStream {
    let args = utils::split_args(input);
    let count = args.len();

    if count == 0 {
        return "()".parse().unwrap();
    }

    if count == 1 {
        let expr = utils::tokens_to_string(&args[0]);
        return format!("{{ ({expr}).await }}").parse().unwrap();
    }

    let mut output = String::new();
    output.push_str("{\n");

    for (i, expr_tokens) in args.iter().enumerate() {
        let idx = i + 1;
        let expr = utils::tokens_to_string(expr_tokens);
        output.push_str(&format!(
            "let mut __join{idx} = (::std::boxed::Box::pin({expr}), ::core::option::Option::None::<_>);\n"
        ));
    }

    output.push_str("::std::future::poll_fn(move |cx| {\n");

    for i in 1..=count {
        output.push_str(&format!(
            "    if __join{i}.1.is_none() {{\n\
                    if let ::std::task::Poll::Ready(val) = ::std::future::Future::poll(__join{i}.0.as_mut(), cx) {{\n\
                        __join{i}.1 = ::core::option::Option::Some(val);\n\
                    }}\n\
                }}\n"
        ));
    }

    let all_done = (1..=count)
        .map(|i| format!("__join{i}.1.is_some()"))
        .collect::<Vec<_>>()
        .join(" && ");

    output.push_str(&format!("    if {all_done} {{\n"));
    output.push_str("        ::std::task::Poll::Ready((\n");

    for i in 1..=count {
        output.push_str(&format!("            __join{i}.1.take().unwrap(),\n"));
    }

    output.push_str("        ))\n");
    output.push_str("    } else {\n");
    output.push_str("        ::std::task::Poll::Pending\n");
    output.push_str("    }\n");
    output.push_str("}).await\n");
    output.push_str("}\n");

    output.parse().unwrap_or_else(|err| utils::compile_error(&format!("join macro error: {err}")))
}

/// Runs `async fn main` on a new event loop.
///
/// Accepts the builder settings `max_events = N` and
/// `max_reads_per_event = N`.
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut builder = String::from("::batonio::EventLoopBuilder::new()");

    for (key, value) in utils::parse_settings(&attr.to_string()) {
        match key.as_str() {
            "max_events" | "max_reads_per_event" => {
                builder.push_str(&format!(".{key}({value})"));
            }
            _ => return utils::compile_error(&format!("unknown setting `{key}`")),
        }
    }

    builder.push_str(".build()");

    wrap_body(item, &builder, false)
}

/// Turns an `async fn` into a `#[test]` running on a new event loop.
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    wrap_body(item, "::batonio::EventLoop::new()", true)
}

/// Strips `async` from the function and moves its body into
/// `block_on` on the loop produced by `make_loop`.
fn wrap_body(item: TokenStream, make_loop: &str, as_test: bool) -> TokenStream {
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    if let Some(pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        tokens.remove(pos);
    }

    let Some(pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return utils::compile_error("expected a function body");
    };

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let new_block = format!(
        "{{
            let event_loop = {make_loop}.expect(\"failed to create event loop\");
            event_loop.block_on(async move {{ {block} }})
        }}"
    );

    let body = match new_block.parse() {
        Ok(body) => body,
        Err(err) => return utils::compile_error(&format!("invalid function body: {err}")),
    };

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, body));

    let mut result: Vec<TokenTree> = Vec::new();
    if as_test {
        let test_attr: TokenStream = "#[test]".parse().unwrap();
        result.extend(test_attr);
    }
    result.extend(tokens);

    result.into_iter().collect()
}
