use apphost::{text_result, ServerBuilder, StaticText, TypedToolHandler};
use serde::Deserialize;

pub const HELLO_URI: &str = "ui://static/hello.txt";

#[derive(Debug, Deserialize)]
struct EchoArgs {
    message: String,
    #[serde(default)]
    times: Option<usize>,
}

/// Attach handlers to the definitions shipped in `tools.json` and
/// `resources.json`.
pub fn register_all(builder: ServerBuilder) -> ServerBuilder {
    builder
        .handle_tool(
            "echo",
            TypedToolHandler::new(|args: EchoArgs| async move {
                let times = args.times.unwrap_or(1);
                Ok(text_result(vec![args.message.as_str(); times].join(" ")))
            }),
        )
        .handle_resource(HELLO_URI, StaticText::new("Hello from apphost!"))
}
