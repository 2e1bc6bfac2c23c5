//! Example greeting tools.
//!
//! - `greet` answers right away.
//! - `multi-greet` sends two log notifications over the session's SSE
//!   stream, pausing before each, then answers.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use switchboard::{schema_for, CallToolResult, Engine, ErrorData, LogMessage, Tool, ToolContext};

/// Default pause before each `multi-greet` notification.
pub const DEFAULT_MULTI_GREET_DELAY: Duration = Duration::from_secs(1);

/// Arguments shared by both tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GreetArgs {
    /// Name to greet
    pub name: String,
}

impl GreetArgs {
    fn parse(arguments: Value) -> Result<Self, ErrorData> {
        serde_json::from_value(arguments)
            .map_err(|e| ErrorData::invalid_params(format!("Invalid arguments: {}", e)))
    }
}

/// Build the protocol engine with the greeting tools registered.
pub fn engine(multi_greet_delay: Duration) -> Engine {
    Engine::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .with_instructions("Greeting tools. `multi-greet` streams progress as log notifications.")
        .tool(
            Tool::new("greet", "A simple greeting tool")
                .with_title("Greeting Tool")
                .with_input_schema(schema_for::<GreetArgs>())
                .read_only()
                .idempotent(),
            |arguments: Value, _ctx: ToolContext| async move {
                let args = GreetArgs::parse(arguments)?;
                Ok::<_, ErrorData>(CallToolResult::text(format!("Hello, {}!", args.name)))
            },
        )
        .tool(
            Tool::new(
                "multi-greet",
                "A tool that sends different greetings with delays between them",
            )
            .with_title("Multiple Greeting Tool")
            .with_input_schema(schema_for::<GreetArgs>())
            .read_only(),
            move |arguments: Value, ctx: ToolContext| async move {
                let args = GreetArgs::parse(arguments)?;
                multi_greet(args, ctx, multi_greet_delay).await
            },
        )
}

#[tracing::instrument(skip(ctx), fields(session_id = %ctx.session_id))]
async fn multi_greet(
    args: GreetArgs,
    ctx: ToolContext,
    delay: Duration,
) -> Result<CallToolResult, ErrorData> {
    let steps = [
        format!("Starting multi-greet for {}", args.name),
        format!("Sending greeting to {}", args.name),
    ];

    for step in steps {
        tokio::time::sleep(delay).await;
        let sent = ctx
            .peer
            .log(LogMessage::info(step).with_logger("multi-greet"))
            .await
            .map_err(|e| ErrorData::internal_error(format!("Failed to send notification: {}", e)))?;
        if !sent {
            tracing::debug!("Notification filtered by session log level");
        }
    }

    Ok(CallToolResult::text(format!("Good morning, {}!", args.name)))
}
