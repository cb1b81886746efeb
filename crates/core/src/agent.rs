//! MCP-backed Tool Agent
//!
//! This module implements the optional [`ToolAgent`] consulted when the model
//! asks for a tool. It launches an MCP server as a child process and talks to
//! it with an rmcp client. Free-form questions are answered with a single
//! reason-act turn: an OpenAI-compatible chat model picks MCP tools, the tools
//! run, and the model writes the final answer from their results.

use crate::{
    llm_client::{LLMAction, LLMClient},
    tools::{ToolAgent, extract_query},
};
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    FunctionObjectArgs,
};
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, CallToolResult, JsonObject, RawContent},
    service::{Peer, RoleClient, RunningService},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use tokio::{process::Command, sync::Mutex};
use tracing::{debug, info, warn};

/// Default instructions for the reasoning model.
pub const DEFAULT_AGENT_PROMPT: &str = "You are a chat agent tasked with answering location and weather-related questions. Please include your response within the <response></response> tag.";

static RESPONSE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<response>(.*?)</response>").expect("valid regex"));
static ANSWER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<answer>(.*?)</answer>").expect("valid regex"));

/// How to launch the MCP server process.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// A [`ToolAgent`] backed by an MCP server and an LLM.
pub struct McpToolAgent {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    llm_client: Arc<dyn LLMClient>,
    system_prompt: String,
}

impl McpToolAgent {
    /// Spawns the MCP server and completes the MCP handshake.
    pub async fn connect(
        server: &McpServerConfig,
        llm_client: Arc<dyn LLMClient>,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        info!(command = %server.command, args = ?server.args, "Starting MCP server for tool agent");
        let transport = TokioChildProcess::new(Command::new(&server.command).configure(|cmd| {
            cmd.args(&server.args);
            cmd.envs(server.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }))
        .context("Failed to spawn MCP server process")?;

        let service = ()
            .serve(transport)
            .await
            .context("MCP handshake failed")?;
        let peer = service.peer().clone();

        let tools = peer.list_all_tools().await.context("Failed to list MCP tools")?;
        info!(tool_count = tools.len(), "Tool agent connected");

        Ok(Self {
            peer,
            service: Mutex::new(Some(service)),
            llm_client,
            system_prompt: system_prompt.into(),
        })
    }

    async fn chat_tools(&self) -> Result<Vec<ChatCompletionTool>> {
        self.peer
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(ChatCompletionToolArgs::default()
                    .function(
                        FunctionObjectArgs::default()
                            .name(t.name)
                            .description(t.description.unwrap_or_default())
                            .parameters(serde_json::to_value(&*t.input_schema)?)
                            .build()?,
                    )
                    .build()?)
            })
            .collect::<Result<Vec<_>>>()
    }

    async fn run_tool(&self, name: &str, arguments: JsonObject) -> Result<String> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .with_context(|| format!("MCP call to '{name}' failed"))?;
        tool_text(result)
    }
}

#[async_trait]
impl ToolAgent for McpToolAgent {
    async fn query(&self, input: &str) -> Result<String> {
        info!(input, "Querying tool agent");
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.clone())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(input)
                .build()?
                .into(),
        ];

        let tools = self.chat_tools().await?;
        let output = match self.llm_client.decide_action(messages.clone(), tools).await? {
            LLMAction::Answer(text) => text,
            LLMAction::UseTools(tool_calls) => {
                messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(tool_calls.clone())
                        .build()?
                        .into(),
                );
                for call in &tool_calls {
                    let arguments: JsonObject = serde_json::from_str(&call.function.arguments)
                        .context("Tool call arguments are not a JSON object")?;
                    let result = match self.run_tool(&call.function.name, arguments).await {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(tool = %call.function.name, error = ?e, "Agent tool call failed");
                            tool_error(&e)
                        }
                    };
                    messages.push(
                        ChatCompletionRequestToolMessageArgs::default()
                            .tool_call_id(call.id.clone())
                            .content(result)
                            .build()?
                            .into(),
                    );
                }

                let mut stream = self.llm_client.stream_answer(messages).await?;
                let mut text = String::new();
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(chunk) => text.push_str(&chunk),
                        Err(e) => return Err(e).context("LLM stream failed"),
                    }
                }
                text
            }
        };

        let response = extract_response(&output);
        debug!(response = %response.chars().take(100).collect::<String>(), "Tool agent answered");
        Ok(response)
    }

    async fn call_tool(&self, tool_name: &str, input: &str) -> Result<String> {
        info!(tool_name, input, "Calling tool directly");
        self.run_tool(tool_name, tool_arguments(input)).await
    }

    async fn close(&self) {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            info!("Closing tool agent");
            if let Err(e) = service.cancel().await {
                warn!(error = ?e, "Error while stopping MCP server");
            }
        }
    }
}

/// Direct tool calls receive the model's input as a single `query` argument.
fn tool_arguments(input: &str) -> JsonObject {
    let mut arguments = JsonObject::new();
    arguments.insert("query".to_string(), Value::String(extract_query(input)));
    arguments
}

/// The tool message the model sees when an MCP tool fails.
fn tool_error(error: &anyhow::Error) -> String {
    json!({ "error": error.to_string() }).to_string()
}

fn tool_text(result: CallToolResult) -> Result<String> {
    let content = result.content.context("Tool call returned no content")?;
    let text = content
        .into_iter()
        .filter_map(|annotated| match annotated.raw {
            RawContent::Text(text_content) => Some(text_content.text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if result.is_error == Some(true) {
        anyhow::bail!("Tool reported an error: {text}");
    }
    Ok(text)
}

/// Extracts the text inside `<response>` or `<answer>` tags, if present.
pub fn extract_response(output: &str) -> String {
    RESPONSE_TAG
        .captures(output)
        .or_else(|| ANSWER_TAG.captures(output))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| output.to_string())
}
