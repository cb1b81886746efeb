//! Chat model access for the tool agent.
//!
//! An agent turn makes at most two model calls: one that either answers or
//! asks for tools, and, when tools ran, a streamed call that writes the answer
//! from their results.

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatChoice, ChatCompletionRequestMessage, ChatCompletionTool,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub type ToolCall = async_openai::types::ChatCompletionMessageToolCall;

/// Answer text as the model produces it, one non-empty fragment at a time.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String, OpenAIError>> + Send>>;

/// What the model chose to do with the question.
#[derive(Debug, Clone)]
pub enum LLMAction {
    Answer(String),
    UseTools(Vec<ToolCall>),
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Offers `tools` to the model and returns its choice. An empty tool list
    /// forces a plain answer.
    async fn decide_action(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction>;

    /// Streams the final answer once the tool results are in `messages`.
    async fn stream_answer(&self, messages: Vec<ChatCompletionRequestMessage>)
    -> Result<AnswerStream>;
}

/// [`LLMClient`] over any OpenAI-compatible chat completions endpoint.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction> {
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(messages);
        if !tools.is_empty() {
            request.tools(tools).tool_choice("auto");
        }

        let response = self.client.chat().create(request.build()?).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .context("Model returned no choices")?;
        action_from_choice(choice)
    }

    async fn stream_answer(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<AnswerStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;
        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(e)),
            }
        })))
    }
}

/// Tool calls take precedence over any text the model sent alongside them.
fn action_from_choice(choice: ChatChoice) -> Result<LLMAction> {
    match (choice.message.tool_calls, choice.message.content) {
        (Some(calls), _) if !calls.is_empty() => Ok(LLMAction::UseTools(calls)),
        (_, Some(text)) => Ok(LLMAction::Answer(text)),
        _ => Err(anyhow!("Model returned neither text nor tool calls")),
    }
}
