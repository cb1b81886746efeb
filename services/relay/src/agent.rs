//! Startup of the optional tool agent.

use crate::config::Config;
use anyhow::Context;
use async_openai::config::OpenAIConfig;
use sonic_core::{
    ToolAgent,
    agent::{DEFAULT_AGENT_PROMPT, McpServerConfig, McpToolAgent},
    llm_client::OpenAICompatibleClient,
};
use std::sync::Arc;
use tracing::{error, info};

/// Starts the tool agent when it is enabled. A failed start is logged and the
/// relay runs without an agent; tool requests then get an error result.
pub async fn start_tool_agent(config: &Config) -> Option<Arc<dyn ToolAgent>> {
    if !config.tool_agent.enabled {
        return None;
    }
    match build_tool_agent(config).await {
        Ok(agent) => {
            info!(model = %config.tool_agent.model, "Tool agent enabled.");
            Some(agent)
        }
        Err(e) => {
            error!(error = ?e, "Failed to start tool agent; continuing without it");
            None
        }
    }
}

/// Starts the MCP server and connects the tool agent to it.
async fn build_tool_agent(config: &Config) -> anyhow::Result<Arc<dyn ToolAgent>> {
    let agent_config = &config.tool_agent;
    let api_key = agent_config
        .api_key
        .as_deref()
        .context("TOOL_AGENT_API_KEY is required for the tool agent")?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(&agent_config.api_base);
    let llm_client = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        agent_config.model.clone(),
    ));

    let mut env = vec![
        (
            "FASTMCP_LOG_LEVEL".to_string(),
            agent_config.fastmcp_log_level.clone(),
        ),
        ("AWS_REGION".to_string(), config.region.clone()),
    ];
    if let Some(profile) = &config.aws_profile {
        env.push(("AWS_PROFILE".to_string(), profile.clone()));
    }
    let server = McpServerConfig {
        command: agent_config.mcp_command.clone(),
        args: agent_config.mcp_args.clone(),
        env,
    };

    let agent = McpToolAgent::connect(&server, llm_client, DEFAULT_AGENT_PROMPT).await?;
    Ok(Arc::new(agent))
}
