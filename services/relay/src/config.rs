use sonic_core::StreamConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Settings for the optional MCP-backed tool agent.
#[derive(Clone, Debug)]
pub struct ToolAgentConfig {
    pub enabled: bool,
    pub mcp_command: String,
    pub mcp_args: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub fastmcp_log_level: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: IpAddr,
    pub ws_port: u16,
    pub health_port: Option<u16>,
    pub log_level: Level,
    /// Optional file that receives a copy of the log output.
    pub log_file: Option<PathBuf>,
    pub region: String,
    pub aws_profile: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub model_id: String,
    pub outbound_queue_capacity: usize,
    pub keepalive_interval: Option<Duration>,
    pub tool_agent: ToolAgentConfig,
}

impl Config {
    /// Loads configuration from environment variables and validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host = parse_var("HOST", "0.0.0.0")?;
        let ws_port = parse_var("WS_PORT", "8000")?;
        let health_port = var("HEALTH_PORT")
            .map(|raw| parse_value::<u16>("HEALTH_PORT", &raw))
            .transpose()?;

        let log_level_str = var("LOGLEVEL").unwrap_or_else(|| "INFO".to_string());
        let log_level = parse_log_level(&log_level_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "LOGLEVEL".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let keepalive_secs: u64 = parse_var("KEEPALIVE_INTERVAL_SECS", "30")?;
        let keepalive_interval = (keepalive_secs > 0).then(|| Duration::from_secs(keepalive_secs));

        let tool_agent = ToolAgentConfig {
            enabled: parse_bool("ENABLE_TOOL_AGENT", false)?,
            mcp_command: var("TOOL_AGENT_MCP_COMMAND").unwrap_or_else(|| "uvx".to_string()),
            mcp_args: var("TOOL_AGENT_MCP_ARGS")
                .unwrap_or_else(|| "awslabs.aws-location-mcp-server@latest".to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            model: var("TOOL_AGENT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            api_base: var("TOOL_AGENT_API_BASE")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: var("TOOL_AGENT_API_KEY"),
            fastmcp_log_level: var("FASTMCP_LOG_LEVEL").unwrap_or_else(|| "ERROR".to_string()),
        };

        let config = Self {
            host,
            ws_port,
            health_port,
            log_level,
            log_file: var("LOG_FILE").map(PathBuf::from),
            region: var("AWS_DEFAULT_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            aws_profile: var("AWS_PROFILE"),
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            model_id: var("NOVA_SONIC_MODEL_ID")
                .unwrap_or_else(|| "amazon.nova-sonic-v1:0".to_string()),
            outbound_queue_capacity: parse_var("OUTBOUND_QUEUE_CAPACITY", "512")?,
            keepalive_interval,
            tool_agent,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field rules, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.aws_profile.is_none()
            && (self.aws_access_key_id.is_none() || self.aws_secret_access_key.is_none())
        {
            problems.push(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set unless AWS_PROFILE is set"
                    .to_string(),
            );
        }
        if self.outbound_queue_capacity == 0 {
            problems.push("OUTBOUND_QUEUE_CAPACITY must be greater than 0".to_string());
        }
        if self.health_port.is_some_and(|port| port == self.ws_port) {
            problems.push("HEALTH_PORT must differ from WS_PORT".to_string());
        }
        if self.model_id.trim().is_empty() {
            problems.push("NOVA_SONIC_MODEL_ID must not be empty".to_string());
        }
        if self.tool_agent.enabled {
            if self.tool_agent.api_key.is_none() {
                problems.push(
                    "TOOL_AGENT_API_KEY must be set when ENABLE_TOOL_AGENT is true".to_string(),
                );
            }
            if self.tool_agent.mcp_command.trim().is_empty() {
                problems.push("TOOL_AGENT_MCP_COMMAND must not be empty".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }

    pub fn ws_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.ws_port)
    }

    pub fn health_address(&self) -> Option<SocketAddr> {
        self.health_port.map(|port| SocketAddr::new(self.host, port))
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            model_id: self.model_id.clone(),
            region: self.region.clone(),
        }
    }
}

/// Reads a variable, treating an empty value as unset.
fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, &var(name).unwrap_or_else(|| default.to_string()))
}

fn parse_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", raw),
        )),
    }
}

/// Accepts tracing level names plus the `WARNING`/`CRITICAL` spellings.
fn parse_log_level(raw: &str) -> Option<Level> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "WARNING" => Some(Level::WARN),
        "CRITICAL" | "FATAL" => Some(Level::ERROR),
        other => other.parse::<Level>().ok(),
    }
}
