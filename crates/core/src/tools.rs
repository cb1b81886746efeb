//! Tool-use resolution for backend `toolUse` requests.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

/// Name of the tool answered locally with the current date.
pub const DATE_TOOL: &str = "getdatetool";
/// Name of the tool answered by letting the agent reason over its own tools.
pub const AGENT_QUERY_TOOL: &str = "queryagent";

/// Request/response facade over an external agent with tools.
///
/// One instance is shared by every session of the process.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolAgent: Send + Sync {
    /// Lets the agent pick and run tools to answer a free-form question.
    async fn query(&self, input: &str) -> anyhow::Result<String>;

    /// Runs one named tool directly, without any reasoning step.
    async fn call_tool(&self, tool_name: &str, input: &str) -> anyhow::Result<String>;

    /// Releases the agent's resources at process exit.
    async fn close(&self);
}

/// Resolves a tool use into the JSON text returned to the model.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    agent: Option<Arc<dyn ToolAgent>>,
}

impl ToolDispatcher {
    pub fn new(agent: Option<Arc<dyn ToolAgent>>) -> Self {
        Self { agent }
    }

    /// Runs `tool_name` with the model-provided `content` and returns the
    /// result as a JSON string. Failures are reported inside the result.
    pub async fn invoke(&self, tool_name: &str, content: &str) -> String {
        info!(tool_name, "Resolving tool use");
        let normalized = tool_name.to_lowercase();

        if normalized == DATE_TOOL {
            return date_result(Utc::now()).to_string();
        }

        let Some(agent) = &self.agent else {
            warn!(tool_name, "No tool agent configured");
            return error_result(&format!("Tool '{tool_name}' is not available")).to_string();
        };

        let outcome = if normalized == AGENT_QUERY_TOOL {
            agent.query(&extract_query(content)).await
        } else {
            agent.call_tool(tool_name, content).await
        };

        match outcome {
            Ok(text) => json!({ "result": text }).to_string(),
            Err(e) => {
                warn!(tool_name, error = ?e, "Tool invocation failed");
                error_result(&format!("Error calling tool '{tool_name}': {e}")).to_string()
            }
        }
    }
}

fn date_result(now: DateTime<Utc>) -> Value {
    json!({
        "date": now.format("%Y-%m-%d").to_string(),
        "year": now.year(),
        "month": now.month(),
        "day": now.day(),
        "dayOfWeek": now.format("%A").to_string().to_uppercase(),
        "timezone": "UTC",
    })
}

fn error_result(message: &str) -> Value {
    json!({ "error": message })
}

/// Pulls the `query` field out of a JSON tool input, falling back to the raw text.
pub(crate) fn extract_query(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => match map.get("query") {
            Some(Value::String(query)) => query.clone(),
            Some(other) => other.to_string(),
            None => content.to_string(),
        },
        Ok(Value::String(text)) => text,
        _ => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockall::predicate::eq;

    #[test]
    fn test_date_result_fields() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let result = date_result(now);
        assert_eq!(result["date"], "2025-03-14");
        assert_eq!(result["year"], 2025);
        assert_eq!(result["month"], 3);
        assert_eq!(result["day"], 14);
        assert_eq!(result["dayOfWeek"], "FRIDAY");
        assert_eq!(result["timezone"], "UTC");
    }

    #[test]
    fn test_extract_query() {
        assert_eq!(extract_query(r#"{"query":"largest zoo in Seattle?"}"#), "largest zoo in Seattle?");
        assert_eq!(extract_query(r#""plain string""#), "plain string");
        assert_eq!(extract_query("not json"), "not json");
        assert_eq!(extract_query(r#"{"city":"Paris"}"#), r#"{"city":"Paris"}"#);
    }

    #[tokio::test]
    async fn test_date_tool_needs_no_agent() {
        let dispatcher = ToolDispatcher::new(None);
        let result: Value = serde_json::from_str(&dispatcher.invoke("getDateTool", "{}").await).unwrap();
        assert_eq!(result["timezone"], "UTC");
    }

    #[tokio::test]
    async fn test_missing_agent_reports_error() {
        let dispatcher = ToolDispatcher::new(None);
        let result: Value =
            serde_json::from_str(&dispatcher.invoke("search_places", "{}").await).unwrap();
        assert!(result["error"].as_str().unwrap().contains("search_places"));
    }

    #[tokio::test]
    async fn test_query_tool_uses_agent_query() {
        let mut agent = MockToolAgent::new();
        agent
            .expect_query()
            .with(eq("weather in Seattle"))
            .times(1)
            .returning(|_| Ok("Sunny".to_string()));
        agent.expect_call_tool().never();

        let dispatcher = ToolDispatcher::new(Some(Arc::new(agent)));
        let result = dispatcher
            .invoke("queryAgent", r#"{"query":"weather in Seattle"}"#)
            .await;
        assert_eq!(result, r#"{"result":"Sunny"}"#);
    }

    #[tokio::test]
    async fn test_other_tools_call_agent_directly() {
        let mut agent = MockToolAgent::new();
        agent
            .expect_call_tool()
            .with(eq("search_places"), eq(r#"{"query":"zoo"}"#))
            .times(1)
            .returning(|_, _| Ok("Woodland Park Zoo".to_string()));

        let dispatcher = ToolDispatcher::new(Some(Arc::new(agent)));
        let result = dispatcher.invoke("search_places", r#"{"query":"zoo"}"#).await;
        assert_eq!(result, r#"{"result":"Woodland Park Zoo"}"#);
    }

    #[tokio::test]
    async fn test_agent_failure_becomes_error_result() {
        let mut agent = MockToolAgent::new();
        agent
            .expect_call_tool()
            .returning(|_, _| Err(anyhow::anyhow!("server crashed")));

        let dispatcher = ToolDispatcher::new(Some(Arc::new(agent)));
        let result: Value =
            serde_json::from_str(&dispatcher.invoke("search_places", "{}").await).unwrap();
        assert_eq!(result["error"], "Error calling tool 'search_places': server crashed");
    }
}
