//! The `render_ui` tool: turns a model-supplied component spec into a
//! render artifact for the client.
//!
//! An invalid spec does not fail the call — the tool recovers with a
//! degraded fallback card and flags the artifact as recovered. A recovered
//! artifact does not fulfil a render-forcing policy rule, so the model is
//! pushed to try again (bounded by the step cap).

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::Error;
use crate::llm::types::ToolDefinition;
use crate::tool::{Tool, ToolName, ToolOutput};

/// JSON Schema for the component spec the model must supply.
pub fn component_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "kind": {
                "type": "string",
                "enum": ["card", "table", "chart", "timeline"]
            },
            "title": { "type": "string" },
            "body": { "type": "string" },
            "data": { "type": "array" }
        },
        "required": ["kind", "title"]
    })
}

/// What a `render_ui` call produced, serialized as the tool result content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub artifact_id: Uuid,
    /// True when the renderer had to fall back from an invalid spec.
    pub recovered: bool,
    pub component: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RenderOutcome {
    /// Parse an outcome back out of a tool result's content.
    ///
    /// `None` when the content is not an outcome — callers treat that the
    /// same as a recovered artifact, so a malformed result can never
    /// satisfy a forcing rule.
    pub fn from_tool_content(content: &str) -> Option<RenderOutcome> {
        serde_json::from_str(content).ok()
    }
}

/// The UI rendering tool.
#[derive(Debug, Default)]
pub struct RenderUiTool;

impl RenderUiTool {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for RenderUiTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolName::RenderUi.as_str().into(),
            description: "Render an interactive UI component (card, table, chart, or \
                          timeline) as part of your answer. At most one render per turn."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "component": component_schema()
                },
                "required": ["component"]
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async move {
            let component = input.get("component").cloned().unwrap_or(json!(null));

            let outcome = match validate_component(&component) {
                Ok(()) => RenderOutcome {
                    artifact_id: Uuid::new_v4(),
                    recovered: false,
                    component,
                    errors: Vec::new(),
                },
                Err(errors) => {
                    tracing::warn!(
                        error_count = errors.len(),
                        "render spec invalid, emitting recovered fallback"
                    );
                    RenderOutcome {
                        artifact_id: Uuid::new_v4(),
                        recovered: true,
                        component: fallback_component(&component),
                        errors,
                    }
                }
            };

            Ok(ToolOutput::success(serde_json::to_string(&outcome)?))
        })
    }
}

fn validate_component(component: &serde_json::Value) -> Result<(), Vec<String>> {
    let schema = component_schema();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| vec![format!("schema error: {e}")])?;
    let errors: Vec<String> = validator.iter_errors(component).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Degraded render used when the spec is invalid: a plain card carrying
/// whatever title survived.
fn fallback_component(component: &serde_json::Value) -> serde_json::Value {
    let title = component
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Result");
    json!({
        "kind": "card",
        "title": title,
        "body": "The requested view could not be rendered."
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_spec_renders_without_recovery() {
        let tool = RenderUiTool::new();
        let output = tool
            .execute(json!({
                "component": {"kind": "table", "title": "Quarterly revenue", "data": []}
            }))
            .await
            .unwrap();

        assert!(!output.is_error);
        let outcome = RenderOutcome::from_tool_content(&output.content).unwrap();
        assert!(!outcome.recovered);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.component["kind"], "table");
    }

    #[tokio::test]
    async fn invalid_spec_recovers_with_fallback_card() {
        let tool = RenderUiTool::new();
        let output = tool
            .execute(json!({"component": {"kind": "hologram"}}))
            .await
            .unwrap();

        assert!(!output.is_error);
        let outcome = RenderOutcome::from_tool_content(&output.content).unwrap();
        assert!(outcome.recovered);
        assert!(!outcome.errors.is_empty());
        assert_eq!(outcome.component["kind"], "card");
    }

    #[tokio::test]
    async fn missing_component_recovers() {
        let tool = RenderUiTool::new();
        let output = tool.execute(json!({})).await.unwrap();

        let outcome = RenderOutcome::from_tool_content(&output.content).unwrap();
        assert!(outcome.recovered);
    }

    #[test]
    fn garbage_content_parses_to_none() {
        assert!(RenderOutcome::from_tool_content("not json").is_none());
    }
}
