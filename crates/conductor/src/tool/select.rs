//! The routing tools: `select_tools`, through which the model nominates
//! the capabilities it wants for the rest of the turn, and
//! `no_action_needed`, the explicit "plain text is enough" escape hatch.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde_json::json;

use crate::error::Error;
use crate::llm::types::ToolDefinition;
use crate::tool::{Tool, ToolName, ToolOutput};

/// Parse the `tools` argument of a `select_tools` call.
///
/// All names must be in the catalog; a single unknown name rejects the
/// whole selection so the model re-routes with a corrected list instead of
/// silently losing part of its intent.
pub fn parse_selection(input: &serde_json::Value) -> Result<Vec<ToolName>, String> {
    let names = input
        .get("tools")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "select_tools requires a \"tools\" array".to_string())?;

    let mut selection = Vec::with_capacity(names.len());
    for name in names {
        let raw = name
            .as_str()
            .ok_or_else(|| "tool names must be strings".to_string())?;
        let tool = ToolName::from_str(raw).map_err(|_| {
            format!(
                "unknown tool \"{raw}\"; known tools: {}",
                known_tool_names().join(", ")
            )
        })?;
        selection.push(tool);
    }
    Ok(selection)
}

fn known_tool_names() -> Vec<&'static str> {
    ToolName::ALL.iter().map(|t| t.as_str()).collect()
}

/// The routing tool. Selection semantics live in the call arguments; the
/// turn runner records the parsed list, this tool only acknowledges it.
#[derive(Debug, Default)]
pub struct SelectToolsTool;

impl SelectToolsTool {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for SelectToolsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolName::SelectTools.as_str().into(),
            description: "Choose which tools you want available for the rest of this \
                          conversation turn. Call this again at any time to revise your \
                          choice; the new list replaces the old one."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tools": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": known_tool_names(),
                        },
                        "description": "Tool names to activate"
                    }
                },
                "required": ["tools"]
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async move {
            match parse_selection(&input) {
                Ok(selection) => {
                    let names: Vec<&str> = selection.iter().map(|t| t.as_str()).collect();
                    Ok(ToolOutput::success(format!(
                        "Active tools updated: {}",
                        if names.is_empty() {
                            "(none)".to_string()
                        } else {
                            names.join(", ")
                        }
                    )))
                }
                Err(message) => Ok(ToolOutput::error(message)),
            }
        })
    }
}

/// Explicit no-op: the model states that no tool use is needed and plain
/// text completes the turn. Forcing rules remove it from the active set.
#[derive(Debug, Default)]
pub struct NoActionNeededTool;

impl NoActionNeededTool {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for NoActionNeededTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolName::NoActionNeeded.as_str().into(),
            description: "Declare that no tool use is needed and a plain text answer \
                          completes this turn."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why no action is needed"
                    }
                }
            }),
        }
    }

    fn execute(
        &self,
        _input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async { Ok(ToolOutput::success("Acknowledged; answer in plain text.")) })
    }
}
