pub mod image;
pub mod render;
pub mod search;
pub mod select;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::llm::types::ToolDefinition;

/// The closed catalog of tools the model can call.
///
/// Dispatch is by tagged variant, never by raw string lookup: a name the
/// catalog does not know is an explicit [`Error::UnknownTool`], not a silent
/// no-op. `SelectTools` is the routing tool and is always eligible to be
/// active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    SelectTools,
    GoogleSearch,
    RenderUi,
    NoActionNeeded,
    GenerateImage,
}

impl ToolName {
    pub const ALL: &'static [ToolName] = &[
        ToolName::SelectTools,
        ToolName::GoogleSearch,
        ToolName::RenderUi,
        ToolName::NoActionNeeded,
        ToolName::GenerateImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SelectTools => "select_tools",
            ToolName::GoogleSearch => "google_search",
            ToolName::RenderUi => "render_ui",
            ToolName::NoActionNeeded => "no_action_needed",
            ToolName::GenerateImage => "generate_image",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::UnknownTool(s.into()))
    }
}

/// Output of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Trait for tools the model can invoke.
///
/// Uses `Pin<Box<dyn Future>>` return type for dyn-compatibility,
/// allowing tools to be stored as `Arc<dyn Tool>`.
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>>;
}

/// Validate tool input against the tool's declared JSON Schema.
///
/// Returns `Ok(())` if valid, `Err(error_message)` if the input does not
/// conform. The error message is suitable for sending back to the model so
/// it can self-correct.
pub fn validate_tool_input(
    schema: &serde_json::Value,
    input: &serde_json::Value,
) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => {
            // If the schema itself is invalid, skip validation rather than
            // rejecting every call. Log a warning for the operator.
            tracing::warn!(error = %e, "invalid tool schema, skipping validation");
            return Ok(());
        }
    };

    let errors: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("Input validation failed: {}", errors.join("; ")))
    }
}

/// The set of tools available to the engine, keyed by [`ToolName`].
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its catalog name.
    ///
    /// The tool's declared definition name must match `name` — a mismatch
    /// would let the model call a tool the policy engine cannot track.
    pub fn register(mut self, name: ToolName, tool: Arc<dyn Tool>) -> Self {
        debug_assert_eq!(tool.definition().name, name.as_str());
        self.tools.insert(name, tool);
        self
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    /// Resolve a raw tool name from a model response.
    ///
    /// Fails with [`Error::UnknownTool`] for names outside the catalog,
    /// including valid [`ToolName`]s that were never registered.
    pub fn resolve(&self, raw: &str) -> Result<(ToolName, Arc<dyn Tool>), Error> {
        let name = ToolName::from_str(raw)?;
        let tool = self
            .tools
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(raw.into()))?;
        Ok((name, tool))
    }

    /// Tool definitions for the given active set, in catalog order.
    ///
    /// Active names without a registered tool are skipped — the policy
    /// engine may activate a tool the deployment did not wire up.
    pub fn definitions_for(&self, active: &BTreeSet<ToolName>) -> Vec<ToolDefinition> {
        active
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| t.definition()))
            .collect()
    }
}
