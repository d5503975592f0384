use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A block of content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|r| ContentBlock::ToolResult {
                    tool_use_id: r.tool_use_id,
                    content: r.content,
                    is_error: r.is_error,
                })
                .collect(),
        }
    }
}

/// Definition of a tool the model can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Controls which tools the model is allowed or forced to call.
///
/// `Any` is how the engine expresses a "required" step: the model must call
/// at least one of the active tools before it may produce plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the model decide whether to call tools.
    Auto,
    /// Force the model to call at least one tool (any active tool).
    Any,
    /// Force the model to call a specific tool by name.
    Tool { name: String },
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxOutputUnits,
}

/// Resource usage for one generation step, accumulated over a turn.
///
/// Units are provider output units (tokens). Search and image counts track
/// metered tool activity for debit attribution, not provider usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUsage {
    pub input_units: u32,
    pub output_units: u32,
    #[serde(default)]
    pub reasoning_units: u32,
    #[serde(default)]
    pub search_count: u32,
    #[serde(default)]
    pub image_count: u32,
}

impl StepUsage {
    /// Total provider units consumed (input + output + reasoning) as `u64`.
    pub fn total_units(&self) -> u64 {
        self.input_units as u64 + self.output_units as u64 + self.reasoning_units as u64
    }
}

impl std::ops::AddAssign for StepUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_units += rhs.input_units;
        self.output_units += rhs.output_units;
        self.reasoning_units += rhs.reasoning_units;
        self.search_count += rhs.search_count;
        self.image_count += rhs.image_count;
    }
}

/// A request to the generation provider for one step.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_output_units: u32,
    /// Tool choice constraint. `None` = provider default (auto).
    pub tool_choice: Option<ToolChoice>,
}

/// A response from the generation provider for one step.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: StepUsage,
}

impl CompletionResponse {
    /// Extract tool calls from the response content blocks.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Extract text from the response content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A tool call extracted from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Result of executing a tool, addressed back to the originating call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_tool_results_creates_tool_result_blocks() {
        let msg = Message::tool_results(vec![
            ToolResult::success("call-1", "result 1"),
            ToolResult::error("call-2", "failed"),
        ]);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content.len(), 2);
        assert_eq!(
            msg.content[1],
            ContentBlock::ToolResult {
                tool_use_id: "call-2".into(),
                content: "failed".into(),
                is_error: true,
            }
        );
    }

    #[test]
    fn completion_response_extracts_tool_calls() {
        let response = CompletionResponse {
            content: vec![
                ContentBlock::Text {
                    text: "On it.".into(),
                },
                ContentBlock::ToolUse {
                    id: "call-1".into(),
                    name: "google_search".into(),
                    input: json!({"query": "rust"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: StepUsage::default(),
        };

        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "google_search");
    }

    #[test]
    fn completion_response_extracts_text() {
        let response = CompletionResponse {
            content: vec![
                ContentBlock::Text {
                    text: "Hello ".into(),
                },
                ContentBlock::ToolUse {
                    id: "x".into(),
                    name: "t".into(),
                    input: json!({}),
                },
                ContentBlock::Text {
                    text: "world".into(),
                },
            ],
            stop_reason: StopReason::EndTurn,
            usage: StepUsage::default(),
        };

        assert_eq!(response.text(), "Hello world");
    }

    #[test]
    fn tool_choice_serializes_with_type_tag() {
        let json = serde_json::to_value(&ToolChoice::Any).unwrap();
        assert_eq!(json["type"], "any");

        let json = serde_json::to_value(&ToolChoice::Tool {
            name: "select_tools".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "tool");
        assert_eq!(json["name"], "select_tools");
    }

    #[test]
    fn step_usage_accumulates() {
        let mut a = StepUsage {
            input_units: 100,
            output_units: 50,
            reasoning_units: 10,
            search_count: 1,
            image_count: 0,
        };
        a += StepUsage {
            input_units: 200,
            output_units: 30,
            reasoning_units: 0,
            search_count: 0,
            image_count: 1,
        };
        assert_eq!(a.input_units, 300);
        assert_eq!(a.output_units, 80);
        assert_eq!(a.reasoning_units, 10);
        assert_eq!(a.search_count, 1);
        assert_eq!(a.image_count, 1);
        assert_eq!(a.total_units(), 390);
    }

    #[test]
    fn step_usage_missing_counters_default_to_zero() {
        let parsed: StepUsage =
            serde_json::from_str(r#"{"input_units":10,"output_units":5}"#).unwrap();
        assert_eq!(parsed.reasoning_units, 0);
        assert_eq!(parsed.search_count, 0);
        assert_eq!(parsed.image_count, 0);
    }
}
