//! Per-step tool policy: the pure decision function and the step records
//! it consumes.
//!
//! Policy state is a value threaded through the turn loop — there is no
//! process-wide mutable state. Every step's directive is recomputed from
//! the turn's classification and the full history of prior steps.

pub mod decide;
pub mod selection;

use crate::tool::ToolName;

/// Hard ceiling on generation steps per turn — the circuit breaker against
/// runaway tool-calling loops. Hitting it is a normal completion, not an
/// error.
pub const MAX_STEPS: usize = 25;

/// Classification flags for one turn, produced upstream of this engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnProfile {
    /// The turn must ground in search before it may complete.
    pub requires_grounding: bool,
    /// The turn must emit a UI render before it may complete.
    pub requires_ui_render: bool,
    /// The answer reads better as tabular text; visual tools are
    /// disqualified unless a forcing rule overrides.
    pub prefers_tabular_text: bool,
}

/// One completed generation round within a turn.
///
/// Steps form an append-only, ordered sequence; the policy engine only
/// ever reads them.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub index: usize,
    pub calls: Vec<ObservedCall>,
}

impl Step {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            calls: Vec::new(),
        }
    }
}

/// A tool call observed in a step, as the policy engine sees it.
#[derive(Debug, Clone)]
pub struct ObservedCall {
    pub tool: ToolName,
    /// Parsed selection list. Nonempty only for completed `select_tools`
    /// calls.
    pub selection: Vec<ToolName>,
    /// Whether the call executed to a non-error result.
    pub completed: bool,
    /// For `render_ui` results: whether the artifact was a recovered
    /// fallback (and therefore does not fulfil a render-forcing rule).
    pub render_recovered: Option<bool>,
}

impl ObservedCall {
    pub fn completed(tool: ToolName) -> Self {
        Self {
            tool,
            selection: Vec::new(),
            completed: true,
            render_recovered: None,
        }
    }

    pub fn failed(tool: ToolName) -> Self {
        Self {
            tool,
            selection: Vec::new(),
            completed: false,
            render_recovered: None,
        }
    }

    /// A completed `select_tools` call nominating the given tools.
    pub fn selection(tools: Vec<ToolName>) -> Self {
        Self {
            tool: ToolName::SelectTools,
            selection: tools,
            completed: true,
            render_recovered: None,
        }
    }

    /// A completed `render_ui` call, flagged when the renderer had to
    /// recover from an invalid spec.
    pub fn render(recovered: bool) -> Self {
        Self {
            tool: ToolName::RenderUi,
            selection: Vec::new(),
            completed: true,
            render_recovered: Some(recovered),
        }
    }
}

/// Whether any step contains a completed call of `tool`.
pub fn any_completed(steps: &[Step], tool: ToolName) -> bool {
    steps
        .iter()
        .flat_map(|s| &s.calls)
        .any(|c| c.tool == tool && c.completed)
}

/// Whether any step produced a valid (non-recovered) render artifact.
pub fn any_valid_render(steps: &[Step]) -> bool {
    steps
        .iter()
        .flat_map(|s| &s.calls)
        .any(|c| c.tool == ToolName::RenderUi && c.completed && c.render_recovered == Some(false))
}
