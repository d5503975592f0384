//! Tool selection cache: tracks which tools the model has nominated via
//! `select_tools` across the steps of one turn.

use std::collections::BTreeSet;

use crate::policy::Step;
use crate::tool::ToolName;

/// The model's current working tool selection.
///
/// Scans steps in order; each completed `select_tools` call *replaces* the
/// working set with its argument list. The latest call wins — the model
/// revising its routing is the cache invalidation.
pub fn extract_selected_tools(steps: &[Step]) -> BTreeSet<ToolName> {
    let mut selected = BTreeSet::new();
    for call in steps.iter().flat_map(|s| &s.calls) {
        if call.tool == ToolName::SelectTools && call.completed {
            selected = call.selection.iter().copied().collect();
        }
    }
    selected
}

/// Whether `tool` appeared in *any* `select_tools` call, regardless of
/// recency. Used to honor unfulfilled earlier intent even after the model
/// replaced its selection.
pub fn was_tool_ever_selected(steps: &[Step], tool: ToolName) -> bool {
    steps
        .iter()
        .flat_map(|s| &s.calls)
        .filter(|c| c.tool == ToolName::SelectTools && c.completed)
        .any(|c| c.selection.contains(&tool))
}

/// The active set implied by a selection: the selection plus the routing
/// tool, which the model must always retain to revise its choice.
pub fn build_active_tools(selected: &BTreeSet<ToolName>) -> BTreeSet<ToolName> {
    let mut active = selected.clone();
    active.insert(ToolName::SelectTools);
    active
}
