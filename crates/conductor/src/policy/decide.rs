//! The per-step decision function: computes the active tool set and tool
//! choice for the next generation step from the turn classification and
//! all prior steps.

use std::collections::BTreeSet;

use crate::llm::types::ToolChoice;
use crate::policy::selection::{build_active_tools, extract_selected_tools, was_tool_ever_selected};
use crate::policy::{any_completed, any_valid_render, Step, TurnProfile};
use crate::tool::ToolName;

/// What the next generation step is allowed and required to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDirective {
    pub active: BTreeSet<ToolName>,
    pub choice: ToolChoice,
}

impl StepDirective {
    fn required(active: BTreeSet<ToolName>) -> Self {
        Self {
            active,
            choice: ToolChoice::Any,
        }
    }

    fn auto(active: BTreeSet<ToolName>) -> Self {
        Self {
            active,
            choice: ToolChoice::Auto,
        }
    }
}

/// Decide the directive for the next step.
///
/// Pure: same profile and history always produce the same directive, so
/// the policy is unit-testable without a generation provider. Evaluated
/// fresh each step — nothing here persists across steps or turns.
pub fn decide(profile: &TurnProfile, steps: &[Step]) -> StepDirective {
    // Entry state: the model must route before anything else.
    if steps.is_empty() {
        return StepDirective::required([ToolName::SelectTools].into_iter().collect());
    }

    let mut selected = extract_selected_tools(steps);

    // A tabular answer disqualifies visual and grounding extras from the
    // working set; forcing rules below re-add what they mandate.
    if profile.prefers_tabular_text {
        selected.remove(&ToolName::RenderUi);
        selected.remove(&ToolName::GoogleSearch);
    }

    // Forced grounding: the turn may not complete until a search landed.
    if profile.requires_grounding && !any_completed(steps, ToolName::GoogleSearch) {
        let mut active = selected;
        active.remove(&ToolName::NoActionNeeded);
        active.insert(ToolName::GoogleSearch);
        active.insert(ToolName::SelectTools);
        return StepDirective::required(active);
    }

    let rendered = any_valid_render(steps);

    // Forced render, explicit (turn classification) or latent (the model
    // nominated render_ui at some point). Once render intent exists the
    // model cannot escape into plain text via no_action_needed; a
    // recovered fallback does not satisfy the rule.
    let render_due = !profile.prefers_tabular_text
        && !rendered
        && (profile.requires_ui_render
            || selected.contains(&ToolName::RenderUi)
            || was_tool_ever_selected(steps, ToolName::RenderUi));
    if render_due {
        let mut active = selected;
        active.remove(&ToolName::NoActionNeeded);
        active.insert(ToolName::RenderUi);
        active.insert(ToolName::SelectTools);
        return StepDirective::required(active);
    }

    // Rendering is single-use per turn: once satisfied, take it out of
    // the active set so one response cannot render twice.
    if rendered {
        let mut active = build_active_tools(&selected);
        active.remove(&ToolName::RenderUi);
        return StepDirective::auto(active);
    }

    StepDirective::auto(build_active_tools(&selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ObservedCall;

    fn step_with(index: usize, calls: Vec<ObservedCall>) -> Step {
        Step { index, calls }
    }

    fn set(tools: &[ToolName]) -> BTreeSet<ToolName> {
        tools.iter().copied().collect()
    }

    #[test]
    fn step_zero_is_exactly_the_routing_tool_required() {
        let directive = decide(&TurnProfile::default(), &[]);
        assert_eq!(directive.active, set(&[ToolName::SelectTools]));
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn step_zero_ignores_classification_flags() {
        let profile = TurnProfile {
            requires_grounding: true,
            requires_ui_render: true,
            prefers_tabular_text: true,
        };
        let directive = decide(&profile, &[]);
        assert_eq!(directive.active, set(&[ToolName::SelectTools]));
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn grounding_forced_until_a_search_completes() {
        let profile = TurnProfile {
            requires_grounding: true,
            ..Default::default()
        };
        let steps = vec![step_with(
            0,
            vec![ObservedCall::selection(vec![ToolName::NoActionNeeded])],
        )];

        let directive = decide(&profile, &steps);
        assert_eq!(
            directive.active,
            set(&[ToolName::GoogleSearch, ToolName::SelectTools])
        );
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn grounding_satisfied_returns_to_auto() {
        let profile = TurnProfile {
            requires_grounding: true,
            ..Default::default()
        };
        let steps = vec![
            step_with(
                0,
                vec![ObservedCall::selection(vec![ToolName::GoogleSearch])],
            ),
            step_with(1, vec![ObservedCall::completed(ToolName::GoogleSearch)]),
        ];

        let directive = decide(&profile, &steps);
        assert_eq!(directive.choice, ToolChoice::Auto);
        assert!(directive.active.contains(&ToolName::GoogleSearch));
        assert!(directive.active.contains(&ToolName::SelectTools));
    }

    #[test]
    fn grounding_forced_even_when_tabular_dropped_search_from_selection() {
        let profile = TurnProfile {
            requires_grounding: true,
            prefers_tabular_text: true,
            ..Default::default()
        };
        let steps = vec![step_with(
            0,
            vec![ObservedCall::selection(vec![ToolName::GoogleSearch])],
        )];

        let directive = decide(&profile, &steps);
        assert!(directive.active.contains(&ToolName::GoogleSearch));
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn explicit_render_forced_until_valid_artifact() {
        let profile = TurnProfile {
            requires_ui_render: true,
            ..Default::default()
        };
        let steps = vec![step_with(
            0,
            vec![ObservedCall::selection(vec![ToolName::NoActionNeeded])],
        )];

        let directive = decide(&profile, &steps);
        assert_eq!(
            directive.active,
            set(&[ToolName::RenderUi, ToolName::SelectTools])
        );
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn recovered_render_does_not_satisfy_forcing() {
        let profile = TurnProfile {
            requires_ui_render: true,
            ..Default::default()
        };
        let steps = vec![
            step_with(0, vec![ObservedCall::selection(vec![ToolName::RenderUi])]),
            step_with(1, vec![ObservedCall::render(true)]),
        ];

        let directive = decide(&profile, &steps);
        assert!(directive.active.contains(&ToolName::RenderUi));
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn latent_render_intent_forces_even_after_selection_replaced() {
        // The model nominated render_ui at step 0 then revised its
        // selection away; the unfulfilled intent must still be honored.
        let steps = vec![
            step_with(0, vec![ObservedCall::selection(vec![ToolName::RenderUi])]),
            step_with(
                1,
                vec![ObservedCall::selection(vec![ToolName::GoogleSearch])],
            ),
        ];

        let directive = decide(&TurnProfile::default(), &steps);
        assert!(directive.active.contains(&ToolName::RenderUi));
        assert!(!directive.active.contains(&ToolName::NoActionNeeded));
        assert_eq!(directive.choice, ToolChoice::Any);
    }

    #[test]
    fn tabular_preference_suppresses_render_forcing() {
        let profile = TurnProfile {
            requires_ui_render: true,
            prefers_tabular_text: true,
            ..Default::default()
        };
        let steps = vec![step_with(
            0,
            vec![ObservedCall::selection(vec![ToolName::RenderUi])],
        )];

        let directive = decide(&profile, &steps);
        assert!(!directive.active.contains(&ToolName::RenderUi));
        assert_eq!(directive.choice, ToolChoice::Auto);
    }

    #[test]
    fn valid_render_removes_render_ui_from_active_set() {
        let profile = TurnProfile {
            requires_ui_render: true,
            ..Default::default()
        };
        let steps = vec![
            step_with(
                0,
                vec![ObservedCall::selection(vec![
                    ToolName::RenderUi,
                    ToolName::GoogleSearch,
                ])],
            ),
            step_with(1, vec![ObservedCall::render(false)]),
        ];

        let directive = decide(&profile, &steps);
        assert!(!directive.active.contains(&ToolName::RenderUi));
        assert!(directive.active.contains(&ToolName::GoogleSearch));
        assert!(directive.active.contains(&ToolName::SelectTools));
        assert_eq!(directive.choice, ToolChoice::Auto);
    }

    #[test]
    fn default_directive_is_selection_plus_routing_tool() {
        let steps = vec![step_with(
            0,
            vec![ObservedCall::selection(vec![
                ToolName::GoogleSearch,
                ToolName::NoActionNeeded,
            ])],
        )];

        let directive = decide(&TurnProfile::default(), &steps);
        assert_eq!(
            directive.active,
            set(&[
                ToolName::GoogleSearch,
                ToolName::NoActionNeeded,
                ToolName::SelectTools
            ])
        );
        assert_eq!(directive.choice, ToolChoice::Auto);
    }

    #[test]
    fn grounding_takes_precedence_over_render_forcing() {
        let profile = TurnProfile {
            requires_grounding: true,
            requires_ui_render: true,
            ..Default::default()
        };
        let steps = vec![step_with(
            0,
            vec![ObservedCall::selection(vec![ToolName::RenderUi])],
        )];

        let directive = decide(&profile, &steps);
        assert!(directive.active.contains(&ToolName::GoogleSearch));
        assert_eq!(directive.choice, ToolChoice::Any);
    }
}
