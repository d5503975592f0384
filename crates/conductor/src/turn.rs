//! The turn runner: drives the bounded loop of generation steps for one
//! user request, consulting the step policy before every provider call and
//! settling credits when the loop ends.
//!
//! Steps are strictly sequential — each step's active-tool computation
//! depends on all prior steps' completed results. Tool calls *within* one
//! step fan out on a `JoinSet` and are re-ordered to call order before
//! they are appended to the history.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::credits::budget;
use crate::credits::{
    AdmissionDenial, CheckRequest, CreditCheck, CreditLedger, DebitRequest, TurnAttribution,
};
use crate::error::Error;
use crate::llm::types::{
    CompletionRequest, Message, Role, StepUsage, ToolCall, ToolResult,
};
use crate::llm::GenerationProvider;
use crate::policy::decide::decide;
use crate::policy::{ObservedCall, Step, TurnProfile, MAX_STEPS};
use crate::tool::render::RenderOutcome;
use crate::tool::select::parse_selection;
use crate::tool::{validate_tool_input, ToolCatalog, ToolName, ToolOutput};

/// One inbound user request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub id: Uuid,
    pub workspace: String,
    pub principal: String,
    pub model: String,
    pub message: String,
    pub profile: TurnProfile,
    /// Caller's requested output ceiling; the affordable ceiling caps it.
    pub max_output_units: Option<u32>,
    pub cancel: CancellationToken,
}

impl TurnRequest {
    pub fn new(
        workspace: impl Into<String>,
        principal: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.into(),
            principal: principal.into(),
            model: model.into(),
            message: message.into(),
            profile: TurnProfile::default(),
            max_output_units: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_profile(mut self, profile: TurnProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// How a turn ended. None of these are errors — a capped or cancelled turn
/// completes with whatever partial content exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The model produced a step with no tool calls.
    Natural,
    /// The step circuit breaker fired.
    StepCap,
    /// The turn's cancellation signal fired.
    Cancelled,
    /// Admission denied the turn before any step executed.
    Denied,
}

/// Output of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub steps_taken: usize,
    pub usage: StepUsage,
    pub completion: Completion,
    pub denial: Option<AdmissionDenial>,
}

impl TurnOutcome {
    fn denied(denial: AdmissionDenial) -> Self {
        Self {
            text: denial.user_message().into(),
            steps_taken: 0,
            usage: StepUsage::default(),
            completion: Completion::Denied,
            denial: Some(denial),
        }
    }
}

/// Runs the agent loop for one turn: policy → generation → tool execution,
/// repeated until natural stop, step cap, or cancellation.
pub struct TurnRunner<P: GenerationProvider> {
    provider: Arc<P>,
    ledger: Arc<dyn CreditLedger>,
    catalog: ToolCatalog,
    system_prompt: String,
    feature: String,
    max_steps: usize,
    default_max_output_units: u32,
}

impl<P: GenerationProvider> TurnRunner<P> {
    pub fn builder(provider: Arc<P>, ledger: Arc<dyn CreditLedger>) -> TurnRunnerBuilder<P> {
        TurnRunnerBuilder {
            provider,
            ledger,
            catalog: ToolCatalog::new(),
            system_prompt: String::new(),
            feature: "chat".into(),
            max_steps: MAX_STEPS,
            default_max_output_units: 4096,
        }
    }

    pub async fn run(&self, request: TurnRequest) -> Result<TurnOutcome, Error> {
        // Pre-flight admission. A ledger that cannot answer is treated as
        // "no allocation" — fail closed, never open.
        let check = match self
            .ledger
            .check(CheckRequest {
                workspace: request.workspace.clone(),
                principal: request.principal.clone(),
                model: request.model.clone(),
                feature: self.feature.clone(),
            })
            .await
        {
            Ok(check) => check,
            Err(e) => {
                error!(turn = %request.id, error = %e, "admission check failed");
                CreditCheck::denied(AdmissionDenial::NoAllocation)
            }
        };
        if !check.allowed {
            let denial = check.denial.unwrap_or(AdmissionDenial::NoAllocation);
            info!(turn = %request.id, denial = ?denial, "turn denied at admission");
            return Ok(TurnOutcome::denied(denial));
        }

        // Affordability cap on output size; holds even though admission
        // passed, since usage is estimated rather than measured.
        let requested = request
            .max_output_units
            .unwrap_or(self.default_max_output_units);
        let Some(output_cap) =
            budget::cap_output_units(&request.model, requested, check.remaining_micro)
        else {
            return Ok(TurnOutcome::denied(AdmissionDenial::CreditsExhausted));
        };

        let mut steps: Vec<Step> = Vec::new();
        let mut messages = vec![Message::user(&request.message)];
        let mut usage = StepUsage::default();
        let mut final_text = String::new();
        let mut completion = Completion::StepCap;
        let mut steps_taken = 0usize;

        for index in 0..self.max_steps {
            if request.cancel.is_cancelled() {
                completion = Completion::Cancelled;
                break;
            }

            let directive = decide(&request.profile, &steps);
            debug!(
                turn = %request.id,
                step = index,
                active = ?directive.active,
                choice = ?directive.choice,
                "step directive"
            );

            let completion_request = CompletionRequest {
                system: self.system_prompt.clone(),
                messages: messages.clone(),
                tools: self.catalog.definitions_for(&directive.active),
                max_output_units: output_cap,
                tool_choice: Some(directive.choice),
            };

            let response = tokio::select! {
                _ = request.cancel.cancelled() => {
                    completion = Completion::Cancelled;
                    break;
                }
                result = self.provider.complete(completion_request) => result?,
            };
            steps_taken += 1;
            usage += response.usage;

            let text = response.text();
            if !text.is_empty() {
                final_text = text;
            }
            let tool_calls = response.tool_calls();
            messages.push(Message {
                role: Role::Assistant,
                content: response.content,
            });

            if tool_calls.is_empty() {
                completion = Completion::Natural;
                break;
            }

            let (results, observed) = self.execute_tools(&tool_calls).await;
            for call in &observed {
                if call.completed {
                    match call.tool {
                        ToolName::GoogleSearch => usage.search_count += 1,
                        ToolName::GenerateImage => usage.image_count += 1,
                        _ => {}
                    }
                }
            }
            steps.push(Step {
                index,
                calls: observed,
            });
            messages.push(Message::tool_results(results));
        }

        info!(
            turn = %request.id,
            steps = steps_taken,
            completion = ?completion,
            input_units = usage.input_units,
            output_units = usage.output_units,
            "turn finished"
        );

        // Debit is accounting, not gating: the generation already
        // happened, so failures are logged and never surfaced.
        if let Err(e) = self
            .ledger
            .debit(DebitRequest {
                workspace: request.workspace.clone(),
                principal: request.principal.clone(),
                usage,
                attribution: TurnAttribution {
                    turn_id: request.id,
                    model: request.model.clone(),
                    feature: self.feature.clone(),
                },
            })
            .await
        {
            error!(turn = %request.id, error = %e, "usage debit failed");
        }

        Ok(TurnOutcome {
            text: final_text,
            steps_taken,
            usage,
            completion,
            denial: None,
        })
    }

    /// Execute a step's tool calls in parallel, returning model-facing
    /// results and policy-facing observations, both in original call
    /// order.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
    ) -> (Vec<ToolResult>, Vec<ObservedCall>) {
        let mut join_set = tokio::task::JoinSet::new();

        for (idx, call) in calls.iter().enumerate() {
            let input = call.input.clone();
            let call_id = call.id.clone();
            match self.catalog.resolve(&call.name) {
                Ok((name, tool)) => {
                    join_set.spawn(async move {
                        let schema = tool.definition().input_schema;
                        let output = match validate_tool_input(&schema, &input) {
                            Ok(()) => tool.execute(input.clone()).await,
                            Err(message) => Ok(ToolOutput::error(message)),
                        };
                        (idx, call_id, Some(name), input, output)
                    });
                }
                Err(e) => {
                    // Closed dispatch: unknown names come back as explicit
                    // error results for the model to correct.
                    join_set.spawn(async move {
                        (idx, call_id, None, input, Ok(ToolOutput::error(e.to_string())))
                    });
                }
            }
        }

        let mut collected: Vec<(usize, ToolResult, Option<ObservedCall>)> =
            Vec::with_capacity(calls.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, call_id, name, input, Ok(output))) => {
                    let observed = name.map(|n| observe_call(n, &input, &output));
                    collected.push((idx, tool_output_to_result(call_id, output), observed));
                }
                Ok((idx, call_id, name, _input, Err(e))) => {
                    match &e {
                        Error::ReservationConsistency(_)
                        | Error::ReservationAlreadyCommitted(_) => {
                            error!(error = %e, "reservation invariant violated during tool call");
                        }
                        _ => {}
                    }
                    let observed = name.map(ObservedCall::failed);
                    collected.push((idx, ToolResult::error(call_id, e.to_string()), observed));
                }
                Err(join_err) => {
                    error!(error = %join_err, "tool task panicked");
                }
            }
        }

        // Sort by original index to preserve call order
        collected.sort_by_key(|(idx, _, _)| *idx);
        let mut results = Vec::with_capacity(collected.len());
        let mut observed = Vec::new();
        for (_, result, observation) in collected {
            results.push(result);
            if let Some(observation) = observation {
                observed.push(observation);
            }
        }
        (results, observed)
    }
}

/// Build the policy-facing record of one executed call.
fn observe_call(name: ToolName, input: &serde_json::Value, output: &ToolOutput) -> ObservedCall {
    if output.is_error {
        return ObservedCall::failed(name);
    }
    match name {
        ToolName::SelectTools => {
            ObservedCall::selection(parse_selection(input).unwrap_or_default())
        }
        ToolName::RenderUi => {
            // A result that cannot be parsed counts as recovered, so a
            // malformed render can never satisfy a forcing rule.
            let recovered = RenderOutcome::from_tool_content(&output.content)
                .map(|o| o.recovered)
                .unwrap_or(true);
            ObservedCall::render(recovered)
        }
        _ => ObservedCall::completed(name),
    }
}

fn tool_output_to_result(tool_use_id: String, output: ToolOutput) -> ToolResult {
    if output.is_error {
        ToolResult::error(tool_use_id, output.content)
    } else {
        ToolResult::success(tool_use_id, output.content)
    }
}

pub struct TurnRunnerBuilder<P: GenerationProvider> {
    provider: Arc<P>,
    ledger: Arc<dyn CreditLedger>,
    catalog: ToolCatalog,
    system_prompt: String,
    feature: String,
    max_steps: usize,
    default_max_output_units: u32,
}

impl<P: GenerationProvider> TurnRunnerBuilder<P> {
    /// Apply an [`EngineConfig`]'s knobs. The model lives on each
    /// [`TurnRequest`], not here.
    pub fn configure(self, config: &crate::config::EngineConfig) -> Self {
        self.feature(config.feature.clone())
            .max_steps(config.max_steps)
            .default_max_output_units(config.max_output_units)
    }

    pub fn catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = feature.into();
        self
    }

    /// Step budget for each turn, clamped to the hard cap.
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.clamp(1, MAX_STEPS);
        self
    }

    pub fn default_max_output_units(mut self, units: u32) -> Self {
        self.default_max_output_units = units;
        self
    }

    pub fn build(self) -> TurnRunner<P> {
        TurnRunner {
            provider: self.provider,
            ledger: self.ledger,
            catalog: self.catalog,
            system_prompt: self.system_prompt,
            feature: self.feature,
            max_steps: self.max_steps,
            default_max_output_units: self.default_max_output_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::in_memory::InMemoryCredits;
    use crate::llm::types::{CompletionResponse, ContentBlock, StopReason, ToolChoice};
    use crate::tool::select::{NoActionNeededTool, SelectToolsTool};
    use serde_json::json;
    use std::sync::Mutex;

    const SONNET: &str = "claude-sonnet-4-20250514";

    // --- Mock GenerationProvider ---

    struct MockProvider {
        responses: Mutex<Vec<CompletionResponse>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockProvider {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().expect("mock lock poisoned").clone()
        }
    }

    impl GenerationProvider for MockProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
            self.requests.lock().expect("mock lock poisoned").push(request);
            let mut responses = self.responses.lock().expect("mock lock poisoned");
            if responses.is_empty() {
                return Err(Error::Provider("no more mock responses".into()));
            }
            Ok(responses.remove(0))
        }
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: StopReason::EndTurn,
            usage: StepUsage {
                input_units: 100,
                output_units: 20,
                ..Default::default()
            },
        }
    }

    fn tool_call_response(id: &str, name: &str, input: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            usage: StepUsage {
                input_units: 100,
                output_units: 20,
                ..Default::default()
            },
        }
    }

    fn select_response(id: &str, tools: &[&str]) -> CompletionResponse {
        tool_call_response(id, "select_tools", json!({ "tools": tools }))
    }

    fn routing_catalog() -> ToolCatalog {
        ToolCatalog::new()
            .register(ToolName::SelectTools, Arc::new(SelectToolsTool::new()))
            .register(ToolName::NoActionNeeded, Arc::new(NoActionNeededTool::new()))
    }

    fn runner_with(
        provider: Arc<MockProvider>,
        credits: Arc<InMemoryCredits>,
    ) -> TurnRunner<MockProvider> {
        TurnRunner::builder(provider, credits)
            .catalog(routing_catalog())
            .system_prompt("You are a helpful assistant.")
            .build()
    }

    fn request() -> TurnRequest {
        TurnRequest::new("ws", "user-1", SONNET, "hello there")
    }

    #[tokio::test]
    async fn first_step_offers_only_the_routing_tool_required() {
        let provider = Arc::new(MockProvider::new(vec![
            select_response("c1", &["no_action_needed"]),
            text_response("Hi!"),
        ]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        let outcome = runner_with(provider.clone(), credits).run(request()).await.unwrap();
        assert_eq!(outcome.completion, Completion::Natural);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let first = &requests[0];
        assert_eq!(first.tools.len(), 1);
        assert_eq!(first.tools[0].name, "select_tools");
        assert_eq!(first.tool_choice, Some(ToolChoice::Any));
        // After routing, the second step relaxes to auto.
        assert_eq!(requests[1].tool_choice, Some(ToolChoice::Auto));
    }

    #[tokio::test]
    async fn natural_stop_returns_final_text_and_usage() {
        let provider = Arc::new(MockProvider::new(vec![
            select_response("c1", &["no_action_needed"]),
            text_response("All done."),
        ]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        let outcome = runner_with(provider, credits).run(request()).await.unwrap();
        assert_eq!(outcome.text, "All done.");
        assert_eq!(outcome.steps_taken, 2);
        assert_eq!(outcome.usage.input_units, 200);
        assert_eq!(outcome.usage.output_units, 40);
    }

    #[tokio::test]
    async fn exhausted_workspace_is_denied_before_any_step() {
        let provider = Arc::new(MockProvider::new(vec![text_response("never sent")]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 0));

        let outcome = runner_with(provider.clone(), credits).run(request()).await.unwrap();
        assert_eq!(outcome.completion, Completion::Denied);
        assert_eq!(outcome.denial, Some(AdmissionDenial::CreditsExhausted));
        assert_eq!(outcome.steps_taken, 0);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_workspace_is_denied_with_no_allocation() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let credits = Arc::new(InMemoryCredits::new());

        let outcome = runner_with(provider, credits).run(request()).await.unwrap();
        assert_eq!(outcome.denial, Some(AdmissionDenial::NoAllocation));
    }

    #[tokio::test]
    async fn grounding_dodge_is_forced_back_to_search() {
        let profile = TurnProfile {
            requires_grounding: true,
            ..Default::default()
        };
        let provider = Arc::new(MockProvider::new(vec![
            select_response("c1", &["no_action_needed"]),
            // The model tries to finish without grounding; the directive
            // for this step must force search.
            text_response("I think the answer is..."),
        ]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        runner_with(provider.clone(), credits)
            .run(request().with_profile(profile))
            .await
            .unwrap();

        let requests = provider.requests();
        let second = &requests[1];
        let names: Vec<&str> = second.tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"select_tools"));
        assert!(!names.contains(&"no_action_needed"));
        assert_eq!(second.tool_choice, Some(ToolChoice::Any));
    }

    #[tokio::test]
    async fn step_cap_is_a_normal_completion() {
        // The model routes forever; the circuit breaker must end the turn
        // without an error.
        let responses: Vec<CompletionResponse> = (0..30)
            .map(|i| select_response(&format!("c{i}"), &["no_action_needed"]))
            .collect();
        let provider = Arc::new(MockProvider::new(responses));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 10_000_000));

        let runner = TurnRunner::builder(provider.clone(), credits)
            .catalog(routing_catalog())
            .max_steps(5)
            .build();

        let outcome = runner.run(request()).await.unwrap();
        assert_eq!(outcome.completion, Completion::StepCap);
        assert_eq!(outcome.steps_taken, 5);
        assert_eq!(provider.requests().len(), 5);
    }

    #[tokio::test]
    async fn pre_cancelled_turn_issues_no_steps() {
        let provider = Arc::new(MockProvider::new(vec![text_response("never")]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner_with(provider.clone(), credits)
            .run(request().with_cancel(cancel))
            .await
            .unwrap();
        assert_eq!(outcome.completion, Completion::Cancelled);
        assert_eq!(outcome.steps_taken, 0);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn output_cap_applies_the_affordable_ceiling() {
        // 150_000 micro affords 10_000 output units at sonnet rates; the
        // default request of 4096 is under that, so it passes through.
        let provider = Arc::new(MockProvider::new(vec![text_response("hi")]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 150_000));

        runner_with(provider.clone(), credits).run(request()).await.unwrap();
        assert_eq!(provider.requests()[0].max_output_units, 4_096);

        // A smaller balance caps the request below what was asked for.
        let provider = Arc::new(MockProvider::new(vec![text_response("hi")]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 30_000));
        runner_with(provider.clone(), credits).run(request()).await.unwrap();
        assert_eq!(provider.requests()[0].max_output_units, 2_000);
    }

    #[tokio::test]
    async fn actual_usage_is_debited_after_the_turn() {
        let provider = Arc::new(MockProvider::new(vec![
            select_response("c1", &["no_action_needed"]),
            text_response("done"),
        ]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        runner_with(provider, credits.clone()).run(request()).await.unwrap();

        // Two steps at 100 input / 20 output each:
        // 200 * 3 + 40 * 15 = 1_200 micro.
        assert_eq!(credits.balance_micro("ws"), Some(998_800));
    }

    #[tokio::test]
    async fn unknown_tool_call_feeds_an_error_result_back() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_call_response("c1", "warp_drive", json!({})),
            text_response("Sorry, wrong tool."),
        ]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        let outcome = runner_with(provider.clone(), credits).run(request()).await.unwrap();
        assert_eq!(outcome.completion, Completion::Natural);

        let second = &provider.requests()[1];
        let has_error_result = second.messages.iter().any(|m| {
            m.content.iter().any(|block| {
                matches!(
                    block,
                    ContentBlock::ToolResult { is_error: true, content, .. }
                        if content.contains("Unknown tool")
                )
            })
        });
        assert!(has_error_result);
    }

    #[tokio::test]
    async fn engine_config_drives_the_runner_knobs() {
        let config = crate::config::EngineConfig::from_toml_str(
            r#"
            model = "claude-sonnet-4-20250514"
            feature = "support_chat"
            max_steps = 3
            max_output_units = 512
            "#,
        )
        .unwrap();

        let responses: Vec<CompletionResponse> = (0..5)
            .map(|i| select_response(&format!("c{i}"), &["no_action_needed"]))
            .collect();
        let provider = Arc::new(MockProvider::new(responses));
        let credits = Arc::new(
            InMemoryCredits::new()
                .with_workspace("ws", 1_000_000)
                .with_allowed_features("ws", ["support_chat"]),
        );

        let runner = TurnRunner::builder(provider.clone(), credits)
            .configure(&config)
            .catalog(routing_catalog())
            .build();

        let outcome = runner.run(request()).await.unwrap();
        assert_eq!(outcome.completion, Completion::StepCap);
        assert_eq!(outcome.steps_taken, 3);
        assert_eq!(provider.requests()[0].max_output_units, 512);
    }

    #[tokio::test]
    async fn schema_invalid_input_becomes_an_error_result_without_execution() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_call_response("c1", "select_tools", json!({"tools": "not-an-array"})),
            text_response("Let me fix that."),
        ]));
        let credits = Arc::new(InMemoryCredits::new().with_workspace("ws", 1_000_000));

        let outcome = runner_with(provider.clone(), credits).run(request()).await.unwrap();
        assert_eq!(outcome.completion, Completion::Natural);

        let second = &provider.requests()[1];
        let has_validation_error = second.messages.iter().any(|m| {
            m.content.iter().any(|block| {
                matches!(
                    block,
                    ContentBlock::ToolResult { is_error: true, content, .. }
                        if content.contains("validation failed")
                )
            })
        });
        assert!(has_validation_error);
    }
}
