//! Conductor: the tool-orchestration and credit-metering engine behind the
//! Conductor assistant.
//!
//! The engine drives a bounded, multi-step tool-calling loop against a
//! generation provider. Each step it recomputes which tools the model may
//! call (and which it *must* call) from the turn's classification and the
//! full step history, meters cost through pre-flight admission checks and
//! a two-phase reservation protocol, and settles the ledger when the loop
//! ends. It is an internal decision engine invoked by a request handler —
//! there is no wire or CLI surface here.

pub mod artifact;
pub mod config;
pub mod credits;
pub mod error;
pub mod llm;
pub mod policy;
pub mod tool;
pub mod turn;

pub use artifact::{ArtifactStore, InMemoryArtifacts};
pub use config::EngineConfig;
pub use credits::budget::{cap_output_units, IMAGE_COST_MICRO};
pub use credits::in_memory::InMemoryCredits;
pub use credits::reservation::{
    Reservation, ReservationBackend, ReservationGuard, ReservationManager, ReservationStatus,
    ReserveRequest,
};
pub use credits::{
    AdmissionDenial, CheckRequest, CreditCheck, CreditLedger, DebitRequest, TurnAttribution,
};
pub use error::Error;
pub use llm::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, Role, StepUsage, StopReason,
    ToolCall, ToolChoice, ToolDefinition, ToolResult,
};
pub use llm::GenerationProvider;
pub use policy::decide::{decide, StepDirective};
pub use policy::selection::{build_active_tools, extract_selected_tools, was_tool_ever_selected};
pub use policy::{ObservedCall, Step, TurnProfile, MAX_STEPS};
pub use tool::image::{GenerateImageTool, GeneratedImage, ImageModel, MeterContext};
pub use tool::render::{RenderOutcome, RenderUiTool};
pub use tool::search::{ExaSearchBackend, GoogleSearchTool, SearchBackend, SearchHit};
pub use tool::select::{NoActionNeededTool, SelectToolsTool};
pub use tool::{Tool, ToolCatalog, ToolName, ToolOutput};
pub use turn::{Completion, TurnOutcome, TurnRequest, TurnRunner};
