pub mod types;

use crate::llm::types::{CompletionRequest, CompletionResponse};

/// Trait for generation providers.
///
/// The engine invokes the provider once per step with the step's message
/// history, active tool definitions, tool choice, and output ceiling.
/// Implementors must be thread-safe (`Send + Sync`) to allow shared usage
/// across concurrent turns.
pub trait GenerationProvider: Send + Sync {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, crate::error::Error>> + Send;
}
