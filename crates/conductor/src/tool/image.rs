//! The `generate_image` tool: the metered, side-effecting operation.
//!
//! Every call follows the two-phase charge protocol: admission check,
//! reserve, generate + upload, then commit with the artifact path — or, on
//! any failure, best-effort cleanup of partial artifacts followed by a
//! release of the hold. A charge is never finalized without a committed
//! artifact, and never silently doubled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::artifact::ArtifactStore;
use crate::credits::budget::IMAGE_COST_MICRO;
use crate::credits::reservation::{ReservationManager, ReserveRequest};
use crate::credits::{CheckRequest, CreditLedger, TurnAttribution};
use crate::error::Error;
use crate::llm::types::ToolDefinition;
use crate::tool::{Tool, ToolName, ToolOutput};

/// Ledger feature gate for image generation.
pub const IMAGE_FEATURE: &str = "image_generation";

/// A generated image ready for upload.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Trait for image generation models.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility, matching the `Tool`
/// trait pattern.
pub trait ImageModel: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage, Error>> + Send + '_>>;
}

/// Per-turn billing context baked into the tool at catalog construction.
#[derive(Debug, Clone)]
pub struct MeterContext {
    pub workspace: String,
    pub principal: String,
    pub attribution: TurnAttribution,
}

pub struct GenerateImageTool {
    ledger: Arc<dyn CreditLedger>,
    reservations: ReservationManager,
    model: Arc<dyn ImageModel>,
    store: Arc<dyn ArtifactStore>,
    context: MeterContext,
}

impl GenerateImageTool {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        reservations: ReservationManager,
        model: Arc<dyn ImageModel>,
        store: Arc<dyn ArtifactStore>,
        context: MeterContext,
    ) -> Self {
        Self {
            ledger,
            reservations,
            model,
            store,
            context,
        }
    }

    async fn run(&self, prompt: &str) -> Result<ToolOutput, Error> {
        // Admission: fail closed on ledger errors, terminal on denial.
        let check = match self
            .ledger
            .check(CheckRequest {
                workspace: self.context.workspace.clone(),
                principal: self.context.principal.clone(),
                model: self.context.attribution.model.clone(),
                feature: IMAGE_FEATURE.into(),
            })
            .await
        {
            Ok(check) => check,
            Err(e) => {
                tracing::error!(error = %e, "image admission check failed");
                return Ok(ToolOutput::error("Image generation is unavailable right now."));
            }
        };
        if !check.allowed {
            let message = check
                .denial
                .map(|d| d.user_message())
                .unwrap_or("Image generation is not available.");
            return Ok(ToolOutput::error(message));
        }

        let guard = match self
            .reservations
            .reserve(ReserveRequest {
                workspace: self.context.workspace.clone(),
                principal: self.context.principal.clone(),
                amount_micro: IMAGE_COST_MICRO,
                attribution: self.context.attribution.clone(),
            })
            .await
        {
            Ok(guard) => guard,
            Err(Error::InsufficientCredits { .. }) => {
                return Ok(ToolOutput::error(
                    "Not enough credits remaining to generate an image.",
                ));
            }
            Err(e) => return Err(e),
        };
        let reservation_id = guard.id();

        let image = match self.model.generate(prompt).await {
            Ok(image) => image,
            Err(e) => {
                release_held(guard, &e).await?;
                return Ok(ToolOutput::error(format!("image generation failed: {e}")));
            }
        };

        let path = match self.store.upload(image.bytes, &image.content_type).await {
            Ok(path) => path,
            Err(e) => {
                release_held(guard, &e).await?;
                return Ok(ToolOutput::error(format!("image upload failed: {e}")));
            }
        };

        match guard
            .commit(json!({"path": path, "content_type": image.content_type}))
            .await
        {
            Ok(()) => Ok(ToolOutput::success(
                serde_json::to_string(&json!({
                    "path": path,
                    "cost_micro": IMAGE_COST_MICRO,
                }))?,
            )),
            Err(commit_err) => {
                // The artifact exists but the charge did not finalize.
                // Clean up best-effort, then refund the hold.
                if let Err(e) = self.store.delete(&path).await {
                    tracing::warn!(path = %path, error = %e, "artifact cleanup failed");
                }
                match self
                    .reservations
                    .release(
                        reservation_id,
                        json!({"reason": format!("commit failed: {commit_err}")}),
                    )
                    .await
                {
                    Ok(()) | Err(Error::ReservationAlreadyReleased(_)) => {}
                    Err(Error::ReservationAlreadyCommitted(id)) => {
                        // Commit reported failure yet the reservation is
                        // committed: dual-success state, flag it loudly
                        // instead of the original error.
                        return Err(Error::ReservationConsistency(id));
                    }
                    Err(e) => {
                        tracing::error!(reservation = %reservation_id, error = %e, "release failed");
                    }
                }
                Ok(ToolOutput::error(format!("image charge failed: {commit_err}")))
            }
        }
    }
}

/// Release a held reservation on the failure path. A release that reports
/// the reservation as already committed means a racing path finalized the
/// charge while this one was failing — surfaced as a consistency error in
/// place of the original failure.
async fn release_held(
    guard: crate::credits::reservation::ReservationGuard,
    cause: &Error,
) -> Result<(), Error> {
    let id = guard.id();
    match guard.release(json!({"reason": cause.to_string()})).await {
        Ok(()) => Ok(()),
        Err(Error::ReservationAlreadyCommitted(_)) => Err(Error::ReservationConsistency(id)),
        Err(e) => {
            tracing::error!(reservation = %id, error = %e, "release failed");
            Ok(())
        }
    }
}

impl Tool for GenerateImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolName::GenerateImage.as_str().into(),
            description: "Generate an image from a text prompt and attach it to the \
                          answer. This operation costs credits."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "What the image should depict"
                    }
                },
                "required": ["prompt"]
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async move {
            let Some(prompt) = input.get("prompt").and_then(|v| v.as_str()) else {
                return Ok(ToolOutput::error("prompt is required"));
            };
            self.run(prompt).await
        })
    }
}
