//! Credit accounting: pre-flight admission checks and post-generation
//! debits, plus the two-phase reservation protocol for fixed-cost
//! operations.
//!
//! Balances are integer micro-credits (`i64`) to keep balance arithmetic
//! exact. One credit = 1,000,000 micro-credits.

pub mod budget;
pub mod in_memory;
pub mod reservation;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::llm::types::StepUsage;

/// Why a turn (or metered operation) was denied admission.
///
/// Each denial is terminal: callers map it to a user-facing message and do
/// not retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDenial {
    FeatureNotAllowed,
    ModelNotAllowed,
    CreditsExhausted,
    NoAllocation,
}

impl AdmissionDenial {
    /// User-facing denial message. Specific per code, deliberately free of
    /// internal terminology.
    pub fn user_message(&self) -> &'static str {
        match self {
            AdmissionDenial::FeatureNotAllowed => {
                "This feature is not enabled for your workspace."
            }
            AdmissionDenial::ModelNotAllowed => {
                "The requested model is not available on your plan."
            }
            AdmissionDenial::CreditsExhausted => {
                "Your workspace is out of credits. Add credits to continue."
            }
            AdmissionDenial::NoAllocation => {
                "No credit allocation was found for your workspace."
            }
        }
    }
}

/// Pre-flight admission check parameters.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub workspace: String,
    pub principal: String,
    pub model: String,
    pub feature: String,
}

/// Result of a pre-flight admission check.
#[derive(Debug, Clone)]
pub struct CreditCheck {
    pub allowed: bool,
    pub remaining_micro: i64,
    /// Output ceiling affordable from the remaining balance, before the
    /// caller's own requested ceiling is applied.
    pub max_output_units: u32,
    pub denial: Option<AdmissionDenial>,
}

impl CreditCheck {
    pub fn allowed(remaining_micro: i64, max_output_units: u32) -> Self {
        Self {
            allowed: true,
            remaining_micro,
            max_output_units,
            denial: None,
        }
    }

    pub fn denied(denial: AdmissionDenial) -> Self {
        Self {
            allowed: false,
            remaining_micro: 0,
            max_output_units: 0,
            denial: Some(denial),
        }
    }
}

/// Ties a debit or reservation to the turn that incurred it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnAttribution {
    pub turn_id: Uuid,
    pub model: String,
    pub feature: String,
}

/// Post-generation debit for actual usage.
#[derive(Debug, Clone)]
pub struct DebitRequest {
    pub workspace: String,
    pub principal: String,
    pub usage: StepUsage,
    pub attribution: TurnAttribution,
}

/// Trait for credit ledger backends.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility, matching the `Tool`
/// trait pattern.
///
/// `check` fails closed: a backend that cannot resolve an allocation must
/// report `allowed = false` (typically [`AdmissionDenial::NoAllocation`])
/// rather than returning an error that a caller might treat as transient.
/// `debit` is accounting, not gating — the generation already happened, so
/// callers log failures and never surface them to the user.
pub trait CreditLedger: Send + Sync {
    fn check(
        &self,
        request: CheckRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CreditCheck, Error>> + Send + '_>>;

    fn debit(
        &self,
        request: DebitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}
