//! Output budget capping: converts a remaining credit balance into a hard
//! ceiling on generated output size, and prices actual usage for debits.
//!
//! This is defense in depth — the cap must hold even when the pre-flight
//! admission check already passed, because usage is estimated, not
//! measured, before generation.

use crate::llm::types::StepUsage;

/// Flat micro-credit cost of one generated image.
pub const IMAGE_COST_MICRO: i64 = 40_000;

/// Flat micro-credit cost of one grounding search call.
pub const SEARCH_COST_MICRO: i64 = 1_000;

/// Per-model pricing in micro-credits per 1,000 units.
///
/// Reasoning units are priced at the output rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPricing {
    pub input_per_k: i64,
    pub output_per_k: i64,
}

/// Return pricing for a known model, `None` otherwise.
///
/// Unknown models are rejected at admission (`ModelNotAllowed`), so a
/// `None` here after a passed check means admission was bypassed — callers
/// fail closed.
pub fn unit_pricing(model: &str) -> Option<UnitPricing> {
    match model {
        "claude-sonnet-4-20250514" | "claude-sonnet-4-5-20250514" => Some(UnitPricing {
            input_per_k: 3_000,
            output_per_k: 15_000,
        }),
        "claude-opus-4-20250514" => Some(UnitPricing {
            input_per_k: 15_000,
            output_per_k: 75_000,
        }),
        "claude-haiku-4-5-20251001" => Some(UnitPricing {
            input_per_k: 1_000,
            output_per_k: 5_000,
        }),
        "claude-3-5-haiku-20241022" => Some(UnitPricing {
            input_per_k: 800,
            output_per_k: 4_000,
        }),
        _ => None,
    }
}

/// Maximum output units affordable from `remaining_micro` for `model`.
///
/// `None` when the balance is zero or negative, or when the model has no
/// known pricing. A positive balance always affords at least one unit, so
/// "affordable" and "denied" stay distinguishable.
pub fn affordable_output_units(model: &str, remaining_micro: i64) -> Option<u32> {
    if remaining_micro <= 0 {
        return None;
    }
    let pricing = unit_pricing(model)?;
    let units = (remaining_micro as i128 * 1_000) / pricing.output_per_k as i128;
    Some(units.clamp(1, u32::MAX as i128) as u32)
}

/// Cap a requested output ceiling to what the remaining balance affords.
///
/// Returns the lesser of `requested` and the affordable ceiling, or `None`
/// when the turn must be denied outright (exhausted balance, or a model
/// that admission should already have rejected). `None` is distinct from
/// "proceed with a nonzero cap": a positive balance never caps to zero.
pub fn cap_output_units(model: &str, requested: u32, remaining_micro: i64) -> Option<u32> {
    let affordable = affordable_output_units(model, remaining_micro)?;
    Some(requested.min(affordable).max(1))
}

/// Price actual turn usage in micro-credits. `None` for unknown models.
///
/// Images are excluded: each one was already charged exactly once through
/// its committed reservation, and pricing `image_count` here would charge
/// it a second time. The count rides along for attribution only.
pub fn usage_cost_micro(model: &str, usage: &StepUsage) -> Option<i64> {
    let pricing = unit_pricing(model)?;
    let input = (usage.input_units as i128 * pricing.input_per_k as i128) / 1_000;
    let output = (usage.output_units as i128 * pricing.output_per_k as i128) / 1_000;
    let reasoning = (usage.reasoning_units as i128 * pricing.output_per_k as i128) / 1_000;
    let searches = usage.search_count as i128 * SEARCH_COST_MICRO as i128;
    Some((input + output + reasoning + searches) as i64)
}
