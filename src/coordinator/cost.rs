//! Blended cost calculation.
//!
//! `cost = (input/1e6) × blended_input + (output/1e6) × blended_output`, with
//! `blended = 0.5·light + 0.3·mid + 0.2·primary` per dimension, rounded to
//! 4 decimals.

use serde::{Deserialize, Serialize};

use crate::agent::ModelTier;

/// Per-million-token rates for one model tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Pricing table the coordinator blends across the three model tiers to
/// produce a single estimated cost. Not hardcoded to fixed
/// constants — a deployment sets these from whatever its
/// LLM vendor actually bills; defaults here are a plausible placeholder,
/// not a claim about real vendor pricing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub light: TierRate,
    pub mid: TierRate,
    pub primary: TierRate,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            light: TierRate {
                input_per_million: 0.25,
                output_per_million: 1.25,
            },
            mid: TierRate {
                input_per_million: 3.00,
                output_per_million: 15.00,
            },
            primary: TierRate {
                input_per_million: 15.00,
                output_per_million: 75.00,
            },
        }
    }
}

const LIGHT_WEIGHT: f64 = 0.5;
const MID_WEIGHT: f64 = 0.3;
const PRIMARY_WEIGHT: f64 = 0.2;

impl PricingConfig {
    fn blended_input_rate(&self) -> f64 {
        LIGHT_WEIGHT * self.light.input_per_million
            + MID_WEIGHT * self.mid.input_per_million
            + PRIMARY_WEIGHT * self.primary.input_per_million
    }

    fn blended_output_rate(&self) -> f64 {
        LIGHT_WEIGHT * self.light.output_per_million
            + MID_WEIGHT * self.mid.output_per_million
            + PRIMARY_WEIGHT * self.primary.output_per_million
    }

    /// `model_for`/`ModelTier` aren't otherwise used by the blend — the
    /// formula weights all three tiers regardless of which tiers a given
    /// run actually routed calls to — it's a fixed blend, not a
    /// per-call lookup. Referencing `ModelTier` here only documents which
    /// three tiers the weights correspond to.
    pub const TIER_ORDER: [ModelTier; 3] = [ModelTier::Light, ModelTier::Mid, ModelTier::Primary];

    /// Estimate cost in USD for `input_tokens`/`output_tokens`, rounded to
    /// 4 decimal places.
    pub fn estimate_cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let cost = (input_tokens as f64 / 1_000_000.0) * self.blended_input_rate()
            + (output_tokens as f64 / 1_000_000.0) * self.blended_output_rate();
        (cost * 10_000.0).round() / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blended_cost_matches_formula() {
        let pricing = PricingConfig::default();
        let expected_input = 0.5 * 0.25 + 0.3 * 3.00 + 0.2 * 15.00;
        let expected_output = 0.5 * 1.25 + 0.3 * 15.00 + 0.2 * 75.00;
        let cost = pricing.estimate_cost_usd(1_000_000, 1_000_000);
        let expected = ((expected_input + expected_output) * 10_000.0).round() / 10_000.0;
        assert_eq!(cost, expected);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.estimate_cost_usd(0, 0), 0.0);
    }

    #[test]
    fn rounds_to_four_decimals() {
        let pricing = PricingConfig {
            light: TierRate {
                input_per_million: 1.0 / 3.0,
                output_per_million: 0.0,
            },
            mid: TierRate {
                input_per_million: 0.0,
                output_per_million: 0.0,
            },
            primary: TierRate {
                input_per_million: 0.0,
                output_per_million: 0.0,
            },
        };
        let cost = pricing.estimate_cost_usd(1_000_000, 0);
        assert_eq!((cost * 10_000.0).fract().abs() < 1e-9, true);
    }
}
