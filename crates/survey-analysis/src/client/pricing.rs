//! Token prices and usage accounting.

use serde::{Deserialize, Serialize};
use survey_core::TokenUsage;

/// USD per million tokens, as (input, output).
pub fn price_per_million(model: &str) -> (f64, f64) {
    match model {
        "claude-3-sonnet-20240229"
        | "claude-3-5-sonnet-20241022"
        | "claude-3-7-sonnet-20250219"
        | "claude-sonnet-4-20250514" => (3.0, 15.0),
        "claude-3-haiku-20240307" => (0.25, 1.25),
        "claude-3-5-haiku-20241022" => (0.8, 4.0),
        "claude-2.1" | "claude-2.0" => (8.0, 24.0),
        // claude-3-opus-20240229 and anything unrecognized
        _ => (15.0, 75.0),
    }
}

/// Cost in USD of one completion.
pub fn completion_cost(model: &str, usage: TokenUsage) -> f64 {
    let (input_price, output_price) = price_per_million(model);
    (usage.input as f64).mul_add(input_price, usage.output as f64 * output_price) / 1_000_000.0
}

/// Running token and cost totals for the lifetime of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Prompt tokens sent
    pub input_tokens: u64,
    /// Completion tokens received
    pub output_tokens: u64,
    /// Accumulated cost in USD
    pub cost: f64,
}

impl UsageTotals {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub(crate) fn record(&mut self, model: &str, usage: TokenUsage) -> f64 {
        let cost = completion_cost(model, usage);
        self.input_tokens += usage.input;
        self.output_tokens += usage.output;
        self.cost += cost;
        cost
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_models() {
        assert_eq!(price_per_million("claude-3-haiku-20240307"), (0.25, 1.25));
        assert_eq!(price_per_million("claude-2.1"), (8.0, 24.0));
        assert_eq!(
            price_per_million("claude-3-opus-20240229"),
            price_per_million("some-future-model")
        );
    }

    #[test]
    fn test_totals_accumulate() {
        let mut totals = UsageTotals::default();
        let usage = TokenUsage {
            input: 1_000_000,
            output: 200_000,
        };
        let cost = totals.record("claude-3-sonnet-20240229", usage);
        assert!((cost - 6.0).abs() < 1e-9);

        totals.record("claude-3-sonnet-20240229", usage);
        assert_eq!(totals.total_tokens(), 2_400_000);
        assert!((totals.cost - 12.0).abs() < 1e-9);
    }
}
