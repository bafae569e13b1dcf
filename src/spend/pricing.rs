//! Per-group token prices.
//!
//! Prices come straight from the model-group configuration and are quoted
//! per single token, in whatever currency the operator configures.

use std::collections::HashMap;

use tracing::debug;

use super::{SpendError, TokenUsage};
use crate::balancer::ModelGroup;

// MARK: - Types

/// Price of one prompt token and one completion token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPrice {
    pub input: f64,
    pub output: f64,
}

impl TokenPrice {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        self.input * f64::from(usage.prompt_tokens)
            + self.output * f64::from(usage.completion_tokens)
    }
}

/// Model-group name to price mapping.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<String, TokenPrice>,
}

// MARK: - Implementation

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups(groups: &[ModelGroup]) -> Self {
        let mut table = Self::new();
        for group in groups {
            table.insert(
                &group.name,
                TokenPrice {
                    input: group.cost_per_input_token,
                    output: group.cost_per_output_token,
                },
            );
        }
        table
    }

    pub fn insert(&mut self, group: &str, price: TokenPrice) {
        self.prices.insert(group.to_string(), price);
    }

    pub fn get(&self, group: &str) -> Option<TokenPrice> {
        self.prices.get(group).copied()
    }

    /// Spend for one completed request routed through `group`.
    pub fn cost(&self, group: &str, usage: &TokenUsage) -> Result<f64, SpendError> {
        let price = self
            .get(group)
            .ok_or_else(|| SpendError::UnknownPrice(group.to_string()))?;
        let cost = price.cost(usage);

        debug!(
            group = %group,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost = %format!("{cost:.6}"),
            "Calculated request spend"
        );
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::StrategyKind;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_spend_arithmetic() {
        let mut table = PriceTable::new();
        table.insert(
            "g",
            TokenPrice {
                input: 0.01,
                output: 0.02,
            },
        );
        let cost = table.cost("g", &usage(100, 50)).unwrap();
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_group_is_error() {
        let table = PriceTable::new();
        let err = table.cost("missing", &usage(1, 1)).unwrap_err();
        assert!(matches!(err, SpendError::UnknownPrice(g) if g == "missing"));
    }

    #[test]
    fn test_from_groups() {
        let table = PriceTable::from_groups(&[ModelGroup {
            name: "gpt4-group".into(),
            strategy: StrategyKind::RoundRobin,
            models: Vec::new(),
            cost_per_input_token: 0.5,
            cost_per_output_token: 1.5,
        }]);
        assert_eq!(
            table.get("gpt4-group"),
            Some(TokenPrice {
                input: 0.5,
                output: 1.5
            })
        );
        assert_eq!(table.cost("gpt4-group", &usage(0, 0)).unwrap(), 0.0);
    }
}
