//! Static per-model pricing for cost estimates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

const BUILTIN_PRICES: &[(&str, &str, ModelPrice)] = &[
    ("openai", "gpt-3.5-turbo", ModelPrice::new(0.0005, 0.0015)),
    ("openai", "gpt-4o", ModelPrice::new(0.005, 0.015)),
    ("openai", "gpt-4o-mini", ModelPrice::new(0.00015, 0.0006)),
    ("openai", "gpt-4", ModelPrice::new(0.03, 0.06)),
    ("anthropic", "claude-3-haiku", ModelPrice::new(0.00025, 0.00125)),
    ("anthropic", "claude-3-5-sonnet", ModelPrice::new(0.003, 0.015)),
    ("anthropic", "claude-3-opus", ModelPrice::new(0.015, 0.075)),
    ("google", "gemini-1.5-flash", ModelPrice::new(0.000075, 0.0003)),
    ("google", "gemini-1.5-pro", ModelPrice::new(0.00125, 0.005)),
];

/// Provider → model → price.
///
/// Configured entries override built-in ones of the same provider and model;
/// built-ins not mentioned stay available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable {
    prices: BTreeMap<String, BTreeMap<String, ModelPrice>>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.fill_builtin();
        table
    }
}

impl PricingTable {
    /// A table with no prices at all.
    pub fn empty() -> Self {
        Self {
            prices: BTreeMap::new(),
        }
    }

    /// Set the price of `model` at `provider`.
    pub fn set(&mut self, provider: &str, model: &str, price: ModelPrice) {
        self.prices
            .entry(provider.to_string())
            .or_default()
            .insert(model.to_string(), price);
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<ModelPrice> {
        self.prices.get(provider)?.get(model).copied()
    }

    /// Add built-in prices for entries not already present.
    pub(crate) fn fill_builtin(&mut self) {
        for (provider, model, price) in BUILTIN_PRICES {
            self.prices
                .entry(provider.to_string())
                .or_default()
                .entry(model.to_string())
                .or_insert(*price);
        }
    }

    /// Estimated USD cost. Unknown provider/model pairs cost `0.0`.
    pub fn estimate(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> f64 {
        self.get(provider, model)
            .map(|p| p.cost(prompt_tokens, completion_tokens))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_builtin_price() {
        let table = PricingTable::default();
        let cost = table.estimate("openai", "gpt-4", 1000, 500);
        assert!((cost - (0.03 + 0.03)).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_free() {
        let table = PricingTable::default();
        assert_eq!(table.estimate("openai", "mystery", 1000, 1000), 0.0);
        assert_eq!(table.estimate("nobody", "gpt-4", 1000, 1000), 0.0);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(PricingTable::default().estimate("openai", "gpt-4o", 0, 0), 0.0);
    }

    #[test]
    fn configured_price_overrides_builtin() {
        let mut table: PricingTable = toml::from_str(
            r#"
            [openai.gpt-4]
            prompt_per_1k = 1.0
            completion_per_1k = 2.0
            "#,
        )
        .unwrap();
        table.fill_builtin();
        assert_eq!(table.get("openai", "gpt-4"), Some(ModelPrice::new(1.0, 2.0)));
        assert!(table.get("anthropic", "claude-3-opus").is_some());
    }
}
