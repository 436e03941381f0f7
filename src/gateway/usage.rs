//! Append-only usage log and per-provider summaries.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;

use super::pricing::PricingTable;
use crate::types::UsageRecord;

/// Aggregate usage for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub successes: u64,
    pub mean_latency: Duration,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Estimated USD cost of records that reported token usage.
    pub estimated_cost: f64,
}

/// Usage across all providers, keyed by provider name.
pub type UsageSummary = BTreeMap<String, ProviderUsage>;

/// Records every dispatched provider call. Records are never mutated.
#[derive(Debug, Default)]
pub struct UsageLog {
    records: RwLock<Vec<UsageRecord>>,
}

impl UsageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: UsageRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-provider totals, with cost estimated from `pricing`.
    pub fn summary(&self, pricing: &PricingTable) -> UsageSummary {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut summary = UsageSummary::new();
        let mut latency_totals: BTreeMap<&str, Duration> = BTreeMap::new();

        for record in records.iter() {
            let entry = summary.entry(record.provider.clone()).or_default();
            entry.requests += 1;
            if record.success {
                entry.successes += 1;
            }
            *latency_totals.entry(record.provider.as_str()).or_default() += record.latency;

            if let Some(tokens) = record.tokens {
                entry.prompt_tokens += u64::from(tokens.prompt_tokens);
                entry.completion_tokens += u64::from(tokens.completion_tokens);
                if let Some(model) = &record.model {
                    entry.estimated_cost += pricing.estimate(
                        &record.provider,
                        model,
                        tokens.prompt_tokens,
                        tokens.completion_tokens,
                    );
                }
            }
        }

        for (provider, total) in latency_totals {
            if let Some(entry) = summary.get_mut(provider) {
                entry.mean_latency = total / entry.requests as u32;
            }
        }
        summary
    }
}
