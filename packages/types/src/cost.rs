//! Cost records and the static model price table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only spend record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub task_id: String,
    pub agent_id: String,
    /// What the spend was for (llm_call, embedding, adapter name)
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub dollars: f64,
    pub timestamp: DateTime<Utc>,
}

impl CostRecord {
    pub fn llm_call(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        dollars: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            operation: "llm_call".into(),
            input_tokens,
            output_tokens,
            dollars,
            timestamp: Utc::now(),
        }
    }
}

/// Per-million-token dollar rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Static price table. Unknown models fall back to the cheapest entry so
/// an unrecognized model name can never understate a budget check to zero.
const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    (
        "claude-sonnet-4-5",
        ModelPrice {
            input_per_million: 3.0,
            output_per_million: 15.0,
        },
    ),
    (
        "claude-haiku-4-5",
        ModelPrice {
            input_per_million: 1.0,
            output_per_million: 5.0,
        },
    ),
    (
        "gpt-5",
        ModelPrice {
            input_per_million: 1.25,
            output_per_million: 10.0,
        },
    ),
    (
        "gpt-5-mini",
        ModelPrice {
            input_per_million: 0.25,
            output_per_million: 2.0,
        },
    ),
    (
        "llama-3.3-70b-local",
        ModelPrice {
            input_per_million: 0.10,
            output_per_million: 0.10,
        },
    ),
];

/// Price for a model, falling back to the cheapest table entry.
pub fn price_for(model: &str) -> ModelPrice {
    PRICE_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, price)| *price)
        .unwrap_or_else(cheapest)
}

fn cheapest() -> ModelPrice {
    let mut best = PRICE_TABLE[0].1;
    for (_, price) in PRICE_TABLE.iter().skip(1) {
        if price.input_per_million + price.output_per_million
            < best.input_per_million + best.output_per_million
        {
            best = *price;
        }
    }
    best
}

/// Dollar estimate for a call against the price table.
pub fn estimate_dollars(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let price = price_for(model);
    (input_tokens as f64 / 1_000_000.0) * price.input_per_million
        + (output_tokens as f64 / 1_000_000.0) * price.output_per_million
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_its_rates() {
        let dollars = estimate_dollars("claude-sonnet-4-5", 1_000_000, 1_000_000);
        assert!((dollars - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_cheapest() {
        let unknown = estimate_dollars("mystery-model", 1_000_000, 0);
        let local = estimate_dollars("llama-3.3-70b-local", 1_000_000, 0);
        assert!((unknown - local).abs() < 1e-9);
    }
}
