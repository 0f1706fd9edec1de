//! Cost estimation from token usage

use crate::config::{ModelPrice, PricingConfig};
use crate::error::{RagRailError, Result};
use crate::llm::TokenUsage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

const MICROS_PER_UNIT: i64 = 1_000_000;

/// Fixed-point amount of money in millionths of a currency unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Cost {
    pub micros: i64,
    /// ISO 4217 currency code
    pub currency: String,
}

impl Cost {
    pub fn new(micros: i64, currency: impl Into<String>) -> Self {
        Self {
            micros,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    /// Sum of two costs in the same currency
    pub fn checked_add(&self, other: &Cost) -> Result<Cost> {
        if self.currency != other.currency {
            return Err(RagRailError::InvalidInput(format!(
                "cannot add {} to {}",
                other.currency, self.currency
            )));
        }
        Ok(Cost::new(self.micros + other.micros, self.currency.clone()))
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.micros < 0 { "-" } else { "" };
        let abs = self.micros.unsigned_abs();
        let unit = MICROS_PER_UNIT as u64;
        write!(
            f,
            "{}{}.{:06} {}",
            sign,
            abs / unit,
            abs % unit,
            self.currency
        )
    }
}

/// Turns token usage into a cost for the models it knows
pub trait CostEstimator: Send + Sync {
    fn supports(&self, model: &str) -> bool;

    fn estimate(&self, model: &str, usage: &TokenUsage) -> Option<Cost>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MicroPrice {
    input: i64,
    output: i64,
}

impl From<ModelPrice> for MicroPrice {
    fn from(price: ModelPrice) -> Self {
        Self {
            input: to_micros(price.input_per_million),
            output: to_micros(price.output_per_million),
        }
    }
}

fn to_micros(amount: f64) -> i64 {
    (amount * MICROS_PER_UNIT as f64).round() as i64
}

/// Cost of `tokens` at `micros_per_million`, rounded to the nearest micro-unit
fn token_cost(tokens: u64, micros_per_million: i64) -> i64 {
    let scaled = tokens as i128 * micros_per_million as i128;
    ((scaled + 500_000) / 1_000_000) as i64
}

/// Prices per million tokens, keyed by exact model name or `prefix*`
#[derive(Debug, Clone)]
pub struct PriceTableCostEstimator {
    currency: String,
    exact: Vec<(String, MicroPrice)>,
    prefixes: Vec<(String, MicroPrice)>,
}

impl PriceTableCostEstimator {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            exact: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    pub fn from_config(config: &PricingConfig) -> Self {
        let mut estimator = Self::new(config.currency.clone());
        for (pattern, price) in &config.models {
            estimator = estimator.with_price(pattern, *price);
        }
        estimator
    }

    pub fn with_price(mut self, pattern: &str, price: ModelPrice) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => {
                self.prefixes.push((prefix.to_string(), price.into()));
                // Longest prefix wins
                self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
            None => self.exact.push((pattern.to_string(), price.into())),
        }
        self
    }

    fn price_for(&self, model: &str) -> Option<MicroPrice> {
        self.exact
            .iter()
            .find(|(name, _)| name == model)
            .or_else(|| self.prefixes.iter().find(|(p, _)| model.starts_with(p.as_str())))
            .map(|(_, price)| *price)
    }
}

impl CostEstimator for PriceTableCostEstimator {
    fn supports(&self, model: &str) -> bool {
        self.price_for(model).is_some()
    }

    fn estimate(&self, model: &str, usage: &TokenUsage) -> Option<Cost> {
        let price = self.price_for(model)?;
        let micros =
            token_cost(usage.input_tokens, price.input) + token_cost(usage.output_tokens, price.output);
        Some(Cost::new(micros, self.currency.clone()))
    }
}

/// Asks each estimator in order; the first supporting one wins
#[derive(Clone, Default)]
pub struct CostEstimatorService {
    estimators: Vec<Arc<dyn CostEstimator>>,
}

impl CostEstimatorService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimators.push(estimator);
        self
    }

    pub fn from_config(config: &PricingConfig) -> Self {
        Self::new().with_estimator(Arc::new(PriceTableCostEstimator::from_config(config)))
    }

    pub fn estimate(&self, model: &str, usage: &TokenUsage) -> Option<Cost> {
        let cost = self
            .estimators
            .iter()
            .find(|e| e.supports(model))
            .and_then(|e| e.estimate(model, usage));
        if cost.is_none() {
            tracing::debug!("No cost estimator supports model {}", model);
        }
        cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(input: f64, output: f64) -> ModelPrice {
        ModelPrice {
            input_per_million: input,
            output_per_million: output,
        }
    }

    #[test]
    fn test_exact_and_prefix_prices() {
        let estimator = PriceTableCostEstimator::new("USD")
            .with_price("gpt-4o", price(2.5, 10.0))
            .with_price("gpt-*", price(1.0, 1.0))
            .with_price("gpt-4o-mini*", price(0.15, 0.6));

        let usage = TokenUsage::new(1_000, 500);
        assert_eq!(
            estimator.estimate("gpt-4o", &usage),
            Some(Cost::new(2_500 + 5_000, "USD"))
        );
        assert_eq!(
            estimator.estimate("gpt-4o-mini-2024", &usage),
            Some(Cost::new(150 + 300, "USD"))
        );
        assert_eq!(
            estimator.estimate("gpt-3.5", &usage),
            Some(Cost::new(1_000 + 500, "USD"))
        );
        assert!(!estimator.supports("llama3"));
    }

    #[test]
    fn test_rounds_to_nearest_micro() {
        let estimator = PriceTableCostEstimator::new("EUR").with_price("m", price(0.3, 0.0));
        // 3 tokens * 0.3 per million = 0.9 micro-units
        assert_eq!(
            estimator.estimate("m", &TokenUsage::new(3, 0)).unwrap().micros,
            1
        );
    }

    #[test]
    fn test_display_and_add() {
        let a = Cost::new(1_234_567, "USD");
        assert_eq!(a.to_string(), "1.234567 USD");
        assert_eq!(Cost::new(-5, "USD").to_string(), "-0.000005 USD");

        let sum = a.checked_add(&Cost::new(765_433, "USD")).unwrap();
        assert_eq!(sum, Cost::new(2_000_000, "USD"));
        assert!(a.checked_add(&Cost::zero("EUR")).is_err());
    }

    #[test]
    fn test_service_first_supporting_estimator_wins() {
        let cheap = Arc::new(PriceTableCostEstimator::new("USD").with_price("m*", price(1.0, 1.0)));
        let pricey = Arc::new(PriceTableCostEstimator::new("USD").with_price("m*", price(9.0, 9.0)));
        let service = CostEstimatorService::new()
            .with_estimator(cheap)
            .with_estimator(pricey);

        let usage = TokenUsage::new(1_000_000, 0);
        assert_eq!(
            service.estimate("model", &usage),
            Some(Cost::new(1_000_000, "USD"))
        );
        assert_eq!(service.estimate("other", &usage), None);
    }
}
