//! Per-model cost table.

use crate::error::LedgerError;
use crate::types::is_valid_amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat cost charged per completed call, keyed by model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTable {
    costs: BTreeMap<String, Decimal>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, model: impl Into<String>, cost: Decimal) -> Self {
        self.insert(model, cost);
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, cost: Decimal) {
        self.costs.insert(model.into(), cost);
    }

    /// Cost of one call to `model`, if the model is priced.
    pub fn cost_for(&self, model: &str) -> Option<Decimal> {
        self.costs.get(model).copied()
    }

    /// Priced model ids, sorted.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.costs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Every cost must be a positive amount with at most two decimals.
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self.costs.values().find(|cost| !is_valid_amount(**cost)) {
            Some(cost) => Err(LedgerError::InvalidAmount(*cost)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cost_lookup() {
        let table = CostTable::new()
            .with("gpt-4", dec!(3.00))
            .with("gpt-3.5-turbo", dec!(1.00));

        assert_eq!(table.cost_for("gpt-4"), Some(dec!(3.00)));
        assert_eq!(table.cost_for("gpt-5"), None);
        assert_eq!(table.models().collect::<Vec<_>>(), vec!["gpt-3.5-turbo", "gpt-4"]);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_positive_and_fractional_cents() {
        assert!(CostTable::new().with("free", Decimal::ZERO).validate().is_err());
        assert!(CostTable::new().with("odd", dec!(0.005)).validate().is_err());
    }

    #[test]
    fn test_deserialize_from_strings_and_numbers() {
        let table: CostTable =
            serde_json::from_str(r#"{"gpt-4": "3.00", "gpt-3.5-turbo": 1.5}"#).unwrap();
        assert_eq!(table.cost_for("gpt-4"), Some(dec!(3.00)));
        assert_eq!(table.cost_for("gpt-3.5-turbo"), Some(dec!(1.5)));
    }
}
