//! Daily protein target derivation.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{TrackerError, TrackerResult};
use crate::models::two_places;

/// 0.8 g of protein per kg of body weight.
const GRAMS_PER_KG: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TargetFormula {
    #[default]
    WeightTimesPointEight,
}

impl TargetFormula {
    /// Tag stored in `daily_targets.calculation_method`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::WeightTimesPointEight => "weight * 0.8",
        }
    }

    #[must_use]
    pub fn apply(self, weight_kg: Decimal) -> Decimal {
        match self {
            Self::WeightTimesPointEight => two_places(weight_kg * GRAMS_PER_KG),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TargetCalculator {
    formula: TargetFormula,
}

impl TargetCalculator {
    #[must_use]
    pub fn new(formula: TargetFormula) -> Self {
        Self { formula }
    }

    #[must_use]
    pub fn formula(&self) -> TargetFormula {
        self.formula
    }

    pub fn compute(&self, weight_kg: Option<Decimal>) -> TrackerResult<Decimal> {
        let weight = weight_kg.ok_or_else(|| {
            TrackerError::Precondition("Set your weight before computing a target".to_string())
        })?;
        Ok(self.formula.apply(weight))
    }
}
