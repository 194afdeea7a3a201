use super::nutrients::NutrientLevels;
use serde::{Deserialize, Serialize};

/// Seasonal nutrient uptake for one crop at average yield (kg/ha).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropNutrientRequirement {
    pub crop_name: String,
    pub uptake: NutrientLevels,
    pub cycle_days: u32,
    pub average_yield_tonnes_ha: f64,
    pub source: String,
}

impl CropNutrientRequirement {
    /// Uptake attributable to `days` of growth, prorated linearly over the cycle.
    pub fn prorated_uptake(&self, days: f64) -> NutrientLevels {
        if self.cycle_days == 0 {
            return self.uptake;
        }
        self.uptake.scale(days / self.cycle_days as f64)
    }
}
