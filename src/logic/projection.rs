use super::rindm::{self, DepletionResult};
use super::thresholds::{evaluate, NutrientAssessment, NutrientThresholds};
use crate::error::{CropSenseError, Result};
use crate::models::{CropNutrientRequirement, Nutrient, NutrientLevels, NutrientStatus, SoilDescriptor};
use serde::Serialize;

/// Seasonal rainfall is treated as one event at this average intensity.
pub const ASSUMED_SEASON_INTENSITY_MM_PER_HOUR: f64 = 10.0;

#[derive(Debug, Clone, Serialize)]
pub struct SeasonProjection {
    pub crop_name: String,
    pub starting: NutrientLevels,
    pub expected_rainfall_mm: f64,
    pub rainfall: Option<DepletionResult>,
    pub crop_uptake: NutrientLevels,
    pub projected: NutrientLevels,
    pub assessment: NutrientAssessment,
    pub critical_nutrients: Vec<Nutrient>,
}

/// Estimated levels after growing `crop` for a full season from `current`.
pub fn project_season(
    current: NutrientLevels,
    crop: &CropNutrientRequirement,
    expected_rainfall_mm: f64,
    soil: &SoilDescriptor,
    slope_degrees: f64,
    thresholds: &NutrientThresholds,
) -> Result<SeasonProjection> {
    if !expected_rainfall_mm.is_finite() || expected_rainfall_mm < 0.0 {
        return Err(CropSenseError::Validation(format!(
            "Expected rainfall must be non-negative, got {}",
            expected_rainfall_mm
        )));
    }

    let rainfall = if expected_rainfall_mm > 0.0 {
        Some(rindm::compute_loss(
            expected_rainfall_mm,
            expected_rainfall_mm / ASSUMED_SEASON_INTENSITY_MM_PER_HOUR,
            current,
            soil,
            slope_degrees,
        )?)
    } else if !current.is_valid() {
        return Err(CropSenseError::Validation(format!(
            "Nutrient levels must be finite and non-negative, got {}",
            current
        )));
    } else {
        None
    };

    let after_rain = rainfall.as_ref().map(|r| r.remaining).unwrap_or(current);
    let projected = after_rain.saturating_sub(&crop.uptake);
    let assessment = evaluate(&projected, thresholds);
    let critical_nutrients = assessment.nutrients_at(NutrientStatus::Critical);

    Ok(SeasonProjection {
        crop_name: crop.crop_name.clone(),
        starting: current,
        expected_rainfall_mm,
        rainfall,
        crop_uptake: crop.uptake,
        projected,
        assessment,
        critical_nutrients,
    })
}
