use super::soil::SoilDescriptor;
use crate::error::{CropSenseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderate agricultural grade (~5%).
pub const DEFAULT_SLOPE_DEGREES: f64 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: Option<i64>,
    pub name: String,
    pub soil: SoilDescriptor,
    pub slope_degrees: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Field {
    pub fn new(name: impl Into<String>, soil: SoilDescriptor, latitude: f64, longitude: f64) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            soil,
            slope_degrees: DEFAULT_SLOPE_DEGREES,
            latitude,
            longitude,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_slope(mut self, slope_degrees: f64) -> Self {
        self.slope_degrees = slope_degrees;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CropSenseError::Validation("Field name is required".into()));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CropSenseError::Validation(format!(
                "Latitude must be between -90 and 90, got {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CropSenseError::Validation(format!(
                "Longitude must be between -180 and 180, got {}",
                self.longitude
            )));
        }
        validate_slope(self.slope_degrees)?;
        self.soil.validate()
    }
}

pub fn validate_slope(slope_degrees: f64) -> Result<()> {
    if !slope_degrees.is_finite() || !(0.0..90.0).contains(&slope_degrees) {
        return Err(CropSenseError::Validation(format!(
            "Slope must be between 0 and 90 degrees, got {}",
            slope_degrees
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SoilType;

    #[test]
    fn new_field_uses_default_slope() {
        let field = Field::new(
            "North plot",
            SoilDescriptor::categorical(SoilType::Loamy),
            12.97,
            77.59,
        );
        assert_eq!(field.slope_degrees, DEFAULT_SLOPE_DEGREES);
        assert!(field.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_coordinates_and_slope() {
        let soil = SoilDescriptor::categorical(SoilType::Clay);
        assert!(Field::new("a", soil, 91.0, 0.0).validate().is_err());
        assert!(Field::new("a", soil, 0.0, -181.0).validate().is_err());
        assert!(Field::new("a", soil, 0.0, 0.0)
            .with_slope(-1.0)
            .validate()
            .is_err());
        assert!(Field::new("  ", soil, 0.0, 0.0).validate().is_err());
    }
}
