use crate::error::{CropSenseError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilType {
    Sandy,
    Loamy,
    Clay,
}

impl SoilType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoilType::Sandy => "sandy",
            SoilType::Loamy => "loamy",
            SoilType::Clay => "clay",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandy" | "sand" => Some(SoilType::Sandy),
            "loamy" | "loam" => Some(SoilType::Loamy),
            "clay" => Some(SoilType::Clay),
            _ => None,
        }
    }
}

impl std::fmt::Display for SoilType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sand/silt/clay percentages. Must sum to 100 within one point of rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilTexture {
    pub sand_pct: f64,
    pub silt_pct: f64,
    pub clay_pct: f64,
}

impl SoilTexture {
    pub fn new(sand_pct: f64, silt_pct: f64, clay_pct: f64) -> Result<Self> {
        let texture = Self {
            sand_pct,
            silt_pct,
            clay_pct,
        };
        texture.validate()?;
        Ok(texture)
    }

    pub fn total(&self) -> f64 {
        self.sand_pct + self.silt_pct + self.clay_pct
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sand_pct", self.sand_pct),
            ("silt_pct", self.silt_pct),
            ("clay_pct", self.clay_pct),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(CropSenseError::Validation(format!(
                    "{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }

        let total = self.total();
        if !(99.0..=101.0).contains(&total) {
            return Err(CropSenseError::Validation(format!(
                "Texture percentages must sum to 100 (±1), got {}",
                total
            )));
        }
        Ok(())
    }

    /// Simplified USDA texture-triangle class, used for reporting.
    pub fn dominant_class(&self) -> SoilType {
        if self.clay_pct >= 40.0 {
            SoilType::Clay
        } else if self.sand_pct >= 50.0 {
            SoilType::Sandy
        } else if self.clay_pct >= 27.0 {
            SoilType::Clay
        } else {
            SoilType::Loamy
        }
    }
}

/// How a field's soil is described: a category or a measured texture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SoilDescriptor {
    Categorical { soil_type: SoilType },
    Texture(SoilTexture),
}

impl SoilDescriptor {
    pub fn categorical(soil_type: SoilType) -> Self {
        SoilDescriptor::Categorical { soil_type }
    }

    pub fn texture(sand_pct: f64, silt_pct: f64, clay_pct: f64) -> Result<Self> {
        Ok(SoilDescriptor::Texture(SoilTexture::new(
            sand_pct, silt_pct, clay_pct,
        )?))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SoilDescriptor::Categorical { .. } => Ok(()),
            SoilDescriptor::Texture(texture) => texture.validate(),
        }
    }

    pub fn soil_class(&self) -> SoilType {
        match self {
            SoilDescriptor::Categorical { soil_type } => *soil_type,
            SoilDescriptor::Texture(texture) => texture.dominant_class(),
        }
    }
}

impl std::fmt::Display for SoilDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoilDescriptor::Categorical { soil_type } => write!(f, "{}", soil_type),
            SoilDescriptor::Texture(t) => write!(
                f,
                "sand {:.0}% / silt {:.0}% / clay {:.0}%",
                t.sand_pct, t.silt_pct, t.clay_pct
            ),
        }
    }
}
