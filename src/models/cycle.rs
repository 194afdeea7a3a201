use super::nutrients::NutrientLevels;
use crate::error::{CropSenseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Planning,
    Active,
    Completed,
    Abandoned,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Planning => "planning",
            CycleStatus::Active => "active",
            CycleStatus::Completed => "completed",
            CycleStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(CycleStatus::Planning),
            "active" => Some(CycleStatus::Active),
            "completed" => Some(CycleStatus::Completed),
            "abandoned" => Some(CycleStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleStatus::Completed | CycleStatus::Abandoned)
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One growing season of one crop on one field, with its nutrient ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropCycle {
    pub id: Option<i64>,
    pub field_id: i64,
    pub crop_name: String,
    pub status: CycleStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub expected_end_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub initial: NutrientLevels,
    pub current: NutrientLevels,
    pub final_levels: Option<NutrientLevels>,
    pub total_crop_uptake: NutrientLevels,
    pub uptake_days_applied: f64,
    pub total_rainfall_loss: NutrientLevels,
    pub total_fertilizer: NutrientLevels,
    pub rainfall_event_count: u32,
    pub last_weather_check: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CropCycle {
    pub fn new(field_id: i64, crop_name: impl Into<String>, initial: NutrientLevels) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            field_id,
            crop_name: crop_name.into(),
            status: CycleStatus::Planning,
            start_date: None,
            expected_end_date: None,
            actual_end_date: None,
            initial,
            current: initial,
            final_levels: None,
            total_crop_uptake: NutrientLevels::ZERO,
            uptake_days_applied: 0.0,
            total_rainfall_loss: NutrientLevels::ZERO,
            total_fertilizer: NutrientLevels::ZERO,
            rainfall_event_count: 0,
            last_weather_check: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> i64 {
        self.id.unwrap_or_default()
    }

    /// Fails with `InvalidTransition` unless the cycle is in `expected`.
    pub fn require_status(&self, expected: CycleStatus, operation: &'static str) -> Result<()> {
        if self.status != expected {
            return Err(CropSenseError::InvalidTransition {
                cycle_id: self.id(),
                status: self.status,
                operation,
            });
        }
        Ok(())
    }

    /// initial + fertilizer - uptake - rainfall loss, floored at zero.
    pub fn ledger_balance(&self) -> NutrientLevels {
        self.initial
            .add(&self.total_fertilizer)
            .saturating_sub(&self.total_crop_uptake.add(&self.total_rainfall_loss))
    }

    pub fn days_elapsed(&self, now: DateTime<Utc>) -> f64 {
        match self.start_date {
            Some(start) if now > start => (now - start).num_seconds() as f64 / 86_400.0,
            _ => 0.0,
        }
    }

    pub fn is_mature(&self, now: DateTime<Utc>) -> bool {
        self.expected_end_date.map(|end| end <= now).unwrap_or(false)
    }

    pub fn progress(&self, now: DateTime<Utc>, cycle_days: u32) -> CycleProgress {
        let reference = self.actual_end_date.unwrap_or(now);
        let days_elapsed = self.days_elapsed(reference);
        let days_remaining = (cycle_days as f64 - days_elapsed).max(0.0);
        let percent_complete = if cycle_days > 0 {
            (days_elapsed / cycle_days as f64 * 100.0).min(100.0)
        } else {
            100.0
        };
        CycleProgress {
            days_elapsed: days_elapsed.floor() as u32,
            days_remaining: days_remaining.ceil() as u32,
            total_days: cycle_days,
            percent_complete: (percent_complete * 10.0).round() / 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleProgress {
    pub days_elapsed: u32,
    pub days_remaining: u32,
    pub total_days: u32,
    pub percent_complete: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    CycleStart,
    RainfallUpdate,
    CropUptake,
    Fertilizer,
    CycleEnd,
}

impl MeasurementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::CycleStart => "cycle_start",
            MeasurementType::RainfallUpdate => "rainfall_update",
            MeasurementType::CropUptake => "crop_uptake",
            MeasurementType::Fertilizer => "fertilizer",
            MeasurementType::CycleEnd => "cycle_end",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cycle_start" => Some(MeasurementType::CycleStart),
            "rainfall_update" => Some(MeasurementType::RainfallUpdate),
            "crop_uptake" => Some(MeasurementType::CropUptake),
            "fertilizer" => Some(MeasurementType::Fertilizer),
            "cycle_end" => Some(MeasurementType::CycleEnd),
            _ => None,
        }
    }
}

/// Audit row written on every ledger change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutrientMeasurement {
    pub id: Option<i64>,
    pub cycle_id: i64,
    pub measurement_type: MeasurementType,
    pub levels: NutrientLevels,
    pub below_threshold: bool,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
