use super::nutrients::NutrientLevels;
use crate::error::{CropSenseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A detected rainfall window, before it is applied to a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainfallInput {
    pub event_start: DateTime<Utc>,
    pub event_end: DateTime<Utc>,
    pub rainfall_mm: f64,
    pub duration_hours: f64,
}

impl RainfallInput {
    pub fn new(
        event_start: DateTime<Utc>,
        event_end: DateTime<Utc>,
        rainfall_mm: f64,
        duration_hours: f64,
    ) -> Self {
        Self {
            event_start,
            event_end,
            rainfall_mm,
            duration_hours,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_end < self.event_start {
            return Err(CropSenseError::Validation(format!(
                "Rainfall event ends ({}) before it starts ({})",
                self.event_end, self.event_start
            )));
        }
        Ok(())
    }
}

/// A rainfall window that has been applied to a cycle's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainfallEvent {
    pub id: Option<i64>,
    pub cycle_id: i64,
    pub event_start: DateTime<Utc>,
    pub event_end: DateTime<Utc>,
    pub rainfall_mm: f64,
    pub duration_hours: f64,
    pub intensity_mm_per_hour: f64,
    pub before: NutrientLevels,
    pub loss: NutrientLevels,
    pub after: NutrientLevels,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RainfallOutcome {
    Applied {
        event: RainfallEvent,
        /// A soil-test recommendation was created by this event.
        warning_issued: bool,
    },
    AlreadyProcessed { event_id: i64 },
}

impl RainfallOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, RainfallOutcome::Applied { .. })
    }
}
