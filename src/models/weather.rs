use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weather over a polling window for one coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub rainfall_mm: f64,
    /// Hours it actually rained, when the provider reports it.
    pub rain_duration_hours: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl WeatherObservation {
    pub fn dry(timestamp: DateTime<Utc>) -> Self {
        Self {
            rainfall_mm: 0.0,
            rain_duration_hours: None,
            temperature_c: None,
            humidity_percent: None,
            timestamp,
        }
    }

    pub fn with_rain(mut self, rainfall_mm: f64, duration_hours: Option<f64>) -> Self {
        self.rainfall_mm = rainfall_mm;
        self.rain_duration_hours = duration_hours;
        self
    }

    pub fn has_rain(&self) -> bool {
        self.rainfall_mm.is_finite() && self.rainfall_mm > 0.0
    }
}
