use crate::models::CycleStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CropSenseError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unknown crop: {0}")]
    UnknownCrop(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Field {field_id} already has an active cycle ({cycle_id})")]
    ActiveCycleExists { field_id: i64, cycle_id: i64 },

    #[error("Cannot {operation} cycle {cycle_id}: cycle is {status}")]
    InvalidTransition {
        cycle_id: i64,
        status: CycleStatus,
        operation: &'static str,
    },

    #[error(
        "Rainfall event for cycle {cycle_id} starts at {event_start}, before last weather check {watermark}"
    )]
    OutOfOrderEvent {
        cycle_id: i64,
        event_start: DateTime<Utc>,
        watermark: DateTime<Utc>,
    },

    #[error("Cycle {cycle_id} was modified concurrently")]
    ConcurrentModification { cycle_id: i64 },
}

impl CropSenseError {
    /// Failures worth retrying on a later poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CropSenseError::Http(_)
                | CropSenseError::DataSourceUnavailable(_)
                | CropSenseError::Timeout(_)
                | CropSenseError::ConcurrentModification { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CropSenseError::ActiveCycleExists { .. }
                | CropSenseError::InvalidTransition { .. }
                | CropSenseError::ConcurrentModification { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CropSenseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CropSenseError::Timeout("weather".into()).is_transient());
        assert!(CropSenseError::DataSourceUnavailable("owm".into()).is_transient());
        assert!(!CropSenseError::Validation("bad".into()).is_transient());
        assert!(!CropSenseError::UnknownCrop("kale".into()).is_transient());
    }

    #[test]
    fn conflict_classification() {
        let err = CropSenseError::InvalidTransition {
            cycle_id: 7,
            status: CycleStatus::Completed,
            operation: "complete",
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Cannot complete cycle 7: cycle is completed"
        );
        assert!(CropSenseError::ActiveCycleExists {
            field_id: 1,
            cycle_id: 2
        }
        .is_conflict());
        assert!(!CropSenseError::NotFound("cycle 3".into()).is_conflict());
    }
}
