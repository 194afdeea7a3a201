use super::nutrients::NutrientLevels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NutrientStatus {
    Critical,
    Low,
    Moderate,
    Good,
}

impl NutrientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NutrientStatus::Critical => "critical",
            NutrientStatus::Low => "low",
            NutrientStatus::Moderate => "moderate",
            NutrientStatus::Good => "good",
        }
    }

    /// Whether this level warrants a soil test.
    pub fn needs_attention(&self) -> bool {
        matches!(self, NutrientStatus::Critical | NutrientStatus::Low)
    }

    pub fn action(&self) -> &'static str {
        match self {
            NutrientStatus::Critical => "URGENT: Test soil and apply fertilizer immediately",
            NutrientStatus::Low => "RECOMMENDED: Soil test and fertilization needed soon",
            NutrientStatus::Moderate => {
                "Monitor: Consider soil test if planning heavy-feeding crops"
            }
            NutrientStatus::Good => "No action needed",
        }
    }
}

impl std::fmt::Display for NutrientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Acknowledged,
    Completed,
    Ignored,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Acknowledged => "acknowledged",
            RecommendationStatus::Completed => "completed",
            RecommendationStatus::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(RecommendationStatus::Pending),
            "acknowledged" | "ack" => Some(RecommendationStatus::Acknowledged),
            "completed" | "done" => Some(RecommendationStatus::Completed),
            "ignored" | "ignore" => Some(RecommendationStatus::Ignored),
            _ => None,
        }
    }

    /// Farmer-driven transitions; nothing moves back to pending.
    pub fn can_transition_to(&self, next: RecommendationStatus) -> bool {
        use RecommendationStatus::*;
        matches!(
            (self, next),
            (Pending, Acknowledged)
                | (Pending, Completed)
                | (Pending, Ignored)
                | (Acknowledged, Completed)
                | (Acknowledged, Ignored)
        )
    }
}

impl std::fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationReason {
    LowNutrients,
    CriticalNutrients,
}

impl RecommendationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationReason::LowNutrients => "low_nutrients",
            RecommendationReason::CriticalNutrients => "critical_nutrients",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low_nutrients" => Some(RecommendationReason::LowNutrients),
            "critical_nutrients" => Some(RecommendationReason::CriticalNutrients),
            _ => None,
        }
    }
}

/// Soil-test warning issued against a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilTestRecommendation {
    pub id: Option<i64>,
    pub cycle_id: i64,
    pub reason: RecommendationReason,
    pub levels: NutrientLevels,
    pub message: String,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SoilTestRecommendation {
    pub fn new(
        cycle_id: i64,
        reason: RecommendationReason,
        levels: NutrientLevels,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            cycle_id,
            reason,
            levels,
            message: message.into(),
            status: RecommendationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecommendationStatus::Pending
    }
}
