use crate::error::{CropSenseError, Result};
use crate::models::{
    Nutrient, NutrientLevels, NutrientStatus, RecommendationReason, SoilTestRecommendation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Three cut-offs per nutrient (kg/ha). Values below `critical` are
/// critical, below `low` are low, below `adequate` are moderate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NutrientThresholds {
    pub critical: NutrientLevels,
    pub low: NutrientLevels,
    pub adequate: NutrientLevels,
}

impl Default for NutrientThresholds {
    fn default() -> Self {
        Self {
            critical: NutrientLevels::new(30.0, 10.0, 40.0),
            low: NutrientLevels::new(60.0, 20.0, 80.0),
            adequate: NutrientLevels::new(100.0, 30.0, 120.0),
        }
    }
}

impl NutrientThresholds {
    pub fn classify(&self, nutrient: Nutrient, value: f64) -> NutrientStatus {
        if value < self.critical.get(nutrient) {
            NutrientStatus::Critical
        } else if value < self.low.get(nutrient) {
            NutrientStatus::Low
        } else if value < self.adequate.get(nutrient) {
            NutrientStatus::Moderate
        } else {
            NutrientStatus::Good
        }
    }

    pub fn validate(&self) -> Result<()> {
        for tier in [&self.critical, &self.low, &self.adequate] {
            if !tier.is_valid() {
                return Err(CropSenseError::Config(format!(
                    "Thresholds must be finite and non-negative, got {}",
                    tier
                )));
            }
        }
        for nutrient in Nutrient::ALL {
            let (c, l, a) = (
                self.critical.get(nutrient),
                self.low.get(nutrient),
                self.adequate.get(nutrient),
            );
            if !(c <= l && l <= a) {
                return Err(CropSenseError::Config(format!(
                    "{} thresholds must satisfy critical <= low <= adequate, got {} / {} / {}",
                    nutrient, c, l, a
                )));
            }
        }
        Ok(())
    }
}

/// Partial replacement of the default tiers. Tiers left out are inherited,
/// and the merged result must still satisfy `critical <= low <= adequate`,
/// so raising `low` past the inherited `adequate` needs `adequate` too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverride {
    #[serde(default)]
    pub critical: Option<NutrientLevels>,
    #[serde(default)]
    pub low: Option<NutrientLevels>,
    #[serde(default)]
    pub adequate: Option<NutrientLevels>,
}

impl ThresholdOverride {
    fn apply(&self, base: NutrientThresholds) -> NutrientThresholds {
        NutrientThresholds {
            critical: self.critical.unwrap_or(base.critical),
            low: self.low.unwrap_or(base.low),
            adequate: self.adequate.unwrap_or(base.adequate),
        }
    }
}

/// `thresholds:` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub defaults: ThresholdOverride,
    /// Keyed by crop name, case-insensitive.
    #[serde(default)]
    pub crops: HashMap<String, ThresholdOverride>,
}

impl ThresholdConfig {
    pub fn for_crop(&self, crop_name: &str) -> NutrientThresholds {
        let base = self.defaults.apply(NutrientThresholds::default());
        self.crops
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(crop_name))
            .map(|(_, o)| o.apply(base))
            .unwrap_or(base)
    }

    pub fn validate(&self) -> Result<()> {
        self.for_crop("").validate()?;
        for name in self.crops.keys() {
            self.for_crop(name)
                .validate()
                .map_err(|e| CropSenseError::Config(format!("crop '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientAssessment {
    pub levels: NutrientLevels,
    #[serde(rename = "N_status")]
    pub n_status: NutrientStatus,
    #[serde(rename = "P_status")]
    pub p_status: NutrientStatus,
    #[serde(rename = "K_status")]
    pub k_status: NutrientStatus,
    pub overall: NutrientStatus,
    pub needs_soil_test: bool,
    pub message: String,
}

impl NutrientAssessment {
    pub fn status(&self, nutrient: Nutrient) -> NutrientStatus {
        match nutrient {
            Nutrient::Nitrogen => self.n_status,
            Nutrient::Phosphorus => self.p_status,
            Nutrient::Potassium => self.k_status,
        }
    }

    pub fn nutrients_at(&self, status: NutrientStatus) -> Vec<Nutrient> {
        Nutrient::ALL
            .into_iter()
            .filter(|n| self.status(*n) == status)
            .collect()
    }

    pub fn any_critical(&self) -> bool {
        self.overall == NutrientStatus::Critical
    }

    pub fn reason(&self) -> RecommendationReason {
        if self.any_critical() {
            RecommendationReason::CriticalNutrients
        } else {
            RecommendationReason::LowNutrients
        }
    }
}

fn describe(nutrients: &[Nutrient]) -> String {
    nutrients
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn evaluate(levels: &NutrientLevels, thresholds: &NutrientThresholds) -> NutrientAssessment {
    let n_status = thresholds.classify(Nutrient::Nitrogen, levels.n);
    let p_status = thresholds.classify(Nutrient::Phosphorus, levels.p);
    let k_status = thresholds.classify(Nutrient::Potassium, levels.k);
    let overall = n_status.min(p_status).min(k_status);
    let needs_soil_test = overall.needs_attention();

    let mut assessment = NutrientAssessment {
        levels: *levels,
        n_status,
        p_status,
        k_status,
        overall,
        needs_soil_test,
        message: String::new(),
    };

    let critical = assessment.nutrients_at(NutrientStatus::Critical);
    let low = assessment.nutrients_at(NutrientStatus::Low);
    assessment.message = if !critical.is_empty() {
        let mut msg = format!(
            "SOIL TEST REQUIRED: {} critically depleted. {}.",
            describe(&critical),
            NutrientStatus::Critical.action()
        );
        if !low.is_empty() {
            msg.push_str(&format!(" Also low: {}.", describe(&low)));
        }
        msg
    } else if !low.is_empty() {
        format!(
            "SOIL TEST RECOMMENDED: {} below optimal levels. Get a soil test to determine exact fertilizer requirements.",
            describe(&low)
        )
    } else {
        "Nutrient levels are adequate. Soil testing not urgently needed.".to_string()
    };

    assessment
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationPlan {
    /// No pending recommendation and the levels call for one.
    Create {
        reason: RecommendationReason,
        message: String,
    },
    /// Update the pending recommendation's snapshot in place.
    Refresh {
        reason: RecommendationReason,
        message: String,
    },
    /// Nothing to write. A pending recommendation stays for the farmer.
    Keep,
}

/// Decides what to do with the cycle's single pending recommendation.
pub fn plan_recommendation(
    assessment: &NutrientAssessment,
    existing_pending: Option<&SoilTestRecommendation>,
) -> RecommendationPlan {
    if !assessment.needs_soil_test {
        return RecommendationPlan::Keep;
    }

    let reason = assessment.reason();
    let message = assessment.message.clone();
    match existing_pending {
        Some(rec) if rec.levels == assessment.levels && rec.reason == reason => {
            RecommendationPlan::Keep
        }
        Some(_) => RecommendationPlan::Refresh { reason, message },
        None => RecommendationPlan::Create { reason, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_tiers() {
        let t = NutrientThresholds::default();
        assert_eq!(t.classify(Nutrient::Nitrogen, 29.9), NutrientStatus::Critical);
        assert_eq!(t.classify(Nutrient::Nitrogen, 30.0), NutrientStatus::Low);
        assert_eq!(t.classify(Nutrient::Nitrogen, 60.0), NutrientStatus::Moderate);
        assert_eq!(t.classify(Nutrient::Nitrogen, 100.0), NutrientStatus::Good);
        assert_eq!(t.classify(Nutrient::Phosphorus, 9.0), NutrientStatus::Critical);
        assert_eq!(t.classify(Nutrient::Potassium, 79.0), NutrientStatus::Low);
    }

    #[test]
    fn evaluate_reports_worst_status() {
        let t = NutrientThresholds::default();
        let a = evaluate(&NutrientLevels::new(120.0, 35.0, 50.0), &t);
        assert_eq!(a.n_status, NutrientStatus::Good);
        assert_eq!(a.k_status, NutrientStatus::Low);
        assert_eq!(a.overall, NutrientStatus::Low);
        assert!(a.needs_soil_test);
        assert!(a.message.contains("Potassium"));
        assert_eq!(a.reason(), RecommendationReason::LowNutrients);

        let healthy = evaluate(&NutrientLevels::new(70.0, 25.0, 90.0), &t);
        assert_eq!(healthy.overall, NutrientStatus::Moderate);
        assert!(!healthy.needs_soil_test);
    }

    #[test]
    fn critical_message_lists_critical_then_low() {
        let a = evaluate(&NutrientLevels::new(10.0, 15.0, 200.0), &NutrientThresholds::default());
        assert!(a.any_critical());
        assert_eq!(a.reason(), RecommendationReason::CriticalNutrients);
        assert!(a.message.starts_with("SOIL TEST REQUIRED: Nitrogen"));
        assert!(a.message.contains("Also low: Phosphorus"));
    }

    #[test]
    fn crop_overrides_replace_only_named_tiers() {
        let yaml = r#"
crops:
  Banana:
    low: { N: 80, P: 25, K: 110 }
"#;
        let config: ThresholdConfig = serde_yaml::from_str(yaml).unwrap();
        let banana = config.for_crop("banana");
        assert_eq!(banana.low, NutrientLevels::new(80.0, 25.0, 110.0));
        assert_eq!(banana.critical, NutrientThresholds::default().critical);
        assert_eq!(banana.adequate, NutrientThresholds::default().adequate);
        assert_eq!(config.for_crop("rice"), NutrientThresholds::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn single_tier_override_must_fit_between_inherited_tiers() {
        let yaml = r#"
crops:
  Banana:
    low: { N: 80, P: 25, K: 150 }
"#;
        let config: ThresholdConfig = serde_yaml::from_str(yaml).unwrap();
        match config.validate() {
            Err(CropSenseError::Config(msg)) => {
                assert!(msg.contains("Banana"));
                assert!(msg.contains("K thresholds"));
            }
            other => panic!("expected config error, got {:?}", other),
        }

        let raised = r#"
crops:
  Banana:
    low: { N: 80, P: 25, K: 150 }
    adequate: { N: 120, P: 35, K: 200 }
"#;
        let config: ThresholdConfig = serde_yaml::from_str(raised).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_tiers_fail_validation() {
        let config = ThresholdConfig {
            defaults: ThresholdOverride {
                critical: Some(NutrientLevels::new(70.0, 10.0, 40.0)),
                ..Default::default()
            },
            crops: HashMap::new(),
        };
        assert!(matches!(config.validate(), Err(CropSenseError::Config(_))));
    }

    #[test]
    fn plan_creates_refreshes_and_keeps() {
        let t = NutrientThresholds::default();
        let low = evaluate(&NutrientLevels::new(50.0, 25.0, 100.0), &t);
        assert!(matches!(
            plan_recommendation(&low, None),
            RecommendationPlan::Create { reason: RecommendationReason::LowNutrients, .. }
        ));

        let mut pending = SoilTestRecommendation::new(1, low.reason(), low.levels, low.message.clone());
        assert_eq!(plan_recommendation(&low, Some(&pending)), RecommendationPlan::Keep);

        let worse = evaluate(&NutrientLevels::new(20.0, 25.0, 100.0), &t);
        assert!(matches!(
            plan_recommendation(&worse, Some(&pending)),
            RecommendationPlan::Refresh { reason: RecommendationReason::CriticalNutrients, .. }
        ));

        // Recovered levels never resolve the farmer's pending recommendation.
        pending.levels = worse.levels;
        let recovered = evaluate(&NutrientLevels::new(150.0, 40.0, 150.0), &t);
        assert_eq!(plan_recommendation(&recovered, Some(&pending)), RecommendationPlan::Keep);
        assert_eq!(plan_recommendation(&recovered, None), RecommendationPlan::Keep);
    }
}
