//! Rainfall-induced nutrient depletion model.
//!
//! Each event removes a share of what is currently in the soil through two
//! pathways: leaching (water moving down through the profile, weighted by
//! rainfall depth) and surface runoff (weighted by intensity and slope).
//! Losses are proportional to the current level, so each event scales the
//! remainder by a fixed factor (the clamp included). For rainfall alone the
//! final levels do not depend on order, but the loss attributed to each
//! event does, and so do the totals once uptake or fertilizer falls between
//! events. Sequences are applied in order with remainders carried forward.

use crate::error::{CropSenseError, Result};
use crate::models::field::validate_slope;
use crate::models::{Nutrient, NutrientLevels, SoilDescriptor, SoilType};
use serde::{Deserialize, Serialize};

/// Assumed event length when the source does not report one.
pub const DEFAULT_DURATION_HOURS: f64 = 2.0;
/// Intensity at which the runoff intensity factor saturates (mm/h).
pub const INTENSITY_SATURATION_MM_PER_HOUR: f64 = 25.0;
/// Slope at which the slope factor saturates (degrees).
pub const SLOPE_SATURATION_DEGREES: f64 = 15.0;
/// Rainfall depth giving a leaching weight of 1.0 (mm).
pub const LEACHING_REFERENCE_MM: f64 = 100.0;

/// Fraction of each nutrient lost per unit pathway weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossCoefficients {
    pub leaching: NutrientLevels,
    pub runoff: NutrientLevels,
}

impl LossCoefficients {
    pub fn for_soil_type(soil_type: SoilType) -> Self {
        match soil_type {
            SoilType::Sandy => Self {
                leaching: NutrientLevels::new(0.30, 0.08, 0.20),
                runoff: NutrientLevels::new(0.05, 0.10, 0.08),
            },
            SoilType::Loamy => Self {
                leaching: NutrientLevels::new(0.15, 0.05, 0.12),
                runoff: NutrientLevels::new(0.15, 0.20, 0.18),
            },
            SoilType::Clay => Self {
                leaching: NutrientLevels::new(0.05, 0.03, 0.06),
                runoff: NutrientLevels::new(0.30, 0.35, 0.28),
            },
        }
    }

    /// Categorical soils use their table row; textures blend sand, silt and
    /// clay fractions over the sandy, loamy and clay rows.
    pub fn for_descriptor(soil: &SoilDescriptor) -> Self {
        match soil {
            SoilDescriptor::Categorical { soil_type } => Self::for_soil_type(*soil_type),
            SoilDescriptor::Texture(texture) => {
                let total = texture.total();
                let weights = [
                    (SoilType::Sandy, texture.sand_pct / total),
                    (SoilType::Loamy, texture.silt_pct / total),
                    (SoilType::Clay, texture.clay_pct / total),
                ];
                weights.iter().fold(
                    Self {
                        leaching: NutrientLevels::ZERO,
                        runoff: NutrientLevels::ZERO,
                    },
                    |acc, (soil_type, weight)| {
                        let row = Self::for_soil_type(*soil_type);
                        Self {
                            leaching: acc.leaching.add(&row.leaching.scale(*weight)),
                            runoff: acc.runoff.add(&row.runoff.scale(*weight)),
                        }
                    },
                )
            }
        }
    }
}

/// Pathway weights derived from one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossFactors {
    pub rainfall_mm: f64,
    pub duration_hours: f64,
    pub intensity_mm_per_hour: f64,
    /// `min(1, intensity / 25)`
    pub intensity_factor: f64,
    /// `1 + min(slope / 15, 1)`
    pub slope_factor: f64,
    pub leaching_weight: f64,
    /// `intensity_factor * slope_factor`, in [0, 2].
    pub runoff_weight: f64,
}

impl LossFactors {
    pub fn new(rainfall_mm: f64, duration_hours: f64, slope_degrees: f64) -> Self {
        let intensity_mm_per_hour = if duration_hours > 0.0 {
            rainfall_mm / duration_hours
        } else {
            0.0
        };
        let intensity_factor = (intensity_mm_per_hour / INTENSITY_SATURATION_MM_PER_HOUR).min(1.0);
        let slope_factor = 1.0 + (slope_degrees / SLOPE_SATURATION_DEGREES).min(1.0);

        Self {
            rainfall_mm,
            duration_hours,
            intensity_mm_per_hour,
            intensity_factor,
            slope_factor,
            leaching_weight: rainfall_mm / LEACHING_REFERENCE_MM,
            runoff_weight: intensity_factor * slope_factor,
        }
    }
}

/// Outcome of one rainfall event against one set of levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepletionResult {
    pub loss: NutrientLevels,
    pub remaining: NutrientLevels,
    /// Leaching share of `loss`.
    pub leaching: NutrientLevels,
    /// Runoff share of `loss`.
    pub runoff: NutrientLevels,
    pub loss_percent: NutrientLevels,
    pub factors: LossFactors,
    pub coefficients: LossCoefficients,
    /// Dominant class of the soil, for reporting.
    pub soil_class: SoilType,
}

fn validate_event(rainfall_mm: f64, duration_hours: f64) -> Result<()> {
    if !rainfall_mm.is_finite() || rainfall_mm < 0.0 {
        return Err(CropSenseError::Validation(format!(
            "Rainfall must be a non-negative amount in mm, got {}",
            rainfall_mm
        )));
    }
    if !duration_hours.is_finite() || duration_hours < 0.0 {
        return Err(CropSenseError::Validation(format!(
            "Duration must be non-negative, got {} hours",
            duration_hours
        )));
    }
    if rainfall_mm > 0.0 && duration_hours == 0.0 {
        return Err(CropSenseError::Validation(
            "Duration must be positive when rainfall is recorded".into(),
        ));
    }
    Ok(())
}

/// Nutrient loss from a single rainfall event.
pub fn compute_loss(
    rainfall_mm: f64,
    duration_hours: f64,
    current: NutrientLevels,
    soil: &SoilDescriptor,
    slope_degrees: f64,
) -> Result<DepletionResult> {
    validate_event(rainfall_mm, duration_hours)?;
    if !current.is_valid() {
        return Err(CropSenseError::Validation(format!(
            "Nutrient levels must be finite and non-negative, got {}",
            current
        )));
    }
    soil.validate()?;
    validate_slope(slope_degrees)?;

    let coefficients = LossCoefficients::for_descriptor(soil);
    let factors = LossFactors::new(rainfall_mm, duration_hours, slope_degrees);

    let pathway = |nutrient: Nutrient| -> (f64, f64, f64) {
        let level = current.get(nutrient);
        let leach = level * coefficients.leaching.get(nutrient) * factors.leaching_weight;
        let runoff = level * coefficients.runoff.get(nutrient) * factors.runoff_weight;
        let raw = leach + runoff;
        let total = raw.min(level);
        if raw > total && raw > 0.0 {
            let share = total / raw;
            (leach * share, runoff * share, total)
        } else {
            (leach, runoff, total)
        }
    };

    let leaching = NutrientLevels::from_fn(|n| pathway(n).0);
    let runoff = NutrientLevels::from_fn(|n| pathway(n).1);
    let loss = NutrientLevels::from_fn(|n| pathway(n).2);
    let remaining = current.zip_with(&loss, |c, l| (c - l).max(0.0));
    let loss_percent = loss.zip_with(&current, |l, c| if c > 0.0 { l / c * 100.0 } else { 0.0 });

    Ok(DepletionResult {
        loss,
        remaining,
        leaching,
        runoff,
        loss_percent,
        factors,
        coefficients,
        soil_class: soil.soil_class(),
    })
}

/// One event in a cumulative run. A missing duration uses
/// [`DEFAULT_DURATION_HOURS`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainfallSample {
    pub rainfall_mm: f64,
    #[serde(default)]
    pub duration_hours: Option<f64>,
}

impl RainfallSample {
    pub fn new(rainfall_mm: f64, duration_hours: Option<f64>) -> Self {
        Self {
            rainfall_mm,
            duration_hours,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CumulativeLoss {
    pub initial: NutrientLevels,
    pub final_levels: NutrientLevels,
    pub total_loss: NutrientLevels,
    pub total_loss_percent: NutrientLevels,
    /// Per-event results, in application order.
    pub events: Vec<DepletionResult>,
}

/// Applies events in the given order, each against what the previous left.
pub fn compute_cumulative_loss(
    events: &[RainfallSample],
    initial: NutrientLevels,
    soil: &SoilDescriptor,
    slope_degrees: f64,
) -> Result<CumulativeLoss> {
    let mut current = initial;
    let mut total_loss = NutrientLevels::ZERO;
    let mut trail = Vec::with_capacity(events.len());

    for event in events {
        let duration = event.duration_hours.unwrap_or(DEFAULT_DURATION_HOURS);
        let result = compute_loss(event.rainfall_mm, duration, current, soil, slope_degrees)?;
        total_loss = total_loss.add(&result.loss);
        current = result.remaining;
        trail.push(result);
    }

    let total_loss_percent =
        total_loss.zip_with(&initial, |l, i| if i > 0.0 { l / i * 100.0 } else { 0.0 });

    Ok(CumulativeLoss {
        initial,
        final_levels: current,
        total_loss,
        total_loss_percent,
        events: trail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loamy() -> SoilDescriptor {
        SoilDescriptor::categorical(SoilType::Loamy)
    }

    fn scenario_levels() -> NutrientLevels {
        NutrientLevels::new(90.0, 42.0, 43.0)
    }

    #[test]
    fn scenario_a_loamy_storm() {
        let result = compute_loss(50.0, 3.0, scenario_levels(), &loamy(), 3.0).unwrap();

        assert!((result.leaching.n - 6.75).abs() < 0.001);
        assert!((result.runoff.n - 10.8).abs() < 0.001);
        assert!((result.loss.n - 17.55).abs() < 0.001);
        assert!((result.loss_percent.n - 19.5).abs() < 0.001);

        // P: 42 * (0.05 * 0.5 + 0.20 * 0.8)
        assert!((result.loss.p - 7.77).abs() < 0.001);
        // K: 43 * (0.12 * 0.5 + 0.18 * 0.8)
        assert!((result.loss.k - 8.772).abs() < 0.001);

        assert!((result.factors.intensity_factor - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.factors.slope_factor - 1.2).abs() < 1e-9);
        assert_eq!(result.soil_class, SoilType::Loamy);
    }

    #[test]
    fn scenario_b_no_rain_means_no_loss() {
        for soil in [SoilType::Sandy, SoilType::Loamy, SoilType::Clay] {
            let descriptor = SoilDescriptor::categorical(soil);
            let result = compute_loss(0.0, 0.0, scenario_levels(), &descriptor, 10.0).unwrap();
            assert_eq!(result.loss, NutrientLevels::ZERO);
            assert_eq!(result.remaining, scenario_levels());
        }
        let texture = SoilDescriptor::texture(30.0, 30.0, 40.0).unwrap();
        let result = compute_loss(0.0, 5.0, scenario_levels(), &texture, 0.0).unwrap();
        assert_eq!(result.remaining, scenario_levels());
    }

    #[test]
    fn empty_soil_loses_nothing() {
        let result = compute_loss(120.0, 1.0, NutrientLevels::ZERO, &loamy(), 30.0).unwrap();
        assert_eq!(result.loss, NutrientLevels::ZERO);
        assert_eq!(result.loss_percent, NutrientLevels::ZERO);
    }

    #[test]
    fn loss_never_exceeds_current() {
        let clay = SoilDescriptor::categorical(SoilType::Clay);
        let grid = [
            (1.0, 24.0, 0.0),
            (50.0, 3.0, 3.0),
            (150.0, 1.0, 20.0),
            (400.0, 0.5, 45.0),
            (1000.0, 0.25, 89.0),
        ];
        for (rain, hours, slope) in grid {
            for soil in [loamy(), clay, SoilDescriptor::categorical(SoilType::Sandy)] {
                let result = compute_loss(rain, hours, scenario_levels(), &soil, slope).unwrap();
                for n in Nutrient::ALL {
                    let loss = result.loss.get(n);
                    assert!(loss >= 0.0);
                    assert!(loss <= scenario_levels().get(n) + 1e-12);
                    assert!(result.remaining.get(n) >= 0.0);
                    let parts = result.leaching.get(n) + result.runoff.get(n);
                    assert!((parts - loss).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn clamp_scales_breakdown_proportionally() {
        let clay = SoilDescriptor::categorical(SoilType::Clay);
        let result = compute_loss(2000.0, 0.25, scenario_levels(), &clay, 60.0).unwrap();
        assert_eq!(result.remaining.p, 0.0);
        assert!((result.loss.p - 42.0).abs() < 1e-9);
        // Raw P: leach 42*0.03*20 = 25.2, runoff 42*0.35*2 = 29.4
        assert!((result.leaching.p / result.runoff.p - 25.2 / 29.4).abs() < 1e-9);
    }

    #[test]
    fn sandy_leaches_more_nitrogen_than_loamy_in_soaking_rain() {
        let sandy = SoilDescriptor::categorical(SoilType::Sandy);
        let clay = SoilDescriptor::categorical(SoilType::Clay);
        let levels = scenario_levels();

        let s = compute_loss(50.0, 24.0, levels, &sandy, 3.0).unwrap();
        let l = compute_loss(50.0, 24.0, levels, &loamy(), 3.0).unwrap();
        let c = compute_loss(50.0, 24.0, levels, &clay, 3.0).unwrap();

        assert!(s.loss.n > l.loss.n);
        assert!(l.loss.n > c.loss.n);
        for (rain, hours) in [(10.0, 1.0), (50.0, 3.0), (80.0, 0.5)] {
            let s = compute_loss(rain, hours, levels, &sandy, 3.0).unwrap();
            let c = compute_loss(rain, hours, levels, &clay, 3.0).unwrap();
            assert!(s.leaching.n > c.leaching.n);
        }
    }

    #[test]
    fn clay_loses_more_phosphorus_to_runoff_than_sandy() {
        let sandy = SoilDescriptor::categorical(SoilType::Sandy);
        let clay = SoilDescriptor::categorical(SoilType::Clay);
        let levels = scenario_levels();
        for (rain, hours, slope) in [(10.0, 2.0, 0.0), (50.0, 3.0, 3.0), (60.0, 1.0, 12.0)] {
            let s = compute_loss(rain, hours, levels, &sandy, slope).unwrap();
            let c = compute_loss(rain, hours, levels, &clay, slope).unwrap();
            let sandy_share = s.runoff.p / s.loss.p;
            let clay_share = c.runoff.p / c.loss.p;
            assert!(clay_share > sandy_share);
        }
    }

    #[test]
    fn runoff_weight_is_bounded_and_monotonic() {
        let mut last = 0.0;
        for intensity in [0.0, 5.0, 12.5, 25.0, 50.0, 200.0] {
            let f = LossFactors::new(intensity, 1.0, 3.0);
            assert!(f.runoff_weight >= last);
            assert!(f.runoff_weight <= 2.0);
            last = f.runoff_weight;
        }
        let mut last = 0.0;
        for slope in [0.0, 3.0, 7.5, 15.0, 45.0] {
            let f = LossFactors::new(30.0, 1.0, slope);
            assert!(f.runoff_weight >= last);
            last = f.runoff_weight;
        }
        assert!((LossFactors::new(100.0, 1.0, 60.0).runoff_weight - 2.0).abs() < 1e-12);
    }

    #[test]
    fn texture_blend_matches_categorical_extremes() {
        let pure_sand = SoilDescriptor::texture(100.0, 0.0, 0.0).unwrap();
        assert_eq!(
            LossCoefficients::for_descriptor(&pure_sand),
            LossCoefficients::for_soil_type(SoilType::Sandy)
        );

        let mixed = SoilDescriptor::texture(40.0, 40.0, 20.0).unwrap();
        let blend = LossCoefficients::for_descriptor(&mixed);
        // 0.4 * 0.30 + 0.4 * 0.15 + 0.2 * 0.05
        assert!((blend.leaching.n - 0.19).abs() < 1e-12);
        // 0.4 * 0.10 + 0.4 * 0.20 + 0.2 * 0.35
        assert!((blend.runoff.p - 0.19).abs() < 1e-12);
    }

    #[test]
    fn texture_blend_normalizes_off_by_one_sums() {
        let soil = SoilDescriptor::texture(50.0, 30.0, 20.5).unwrap();
        let blend = LossCoefficients::for_descriptor(&soil);
        let expected = (50.0 * 0.30 + 30.0 * 0.15 + 20.5 * 0.05) / 100.5;
        assert!((blend.leaching.n - expected).abs() < 1e-12);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let levels = scenario_levels();
        assert!(compute_loss(-1.0, 1.0, levels, &loamy(), 3.0).is_err());
        assert!(compute_loss(10.0, -1.0, levels, &loamy(), 3.0).is_err());
        assert!(compute_loss(10.0, 0.0, levels, &loamy(), 3.0).is_err());
        assert!(compute_loss(f64::NAN, 1.0, levels, &loamy(), 3.0).is_err());
        assert!(compute_loss(10.0, 1.0, NutrientLevels::new(-5.0, 0.0, 0.0), &loamy(), 3.0).is_err());
        assert!(compute_loss(10.0, 1.0, levels, &loamy(), 95.0).is_err());

        let bad_texture = SoilDescriptor::Texture(crate::models::SoilTexture {
            sand_pct: 50.0,
            silt_pct: 30.0,
            clay_pct: 10.0,
        });
        assert!(matches!(
            compute_loss(10.0, 1.0, levels, &bad_texture, 3.0),
            Err(CropSenseError::Validation(_))
        ));
    }

    #[test]
    fn cumulative_matches_sequential_application() {
        let events = [
            RainfallSample::new(20.0, Some(4.0)),
            RainfallSample::new(60.0, Some(1.5)),
            RainfallSample::new(35.0, None),
        ];
        let cumulative = compute_cumulative_loss(&events, scenario_levels(), &loamy(), 5.0).unwrap();

        let mut current = scenario_levels();
        let mut total = NutrientLevels::ZERO;
        for event in &events {
            let hours = event.duration_hours.unwrap_or(DEFAULT_DURATION_HOURS);
            let step = compute_loss(event.rainfall_mm, hours, current, &loamy(), 5.0).unwrap();
            total = total.add(&step.loss);
            current = step.remaining;
        }

        assert_eq!(cumulative.events.len(), 3);
        assert_eq!(cumulative.final_levels, current);
        assert_eq!(cumulative.total_loss, total);
        assert_eq!(cumulative.events[2].factors.duration_hours, DEFAULT_DURATION_HOURS);
    }

    #[test]
    fn reordering_rain_moves_attribution_not_final_levels() {
        let small = RainfallSample::new(10.0, Some(5.0));
        let storm = RainfallSample::new(90.0, Some(1.0));

        let forward =
            compute_cumulative_loss(&[small, storm], scenario_levels(), &loamy(), 3.0).unwrap();
        let reversed =
            compute_cumulative_loss(&[storm, small], scenario_levels(), &loamy(), 3.0).unwrap();

        // The storm takes a share of whatever is left when it arrives.
        let storm_first = reversed.events[0].loss.n;
        let storm_second = forward.events[1].loss.n;
        assert!(storm_first > storm_second);
        assert!((forward.events[0].loss.n - reversed.events[1].loss.n).abs() > 0.01);

        for nutrient in Nutrient::ALL {
            let a = forward.final_levels.get(nutrient);
            let b = reversed.final_levels.get(nutrient);
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn clamped_event_still_commutes() {
        let sandy = SoilDescriptor::categorical(SoilType::Sandy);
        let deluge = RainfallSample::new(400.0, Some(2.0));
        let shower = RainfallSample::new(20.0, Some(4.0));

        let forward =
            compute_cumulative_loss(&[shower, deluge], scenario_levels(), &sandy, 20.0).unwrap();
        let reversed =
            compute_cumulative_loss(&[deluge, shower], scenario_levels(), &sandy, 20.0).unwrap();

        assert_eq!(forward.final_levels.n, 0.0);
        assert_eq!(reversed.final_levels.n, 0.0);
        assert_eq!(reversed.events[1].loss.n, 0.0);
        assert!(forward.events[0].loss.n > 0.0);
    }

    #[test]
    fn cumulative_of_nothing_is_identity() {
        let result = compute_cumulative_loss(&[], scenario_levels(), &loamy(), 3.0).unwrap();
        assert_eq!(result.final_levels, scenario_levels());
        assert_eq!(result.total_loss_percent, NutrientLevels::ZERO);
    }
}
