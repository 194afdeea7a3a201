//! Lifecycle and nutrient ledger of crop cycles.
//!
//! Every mutation runs in one IMMEDIATE transaction and commits through a
//! version-checked update. Within a process the shared connection already
//! serializes writers. The version check and `with_retry` cover other
//! processes writing the same database file, such as a CLI command run
//! while `cropsense run` is polling.

use super::rindm;
use super::thresholds::{
    evaluate, plan_recommendation, NutrientAssessment, NutrientThresholds, RecommendationPlan,
    ThresholdConfig,
};
use crate::clock::Clock;
use crate::datasources::CropReference;
use crate::db::queries;
use crate::db::Database;
use crate::error::{CropSenseError, Result};
use crate::models::{
    CropCycle, CropNutrientRequirement, CycleProgress, CycleStatus, Field, MeasurementType,
    NutrientLevels, NutrientMeasurement, RainfallEvent, RainfallInput, RainfallOutcome,
    RecommendationStatus, SoilDescriptor, SoilTestRecommendation,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Transaction;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_ATTEMPTS: u32 = 3;
const RECENT_EVENTS: usize = 5;
const RECENT_MEASUREMENTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct UptakeResult {
    pub cycle: CropCycle,
    pub days_applied: f64,
    pub removed: NutrientLevels,
    pub warning_issued: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepletionSummary {
    pub crop_uptake: NutrientLevels,
    pub rainfall_loss: NutrientLevels,
    pub fertilizer: NutrientLevels,
    pub total_depletion: NutrientLevels,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub cycle_id: i64,
    pub crop_name: String,
    pub final_levels: NutrientLevels,
    pub depletion: DepletionSummary,
    pub rainfall_event_count: u32,
    /// Any final level under its critical threshold.
    pub below_threshold: bool,
    pub can_continue: bool,
    pub assessment: NutrientAssessment,
    pub recommendation: Option<SoilTestRecommendation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleStatusReport {
    pub cycle: CropCycle,
    pub field: Field,
    pub crop: CropNutrientRequirement,
    pub assessment: NutrientAssessment,
    pub progress: CycleProgress,
    pub recent_rainfall: Vec<RainfallEvent>,
    pub recent_measurements: Vec<NutrientMeasurement>,
    pub pending_recommendation: Option<SoilTestRecommendation>,
}

struct Evaluation {
    assessment: NutrientAssessment,
    recommendation: Option<SoilTestRecommendation>,
    issued: bool,
}

pub struct CycleManager {
    db: Database,
    crops: Arc<dyn CropReference>,
    thresholds: ThresholdConfig,
    clock: Arc<dyn Clock>,
}

impl CycleManager {
    pub fn new(
        db: Database,
        crops: Arc<dyn CropReference>,
        thresholds: ThresholdConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            crops,
            thresholds,
            clock,
        }
    }

    pub fn crops(&self) -> &dyn CropReference {
        self.crops.as_ref()
    }

    pub fn thresholds_for(&self, crop_name: &str) -> NutrientThresholds {
        self.thresholds.for_crop(crop_name)
    }

    /// Runs `op` in a transaction, retrying on lost version races.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        op: impl Fn(&Transaction<'_>, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            match self.db.with_transaction(|tx| op(tx, now)) {
                Err(CropSenseError::ConcurrentModification { cycle_id }) if attempt < MAX_ATTEMPTS => {
                    warn!(cycle_id, attempt, operation, "Cycle changed underneath us, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // Fields

    pub fn create_field(&self, mut field: Field) -> Result<Field> {
        field.validate()?;
        let now = self.clock.now();
        field.created_at = now;
        field.updated_at = now;
        let id = self.db.with_conn(|conn| queries::insert_field(conn, &field))?;
        field.id = Some(id);
        info!(field_id = id, name = %field.name, soil = %field.soil, "Field created");
        Ok(field)
    }

    pub fn get_field(&self, field_id: i64) -> Result<Field> {
        self.db
            .get_field(field_id)?
            .ok_or_else(|| CropSenseError::NotFound(format!("field {}", field_id)))
    }

    pub fn list_fields(&self) -> Result<Vec<Field>> {
        self.db.list_fields()
    }

    /// Soil may only change between cycles.
    pub fn update_field_soil(
        &self,
        field_id: i64,
        soil: SoilDescriptor,
        slope_degrees: Option<f64>,
    ) -> Result<Field> {
        self.with_retry("update soil of", |tx, now| {
            let mut field = queries::require_field(tx, field_id)?;
            if let Some(active) = queries::find_active_cycle_for_field(tx, field_id)? {
                return Err(CropSenseError::ActiveCycleExists {
                    field_id,
                    cycle_id: active.id(),
                });
            }
            field.soil = soil;
            if let Some(slope) = slope_degrees {
                field.slope_degrees = slope;
            }
            field.validate()?;
            field.updated_at = now;
            queries::update_field_soil(tx, field_id, &field.soil, field.slope_degrees, now)?;
            info!(field_id, soil = %field.soil, slope = field.slope_degrees, "Field soil updated");
            Ok(field)
        })
    }

    // Cycle lifecycle

    pub fn create_cycle(
        &self,
        field_id: i64,
        crop_name: &str,
        initial: NutrientLevels,
    ) -> Result<CropCycle> {
        let crop = self.validated_crop(crop_name, &initial)?;
        self.with_retry("create", |tx, now| self.create_in(tx, field_id, &crop, initial, now))
    }

    pub fn start_cycle(&self, cycle_id: i64) -> Result<CropCycle> {
        self.with_retry("start", |tx, now| {
            let cycle = queries::require_cycle(tx, cycle_id)?;
            self.start_in(tx, cycle, now)
        })
    }

    /// Creates and starts a cycle in one step.
    pub fn start_new_cycle(
        &self,
        field_id: i64,
        crop_name: &str,
        initial: NutrientLevels,
    ) -> Result<CropCycle> {
        let crop = self.validated_crop(crop_name, &initial)?;
        self.with_retry("start", |tx, now| {
            let cycle = self.create_in(tx, field_id, &crop, initial, now)?;
            self.start_in(tx, cycle, now)
        })
    }

    fn validated_crop(
        &self,
        crop_name: &str,
        initial: &NutrientLevels,
    ) -> Result<CropNutrientRequirement> {
        if !initial.is_valid() {
            return Err(CropSenseError::Validation(format!(
                "Initial nutrient levels must be finite and non-negative, got {}",
                initial
            )));
        }
        self.crops.lookup(crop_name)
    }

    fn create_in(
        &self,
        tx: &Transaction<'_>,
        field_id: i64,
        crop: &CropNutrientRequirement,
        initial: NutrientLevels,
        now: DateTime<Utc>,
    ) -> Result<CropCycle> {
        queries::require_field(tx, field_id)?;
        if let Some(active) = queries::find_active_cycle_for_field(tx, field_id)? {
            return Err(CropSenseError::ActiveCycleExists {
                field_id,
                cycle_id: active.id(),
            });
        }

        let mut cycle = CropCycle::new(field_id, crop.crop_name.clone(), initial);
        cycle.created_at = now;
        cycle.updated_at = now;
        cycle.id = Some(queries::insert_cycle(tx, &cycle)?);

        info!(
            cycle_id = cycle.id(),
            field_id,
            crop = %cycle.crop_name,
            initial = %initial,
            "Cycle planned"
        );
        Ok(cycle)
    }

    fn start_in(
        &self,
        tx: &Transaction<'_>,
        mut cycle: CropCycle,
        now: DateTime<Utc>,
    ) -> Result<CropCycle> {
        cycle.require_status(CycleStatus::Planning, "start")?;
        if let Some(active) = queries::find_active_cycle_for_field(tx, cycle.field_id)? {
            return Err(CropSenseError::ActiveCycleExists {
                field_id: cycle.field_id,
                cycle_id: active.id(),
            });
        }
        let crop = self.crops.lookup(&cycle.crop_name)?;

        cycle.status = CycleStatus::Active;
        cycle.start_date = Some(now);
        cycle.expected_end_date = Some(now + Duration::days(crop.cycle_days as i64));
        cycle.current = cycle.initial;
        cycle.uptake_days_applied = 0.0;
        cycle.last_weather_check = Some(now);
        cycle.updated_at = now;
        queries::update_cycle(tx, &mut cycle)?;

        let eval = self.reevaluate(tx, &cycle, now)?;
        self.record(tx, &cycle, MeasurementType::CycleStart, &eval, None, now)?;

        info!(
            cycle_id = cycle.id(),
            field_id = cycle.field_id,
            crop = %cycle.crop_name,
            cycle_days = crop.cycle_days,
            "Cycle started"
        );
        Ok(cycle)
    }

    pub fn complete_cycle(&self, cycle_id: i64) -> Result<CompletionReport> {
        self.with_retry("complete", |tx, now| {
            let mut cycle = queries::require_cycle(tx, cycle_id)?;
            cycle.require_status(CycleStatus::Active, "complete")?;
            let crop = self.crops.lookup(&cycle.crop_name)?;

            let outstanding = (crop.cycle_days as f64 - cycle.uptake_days_applied).max(0.0);
            let (days, removed) = apply_uptake(&mut cycle, &crop, outstanding);

            cycle.final_levels = Some(cycle.current);
            cycle.status = CycleStatus::Completed;
            cycle.actual_end_date = Some(now);
            cycle.updated_at = now;
            queries::update_cycle(tx, &mut cycle)?;

            let eval = self.reevaluate(tx, &cycle, now)?;
            let notes = format!(
                "Harvest after {:.0} uptake days ({:.1} settled at completion, removed {})",
                cycle.uptake_days_applied, days, removed
            );
            self.record(tx, &cycle, MeasurementType::CycleEnd, &eval, Some(notes), now)?;

            let below_threshold = eval.assessment.any_critical();
            info!(
                cycle_id,
                final_levels = %cycle.current,
                below_threshold,
                "Cycle completed"
            );

            Ok(CompletionReport {
                cycle_id,
                crop_name: cycle.crop_name.clone(),
                final_levels: cycle.current,
                depletion: DepletionSummary {
                    crop_uptake: cycle.total_crop_uptake,
                    rainfall_loss: cycle.total_rainfall_loss,
                    fertilizer: cycle.total_fertilizer,
                    total_depletion: cycle.total_crop_uptake.add(&cycle.total_rainfall_loss),
                },
                rainfall_event_count: cycle.rainfall_event_count,
                below_threshold,
                can_continue: !below_threshold,
                assessment: eval.assessment,
                recommendation: eval.recommendation,
            })
        })
    }

    pub fn abandon_cycle(&self, cycle_id: i64) -> Result<CropCycle> {
        self.with_retry("abandon", |tx, now| {
            let mut cycle = queries::require_cycle(tx, cycle_id)?;
            if cycle.status.is_terminal() {
                return Err(CropSenseError::InvalidTransition {
                    cycle_id,
                    status: cycle.status,
                    operation: "abandon",
                });
            }
            let previous = cycle.status;
            cycle.status = CycleStatus::Abandoned;
            cycle.actual_end_date = Some(now);
            cycle.updated_at = now;
            queries::update_cycle(tx, &mut cycle)?;
            info!(cycle_id, from = %previous, "Cycle abandoned");
            Ok(cycle)
        })
    }

    // Ledger changes

    pub fn apply_rainfall(&self, cycle_id: i64, input: &RainfallInput) -> Result<RainfallOutcome> {
        input.validate()?;
        self.with_retry("apply rainfall to", |tx, now| {
            self.apply_rainfall_in(tx, cycle_id, input, now)
        })
    }

    fn apply_rainfall_in(
        &self,
        tx: &Transaction<'_>,
        cycle_id: i64,
        input: &RainfallInput,
        now: DateTime<Utc>,
    ) -> Result<RainfallOutcome> {
        let mut cycle = queries::require_cycle(tx, cycle_id)?;

        if let Some(existing) = queries::find_rainfall_event(tx, cycle_id, input.event_start)? {
            debug!(cycle_id, event_start = %input.event_start, "Rainfall event already applied");
            return Ok(RainfallOutcome::AlreadyProcessed {
                event_id: existing.id.unwrap_or_default(),
            });
        }

        cycle.require_status(CycleStatus::Active, "apply rainfall to")?;
        if let Some(watermark) = cycle.last_weather_check {
            if input.event_start < watermark {
                return Err(CropSenseError::OutOfOrderEvent {
                    cycle_id,
                    event_start: input.event_start,
                    watermark,
                });
            }
        }

        let field = queries::require_field(tx, cycle.field_id)?;
        let result = rindm::compute_loss(
            input.rainfall_mm,
            input.duration_hours,
            cycle.current,
            &field.soil,
            field.slope_degrees,
        )?;

        let before = cycle.current;
        cycle.current = result.remaining;
        cycle.total_rainfall_loss = cycle.total_rainfall_loss.add(&result.loss);
        cycle.rainfall_event_count += 1;
        cycle.last_weather_check = Some(
            cycle
                .last_weather_check
                .map_or(input.event_end, |w| w.max(input.event_end)),
        );
        cycle.updated_at = now;
        queries::update_cycle(tx, &mut cycle)?;

        let mut event = RainfallEvent {
            id: None,
            cycle_id,
            event_start: input.event_start,
            event_end: input.event_end,
            rainfall_mm: input.rainfall_mm,
            duration_hours: input.duration_hours,
            intensity_mm_per_hour: result.factors.intensity_mm_per_hour,
            before,
            loss: result.loss,
            after: result.remaining,
            processed: true,
            processed_at: Some(now),
        };
        event.id = Some(queries::insert_rainfall_event(tx, &event)?);

        let eval = self.reevaluate(tx, &cycle, now)?;
        let notes = format!(
            "{:.1} mm over {:.1} h ({})",
            input.rainfall_mm, input.duration_hours, result.soil_class
        );
        self.record(tx, &cycle, MeasurementType::RainfallUpdate, &eval, Some(notes), now)?;

        info!(
            cycle_id,
            rainfall_mm = input.rainfall_mm,
            loss = %result.loss,
            remaining = %result.remaining,
            "Rainfall applied"
        );
        Ok(RainfallOutcome::Applied {
            event,
            warning_issued: eval.issued,
        })
    }

    /// Applies events oldest first. Stops at the first failure.
    pub fn apply_rainfall_batch(
        &self,
        cycle_id: i64,
        mut events: Vec<RainfallInput>,
    ) -> Result<Vec<RainfallOutcome>> {
        events.sort_by_key(|e| e.event_start);
        events
            .iter()
            .map(|event| self.apply_rainfall(cycle_id, event))
            .collect()
    }

    /// Removes the crop's share of seasonal uptake for `elapsed_days` of
    /// growth, never past the full cycle length.
    pub fn apply_crop_uptake(&self, cycle_id: i64, elapsed_days: f64) -> Result<UptakeResult> {
        if !elapsed_days.is_finite() || elapsed_days < 0.0 {
            return Err(CropSenseError::Validation(format!(
                "Elapsed days must be non-negative, got {}",
                elapsed_days
            )));
        }
        self.uptake(cycle_id, |_, _| elapsed_days)
    }

    /// Brings uptake up to date with whole days grown as of `now`.
    pub fn accrue_uptake(&self, cycle_id: i64, now: DateTime<Utc>) -> Result<UptakeResult> {
        self.uptake(cycle_id, |cycle, cycle_days| {
            let due = cycle.days_elapsed(now).floor().min(cycle_days as f64);
            due - cycle.uptake_days_applied
        })
    }

    fn uptake(
        &self,
        cycle_id: i64,
        days_due: impl Fn(&CropCycle, u32) -> f64,
    ) -> Result<UptakeResult> {
        self.with_retry("apply uptake to", |tx, now| {
            let mut cycle = queries::require_cycle(tx, cycle_id)?;
            cycle.require_status(CycleStatus::Active, "apply uptake to")?;
            let crop = self.crops.lookup(&cycle.crop_name)?;

            let requested = days_due(&cycle, crop.cycle_days);
            if requested <= 0.0 {
                return Ok(UptakeResult {
                    cycle,
                    days_applied: 0.0,
                    removed: NutrientLevels::ZERO,
                    warning_issued: false,
                });
            }

            let (days, removed) = apply_uptake(&mut cycle, &crop, requested);
            if days <= 0.0 {
                return Ok(UptakeResult {
                    cycle,
                    days_applied: 0.0,
                    removed,
                    warning_issued: false,
                });
            }
            cycle.updated_at = now;
            queries::update_cycle(tx, &mut cycle)?;

            let eval = self.reevaluate(tx, &cycle, now)?;
            let notes = format!("{:.2} days of {} uptake", days, crop.crop_name);
            self.record(tx, &cycle, MeasurementType::CropUptake, &eval, Some(notes), now)?;

            debug!(cycle_id, days, removed = %removed, "Crop uptake applied");
            Ok(UptakeResult {
                cycle,
                days_applied: days,
                removed,
                warning_issued: eval.issued,
            })
        })
    }

    pub fn apply_fertilizer(&self, cycle_id: i64, amounts: NutrientLevels) -> Result<CropCycle> {
        if !amounts.is_valid() {
            return Err(CropSenseError::Validation(format!(
                "Fertilizer amounts must be finite and non-negative, got {}",
                amounts
            )));
        }
        self.with_retry("fertilize", |tx, now| {
            let mut cycle = queries::require_cycle(tx, cycle_id)?;
            cycle.require_status(CycleStatus::Active, "fertilize")?;

            cycle.current = cycle.current.add(&amounts);
            cycle.total_fertilizer = cycle.total_fertilizer.add(&amounts);
            cycle.updated_at = now;
            queries::update_cycle(tx, &mut cycle)?;

            let eval = self.reevaluate(tx, &cycle, now)?;
            let notes = format!("Applied {}", amounts);
            self.record(tx, &cycle, MeasurementType::Fertilizer, &eval, Some(notes), now)?;

            info!(cycle_id, applied = %amounts, current = %cycle.current, "Fertilizer recorded");
            Ok(cycle)
        })
    }

    /// Moves `last_weather_check` forward to `to`; never backwards.
    pub fn advance_watermark(&self, cycle_id: i64, to: DateTime<Utc>) -> Result<CropCycle> {
        self.with_retry("advance watermark of", |tx, now| {
            let mut cycle = queries::require_cycle(tx, cycle_id)?;
            cycle.require_status(CycleStatus::Active, "advance watermark of")?;
            if cycle.last_weather_check.is_some_and(|w| w >= to) {
                return Ok(cycle);
            }
            cycle.last_weather_check = Some(to);
            cycle.updated_at = now;
            queries::update_cycle(tx, &mut cycle)?;
            Ok(cycle)
        })
    }

    // Reads

    pub fn get_cycle(&self, cycle_id: i64) -> Result<CropCycle> {
        self.db
            .get_cycle(cycle_id)?
            .ok_or_else(|| CropSenseError::NotFound(format!("cycle {}", cycle_id)))
    }

    pub fn list_cycles(&self, field_id: Option<i64>) -> Result<Vec<CropCycle>> {
        self.db.list_cycles(field_id)
    }

    pub fn list_active_cycles(&self) -> Result<Vec<CropCycle>> {
        self.db.list_active_cycles()
    }

    pub fn get_cycle_status(&self, cycle_id: i64) -> Result<CycleStatusReport> {
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            let cycle = queries::require_cycle(conn, cycle_id)?;
            let field = queries::require_field(conn, cycle.field_id)?;
            let crop = self.crops.lookup(&cycle.crop_name)?;
            let assessment = evaluate(&cycle.current, &self.thresholds_for(&cycle.crop_name));
            let progress = cycle.progress(now, crop.cycle_days);

            Ok(CycleStatusReport {
                recent_rainfall: queries::recent_rainfall_events(conn, cycle_id, RECENT_EVENTS)?,
                recent_measurements: queries::recent_measurements(
                    conn,
                    cycle_id,
                    RECENT_MEASUREMENTS,
                )?,
                pending_recommendation: queries::pending_recommendation(conn, cycle_id)?,
                cycle,
                field,
                crop,
                assessment,
                progress,
            })
        })
    }

    // Recommendations

    pub fn list_recommendations(&self, cycle_id: i64) -> Result<Vec<SoilTestRecommendation>> {
        self.db.list_recommendations(cycle_id)
    }

    pub fn update_recommendation_status(
        &self,
        recommendation_id: i64,
        status: RecommendationStatus,
    ) -> Result<SoilTestRecommendation> {
        self.with_retry("update recommendation", |tx, now| {
            let mut rec = queries::get_recommendation(tx, recommendation_id)?.ok_or_else(|| {
                CropSenseError::NotFound(format!("recommendation {}", recommendation_id))
            })?;
            if !rec.status.can_transition_to(status) {
                return Err(CropSenseError::Validation(format!(
                    "Recommendation {} cannot move from {} to {}",
                    recommendation_id, rec.status, status
                )));
            }
            rec.status = status;
            rec.updated_at = now;
            queries::update_recommendation(tx, &rec)?;
            info!(recommendation_id, cycle_id = rec.cycle_id, status = %status, "Recommendation updated");
            Ok(rec)
        })
    }

    /// Keeps the cycle's single pending recommendation in step with its levels.
    fn reevaluate(
        &self,
        tx: &Transaction<'_>,
        cycle: &CropCycle,
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        let cycle_id = cycle.id();
        let assessment = evaluate(&cycle.current, &self.thresholds_for(&cycle.crop_name));
        let pending = queries::pending_recommendation(tx, cycle_id)?;
        let plan = plan_recommendation(&assessment, pending.as_ref());

        let (recommendation, issued) = match (plan, pending) {
            (RecommendationPlan::Create { reason, message }, _) => {
                let mut rec = SoilTestRecommendation::new(cycle_id, reason, cycle.current, message);
                rec.created_at = now;
                rec.updated_at = now;
                rec.id = Some(queries::insert_recommendation(tx, &rec)?);
                warn!(
                    cycle_id,
                    reason = reason.as_str(),
                    levels = %cycle.current,
                    "Soil test recommended"
                );
                (Some(rec), true)
            }
            (RecommendationPlan::Refresh { reason, message }, Some(mut rec)) => {
                rec.reason = reason;
                rec.levels = cycle.current;
                rec.message = message;
                rec.updated_at = now;
                queries::update_recommendation(tx, &rec)?;
                debug!(cycle_id, recommendation_id = rec.id, "Pending recommendation refreshed");
                (Some(rec), false)
            }
            (_, pending) => (pending, false),
        };

        Ok(Evaluation {
            assessment,
            recommendation,
            issued,
        })
    }

    fn record(
        &self,
        tx: &Transaction<'_>,
        cycle: &CropCycle,
        measurement_type: MeasurementType,
        eval: &Evaluation,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let measurement = NutrientMeasurement {
            id: None,
            cycle_id: cycle.id(),
            measurement_type,
            levels: cycle.current,
            below_threshold: eval.assessment.any_critical(),
            notes,
            recorded_at: now,
        };
        queries::insert_measurement(tx, &measurement)?;
        Ok(())
    }
}

/// Removes up to `days` of prorated uptake, capped at the cycle length and at
/// what is present. Counters record what was actually removed.
fn apply_uptake(
    cycle: &mut CropCycle,
    crop: &CropNutrientRequirement,
    days: f64,
) -> (f64, NutrientLevels) {
    let remaining_days = (crop.cycle_days as f64 - cycle.uptake_days_applied).max(0.0);
    let days = days.min(remaining_days).max(0.0);
    if days == 0.0 {
        return (0.0, NutrientLevels::ZERO);
    }

    let share = crop.prorated_uptake(days);
    let removed = share.zip_with(&cycle.current, f64::min);
    cycle.current = cycle.current.saturating_sub(&removed);
    cycle.total_crop_uptake = cycle.total_crop_uptake.add(&removed);
    cycle.uptake_days_applied += days;
    (days, removed)
}
