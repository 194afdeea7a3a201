//! SQL for every table. Free functions take a `&Connection` so the cycle
//! manager can compose them inside one transaction; the `impl Database`
//! blocks are read helpers for callers outside a transaction.

use crate::db::Database;
use crate::error::{CropSenseError, Result};
use crate::models::{
    CropCycle, CycleStatus, Field, MeasurementType, NutrientLevels, NutrientMeasurement,
    RainfallEvent, RecommendationReason, RecommendationStatus, SoilDescriptor, SoilTestRecommendation,
    SoilTexture, SoilType,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{named_params, params, Connection, Row};
use tracing::warn;

/// Storage form of every timestamp. Fixed width, so text order is time order
/// and `(cycle_id, event_start)` keys compare exactly.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            warn!(column, value, "Unparseable timestamp in database");
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })
}

fn ts_column(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(name)?;
    parse_ts(name, &value)
}

fn opt_ts_column(row: &Row, name: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(name)?;
    value.map(|v| parse_ts(name, &v)).transpose()
}

fn levels_columns(row: &Row, prefix: &str) -> rusqlite::Result<NutrientLevels> {
    Ok(NutrientLevels::new(
        row.get(format!("{}_n", prefix).as_str())?,
        row.get(format!("{}_p", prefix).as_str())?,
        row.get(format!("{}_k", prefix).as_str())?,
    ))
}

fn invalid_text(column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        format!("unknown {} '{}'", column, value).into(),
    )
}

// Field Queries

pub fn insert_field(conn: &Connection, field: &Field) -> Result<i64> {
    let (soil_kind, soil_type, texture) = soil_columns(&field.soil);
    conn.execute(
        r#"
        INSERT INTO fields
            (name, soil_kind, soil_type, sand_pct, silt_pct, clay_pct,
             slope_degrees, latitude, longitude, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            field.name,
            soil_kind,
            soil_type,
            texture.map(|t| t.sand_pct),
            texture.map(|t| t.silt_pct),
            texture.map(|t| t.clay_pct),
            field.slope_degrees,
            field.latitude,
            field.longitude,
            fmt_ts(field.created_at),
            fmt_ts(field.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_field(conn: &Connection, id: i64) -> Result<Option<Field>> {
    conn.query_row("SELECT * FROM fields WHERE id = ?1", [id], row_to_field)
        .optional()
        .map_err(Into::into)
}

pub fn require_field(conn: &Connection, id: i64) -> Result<Field> {
    get_field(conn, id)?.ok_or_else(|| CropSenseError::NotFound(format!("field {}", id)))
}

pub fn list_fields(conn: &Connection) -> Result<Vec<Field>> {
    let mut stmt = conn.prepare("SELECT * FROM fields ORDER BY id")?;
    let fields = stmt
        .query_map([], row_to_field)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(fields)
}

pub fn update_field_soil(
    conn: &Connection,
    id: i64,
    soil: &SoilDescriptor,
    slope_degrees: f64,
    now: DateTime<Utc>,
) -> Result<()> {
    let (soil_kind, soil_type, texture) = soil_columns(soil);
    let changed = conn.execute(
        r#"
        UPDATE fields SET
            soil_kind = ?1, soil_type = ?2, sand_pct = ?3, silt_pct = ?4, clay_pct = ?5,
            slope_degrees = ?6, updated_at = ?7
        WHERE id = ?8
        "#,
        params![
            soil_kind,
            soil_type,
            texture.map(|t| t.sand_pct),
            texture.map(|t| t.silt_pct),
            texture.map(|t| t.clay_pct),
            slope_degrees,
            fmt_ts(now),
            id,
        ],
    )?;
    if changed == 0 {
        return Err(CropSenseError::NotFound(format!("field {}", id)));
    }
    Ok(())
}

fn soil_columns(soil: &SoilDescriptor) -> (&'static str, Option<&'static str>, Option<SoilTexture>) {
    match soil {
        SoilDescriptor::Categorical { soil_type } => ("categorical", Some(soil_type.as_str()), None),
        SoilDescriptor::Texture(texture) => ("texture", None, Some(*texture)),
    }
}

fn row_to_field(row: &Row) -> rusqlite::Result<Field> {
    let soil_kind: String = row.get("soil_kind")?;
    let soil = match soil_kind.as_str() {
        "texture" => SoilDescriptor::Texture(SoilTexture {
            sand_pct: row.get("sand_pct")?,
            silt_pct: row.get("silt_pct")?,
            clay_pct: row.get("clay_pct")?,
        }),
        _ => {
            let soil_type_str: Option<String> = row.get("soil_type")?;
            let soil_type = soil_type_str
                .as_deref()
                .and_then(SoilType::from_str)
                .unwrap_or_else(|| {
                    warn!(
                        soil_type = ?soil_type_str,
                        "Unknown soil_type in database, defaulting to loamy"
                    );
                    SoilType::Loamy
                });
            SoilDescriptor::categorical(soil_type)
        }
    };

    Ok(Field {
        id: Some(row.get("id")?),
        name: row.get("name")?,
        soil,
        slope_degrees: row.get("slope_degrees")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}

// Crop Cycle Queries

pub fn insert_cycle(conn: &Connection, cycle: &CropCycle) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO crop_cycles
            (field_id, crop_name, status, start_date, expected_end_date, actual_end_date,
             initial_n, initial_p, initial_k, current_n, current_p, current_k,
             last_weather_check, version, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
        params![
            cycle.field_id,
            cycle.crop_name,
            cycle.status.as_str(),
            cycle.start_date.map(fmt_ts),
            cycle.expected_end_date.map(fmt_ts),
            cycle.actual_end_date.map(fmt_ts),
            cycle.initial.n,
            cycle.initial.p,
            cycle.initial.k,
            cycle.current.n,
            cycle.current.p,
            cycle.current.k,
            cycle.last_weather_check.map(fmt_ts),
            cycle.version,
            fmt_ts(cycle.created_at),
            fmt_ts(cycle.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_cycle(conn: &Connection, id: i64) -> Result<Option<CropCycle>> {
    conn.query_row("SELECT * FROM crop_cycles WHERE id = ?1", [id], row_to_cycle)
        .optional()
        .map_err(Into::into)
}

pub fn require_cycle(conn: &Connection, id: i64) -> Result<CropCycle> {
    get_cycle(conn, id)?.ok_or_else(|| CropSenseError::NotFound(format!("cycle {}", id)))
}

pub fn find_active_cycle_for_field(conn: &Connection, field_id: i64) -> Result<Option<CropCycle>> {
    conn.query_row(
        "SELECT * FROM crop_cycles WHERE field_id = ?1 AND status = 'active'",
        [field_id],
        row_to_cycle,
    )
    .optional()
    .map_err(Into::into)
}

/// Active cycles, least recently checked first.
pub fn list_active_cycles(conn: &Connection) -> Result<Vec<CropCycle>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM crop_cycles WHERE status = 'active'
         ORDER BY last_weather_check IS NOT NULL, last_weather_check, id",
    )?;
    let cycles = stmt
        .query_map([], row_to_cycle)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cycles)
}

pub fn list_cycles(conn: &Connection, field_id: Option<i64>) -> Result<Vec<CropCycle>> {
    let cycles = match field_id {
        Some(field_id) => {
            let mut stmt =
                conn.prepare("SELECT * FROM crop_cycles WHERE field_id = ?1 ORDER BY id DESC")?;
            let rows = stmt.query_map([field_id], row_to_cycle)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT * FROM crop_cycles ORDER BY id DESC")?;
            let rows = stmt.query_map([], row_to_cycle)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(cycles)
}

/// Writes the whole ledger if nobody else has since `cycle.version`.
/// Bumps `cycle.version` on success.
pub fn update_cycle(conn: &Connection, cycle: &mut CropCycle) -> Result<()> {
    let id = cycle
        .id
        .ok_or_else(|| CropSenseError::Validation("Cycle has no ID".into()))?;
    let final_levels = cycle.final_levels;

    let changed = conn.execute(
        r#"
        UPDATE crop_cycles SET
            status = :status,
            start_date = :start_date,
            expected_end_date = :expected_end_date,
            actual_end_date = :actual_end_date,
            current_n = :current_n, current_p = :current_p, current_k = :current_k,
            final_n = :final_n, final_p = :final_p, final_k = :final_k,
            uptake_n = :uptake_n, uptake_p = :uptake_p, uptake_k = :uptake_k,
            uptake_days_applied = :uptake_days_applied,
            rainfall_loss_n = :loss_n, rainfall_loss_p = :loss_p, rainfall_loss_k = :loss_k,
            fertilizer_n = :fert_n, fertilizer_p = :fert_p, fertilizer_k = :fert_k,
            rainfall_event_count = :rainfall_event_count,
            last_weather_check = :last_weather_check,
            updated_at = :updated_at,
            version = version + 1
        WHERE id = :id AND version = :version
        "#,
        named_params! {
            ":status": cycle.status.as_str(),
            ":start_date": cycle.start_date.map(fmt_ts),
            ":expected_end_date": cycle.expected_end_date.map(fmt_ts),
            ":actual_end_date": cycle.actual_end_date.map(fmt_ts),
            ":current_n": cycle.current.n,
            ":current_p": cycle.current.p,
            ":current_k": cycle.current.k,
            ":final_n": final_levels.map(|l| l.n),
            ":final_p": final_levels.map(|l| l.p),
            ":final_k": final_levels.map(|l| l.k),
            ":uptake_n": cycle.total_crop_uptake.n,
            ":uptake_p": cycle.total_crop_uptake.p,
            ":uptake_k": cycle.total_crop_uptake.k,
            ":uptake_days_applied": cycle.uptake_days_applied,
            ":loss_n": cycle.total_rainfall_loss.n,
            ":loss_p": cycle.total_rainfall_loss.p,
            ":loss_k": cycle.total_rainfall_loss.k,
            ":fert_n": cycle.total_fertilizer.n,
            ":fert_p": cycle.total_fertilizer.p,
            ":fert_k": cycle.total_fertilizer.k,
            ":rainfall_event_count": cycle.rainfall_event_count,
            ":last_weather_check": cycle.last_weather_check.map(fmt_ts),
            ":updated_at": fmt_ts(cycle.updated_at),
            ":id": id,
            ":version": cycle.version,
        },
    )?;

    if changed == 0 {
        return Err(CropSenseError::ConcurrentModification { cycle_id: id });
    }
    cycle.version += 1;
    Ok(())
}

fn row_to_cycle(row: &Row) -> rusqlite::Result<CropCycle> {
    let status_str: String = row.get("status")?;
    let status =
        CycleStatus::from_str(&status_str).ok_or_else(|| invalid_text("status", &status_str))?;

    let final_n: Option<f64> = row.get("final_n")?;
    let final_p: Option<f64> = row.get("final_p")?;
    let final_k: Option<f64> = row.get("final_k")?;
    let final_levels = match (final_n, final_p, final_k) {
        (Some(n), Some(p), Some(k)) => Some(NutrientLevels::new(n, p, k)),
        _ => None,
    };

    Ok(CropCycle {
        id: Some(row.get("id")?),
        field_id: row.get("field_id")?,
        crop_name: row.get("crop_name")?,
        status,
        start_date: opt_ts_column(row, "start_date")?,
        expected_end_date: opt_ts_column(row, "expected_end_date")?,
        actual_end_date: opt_ts_column(row, "actual_end_date")?,
        initial: levels_columns(row, "initial")?,
        current: levels_columns(row, "current")?,
        final_levels,
        total_crop_uptake: levels_columns(row, "uptake")?,
        uptake_days_applied: row.get("uptake_days_applied")?,
        total_rainfall_loss: levels_columns(row, "rainfall_loss")?,
        total_fertilizer: levels_columns(row, "fertilizer")?,
        rainfall_event_count: row.get("rainfall_event_count")?,
        last_weather_check: opt_ts_column(row, "last_weather_check")?,
        version: row.get("version")?,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}

// Rainfall Event Queries

pub fn insert_rainfall_event(conn: &Connection, event: &RainfallEvent) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO rainfall_events
            (cycle_id, event_start, event_end, rainfall_mm, duration_hours, intensity_mm_per_hour,
             before_n, before_p, before_k, loss_n, loss_p, loss_k, after_n, after_p, after_k,
             processed, processed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        "#,
        params![
            event.cycle_id,
            fmt_ts(event.event_start),
            fmt_ts(event.event_end),
            event.rainfall_mm,
            event.duration_hours,
            event.intensity_mm_per_hour,
            event.before.n,
            event.before.p,
            event.before.k,
            event.loss.n,
            event.loss.p,
            event.loss.k,
            event.after.n,
            event.after.p,
            event.after.k,
            event.processed,
            event.processed_at.map(fmt_ts),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_rainfall_event(
    conn: &Connection,
    cycle_id: i64,
    event_start: DateTime<Utc>,
) -> Result<Option<RainfallEvent>> {
    conn.query_row(
        "SELECT * FROM rainfall_events WHERE cycle_id = ?1 AND event_start = ?2",
        params![cycle_id, fmt_ts(event_start)],
        row_to_rainfall_event,
    )
    .optional()
    .map_err(Into::into)
}

pub fn recent_rainfall_events(
    conn: &Connection,
    cycle_id: i64,
    limit: usize,
) -> Result<Vec<RainfallEvent>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM rainfall_events WHERE cycle_id = ?1 ORDER BY event_start DESC LIMIT ?2",
    )?;
    let events = stmt
        .query_map(params![cycle_id, limit as i64], row_to_rainfall_event)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

fn row_to_rainfall_event(row: &Row) -> rusqlite::Result<RainfallEvent> {
    Ok(RainfallEvent {
        id: Some(row.get("id")?),
        cycle_id: row.get("cycle_id")?,
        event_start: ts_column(row, "event_start")?,
        event_end: ts_column(row, "event_end")?,
        rainfall_mm: row.get("rainfall_mm")?,
        duration_hours: row.get("duration_hours")?,
        intensity_mm_per_hour: row.get("intensity_mm_per_hour")?,
        before: levels_columns(row, "before")?,
        loss: levels_columns(row, "loss")?,
        after: levels_columns(row, "after")?,
        processed: row.get("processed")?,
        processed_at: opt_ts_column(row, "processed_at")?,
    })
}

// Recommendation Queries

pub fn insert_recommendation(conn: &Connection, rec: &SoilTestRecommendation) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO soil_test_recommendations
            (cycle_id, reason, level_n, level_p, level_k, message, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            rec.cycle_id,
            rec.reason.as_str(),
            rec.levels.n,
            rec.levels.p,
            rec.levels.k,
            rec.message,
            rec.status.as_str(),
            fmt_ts(rec.created_at),
            fmt_ts(rec.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_recommendation(conn: &Connection, rec: &SoilTestRecommendation) -> Result<()> {
    let id = rec
        .id
        .ok_or_else(|| CropSenseError::Validation("Recommendation has no ID".into()))?;
    conn.execute(
        r#"
        UPDATE soil_test_recommendations SET
            reason = ?1, level_n = ?2, level_p = ?3, level_k = ?4,
            message = ?5, status = ?6, updated_at = ?7
        WHERE id = ?8
        "#,
        params![
            rec.reason.as_str(),
            rec.levels.n,
            rec.levels.p,
            rec.levels.k,
            rec.message,
            rec.status.as_str(),
            fmt_ts(rec.updated_at),
            id,
        ],
    )?;
    Ok(())
}

pub fn get_recommendation(conn: &Connection, id: i64) -> Result<Option<SoilTestRecommendation>> {
    conn.query_row(
        "SELECT * FROM soil_test_recommendations WHERE id = ?1",
        [id],
        row_to_recommendation,
    )
    .optional()
    .map_err(Into::into)
}

pub fn pending_recommendation(
    conn: &Connection,
    cycle_id: i64,
) -> Result<Option<SoilTestRecommendation>> {
    conn.query_row(
        "SELECT * FROM soil_test_recommendations WHERE cycle_id = ?1 AND status = 'pending'",
        [cycle_id],
        row_to_recommendation,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_recommendations(
    conn: &Connection,
    cycle_id: i64,
) -> Result<Vec<SoilTestRecommendation>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM soil_test_recommendations WHERE cycle_id = ?1 ORDER BY id DESC",
    )?;
    let recs = stmt
        .query_map([cycle_id], row_to_recommendation)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(recs)
}

fn row_to_recommendation(row: &Row) -> rusqlite::Result<SoilTestRecommendation> {
    let reason_str: String = row.get("reason")?;
    let status_str: String = row.get("status")?;

    let reason = RecommendationReason::from_str(&reason_str).unwrap_or_else(|| {
        warn!(reason = %reason_str, "Unknown recommendation reason in database");
        RecommendationReason::LowNutrients
    });
    let status = RecommendationStatus::from_str(&status_str)
        .ok_or_else(|| invalid_text("status", &status_str))?;

    Ok(SoilTestRecommendation {
        id: Some(row.get("id")?),
        cycle_id: row.get("cycle_id")?,
        reason,
        levels: levels_columns(row, "level")?,
        message: row.get("message")?,
        status,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}

// Measurement Queries

pub fn insert_measurement(conn: &Connection, m: &NutrientMeasurement) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO nutrient_measurements
            (cycle_id, measurement_type, level_n, level_p, level_k, below_threshold, notes, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            m.cycle_id,
            m.measurement_type.as_str(),
            m.levels.n,
            m.levels.p,
            m.levels.k,
            m.below_threshold,
            m.notes,
            fmt_ts(m.recorded_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn recent_measurements(
    conn: &Connection,
    cycle_id: i64,
    limit: usize,
) -> Result<Vec<NutrientMeasurement>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM nutrient_measurements WHERE cycle_id = ?1
         ORDER BY recorded_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![cycle_id, limit as i64], row_to_measurement)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_measurement(row: &Row) -> rusqlite::Result<NutrientMeasurement> {
    let type_str: String = row.get("measurement_type")?;
    let measurement_type = MeasurementType::from_str(&type_str)
        .ok_or_else(|| invalid_text("measurement_type", &type_str))?;

    Ok(NutrientMeasurement {
        id: Some(row.get("id")?),
        cycle_id: row.get("cycle_id")?,
        measurement_type,
        levels: levels_columns(row, "level")?,
        below_threshold: row.get("below_threshold")?,
        notes: row.get("notes")?,
        recorded_at: ts_column(row, "recorded_at")?,
    })
}

// Read helpers

impl Database {
    pub fn get_field(&self, id: i64) -> Result<Option<Field>> {
        self.with_conn(|conn| get_field(conn, id))
    }

    pub fn list_fields(&self) -> Result<Vec<Field>> {
        self.with_conn(list_fields)
    }

    pub fn get_cycle(&self, id: i64) -> Result<Option<CropCycle>> {
        self.with_conn(|conn| get_cycle(conn, id))
    }

    pub fn list_active_cycles(&self) -> Result<Vec<CropCycle>> {
        self.with_conn(list_active_cycles)
    }

    pub fn list_cycles(&self, field_id: Option<i64>) -> Result<Vec<CropCycle>> {
        self.with_conn(|conn| list_cycles(conn, field_id))
    }

    pub fn list_recommendations(&self, cycle_id: i64) -> Result<Vec<SoilTestRecommendation>> {
        self.with_conn(|conn| list_recommendations(conn, cycle_id))
    }
}

trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seeded() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let field = Field::new(
            "East plot",
            SoilDescriptor::texture(60.0, 30.0, 10.0).unwrap(),
            12.9,
            77.6,
        )
        .with_slope(6.0);
        let field_id = db.with_conn(|conn| insert_field(conn, &field)).unwrap();
        (db, field_id)
    }

    #[test]
    fn field_round_trips_texture() {
        let (db, field_id) = seeded();
        let field = db.get_field(field_id).unwrap().unwrap();
        assert_eq!(field.name, "East plot");
        assert_eq!(field.slope_degrees, 6.0);
        match field.soil {
            SoilDescriptor::Texture(t) => assert_eq!(t.sand_pct, 60.0),
            other => panic!("expected texture, got {:?}", other),
        }
        assert!(db.get_field(field_id + 1).unwrap().is_none());
    }

    #[test]
    fn stale_version_is_rejected() {
        let (db, field_id) = seeded();
        let mut cycle = CropCycle::new(field_id, "rice", NutrientLevels::new(90.0, 42.0, 43.0));
        let id = db.with_conn(|conn| insert_cycle(conn, &cycle)).unwrap();
        cycle.id = Some(id);

        let mut stale = cycle.clone();
        cycle.current.n = 80.0;
        db.with_conn(|conn| update_cycle(conn, &mut cycle)).unwrap();
        assert_eq!(cycle.version, 1);

        stale.current.n = 70.0;
        let err = db
            .with_conn(|conn| update_cycle(conn, &mut stale))
            .unwrap_err();
        assert!(matches!(
            err,
            CropSenseError::ConcurrentModification { cycle_id } if cycle_id == id
        ));

        let stored = db.get_cycle(id).unwrap().unwrap();
        assert_eq!(stored.current.n, 80.0);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn second_active_cycle_violates_index() {
        let (db, field_id) = seeded();
        let mut first = CropCycle::new(field_id, "rice", NutrientLevels::ZERO);
        first.status = CycleStatus::Active;
        let mut second = first.clone();
        second.crop_name = "maize".into();

        db.with_conn(|conn| insert_cycle(conn, &first)).unwrap();
        let err = db.with_conn(|conn| insert_cycle(conn, &second));
        assert!(matches!(err, Err(CropSenseError::Database(_))));
    }

    #[test]
    fn rainfall_event_lookup_uses_exact_start() {
        let (db, field_id) = seeded();
        let cycle = CropCycle::new(field_id, "rice", NutrientLevels::ZERO);
        let cycle_id = db.with_conn(|conn| insert_cycle(conn, &cycle)).unwrap();

        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 30, 0).unwrap();
        let event = RainfallEvent {
            id: None,
            cycle_id,
            event_start: start,
            event_end: start + chrono::Duration::hours(3),
            rainfall_mm: 50.0,
            duration_hours: 3.0,
            intensity_mm_per_hour: 50.0 / 3.0,
            before: NutrientLevels::new(90.0, 42.0, 43.0),
            loss: NutrientLevels::new(17.55, 5.0, 5.0),
            after: NutrientLevels::new(72.45, 37.0, 38.0),
            processed: true,
            processed_at: Some(start),
        };
        db.with_conn(|conn| insert_rainfall_event(conn, &event))
            .unwrap();

        let found = db
            .with_conn(|conn| find_rainfall_event(conn, cycle_id, start))
            .unwrap()
            .unwrap();
        assert!(found.processed);
        assert_eq!(found.event_start, start);

        let missing = db
            .with_conn(|conn| {
                find_rainfall_event(conn, cycle_id, start + chrono::Duration::seconds(1))
            })
            .unwrap();
        assert!(missing.is_none());

        let dup = db.with_conn(|conn| insert_rainfall_event(conn, &event));
        assert!(dup.is_err());
    }

    #[test]
    fn timestamp_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(fmt_ts(a), "2026-01-02T03:04:05.000000Z");
    }
}
