use crate::db::Database;
use crate::error::Result;

const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE IF NOT EXISTS fields (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        soil_kind TEXT NOT NULL CHECK (soil_kind IN ('categorical', 'texture')),
        soil_type TEXT,
        sand_pct REAL,
        silt_pct REAL,
        clay_pct REAL,
        slope_degrees REAL NOT NULL DEFAULT 3.0,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS crop_cycles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        field_id INTEGER NOT NULL REFERENCES fields(id) ON DELETE CASCADE,
        crop_name TEXT NOT NULL,
        status TEXT NOT NULL,
        start_date TEXT,
        expected_end_date TEXT,
        actual_end_date TEXT,
        initial_n REAL NOT NULL,
        initial_p REAL NOT NULL,
        initial_k REAL NOT NULL,
        current_n REAL NOT NULL CHECK (current_n >= 0),
        current_p REAL NOT NULL CHECK (current_p >= 0),
        current_k REAL NOT NULL CHECK (current_k >= 0),
        final_n REAL,
        final_p REAL,
        final_k REAL,
        uptake_n REAL NOT NULL DEFAULT 0,
        uptake_p REAL NOT NULL DEFAULT 0,
        uptake_k REAL NOT NULL DEFAULT 0,
        uptake_days_applied REAL NOT NULL DEFAULT 0,
        rainfall_loss_n REAL NOT NULL DEFAULT 0,
        rainfall_loss_p REAL NOT NULL DEFAULT 0,
        rainfall_loss_k REAL NOT NULL DEFAULT 0,
        fertilizer_n REAL NOT NULL DEFAULT 0,
        fertilizer_p REAL NOT NULL DEFAULT 0,
        fertilizer_k REAL NOT NULL DEFAULT 0,
        rainfall_event_count INTEGER NOT NULL DEFAULT 0,
        last_weather_check TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rainfall_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cycle_id INTEGER NOT NULL REFERENCES crop_cycles(id) ON DELETE CASCADE,
        event_start TEXT NOT NULL,
        event_end TEXT NOT NULL,
        rainfall_mm REAL NOT NULL,
        duration_hours REAL NOT NULL,
        intensity_mm_per_hour REAL NOT NULL,
        before_n REAL NOT NULL,
        before_p REAL NOT NULL,
        before_k REAL NOT NULL,
        loss_n REAL NOT NULL,
        loss_p REAL NOT NULL,
        loss_k REAL NOT NULL,
        after_n REAL NOT NULL,
        after_p REAL NOT NULL,
        after_k REAL NOT NULL,
        processed INTEGER NOT NULL DEFAULT 0,
        processed_at TEXT,
        UNIQUE(cycle_id, event_start)
    );

    CREATE TABLE IF NOT EXISTS soil_test_recommendations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cycle_id INTEGER NOT NULL REFERENCES crop_cycles(id) ON DELETE CASCADE,
        reason TEXT NOT NULL,
        level_n REAL NOT NULL,
        level_p REAL NOT NULL,
        level_k REAL NOT NULL,
        message TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS nutrient_measurements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cycle_id INTEGER NOT NULL REFERENCES crop_cycles(id) ON DELETE CASCADE,
        measurement_type TEXT NOT NULL,
        level_n REAL NOT NULL,
        level_p REAL NOT NULL,
        level_k REAL NOT NULL,
        below_threshold INTEGER NOT NULL DEFAULT 0,
        notes TEXT,
        recorded_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    // Migration 2: Add indexes
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_crop_cycles_one_active_per_field
        ON crop_cycles(field_id) WHERE status = 'active';
    CREATE INDEX IF NOT EXISTS idx_crop_cycles_status
        ON crop_cycles(status, last_weather_check);
    CREATE INDEX IF NOT EXISTS idx_rainfall_events_cycle_id
        ON rainfall_events(cycle_id, event_start);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_recommendations_one_pending_per_cycle
        ON soil_test_recommendations(cycle_id) WHERE status = 'pending';
    CREATE INDEX IF NOT EXISTS idx_measurements_cycle_id
        ON nutrient_measurements(cycle_id, recorded_at);
    "#,
];

pub fn run(db: &Database) -> Result<()> {
    db.with_conn_mut(|conn| {
        // Ensure schema_migrations table exists
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                tracing::info!(version, "Applying migration");
                let tx = conn.transaction()?;
                tx.execute_batch(migration)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version) VALUES (?1)",
                    [version],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    })
}
