mod cli;
mod clock;
mod config;
mod datasources;
mod db;
mod error;
mod logic;
mod models;

use anyhow::Context;
use chrono::Duration;
use clap::Parser;
use cli::{Cli, Commands, CycleCommand, FieldCommand, RecommendationCommand};
use clock::{Clock, SystemClock};
use config::Config;
use datasources::{CropReference, OpenWeatherMapClient, StaticCropTable};
use db::Database;
use logic::{projection, rindm, CycleManager, WeatherPoller};
use models::{Field, RainfallInput};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Init = cli.command {
        if Config::exists(cli.config.as_ref()) {
            eprintln!("Existing configuration will be overwritten.");
        }
        let (_, path) = Config::setup_interactive(cli.config.clone())?;
        tracing::info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    let config = Config::load(cli.config.clone()).context("Failed to load configuration")?;
    let db_path = Config::db_path(cli.data_dir.as_ref())?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let crops: Arc<dyn CropReference> = Arc::new(StaticCropTable);
    let manager = Arc::new(CycleManager::new(
        db,
        Arc::clone(&crops),
        config.thresholds.clone(),
        Arc::clone(&clock),
    ));

    match cli.command {
        Commands::Init => {}
        Commands::Check => check(&config, &manager, &db_path).await?,
        Commands::Run { once } => {
            let owm = config
                .weather_config()
                .context("OpenWeatherMap is not configured; set openweathermap.api_key")?;
            let provider = Arc::new(OpenWeatherMapClient::new(owm.clone()));
            let poller = WeatherPoller::new(
                Arc::clone(&manager),
                provider,
                clock,
                config.poller.clone(),
            );

            if once {
                print_json(&poller.tick().await?)?;
            } else {
                poller
                    .run(async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::error!(error = %e, "Failed to listen for shutdown signal");
                        }
                    })
                    .await?;
            }
        }
        Commands::Crops => print_json(&crops.all())?,
        Commands::Field(command) => field_command(&manager, command)?,
        Commands::Cycle(command) => cycle_command(&manager, clock.as_ref(), command)?,
        Commands::Recommendation(RecommendationCommand::List { cycle_id }) => {
            print_json(&manager.list_recommendations(cycle_id)?)?
        }
        Commands::Recommendation(command) => {
            if let Some((id, status)) = command.target() {
                print_json(&manager.update_recommendation_status(id, status)?)?;
            }
        }
        Commands::Rindm {
            events,
            levels,
            soil,
            slope,
        } => {
            let samples = events
                .iter()
                .map(|e| cli::parse_rain_event(e))
                .collect::<error::Result<Vec<_>>>()?;
            let result =
                rindm::compute_cumulative_loss(&samples, levels.levels(), &soil.descriptor()?, slope)?;
            print_json(&result)?;
        }
        Commands::Project {
            cycle_id,
            crop,
            rainfall_mm,
        } => {
            let status = manager.get_cycle_status(cycle_id)?;
            let next_crop = crops.lookup(&crop)?;
            let projection = projection::project_season(
                status.cycle.current,
                &next_crop,
                rainfall_mm,
                &status.field.soil,
                status.field.slope_degrees,
                &manager.thresholds_for(&next_crop.crop_name),
            )?;
            print_json(&projection)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct CheckReport {
    database: String,
    fields: usize,
    active_cycles: usize,
    openweathermap: &'static str,
    crops_loaded: usize,
}

async fn check(
    config: &Config,
    manager: &CycleManager,
    db_path: &std::path::Path,
) -> anyhow::Result<()> {
    let openweathermap = match config.weather_config() {
        None => "not configured",
        Some(owm) => match OpenWeatherMapClient::new(owm.clone()).test_connection().await {
            Ok(true) => "ok",
            Ok(false) => "rejected",
            Err(e) => {
                tracing::warn!(error = %e, "OpenWeatherMap unreachable");
                "offline"
            }
        },
    };

    print_json(&CheckReport {
        database: db_path.display().to_string(),
        fields: manager.list_fields()?.len(),
        active_cycles: manager.list_active_cycles()?.len(),
        openweathermap,
        crops_loaded: manager.crops().all().len(),
    })
}

fn field_command(manager: &CycleManager, command: FieldCommand) -> anyhow::Result<()> {
    match command {
        FieldCommand::Add {
            name,
            lat,
            lon,
            soil,
            slope,
        } => {
            let mut field = Field::new(name, soil.descriptor()?, lat, lon);
            if let Some(slope) = slope {
                field = field.with_slope(slope);
            }
            print_json(&manager.create_field(field)?)
        }
        FieldCommand::List => print_json(&manager.list_fields()?),
        FieldCommand::Soil {
            field_id,
            soil,
            slope,
        } => print_json(&manager.update_field_soil(field_id, soil.descriptor()?, slope)?),
    }
}

fn cycle_command(
    manager: &CycleManager,
    clock: &dyn Clock,
    command: CycleCommand,
) -> anyhow::Result<()> {
    match command {
        CycleCommand::New {
            field_id,
            crop,
            levels,
        } => print_json(&manager.start_new_cycle(field_id, &crop, levels.levels())?),
        CycleCommand::Plan {
            field_id,
            crop,
            levels,
        } => print_json(&manager.create_cycle(field_id, &crop, levels.levels())?),
        CycleCommand::Start { cycle_id } => print_json(&manager.start_cycle(cycle_id)?),
        CycleCommand::Status { cycle_id } => print_json(&manager.get_cycle_status(cycle_id)?),
        CycleCommand::Complete { cycle_id } => print_json(&manager.complete_cycle(cycle_id)?),
        CycleCommand::Abandon { cycle_id } => print_json(&manager.abandon_cycle(cycle_id)?),
        CycleCommand::Fertilize { cycle_id, levels } => {
            print_json(&manager.apply_fertilizer(cycle_id, levels.levels())?)
        }
        CycleCommand::Rain {
            cycle_id,
            mm,
            hours,
            start,
        } => {
            let span = Duration::milliseconds((hours.max(0.0) * 3_600_000.0) as i64);
            let start = match start {
                Some(s) => cli::parse_timestamp(&s)?,
                None => clock.now() - span,
            };
            let input = RainfallInput::new(start, start + span, mm, hours);
            print_json(&manager.apply_rainfall(cycle_id, &input)?)
        }
        CycleCommand::Uptake { cycle_id, days } => {
            print_json(&manager.apply_crop_uptake(cycle_id, days)?)
        }
        CycleCommand::List { field } => print_json(&manager.list_cycles(field)?),
    }
}
