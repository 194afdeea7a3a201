use crate::error::{CropSenseError, Result};
use crate::logic::rindm::RainfallSample;
use crate::models::{NutrientLevels, RecommendationStatus, SoilDescriptor, SoilType};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cropsense",
    version,
    about = "Soil nutrient ledger for crop cycles with rainfall-driven depletion"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override SQLite data directory
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run interactive setup and write config.yaml
    Init,
    /// Validate config and test connections
    Check,
    /// Poll weather for all active cycles
    Run {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// List the crop nutrient reference table
    Crops,
    /// Manage fields
    #[command(subcommand)]
    Field(FieldCommand),
    /// Manage crop cycles
    #[command(subcommand)]
    Cycle(CycleCommand),
    /// Manage soil-test recommendations
    #[command(subcommand)]
    Recommendation(RecommendationCommand),
    /// Compute rainfall-induced nutrient loss without touching the ledger
    Rindm {
        /// Rainfall events as MM or MM@HOURS, applied in order
        #[arg(required = true)]
        events: Vec<String>,
        #[command(flatten)]
        levels: LevelArgs,
        #[command(flatten)]
        soil: SoilArgs,
        /// Field slope in degrees
        #[arg(long, default_value_t = crate::models::DEFAULT_SLOPE_DEGREES)]
        slope: f64,
    },
    /// Project a cycle's nutrient levels after growing another crop for a season
    Project {
        cycle_id: i64,
        /// Crop to plant next
        crop: String,
        /// Rainfall expected over the season (mm)
        #[arg(long, default_value_t = 0.0)]
        rainfall_mm: f64,
    },
}

#[derive(Subcommand)]
pub enum FieldCommand {
    /// Register a field
    Add {
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[command(flatten)]
        soil: SoilArgs,
        /// Slope in degrees
        #[arg(long)]
        slope: Option<f64>,
    },
    List,
    /// Change a field's soil between cycles
    Soil {
        field_id: i64,
        #[command(flatten)]
        soil: SoilArgs,
        #[arg(long)]
        slope: Option<f64>,
    },
}

#[derive(Subcommand)]
pub enum CycleCommand {
    /// Create and start a cycle on a field
    New {
        field_id: i64,
        crop: String,
        #[command(flatten)]
        levels: LevelArgs,
    },
    /// Create a cycle in planning without starting it
    Plan {
        field_id: i64,
        crop: String,
        #[command(flatten)]
        levels: LevelArgs,
    },
    /// Start a planned cycle
    Start { cycle_id: i64 },
    /// Ledger, thresholds and history of a cycle
    Status { cycle_id: i64 },
    /// Harvest: apply remaining uptake and freeze the final levels
    Complete { cycle_id: i64 },
    Abandon { cycle_id: i64 },
    /// Record fertilizer added to the field (kg/ha)
    Fertilize {
        cycle_id: i64,
        #[command(flatten)]
        levels: LevelArgs,
    },
    /// Apply an observed rainfall event
    Rain {
        cycle_id: i64,
        #[arg(long)]
        mm: f64,
        #[arg(long)]
        hours: f64,
        /// Event start (RFC 3339); defaults to now minus `hours`
        #[arg(long)]
        start: Option<String>,
    },
    /// Apply crop uptake for a number of days of growth
    Uptake { cycle_id: i64, days: f64 },
    List {
        #[arg(long)]
        field: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum RecommendationCommand {
    List { cycle_id: i64 },
    Ack { recommendation_id: i64 },
    Done { recommendation_id: i64 },
    Ignore { recommendation_id: i64 },
}

impl RecommendationCommand {
    pub fn target(&self) -> Option<(i64, RecommendationStatus)> {
        match self {
            RecommendationCommand::List { .. } => None,
            RecommendationCommand::Ack { recommendation_id } => {
                Some((*recommendation_id, RecommendationStatus::Acknowledged))
            }
            RecommendationCommand::Done { recommendation_id } => {
                Some((*recommendation_id, RecommendationStatus::Completed))
            }
            RecommendationCommand::Ignore { recommendation_id } => {
                Some((*recommendation_id, RecommendationStatus::Ignored))
            }
        }
    }
}

/// Nitrogen, phosphorus and potassium in kg/ha.
#[derive(Args, Debug, Clone, Copy)]
pub struct LevelArgs {
    #[arg(short = 'N', long = "nitrogen")]
    pub n: f64,
    #[arg(short = 'P', long = "phosphorus")]
    pub p: f64,
    #[arg(short = 'K', long = "potassium")]
    pub k: f64,
}

impl LevelArgs {
    pub fn levels(&self) -> NutrientLevels {
        NutrientLevels::new(self.n, self.p, self.k)
    }
}

/// Either `--soil <category>` or all of `--sand --silt --clay`.
#[derive(Args, Debug, Clone)]
pub struct SoilArgs {
    /// sandy, loamy or clay
    #[arg(long, conflicts_with_all = ["sand", "silt", "clay"])]
    pub soil: Option<String>,
    #[arg(long, requires_all = ["silt", "clay"])]
    pub sand: Option<f64>,
    #[arg(long, requires_all = ["sand", "clay"])]
    pub silt: Option<f64>,
    #[arg(long, requires_all = ["sand", "silt"])]
    pub clay: Option<f64>,
}

impl SoilArgs {
    pub fn descriptor(&self) -> Result<SoilDescriptor> {
        match (&self.soil, self.sand, self.silt, self.clay) {
            (Some(name), _, _, _) => SoilType::from_str(name)
                .map(SoilDescriptor::categorical)
                .ok_or_else(|| {
                    CropSenseError::Validation(format!(
                        "Unknown soil type '{}', expected sandy, loamy or clay",
                        name
                    ))
                }),
            (None, Some(sand), Some(silt), Some(clay)) => SoilDescriptor::texture(sand, silt, clay),
            _ => Err(CropSenseError::Validation(
                "Give either --soil or all of --sand, --silt and --clay".into(),
            )),
        }
    }
}

/// `50` or `50@3`: millimetres, optionally with hours.
pub fn parse_rain_event(s: &str) -> Result<RainfallSample> {
    let invalid = || CropSenseError::Validation(format!("Invalid rainfall event '{}'", s));
    let (mm, hours) = match s.split_once('@') {
        Some((mm, hours)) => (mm, Some(hours)),
        None => (s, None),
    };
    let rainfall_mm = mm.trim().parse::<f64>().map_err(|_| invalid())?;
    let duration_hours = hours
        .map(|h| h.trim().parse::<f64>().map_err(|_| invalid()))
        .transpose()?;
    Ok(RainfallSample::new(rainfall_mm, duration_hours))
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CropSenseError::Validation(format!("Invalid timestamp '{}': {}", s, e)))
}
