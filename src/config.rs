use crate::error::{CropSenseError, Result};
use crate::logic::thresholds::ThresholdConfig;
use dialoguer::{Confirm, Input, Password};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub openweathermap: Option<OpenWeatherMapConfig>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: f64,
    /// Used when the provider reports rain without a duration.
    #[serde(default = "default_duration_hours")]
    pub default_duration_hours: f64,
    #[serde(default = "default_enabled")]
    pub auto_complete: bool,
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_worker_count() -> usize {
    4
}

fn default_fetch_timeout_secs() -> f64 {
    10.0
}

fn default_duration_hours() -> f64 {
    2.0
}

fn default_enabled() -> bool {
    true
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            worker_count: default_worker_count(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            default_duration_hours: default_duration_hours(),
            auto_complete: default_enabled(),
        }
    }
}

impl PollerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.fetch_timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_fetch_timeout_secs()))
    }

    fn validate(&self) -> Result<()> {
        if self.interval_minutes == 0 {
            return Err(CropSenseError::Config(
                "poller.interval_minutes must be at least 1".into(),
            ));
        }
        if self.worker_count == 0 {
            return Err(CropSenseError::Config(
                "poller.worker_count must be at least 1".into(),
            ));
        }
        if !self.fetch_timeout_secs.is_finite() || self.fetch_timeout_secs <= 0.0 {
            return Err(CropSenseError::Config(format!(
                "poller.fetch_timeout_secs must be positive, got {}",
                self.fetch_timeout_secs
            )));
        }
        if !self.default_duration_hours.is_finite() || self.default_duration_hours <= 0.0 {
            return Err(CropSenseError::Config(format!(
                "poller.default_duration_hours must be positive, got {}",
                self.default_duration_hours
            )));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct OpenWeatherMapConfig {
    pub api_key: String,
    #[serde(default = "default_owm_base_url")]
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_owm_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".into()
}

impl std::fmt::Debug for OpenWeatherMapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherMapConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl OpenWeatherMapConfig {
    /// Enabled with a key that survived `${VAR}` substitution.
    pub fn is_usable(&self) -> bool {
        let key = self.api_key.trim();
        self.enabled && !key.is_empty() && !key.contains("${")
    }
}

impl Config {
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let explicit = config_override.is_some();
        let config_path = match config_override {
            Some(p) => p,
            None => Self::find_config_path()?,
        };

        if !config_path.exists() {
            if explicit {
                return Err(CropSenseError::Config(format!(
                    "Config file not found at {:?}. Run `cropsense init` to set up.",
                    config_path
                )));
            }
            tracing::info!(path = ?config_path, "No config file found, using defaults");
            return Ok(Self::default());
        }

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| CropSenseError::Config(format!("Failed to read config: {}", e)))?;

        let config = Self::parse(&config_str)?;
        tracing::debug!(path = ?config_path, "Configuration loaded");
        Ok(config)
    }

    /// Parses YAML after `${VAR}` substitution and validates the result.
    pub fn parse(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| CropSenseError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.poller.validate()?;
        self.thresholds.validate()?;
        if let Some(owm) = &self.openweathermap {
            if owm.base_url.trim().is_empty() {
                return Err(CropSenseError::Config(
                    "openweathermap.base_url must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn weather_config(&self) -> Option<&OpenWeatherMapConfig> {
        self.openweathermap.as_ref().filter(|c| c.is_usable())
    }

    /// Search for config.yaml in standard locations.
    /// Returns the path of the first found config, or the XDG default path if none found.
    fn find_config_path() -> Result<PathBuf> {
        let local_config = PathBuf::from("config/config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let default_path = Self::default_config_path()?;
        Ok(default_path)
    }

    /// Returns true if a config file can be found in any standard location.
    pub fn exists(config_override: Option<&PathBuf>) -> bool {
        match config_override {
            Some(p) => p.exists(),
            None => Self::find_config_path()
                .map(|p| p.exists())
                .unwrap_or(false),
        }
    }

    /// Default path for writing new config files (~/.config/cropsense/config.yaml).
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CropSenseError::Config("Cannot determine config directory".into()))?
            .join("cropsense");
        Ok(config_dir.join("config.yaml"))
    }

    /// Run interactive setup prompts and write config to `target` (or the default path).
    /// Returns the config and the path it was written to.
    pub fn setup_interactive(target: Option<PathBuf>) -> Result<(Self, PathBuf)> {
        println!();
        println!("Let's set up CropSense!");
        println!();

        println!("Weather (OpenWeatherMap)");
        println!("  Leave the key empty to configure it later via ${{OWM_API_KEY}}.");
        let api_key: String = Password::new()
            .with_prompt("  API key")
            .allow_empty_password(true)
            .interact()
            .map_err(|e| CropSenseError::Config(format!("Input error: {}", e)))?;
        let api_key = if api_key.is_empty() {
            "${OWM_API_KEY}".to_string()
        } else {
            api_key
        };

        println!();
        println!("Poller");
        let interval_minutes: u64 = Input::new()
            .with_prompt("  Minutes between weather checks")
            .default(default_interval_minutes())
            .interact_text()
            .map_err(|e| CropSenseError::Config(format!("Input error: {}", e)))?;

        let worker_count: usize = Input::new()
            .with_prompt("  Concurrent weather requests")
            .default(default_worker_count())
            .interact_text()
            .map_err(|e| CropSenseError::Config(format!("Input error: {}", e)))?;

        let auto_complete = Confirm::new()
            .with_prompt("  Complete cycles automatically when they reach maturity?")
            .default(true)
            .interact()
            .map_err(|e| CropSenseError::Config(format!("Input error: {}", e)))?;

        println!();

        let config = Config {
            poller: PollerConfig {
                interval_minutes,
                worker_count,
                auto_complete,
                ..PollerConfig::default()
            },
            openweathermap: Some(OpenWeatherMapConfig {
                api_key,
                base_url: default_owm_base_url(),
                enabled: true,
            }),
            thresholds: ThresholdConfig::default(),
        };
        config.validate()?;

        let config_path = match target {
            Some(p) => p,
            None => Self::default_config_path()?,
        };
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(&config)
            .map_err(|e| CropSenseError::Config(format!("Failed to serialize config: {}", e)))?;

        let content = format!(
            "# CropSense Configuration\n# Generated by `cropsense init`\n# Environment variable substitution (${{VAR}}) is supported.\n\n{}",
            yaml
        );
        std::fs::write(&config_path, content)?;

        println!("Configuration saved to {}", config_path.display());
        println!();

        Ok((config, config_path))
    }

    /// Replaces `${VAR_NAME}` with the variable's value; unset variables stay as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| CropSenseError::Config(format!("Invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        });
        Ok(result.into_owned())
    }

    pub fn data_dir(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = data_dir_override {
            std::fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        if let Ok(dir) = std::env::var("CROPSENSE_DATA_DIR") {
            let p = PathBuf::from(dir);
            std::fs::create_dir_all(&p)?;
            return Ok(p);
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| CropSenseError::Config("Cannot determine data directory".into()))?
            .join("cropsense");

        std::fs::create_dir_all(&data_dir)?;
        Ok(data_dir)
    }

    pub fn db_path(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        Ok(Self::data_dir(data_dir_override)?.join("cropsense.db"))
    }
}
