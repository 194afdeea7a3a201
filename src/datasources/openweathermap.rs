use super::WeatherProvider;
use crate::config::OpenWeatherMapConfig;
use crate::error::{CropSenseError, Result};
use crate::models::WeatherObservation;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub struct OpenWeatherMapClient {
    client: reqwest::Client,
    config: OpenWeatherMapConfig,
}

// OpenWeatherMap current-weather response structures
#[derive(Debug, Deserialize)]
struct OwmCurrentResponse {
    dt: i64,
    main: OwmMain,
    #[serde(default)]
    rain: Option<OwmRain>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwmRain {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
    #[serde(rename = "3h", default)]
    three_hour: Option<f64>,
}

impl OpenWeatherMapClient {
    pub fn new(config: OpenWeatherMapConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn current_url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}/weather?lat={}&lon={}&appid={}&units=metric",
            self.config.base_url.trim_end_matches('/'),
            latitude,
            longitude,
            self.config.api_key
        )
    }

    async fn fetch_current(&self, latitude: f64, longitude: f64) -> Result<OwmCurrentResponse> {
        let url = self.current_url(latitude, longitude);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CropSenseError::DataSourceUnavailable(format!(
                "OpenWeatherMap returned {}: {}",
                status, body
            )));
        }

        parse_current(&response.text().await?)
    }

    /// Test connection to OpenWeatherMap API
    pub async fn test_connection(&self) -> Result<bool> {
        let url = self.current_url(0.0, 0.0);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

fn parse_current(body: &str) -> Result<OwmCurrentResponse> {
    Ok(serde_json::from_str(body)?)
}

/// Current weather only reports trailing 1h and 3h rain totals, so the
/// amount for `(since, until]` is prorated from them assuming uniform rain
/// within each bucket. Up to 1h takes a share of the 1h total; 1h to 3h adds
/// a share of the 2h between the buckets; longer windows get the whole 3h.
fn to_observation(response: OwmCurrentResponse, window_hours: f64) -> WeatherObservation {
    let timestamp = DateTime::from_timestamp(response.dt, 0).unwrap_or_else(Utc::now);
    let window = window_hours.max(0.0);

    let (rainfall_mm, rain_duration_hours) = match response.rain {
        Some(OwmRain {
            one_hour,
            three_hour,
        }) => match (one_hour, three_hour) {
            (Some(hour), _) if window <= 1.0 => (hour * window, Some(window)),
            (Some(hour), Some(three)) => {
                let extra = (window.min(3.0) - 1.0) / 2.0;
                (hour + (three - hour).max(0.0) * extra, None)
            }
            (Some(hour), None) => (hour, Some(1.0)),
            (None, Some(three)) => (three * window.min(3.0) / 3.0, None),
            (None, None) => (0.0, None),
        },
        None => (0.0, None),
    };

    WeatherObservation {
        rainfall_mm: rainfall_mm.max(0.0),
        rain_duration_hours,
        temperature_c: Some(response.main.temp),
        humidity_percent: Some(response.main.humidity),
        timestamp,
    }
}

#[async_trait::async_trait]
impl WeatherProvider for OpenWeatherMapClient {
    fn name(&self) -> &str {
        "openweathermap"
    }

    async fn get_weather(
        &self,
        latitude: f64,
        longitude: f64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<WeatherObservation> {
        let response = self.fetch_current(latitude, longitude).await?;
        let window_hours = (until - since).num_seconds().max(0) as f64 / 3600.0;
        Ok(to_observation(response, window_hours))
    }
}
