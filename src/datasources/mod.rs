pub mod crop_reference;
pub mod openweathermap;

pub use crop_reference::{CropReference, StaticCropTable};
pub use openweathermap::OpenWeatherMapClient;

use crate::error::Result;
use crate::models::WeatherObservation;
use chrono::{DateTime, Utc};

/// Point weather for a coordinate over `(since, until]`.
#[async_trait::async_trait]
pub trait WeatherProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_weather(
        &self,
        latitude: f64,
        longitude: f64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<WeatherObservation>;
}
