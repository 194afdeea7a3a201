pub mod cycle_manager;
pub mod poller;
pub mod projection;
pub mod rindm;
pub mod thresholds;

pub use cycle_manager::CycleManager;
pub use poller::WeatherPoller;
