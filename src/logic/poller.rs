use super::cycle_manager::CycleManager;
use crate::clock::Clock;
use crate::config::PollerConfig;
use crate::datasources::WeatherProvider;
use crate::error::{CropSenseError, Result};
use crate::models::{CropCycle, RainfallInput, RainfallOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub cycles_checked: usize,
    pub windows_skipped: usize,
    pub rainfall_events_applied: usize,
    pub duplicates_skipped: usize,
    pub failures: usize,
    pub warnings_issued: usize,
    pub cycles_completed: usize,
    pub duration_ms: u64,
}

impl TickSummary {
    fn record(&mut self, poll: &CyclePoll) {
        self.windows_skipped += poll.window_skipped as usize;
        self.rainfall_events_applied += poll.rainfall_applied as usize;
        self.duplicates_skipped += poll.duplicate as usize;
        self.warnings_issued += poll.warnings_issued;
        self.cycles_completed += poll.completed as usize;
    }
}

#[derive(Debug, Default)]
struct CyclePoll {
    window_skipped: bool,
    rainfall_applied: bool,
    duplicate: bool,
    warnings_issued: usize,
    completed: bool,
}

/// Pulls weather for every active cycle and feeds it into the ledger.
pub struct WeatherPoller {
    manager: Arc<CycleManager>,
    provider: Arc<dyn WeatherProvider>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
}

impl WeatherPoller {
    pub fn new(
        manager: Arc<CycleManager>,
        provider: Arc<dyn WeatherProvider>,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            manager,
            provider,
            clock,
            config,
        }
    }

    /// Ticks immediately, then every `interval_minutes` until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let period = Duration::from_secs(self.config.interval_minutes.max(1) * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            provider = self.provider.name(),
            interval_minutes = self.config.interval_minutes,
            workers = self.config.worker_count,
            auto_complete = self.config.auto_complete,
            "Weather poller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) => info!(
                            cycles = summary.cycles_checked,
                            rainfall_events = summary.rainfall_events_applied,
                            failures = summary.failures,
                            warnings = summary.warnings_issued,
                            completed = summary.cycles_completed,
                            duration_ms = summary.duration_ms,
                            "Poll tick finished"
                        ),
                        Err(e) => error!(error = %e, "Poll tick failed"),
                    }
                }
                _ = &mut shutdown => {
                    info!("Weather poller shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One pass over all active cycles. Per-cycle failures are counted, not raised.
    pub async fn tick(&self) -> Result<TickSummary> {
        let started = Instant::now();
        let now = self.clock.now();
        let cycles = self.manager.list_active_cycles()?;

        let mut summary = TickSummary {
            cycles_checked: cycles.len(),
            ..Default::default()
        };
        debug!(cycles = cycles.len(), "Poll tick starting");

        let semaphore = Arc::new(Semaphore::new(self.config.worker_count.max(1)));
        let fetch_timeout = self.config.fetch_timeout();
        let mut tasks = JoinSet::new();

        for cycle in cycles {
            let semaphore = Arc::clone(&semaphore);
            let manager = Arc::clone(&self.manager);
            let provider = Arc::clone(&self.provider);
            let config = self.config.clone();

            tasks.spawn(async move {
                let cycle_id = cycle.id();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        poll_cycle(&manager, provider.as_ref(), &config, fetch_timeout, cycle, now)
                            .await
                    }
                    Err(e) => Err(CropSenseError::DataSourceUnavailable(format!(
                        "worker pool closed: {}",
                        e
                    ))),
                };
                (cycle_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(poll))) => summary.record(&poll),
                Ok((cycle_id, Err(e))) => {
                    summary.failures += 1;
                    if e.is_transient() {
                        warn!(cycle_id, error = %e, "Weather poll failed, will retry next tick");
                    } else if e.is_conflict() {
                        info!(cycle_id, error = %e, "Cycle changed state during poll");
                    } else {
                        error!(cycle_id, error = %e, "Weather poll failed");
                    }
                }
                Err(e) => {
                    summary.failures += 1;
                    error!(error = %e, "Weather poll task aborted");
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }
}

async fn poll_cycle(
    manager: &CycleManager,
    provider: &dyn WeatherProvider,
    config: &PollerConfig,
    fetch_timeout: Duration,
    cycle: CropCycle,
    now: DateTime<Utc>,
) -> Result<CyclePoll> {
    let cycle_id = cycle.id();
    let mut poll = CyclePoll::default();
    let since = cycle.last_weather_check.or(cycle.start_date).unwrap_or(now);

    if now > since {
        let field = manager.get_field(cycle.field_id)?;
        let observation = tokio::time::timeout(
            fetch_timeout,
            provider.get_weather(field.latitude, field.longitude, since, now),
        )
        .await
        .map_err(|_| {
            CropSenseError::Timeout(format!(
                "{} did not answer within {:?} for cycle {}",
                provider.name(),
                fetch_timeout,
                cycle_id
            ))
        })??;

        if observation.has_rain() {
            let window_hours = (now - since)
                .to_std()
                .map(|d| d.as_secs_f64() / 3600.0)
                .unwrap_or(0.0);
            let duration_hours = observation
                .rain_duration_hours
                .filter(|h| h.is_finite() && *h > 0.0)
                .unwrap_or(config.default_duration_hours)
                .min(window_hours);
            let input = RainfallInput::new(since, now, observation.rainfall_mm, duration_hours);

            match manager.apply_rainfall(cycle_id, &input)? {
                RainfallOutcome::Applied { warning_issued, .. } => {
                    poll.rainfall_applied = true;
                    poll.warnings_issued += warning_issued as usize;
                }
                RainfallOutcome::AlreadyProcessed { event_id } => {
                    debug!(cycle_id, event_id, "Window already applied");
                    poll.duplicate = true;
                    manager.advance_watermark(cycle_id, now)?;
                }
            }
        } else {
            manager.advance_watermark(cycle_id, now)?;
        }
    } else {
        poll.window_skipped = true;
    }

    let uptake = manager.accrue_uptake(cycle_id, now)?;
    poll.warnings_issued += uptake.warning_issued as usize;

    if config.auto_complete && uptake.cycle.is_mature(now) {
        let report = manager.complete_cycle(cycle_id)?;
        info!(
            cycle_id,
            crop = %report.crop_name,
            final_levels = %report.final_levels,
            below_threshold = report.below_threshold,
            "Mature cycle completed"
        );
        poll.completed = true;
    }

    Ok(poll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::datasources::StaticCropTable;
    use crate::db::Database;
    use crate::logic::thresholds::ThresholdConfig;
    use crate::models::{
        CycleStatus, Field, NutrientLevels, SoilDescriptor, SoilType, WeatherObservation,
    };
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;

    /// Rain at every coordinate except `failing_latitude`.
    struct ScriptedProvider {
        rainfall_mm: f64,
        duration_hours: Option<f64>,
        failing_latitude: Option<f64>,
        calls: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl ScriptedProvider {
        fn raining(rainfall_mm: f64, duration_hours: Option<f64>) -> Self {
            Self {
                rainfall_mm,
                duration_hours,
                failing_latitude: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl WeatherProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn get_weather(
            &self,
            latitude: f64,
            _longitude: f64,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<WeatherObservation> {
            self.calls.lock().unwrap().push((since, until));
            if self.failing_latitude == Some(latitude) {
                return Err(CropSenseError::DataSourceUnavailable("scripted outage".into()));
            }
            Ok(WeatherObservation::dry(until).with_rain(self.rainfall_mm, self.duration_hours))
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl WeatherProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn get_weather(
            &self,
            _latitude: f64,
            _longitude: f64,
            _since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<WeatherObservation> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(WeatherObservation::dry(until))
        }
    }

    struct Setup {
        manager: Arc<CycleManager>,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        ));
        let manager = Arc::new(CycleManager::new(
            Database::open_in_memory().unwrap(),
            Arc::new(StaticCropTable),
            ThresholdConfig::default(),
            clock.clone(),
        ));
        Setup { manager, clock }
    }

    fn active_cycle(setup: &Setup, name: &str, latitude: f64) -> i64 {
        let field = setup
            .manager
            .create_field(Field::new(
                name,
                SoilDescriptor::categorical(SoilType::Loamy),
                latitude,
                77.6,
            ))
            .unwrap();
        setup
            .manager
            .start_new_cycle(
                field.id.unwrap(),
                "rice",
                NutrientLevels::new(200.0, 60.0, 300.0),
            )
            .unwrap()
            .id()
    }

    fn config() -> PollerConfig {
        PollerConfig {
            fetch_timeout_secs: 0.2,
            ..PollerConfig::default()
        }
    }

    fn poller(setup: &Setup, provider: Arc<dyn WeatherProvider>) -> WeatherPoller {
        WeatherPoller::new(
            Arc::clone(&setup.manager),
            provider,
            setup.clock.clone(),
            config(),
        )
    }

    #[tokio::test]
    async fn rain_is_applied_and_watermark_advances() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        let t0 = s.clock.now();
        s.clock.advance(ChronoDuration::hours(3));

        let provider = Arc::new(ScriptedProvider::raining(12.0, None));
        let summary = poller(&s, provider.clone()).tick().await.unwrap();
        assert_eq!(summary.cycles_checked, 1);
        assert_eq!(summary.rainfall_events_applied, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(provider.calls(), vec![(t0, t0 + ChronoDuration::hours(3))]);

        let report = s.manager.get_cycle_status(cycle_id).unwrap();
        assert_eq!(report.cycle.last_weather_check, Some(s.clock.now()));
        let event = &report.recent_rainfall[0];
        assert_eq!(event.event_start, t0);
        assert_eq!(event.duration_hours, 2.0);
        assert!(event.loss.n > 0.0);
    }

    #[tokio::test]
    async fn reported_duration_is_capped_at_window() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        s.clock.advance(ChronoDuration::minutes(30));

        let provider = Arc::new(ScriptedProvider::raining(8.0, Some(3.0)));
        poller(&s, provider).tick().await.unwrap();

        let report = s.manager.get_cycle_status(cycle_id).unwrap();
        assert!((report.recent_rainfall[0].duration_hours - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_watermark() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        let t0 = s.clock.now();
        s.clock.advance(ChronoDuration::hours(2));

        let provider = Arc::new(ScriptedProvider {
            failing_latitude: Some(12.9),
            ..ScriptedProvider::raining(10.0, None)
        });
        let summary = poller(&s, provider).tick().await.unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.rainfall_events_applied, 0);
        let cycle = s.manager.get_cycle(cycle_id).unwrap();
        assert_eq!(cycle.last_weather_check, Some(t0));
        assert_eq!(cycle.rainfall_event_count, 0);

        // The next successful tick covers the whole missed window once.
        s.clock.advance(ChronoDuration::hours(1));
        let healthy = Arc::new(ScriptedProvider::raining(10.0, None));
        poller(&s, healthy.clone()).tick().await.unwrap();
        assert_eq!(healthy.calls(), vec![(t0, t0 + ChronoDuration::hours(3))]);
        assert_eq!(s.manager.get_cycle(cycle_id).unwrap().rainfall_event_count, 1);
    }

    #[tokio::test]
    async fn timeout_keeps_watermark() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        let t0 = s.clock.now();
        s.clock.advance(ChronoDuration::hours(2));

        let summary = poller(&s, Arc::new(SlowProvider)).tick().await.unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(
            s.manager.get_cycle(cycle_id).unwrap().last_weather_check,
            Some(t0)
        );
    }

    #[tokio::test]
    async fn one_failing_cycle_does_not_block_others() {
        let s = setup();
        let broken = active_cycle(&s, "Hill", 10.0);
        let healthy = active_cycle(&s, "Valley", 11.0);
        let t0 = s.clock.now();
        s.clock.advance(ChronoDuration::hours(4));

        let provider = Arc::new(ScriptedProvider {
            failing_latitude: Some(10.0),
            ..ScriptedProvider::raining(20.0, Some(1.0))
        });
        let summary = poller(&s, provider).tick().await.unwrap();
        assert_eq!(summary.cycles_checked, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.rainfall_events_applied, 1);

        assert_eq!(s.manager.get_cycle(broken).unwrap().last_weather_check, Some(t0));
        let ok = s.manager.get_cycle(healthy).unwrap();
        assert_eq!(ok.last_weather_check, Some(s.clock.now()));
        assert_eq!(ok.rainfall_event_count, 1);
    }

    #[tokio::test]
    async fn same_window_is_never_applied_twice() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        s.clock.advance(ChronoDuration::hours(1));

        let provider = Arc::new(ScriptedProvider::raining(15.0, None));
        let poller = poller(&s, provider.clone());
        poller.tick().await.unwrap();
        let after_first = s.manager.get_cycle(cycle_id).unwrap();

        // No time has passed: the window is empty and nothing is fetched.
        let summary = poller.tick().await.unwrap();
        assert_eq!(summary.windows_skipped, 1);
        assert_eq!(summary.rainfall_events_applied, 0);
        assert_eq!(provider.calls().len(), 1);

        let after_second = s.manager.get_cycle(cycle_id).unwrap();
        assert_eq!(after_first.current, after_second.current);
        assert_eq!(after_second.rainfall_event_count, 1);
    }

    #[tokio::test]
    async fn dry_days_accrue_uptake() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        s.clock.advance(ChronoDuration::days(12));

        let summary = poller(&s, Arc::new(ScriptedProvider::raining(0.0, None)))
            .tick()
            .await
            .unwrap();
        assert_eq!(summary.rainfall_events_applied, 0);

        let cycle = s.manager.get_cycle(cycle_id).unwrap();
        assert_eq!(cycle.uptake_days_applied, 12.0);
        assert!((cycle.current.n - 188.0).abs() < 1e-9);
        assert_eq!(cycle.last_weather_check, Some(s.clock.now()));
    }

    #[tokio::test]
    async fn mature_cycles_are_completed() {
        let s = setup();
        let cycle_id = active_cycle(&s, "North", 12.9);
        s.clock.advance(ChronoDuration::days(121));

        let summary = poller(&s, Arc::new(ScriptedProvider::raining(0.0, None)))
            .tick()
            .await
            .unwrap();
        assert_eq!(summary.cycles_completed, 1);

        let cycle = s.manager.get_cycle(cycle_id).unwrap();
        assert_eq!(cycle.status, CycleStatus::Completed);
        assert_eq!(cycle.final_levels, Some(NutrientLevels::new(80.0, 20.0, 160.0)));

        let next = poller(&s, Arc::new(ScriptedProvider::raining(0.0, None)))
            .tick()
            .await
            .unwrap();
        assert_eq!(next.cycles_checked, 0);
    }
}
