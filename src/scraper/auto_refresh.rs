use super::sensor::Sensor;
use crate::error::ScraperError;
use crate::helper::cancellable;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A refresh may take at most this many refresh intervals.
pub const REFRESH_TIMEOUT_FACTOR: u32 = 3;

#[derive(Clone)]
struct RefreshRunner {
    sensor: Arc<dyn Sensor>,
    running: Arc<Mutex<()>>,
    timeout: Duration,
}

impl RefreshRunner {
    /// One refresh cycle, skipped when another one is still running.
    async fn refresh_once(&self, cancel: &CancellationToken) -> Result<(), ScraperError> {
        let name = self.sensor.name();
        let _running = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("[{}] refresh already running, skipping", name);
                return Err(ScraperError::SensorAlreadyRunning);
            }
        };

        let res = match tokio::time::timeout(
            self.timeout,
            cancellable(cancel, self.sensor.refresh(cancel)),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(ScraperError::Timeout(self.timeout)),
        };

        match &res {
            Ok(()) => {
                self.sensor.stats().success();
                if !self.sensor.started().is_started() {
                    log::info!("[{}] initial refresh successful", name);
                }
                self.sensor.started().started();
                log::debug!("[{}] refresh successful", name);
            }
            Err(e) if e.is_conflict() => {
                log::info!("[{}] refresh skipped: {}", name, e);
            }
            Err(ScraperError::Cancelled) => {
                log::debug!("[{}] refresh cancelled", name);
            }
            Err(e) => {
                self.sensor.stats().fail();
                log::warn!("[{}] refresh failed: {}", name, e);
            }
        }
        res
    }
}

/// Drives a sensor's refresh on a fixed interval, plus manual triggers.
pub struct AutoRefresh {
    runner: RefreshRunner,
    refresh_interval: Duration,
    trigger: SyncMutex<Option<mpsc::Sender<()>>>,
}

impl AutoRefresh {
    pub fn new(sensor: Arc<dyn Sensor>, refresh_interval: Duration) -> Self {
        Self {
            runner: RefreshRunner {
                sensor,
                running: Arc::new(Mutex::new(())),
                timeout: refresh_interval * REFRESH_TIMEOUT_FACTOR,
            },
            refresh_interval,
            trigger: SyncMutex::new(None),
        }
    }

    pub fn sensor(&self) -> &Arc<dyn Sensor> {
        &self.runner.sensor
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.runner.timeout
    }

    pub fn is_running(&self) -> bool {
        self.trigger.lock().is_some()
    }

    /// Spawn the refresh loop. The first refresh runs after `delay`, then
    /// every refresh interval until `cancel` fires.
    pub fn start(&self, cancel: &CancellationToken, delay: Duration) -> Result<(), ScraperError> {
        let mut trigger = self.trigger.lock();
        if trigger.is_some() {
            return Err(ScraperError::SensorAlreadyRunning);
        }
        let (tx, mut rx) = mpsc::channel::<()>(1);
        *trigger = Some(tx);
        drop(trigger);

        let runner = self.runner.clone();
        let interval = self.refresh_interval;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let name = runner.sensor.name();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!("[{}] refresh stopped", name);
                        break;
                    }
                    _ = ticker.tick() => {
                        let runner = runner.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            let _ = runner.refresh_once(&cancel).await;
                        });
                    }
                    Some(()) = rx.recv() => {
                        log::info!("[{}] manual refresh triggered", name);
                        let runner = runner.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            let _ = runner.refresh_once(&cancel).await;
                        });
                    }
                }
            }
            runner.sensor.started().stopped();
        });
        Ok(())
    }

    /// Detach from the running loop. The loop itself ends with its token.
    pub fn stop(&self) {
        self.trigger.lock().take();
    }

    /// Ask the running loop for an out-of-cycle refresh. Requests arriving
    /// while one is already queued are merged into it.
    pub fn trigger_refresh(&self) -> Result<(), ScraperError> {
        let trigger = self.trigger.lock();
        let tx = trigger
            .as_ref()
            .ok_or_else(|| ScraperError::SensorNotRunning(self.runner.sensor.name().to_string()))?;
        match tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(ScraperError::SensorNotRunning(
                self.runner.sensor.name().to_string(),
            )),
        }
    }

    /// Run one refresh now and wait for it, through the same overlap guard
    /// as the timer.
    pub async fn refresh_now(&self, cancel: &CancellationToken) -> Result<(), ScraperError> {
        self.runner.refresh_once(cancel).await
    }

    pub async fn wait_till_startup(&self) {
        self.runner.sensor.started().wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::sensor::Cleanable;
    use crate::scraper::sensor_metrics::SensorStats;
    use crate::scraper::started_check::StartedCheck;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowSensor {
        delay: Duration,
        calls: AtomicUsize,
        fail_first: AtomicUsize,
        stats: SensorStats,
        started: StartedCheck,
    }

    impl SlowSensor {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(0),
                stats: SensorStats::averaged(),
                started: StartedCheck::new(),
            })
        }
    }

    impl Cleanable for SlowSensor {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn matches(&self, name: &str) -> bool {
            name == "slow"
        }

        fn clean(&self, _max_age: Duration) {}

        fn dump(&self) -> Value {
            Value::Null
        }
    }

    #[async_trait]
    impl Sensor for SlowSensor {
        async fn refresh(&self, _cancel: &CancellationToken) -> Result<(), ScraperError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ScraperError::Http(
                    reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    "busy".into(),
                ));
            }
            Ok(())
        }

        fn stats(&self) -> &SensorStats {
            &self.stats
        }

        fn started(&self) -> &StartedCheck {
            &self.started
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_refresh_is_skipped() {
        let sensor = SlowSensor::new(Duration::from_millis(100));
        let auto = Arc::new(AutoRefresh::new(sensor.clone(), Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        let first = {
            let auto = auto.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { auto.refresh_now(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = auto.refresh_now(&cancel).await;

        assert!(matches!(second, Err(ScraperError::SensorAlreadyRunning)));
        first.await.unwrap().unwrap();
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 1);
        // conflicts are not counted
        assert_eq!(sensor.stats.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_refresh_timeout_counts_as_failure() {
        let sensor = SlowSensor::new(Duration::from_millis(200));
        let auto = AutoRefresh::new(sensor.clone(), Duration::from_millis(10));
        assert_eq!(auto.refresh_timeout(), Duration::from_millis(30));

        let res = auto.refresh_now(&CancellationToken::new()).await;
        assert!(matches!(res, Err(ScraperError::Timeout(_))));
        assert!(!sensor.stats.is_ok());
        assert!(!sensor.started.is_started());
    }

    #[tokio::test]
    async fn test_startup_after_first_success() {
        let sensor = SlowSensor::new(Duration::from_millis(1));
        sensor.fail_first.store(1, Ordering::SeqCst);
        let auto = AutoRefresh::new(sensor.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        assert!(auto.refresh_now(&cancel).await.is_err());
        assert!(!sensor.started.is_started());
        auto.refresh_now(&cancel).await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), auto.wait_till_startup())
            .await
            .unwrap();
        assert_eq!(sensor.stats.success_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_loop_and_manual_trigger() {
        let sensor = SlowSensor::new(Duration::from_millis(1));
        let auto = AutoRefresh::new(sensor.clone(), Duration::from_secs(3600));
        assert!(matches!(
            auto.trigger_refresh(),
            Err(ScraperError::SensorNotRunning(_))
        ));

        let cancel = CancellationToken::new();
        auto.start(&cancel, Duration::ZERO).unwrap();
        assert!(matches!(
            auto.start(&cancel, Duration::ZERO),
            Err(ScraperError::SensorAlreadyRunning)
        ));

        // first tick fires immediately
        tokio::time::timeout(Duration::from_secs(1), auto.wait_till_startup())
            .await
            .unwrap();
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 1);

        auto.trigger_refresh().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sensor.started.is_started());
    }
}
