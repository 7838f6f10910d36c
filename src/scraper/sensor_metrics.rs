// Health counters each sensor keeps about its own refresh cycles.
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorMetric {
    pub sensor: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
}

impl SensorMetric {
    pub fn new(sensor: &str, name: &str, value: f64, unit: &str) -> Self {
        Self {
            sensor: sensor.to_string(),
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        }
    }
}

/// Timing of one refresh: waiting for a pool lease, then the remote query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefreshStats {
    pub client_wait_time: Duration,
    pub query_time: Duration,
}

/// Two-lap stopwatch. `start` -> lease acquired (`mark`) -> query done (`finish`).
pub struct Stopwatch {
    started: Instant,
    marked: Option<Instant>,
    stats: RefreshStats,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            marked: None,
            stats: RefreshStats::default(),
        }
    }

    pub fn mark(&mut self) {
        let now = Instant::now();
        self.stats.client_wait_time = now - self.started;
        self.marked = Some(now);
    }

    pub fn finish(mut self) -> RefreshStats {
        if let Some(marked) = self.marked {
            self.stats.query_time = marked.elapsed();
        }
        self.stats
    }
}

pub trait TimeCounter: Send {
    fn add(&mut self, d: Duration);
    fn current(&self) -> Duration;
}

/// Running average over at most `max_window` samples.
pub struct AvgTimeCounter {
    count: u32,
    max_window: u32,
    avg: Duration,
}

impl AvgTimeCounter {
    pub fn new(max_window: u32) -> Self {
        Self {
            count: 0,
            max_window: max_window.max(1),
            avg: Duration::ZERO,
        }
    }
}

impl TimeCounter for AvgTimeCounter {
    fn add(&mut self, d: Duration) {
        let weight = self.count.min(self.max_window - 1);
        self.count = weight + 1;
        self.avg = (self.avg * weight + d) / self.count;
    }

    fn current(&self) -> Duration {
        self.avg
    }
}

#[derive(Default)]
pub struct LastTimeCounter {
    last: Duration,
}

impl TimeCounter for LastTimeCounter {
    fn add(&mut self, d: Duration) {
        self.last = d;
    }

    fn current(&self) -> Duration {
        self.last
    }
}

#[derive(Debug, Default)]
struct Status {
    failed: bool,
    success_count: u64,
    total_count: u64,
}

/// Per-sensor health: timing counters plus success/failure history.
pub struct SensorStats {
    client_wait_time: Mutex<Box<dyn TimeCounter>>,
    query_time: Mutex<Box<dyn TimeCounter>>,
    status: Mutex<Status>,
}

const AVG_WINDOW: u32 = 100;

impl SensorStats {
    /// Timings averaged over the last samples; used by scheduled inventory sensors.
    pub fn averaged() -> Self {
        Self {
            client_wait_time: Mutex::new(Box::new(AvgTimeCounter::new(AVG_WINDOW))),
            query_time: Mutex::new(Box::new(AvgTimeCounter::new(AVG_WINDOW))),
            status: Mutex::new(Status::default()),
        }
    }

    /// Only the latest timing; used by performance sensors.
    pub fn last_value() -> Self {
        Self {
            client_wait_time: Mutex::new(Box::new(LastTimeCounter::default())),
            query_time: Mutex::new(Box::new(LastTimeCounter::default())),
            status: Mutex::new(Status::default()),
        }
    }

    pub fn upload(&self, stats: RefreshStats) {
        if !stats.client_wait_time.is_zero() {
            self.client_wait_time.lock().add(stats.client_wait_time);
        }
        if !stats.query_time.is_zero() {
            self.query_time.lock().add(stats.query_time);
        }
    }

    pub fn success(&self) {
        let mut st = self.status.lock();
        st.total_count += 1;
        st.success_count += 1;
        st.failed = false;
    }

    pub fn fail(&self) {
        let mut st = self.status.lock();
        st.total_count += 1;
        st.failed = true;
    }

    pub fn is_ok(&self) -> bool {
        !self.status.lock().failed
    }

    /// 1.0 until the first cycle has been recorded.
    pub fn success_rate(&self) -> f64 {
        let st = self.status.lock();
        if st.total_count == 0 {
            return 1.0;
        }
        st.success_count as f64 / st.total_count as f64
    }

    pub fn compose(&self, sensor: &str) -> Vec<SensorMetric> {
        vec![
            SensorMetric::new(
                sensor,
                "client_wait_time",
                self.client_wait_time.lock().current().as_nanos() as f64,
                "nanoseconds",
            ),
            SensorMetric::new(
                sensor,
                "query_time",
                self.query_time.lock().current().as_nanos() as f64,
                "nanoseconds",
            ),
            SensorMetric::new(sensor, "status", if self.is_ok() { 1.0 } else { 0.0 }, "boolean"),
            SensorMetric::new(sensor, "success_rate", self.success_rate(), "ratio"),
        ]
    }
}
