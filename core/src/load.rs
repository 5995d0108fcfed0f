//! System Load Monitor.
//!
//! A background loop samples host CPU and memory plus the request counters the
//! API feeds into [`TrafficCounters`], and publishes a complete
//! [`SystemLoadSnapshot`] through a watch channel. Readers always get the last
//! published value; a failed sample leaves it in place.
//!
//! Reads are not lock-free: `watch::Sender::borrow` takes the channel's read
//! lock for as long as it takes to clone the `Arc`, and `send_replace` takes
//! the write lock only to swap the pointer. A reader therefore sees either the
//! old or the new snapshot whole, and keeps it after later publishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use utoipa::ToSchema;

use crate::error::SamplingError;
use crate::task::PeriodicTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoadBand {
    Low,
    Medium,
    High,
    Critical,
}

impl LoadBand {
    /// `<50` low, `50..75` medium, `75..90` high, `>=90` critical.
    pub fn classify(peak_utilization: f64) -> Self {
        if peak_utilization >= 90.0 {
            LoadBand::Critical
        } else if peak_utilization >= 75.0 {
            LoadBand::High
        } else if peak_utilization >= 50.0 {
            LoadBand::Medium
        } else {
            LoadBand::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadBand::Low => "low",
            LoadBand::Medium => "medium",
            LoadBand::High => "high",
            LoadBand::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemLoadSnapshot {
    /// Percent, 0–100
    pub cpu: f64,
    /// Percent, 0–100
    pub memory: f64,
    pub active_connections: u64,
    pub requests_per_second: f64,
    /// Percent of responses in the last interval that were 5xx
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl SystemLoadSnapshot {
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self {
            cpu: 0.0,
            memory: 0.0,
            active_connections: 0,
            requests_per_second: 0.0,
            error_rate: 0.0,
            timestamp,
        }
    }

    pub fn peak_utilization(&self) -> f64 {
        self.cpu.max(self.memory)
    }

    pub fn band(&self) -> LoadBand {
        LoadBand::classify(self.peak_utilization())
    }
}

/// Request accounting fed by the HTTP layer.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    requests: AtomicU64,
    server_errors: AtomicU64,
    in_flight: AtomicU64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request as in flight until the guard is finished or dropped.
    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            counters: self.clone(),
            finished: false,
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Requests and server errors since the previous call.
    pub fn take_window(&self) -> (u64, u64) {
        (
            self.requests.swap(0, Ordering::Relaxed),
            self.server_errors.swap(0, Ordering::Relaxed),
        )
    }
}

pub struct InFlightGuard {
    counters: Arc<TrafficCounters>,
    finished: bool,
}

impl InFlightGuard {
    pub fn finish(mut self, server_error: bool) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        if server_error {
            self.counters.server_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.release();
    }

    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Host resource utilization, percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostMetrics {
    pub cpu: f64,
    pub memory: f64,
}

#[async_trait]
pub trait MetricsSampler: Send + Sync {
    async fn sample(&self) -> Result<HostMetrics, SamplingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Linux `/proc` sampler. CPU is the busy share since the previous sample
/// (since boot on the first one).
#[derive(Debug, Default)]
pub struct ProcSampler {
    previous_cpu: Mutex<Option<CpuTimes>>,
}

impl ProcSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsSampler for ProcSampler {
    async fn sample(&self) -> Result<HostMetrics, SamplingError> {
        let stat = tokio::fs::read_to_string("/proc/stat")
            .await
            .map_err(|e| SamplingError::Read {
                source_name: "/proc/stat",
                message: e.to_string(),
            })?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(|e| SamplingError::Read {
                source_name: "/proc/meminfo",
                message: e.to_string(),
            })?;

        let current = parse_cpu_times(&stat)?;
        let memory = parse_memory_percent(&meminfo)?;

        let mut previous = self.previous_cpu.lock().await;
        let cpu = cpu_percent(*previous, current);
        *previous = Some(current);

        Ok(HostMetrics { cpu, memory })
    }
}

fn parse_cpu_times(stat: &str) -> Result<CpuTimes, SamplingError> {
    let malformed = |message: &str| SamplingError::Malformed {
        source_name: "/proc/stat",
        message: message.to_string(),
    };
    let line = stat
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| malformed("missing aggregate cpu line"))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| malformed(&e.to_string()))?;
    if fields.len() < 4 {
        return Err(malformed("too few cpu fields"));
    }
    // user nice system idle iowait irq softirq steal
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().sum();
    Ok(CpuTimes { idle, total })
}

fn cpu_percent(previous: Option<CpuTimes>, current: CpuTimes) -> f64 {
    let (idle, total) = match previous {
        Some(prev) if current.total > prev.total => (
            current.idle.saturating_sub(prev.idle),
            current.total - prev.total,
        ),
        _ => (current.idle, current.total),
    };
    if total == 0 {
        return 0.0;
    }
    let busy = total.saturating_sub(idle);
    (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

fn parse_memory_percent(meminfo: &str) -> Result<f64, SamplingError> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|value| value.parse().ok())
    };
    let total = field("MemTotal").filter(|total| *total > 0).ok_or_else(|| {
        SamplingError::Malformed {
            source_name: "/proc/meminfo",
            message: "missing MemTotal".to_string(),
        }
    })?;
    let available = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .unwrap_or(0)
        .min(total);
    Ok(((total - available) as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

pub struct SystemLoadMonitor {
    sampler: Arc<dyn MetricsSampler>,
    traffic: Arc<TrafficCounters>,
    snapshot: watch::Sender<Arc<SystemLoadSnapshot>>,
    last_sampled: Mutex<Instant>,
    interval: Duration,
    task: PeriodicTask,
}

impl SystemLoadMonitor {
    pub fn new(
        sampler: Arc<dyn MetricsSampler>,
        traffic: Arc<TrafficCounters>,
        interval: Duration,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(SystemLoadSnapshot::idle(Utc::now())));
        Self {
            sampler,
            traffic,
            snapshot,
            last_sampled: Mutex::new(Instant::now()),
            interval,
            task: PeriodicTask::new("system_load_monitor"),
        }
    }

    /// Latest published snapshot; never waits on a live sample.
    pub fn snapshot(&self) -> Arc<SystemLoadSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SystemLoadSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn traffic(&self) -> &Arc<TrafficCounters> {
        &self.traffic
    }

    /// Replace the snapshot wholesale.
    pub fn publish(&self, snapshot: SystemLoadSnapshot) {
        self.snapshot.send_replace(Arc::new(snapshot));
    }

    /// Take one sample and publish it. On failure the previous snapshot stays.
    pub async fn sample_once(&self) -> bool {
        let host = match self.sampler.sample().await {
            Ok(host) => host,
            Err(err) => {
                tracing::warn!(error = %err, "system load sampling failed; keeping previous snapshot");
                return false;
            }
        };

        let elapsed = {
            let mut last = self.last_sampled.lock().await;
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let (requests, server_errors) = self.traffic.take_window();
        let secs = elapsed.as_secs_f64().max(0.001);
        let error_rate = if requests == 0 {
            0.0
        } else {
            (server_errors as f64 / requests as f64 * 100.0).min(100.0)
        };

        let snapshot = SystemLoadSnapshot {
            cpu: host.cpu.clamp(0.0, 100.0),
            memory: host.memory.clamp(0.0, 100.0),
            active_connections: self.traffic.in_flight(),
            requests_per_second: requests as f64 / secs,
            error_rate,
            timestamp: Utc::now(),
        };
        tracing::debug!(
            cpu = snapshot.cpu,
            memory = snapshot.memory,
            active_connections = snapshot.active_connections,
            requests_per_second = snapshot.requests_per_second,
            error_rate = snapshot.error_rate,
            "system load sampled"
        );
        self.publish(snapshot);
        true
    }

    pub async fn start(self: &Arc<Self>) -> bool {
        let monitor = self.clone();
        self.task
            .start(self.interval, move || {
                let monitor = monitor.clone();
                async move {
                    monitor.sample_once().await;
                }
            })
            .await
    }

    pub async fn stop(&self) -> bool {
        self.task.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.task.is_running().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays scripted results; an exhausted script fails every sample.
    #[derive(Default)]
    pub(crate) struct ScriptedSampler {
        script: std::sync::Mutex<VecDeque<Result<HostMetrics, SamplingError>>>,
    }

    impl ScriptedSampler {
        pub(crate) fn new(script: Vec<Result<HostMetrics, SamplingError>>) -> Self {
            Self {
                script: std::sync::Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl MetricsSampler for ScriptedSampler {
        async fn sample(&self) -> Result<HostMetrics, SamplingError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(SamplingError::Read {
                        source_name: "script",
                        message: "exhausted".to_string(),
                    })
                })
        }
    }

    fn host(cpu: f64, memory: f64) -> Result<HostMetrics, SamplingError> {
        Ok(HostMetrics { cpu, memory })
    }

    #[test]
    fn load_band_boundaries() {
        assert_eq!(LoadBand::classify(0.0), LoadBand::Low);
        assert_eq!(LoadBand::classify(49.9), LoadBand::Low);
        assert_eq!(LoadBand::classify(50.0), LoadBand::Medium);
        assert_eq!(LoadBand::classify(74.9), LoadBand::Medium);
        assert_eq!(LoadBand::classify(75.0), LoadBand::High);
        assert_eq!(LoadBand::classify(89.9), LoadBand::High);
        assert_eq!(LoadBand::classify(90.0), LoadBand::Critical);
        assert_eq!(LoadBand::classify(100.0), LoadBand::Critical);
    }

    #[test]
    fn band_uses_the_worse_of_cpu_and_memory() {
        let snapshot = SystemLoadSnapshot {
            cpu: 20.0,
            memory: 80.0,
            ..SystemLoadSnapshot::idle(Utc::now())
        };
        assert_eq!(snapshot.peak_utilization(), 80.0);
        assert_eq!(snapshot.band(), LoadBand::High);
    }

    #[test]
    fn parses_proc_stat_and_computes_delta() {
        let first = parse_cpu_times("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        assert_eq!(first, CpuTimes { idle: 800, total: 1000 });
        assert!((cpu_percent(None, first) - 20.0).abs() < 1e-9);

        let second = CpuTimes {
            idle: 850,
            total: 1200,
        };
        // 200 ticks elapsed, 50 idle
        assert!((cpu_percent(Some(first), second) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_proc_stat() {
        assert!(parse_cpu_times("intr 1 2 3").is_err());
        assert!(parse_cpu_times("cpu  a b c d").is_err());
    }

    #[test]
    fn parses_meminfo() {
        let meminfo = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        assert!((parse_memory_percent(meminfo).unwrap() - 75.0).abs() < 1e-9);
        assert!(parse_memory_percent("MemFree: 10 kB").is_err());
    }

    #[test]
    fn in_flight_guard_releases_once() {
        let counters = Arc::new(TrafficCounters::new());
        let finished = counters.begin();
        let dropped = counters.begin();
        assert_eq!(counters.in_flight(), 2);
        finished.finish(true);
        drop(dropped);
        assert_eq!(counters.in_flight(), 0);
        assert_eq!(counters.take_window(), (1, 1));
        assert_eq!(counters.take_window(), (0, 0));
    }

    #[tokio::test]
    async fn failed_sample_keeps_previous_snapshot() {
        let monitor = SystemLoadMonitor::new(
            Arc::new(ScriptedSampler::new(vec![host(42.0, 61.0)])),
            Arc::new(TrafficCounters::new()),
            Duration::from_secs(30),
        );
        assert!(monitor.sample_once().await);
        let first = monitor.snapshot();
        assert_eq!(first.cpu, 42.0);
        assert_eq!(first.memory, 61.0);

        assert!(!monitor.sample_once().await);
        assert_eq!(monitor.snapshot(), first);
    }

    #[tokio::test]
    async fn sample_folds_in_traffic_counters() {
        let traffic = Arc::new(TrafficCounters::new());
        let monitor = SystemLoadMonitor::new(
            Arc::new(ScriptedSampler::new(vec![host(10.0, 10.0)])),
            traffic.clone(),
            Duration::from_secs(30),
        );
        for server_error in [false, false, false, true] {
            traffic.begin().finish(server_error);
        }
        let _open = traffic.begin();

        assert!(monitor.sample_once().await);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.error_rate, 25.0);
        assert_eq!(snapshot.active_connections, 1);
        assert!(snapshot.requests_per_second > 0.0);
    }

    #[tokio::test]
    async fn out_of_range_host_metrics_are_clamped() {
        let monitor = SystemLoadMonitor::new(
            Arc::new(ScriptedSampler::new(vec![host(130.0, -5.0)])),
            Arc::new(TrafficCounters::new()),
            Duration::from_secs(30),
        );
        monitor.sample_once().await;
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cpu, 100.0);
        assert_eq!(snapshot.memory, 0.0);
    }

    #[tokio::test]
    async fn background_loop_samples_until_stopped() {
        let monitor = Arc::new(SystemLoadMonitor::new(
            Arc::new(ScriptedSampler::new(vec![host(55.0, 30.0)])),
            Arc::new(TrafficCounters::new()),
            Duration::from_secs(3600),
        ));
        let mut updates = monitor.subscribe();
        assert!(monitor.start().await);
        assert!(!monitor.start().await);

        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("first tick should publish")
            .unwrap();
        assert_eq!(monitor.snapshot().cpu, 55.0);

        assert!(monitor.stop().await);
        assert!(!monitor.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_a_partially_published_snapshot() {
        let monitor = Arc::new(SystemLoadMonitor::new(
            Arc::new(ScriptedSampler::default()),
            Arc::new(TrafficCounters::new()),
            Duration::from_secs(30),
        ));
        let held = monitor.snapshot();

        let writer = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                for i in 1..=2_000u64 {
                    let level = (i % 100) as f64;
                    monitor.publish(SystemLoadSnapshot {
                        cpu: level,
                        memory: level,
                        active_connections: i,
                        ..SystemLoadSnapshot::idle(Utc::now())
                    });
                    if i % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let monitor = monitor.clone();
                tokio::spawn(async move {
                    for _ in 0..2_000 {
                        let snapshot = monitor.snapshot();
                        assert_eq!(snapshot.cpu, snapshot.memory);
                        if snapshot.active_connections > 0 {
                            assert_eq!((snapshot.active_connections % 100) as f64, snapshot.cpu);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(held.active_connections, 0);
        assert_eq!(monitor.snapshot().active_connections, 2_000);
    }
}
