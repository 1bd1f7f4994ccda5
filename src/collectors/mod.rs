pub mod cpu;
pub mod load;
pub mod memory;
pub mod netif;
pub mod sources;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::state::{Snapshot, SnapshotStore};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{System, SystemExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("source unavailable: {0}")]
    Source(#[from] io::Error),
    #[error("malformed input {line:?}: {reason}")]
    Malformed { line: String, reason: &'static str },
    #[error("counters did not advance between samples")]
    ZeroDelta,
}

impl SampleError {
    pub(crate) fn malformed(line: &str, reason: &'static str) -> Self {
        Self::Malformed {
            line: line.to_string(),
            reason,
        }
    }
}

pub trait Sampler: Send + 'static {
    const NAME: &'static str;
    type Output: Send;

    fn sample(&mut self) -> Result<Self::Output, SampleError>;

    /// Writes a successful sample into the sampler's own field family.
    fn apply(output: Self::Output, snapshot: &mut Snapshot);
}

#[derive(Clone)]
pub struct SamplerContext {
    pub store: SnapshotStore,
    pub metrics: Arc<Metrics>,
    pub shutdown: watch::Receiver<bool>,
}

impl SamplerContext {
    pub(crate) fn record<T>(
        &self,
        name: &'static str,
        result: Result<T, SampleError>,
        failures: &mut FailureLog,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.metrics.inc_sampler_update(name);
                if let Some(failed) = failures.clear() {
                    info!(sampler = name, failed, "sampler recovered");
                }
                Some(value)
            }
            Err(err) => {
                self.metrics.inc_collect_error(name);
                if failures.should_log(&err) {
                    warn!(sampler = name, error = %err, repeated = failures.repeats, "sample failed");
                }
                None
            }
        }
    }
}

const REPEAT_LOG_EVERY: u64 = 1000;

/// Run of consecutive failures for one sampler. A failure is logged when its
/// message differs from the previous one, then again every
/// `REPEAT_LOG_EVERY` repeats.
#[derive(Debug, Default)]
pub(crate) struct FailureLog {
    last: Option<String>,
    repeats: u64,
    total: u64,
}

impl FailureLog {
    fn should_log(&mut self, err: &SampleError) -> bool {
        self.total += 1;
        let message = err.to_string();
        if self.last.as_deref() == Some(message.as_str()) {
            self.repeats += 1;
            return self.repeats % REPEAT_LOG_EVERY == 0;
        }
        self.last = Some(message);
        self.repeats = 0;
        true
    }

    // Returns the length of the failure run that just ended, if any.
    fn clear(&mut self) -> Option<u64> {
        self.last = None;
        self.repeats = 0;
        match std::mem::take(&mut self.total) {
            0 => None,
            n => Some(n),
        }
    }
}

/// Runs `sampler` once per `period` until shutdown. Failures leave the
/// snapshot untouched and are retried on the next tick.
pub async fn run_periodic<S: Sampler>(mut sampler: S, period: Duration, ctx: SamplerContext) {
    let mut shutdown = ctx.shutdown.clone();
    let mut failures = FailureLog::default();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(sampler = S::NAME, period_ms = period.as_millis() as u64, "sampler started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Some(output) = ctx.record(S::NAME, sampler.sample(), &mut failures) {
                    let generation = ctx.store.publish(|snapshot| S::apply(output, snapshot));
                    debug!(sampler = S::NAME, generation, "snapshot published");
                }
            }
        }
    }

    info!(sampler = S::NAME, "sampler stopped");
}

pub fn detect_core_count() -> u32 {
    let mut system = System::new();
    system.refresh_cpu();
    let count = system.cpus().len();
    if count > 0 {
        return count as u32;
    }

    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

pub fn spawn_all(cfg: &Config, ctx: SamplerContext) -> Vec<JoinHandle<()>> {
    let samplers = &cfg.samplers;

    let cpu = cpu::CpuSampler::new(
        Box::new(sources::FirstLine::new(&cfg.sources.proc_stat)),
        Duration::from_secs(samplers.cpu_window_secs),
        Duration::from_millis(samplers.cpu_retry_delay_ms),
    );
    let load = load::LoadSampler::new(Box::new(sources::FirstLine::new(
        &cfg.sources.proc_loadavg,
    )));
    let memory = memory::MemorySampler::new(sources::default_memory_source());
    let netif = netif::NetIfSampler::new(Box::new(sources::IfAddrs), cfg.max_interfaces);

    vec![
        tokio::spawn(cpu.run(ctx.clone())),
        tokio::spawn(run_periodic(
            load,
            Duration::from_secs(samplers.load_interval_secs),
            ctx.clone(),
        )),
        tokio::spawn(run_periodic(
            memory,
            Duration::from_secs(samplers.memory_interval_secs),
            ctx.clone(),
        )),
        tokio::spawn(run_periodic(
            netif,
            Duration::from_secs(samplers.netif_interval_secs),
            ctx,
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        calls: u32,
        fail_every_other: bool,
    }

    impl Sampler for Counting {
        const NAME: &'static str = "counting";
        type Output = u32;

        fn sample(&mut self) -> Result<u32, SampleError> {
            self.calls += 1;
            if self.fail_every_other && self.calls % 2 == 0 {
                return Err(SampleError::ZeroDelta);
            }
            Ok(self.calls)
        }

        fn apply(output: u32, snapshot: &mut Snapshot) {
            snapshot.memory.process_count = u64::from(output);
        }
    }

    fn context() -> (SamplerContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctx = SamplerContext {
            store: SnapshotStore::new(1),
            metrics: Metrics::new().expect("metrics"),
            shutdown: rx,
        };
        (ctx, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sampler_publishes_and_stops_on_shutdown() {
        let (ctx, shutdown) = context();
        let store = ctx.store.clone();
        let handle = tokio::spawn(run_periodic(
            Counting {
                calls: 0,
                fail_every_other: false,
            },
            Duration::from_secs(1),
            ctx,
        ));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let snap = store.current();
        assert_eq!(snap.memory.process_count, 3);
        assert_eq!(snap.generation, 3);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_samples_leave_previous_value() {
        let (ctx, shutdown) = context();
        let store = ctx.store.clone();
        let metrics = ctx.metrics.clone();
        let handle = tokio::spawn(run_periodic(
            Counting {
                calls: 0,
                fail_every_other: true,
            },
            Duration::from_secs(1),
            ctx,
        ));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snap = store.current();
        assert_eq!(snap.memory.process_count, 1);
        assert_eq!(snap.generation, 1);
        assert_eq!(metrics.collect_errors("counting"), 1.0);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn repeated_failures_are_logged_sparingly() {
        let mut failures = FailureLog::default();
        assert!(failures.should_log(&SampleError::ZeroDelta));
        let logged = (0..REPEAT_LOG_EVERY * 2)
            .filter(|_| failures.should_log(&SampleError::ZeroDelta))
            .count();
        assert_eq!(logged, 2);

        let other = SampleError::malformed("cpu", "fewer than four counters");
        assert!(failures.should_log(&other));
        assert!(!failures.should_log(&other));
        assert!(failures.should_log(&SampleError::ZeroDelta));
    }

    #[test]
    fn success_ends_the_failure_run() {
        let mut failures = FailureLog::default();
        assert_eq!(failures.clear(), None);

        failures.should_log(&SampleError::ZeroDelta);
        failures.should_log(&SampleError::ZeroDelta);
        assert_eq!(failures.clear(), Some(2));
        assert!(failures.should_log(&SampleError::ZeroDelta));
    }

    #[test]
    fn core_count_is_positive() {
        assert!(detect_core_count() >= 1);
    }
}
