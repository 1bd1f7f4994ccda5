use super::sources::LineSource;
use super::{FailureLog, SampleError, SamplerContext};
use crate::state::CpuUsage;
use std::time::Duration;
use tracing::{debug, info};

const NAME: &str = "cpu";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
}

impl CpuCounters {
    pub fn parse(line: &str) -> Result<Self, SampleError> {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("cpu") {
            return Err(SampleError::malformed(line, "expected aggregate cpu line"));
        }

        let values: Vec<u64> = fields
            .take(5)
            .map_while(|f| f.parse::<u64>().ok())
            .collect();
        if values.len() < 4 {
            return Err(SampleError::malformed(line, "fewer than four counters"));
        }

        Ok(Self {
            user: values[0],
            nice: values[1],
            system: values[2],
            idle: values[3],
            iowait: values.get(4).copied().unwrap_or(0),
        })
    }

    fn abs_delta(&self, later: &Self) -> Self {
        Self {
            user: later.user.abs_diff(self.user),
            nice: later.nice.abs_diff(self.nice),
            system: later.system.abs_diff(self.system),
            idle: later.idle.abs_diff(self.idle),
            iowait: later.iowait.abs_diff(self.iowait),
        }
    }
}

// Absolute per-field difference, so a counter reset stays bounded.
pub fn cpu_usage(old: &CpuCounters, new: &CpuCounters) -> Result<CpuUsage, SampleError> {
    let d = old.abs_delta(new);
    let total =
        d.user as f64 + d.nice as f64 + d.system as f64 + d.idle as f64 + d.iowait as f64;
    if total == 0.0 {
        return Err(SampleError::ZeroDelta);
    }

    let pct = |v: u64| v as f64 / total * 100.0;
    Ok(CpuUsage {
        user: pct(d.user),
        nice: pct(d.nice),
        system: pct(d.system),
        idle: pct(d.idle),
        iowait: pct(d.iowait),
    })
}

pub struct CpuSampler {
    source: Box<dyn LineSource>,
    window: Duration,
    retry_delay: Duration,
}

impl CpuSampler {
    pub fn new(source: Box<dyn LineSource>, window: Duration, retry_delay: Duration) -> Self {
        Self {
            source,
            window,
            retry_delay,
        }
    }

    fn read_counters(&mut self) -> Result<CpuCounters, SampleError> {
        let line = self.source.read_line()?;
        CpuCounters::parse(&line)
    }

    async fn sample_window(
        &mut self,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Option<Result<CpuUsage, SampleError>> {
        let old = match self.read_counters() {
            Ok(c) => c,
            Err(err) => return Some(Err(err)),
        };

        tokio::select! {
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(self.window) => {}
        }

        Some(
            self.read_counters()
                .and_then(|new| cpu_usage(&old, &new)),
        )
    }

    pub async fn run(mut self, ctx: SamplerContext) {
        let mut shutdown = ctx.shutdown.clone();
        let mut failures = FailureLog::default();
        info!(
            sampler = NAME,
            window_ms = self.window.as_millis() as u64,
            "sampler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(result) = self.sample_window(&mut shutdown).await else {
                break;
            };

            match ctx.record(NAME, result, &mut failures) {
                Some(usage) => {
                    let generation = ctx.store.publish(|snapshot| snapshot.cpu = usage);
                    debug!(sampler = NAME, generation, "snapshot published");
                }
                None if self.retry_delay.is_zero() => tokio::task::yield_now().await,
                None => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!(sampler = NAME, "sampler stopped");
    }
}
