use crate::state::Snapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub agent_cpu_percent: GaugeVec,
    pub agent_load_average: GaugeVec,
    pub agent_memory_kilobytes: GaugeVec,
    pub agent_process_count: Gauge,
    pub agent_cpu_core_count: Gauge,
    pub agent_netif_count: Gauge,
    pub agent_snapshot_generation: Gauge,
    pub agent_uptime_seconds: Gauge,
    pub agent_sampler_updates_total: CounterVec,
    pub agent_collect_errors_total: CounterVec,
    pub agent_connections_total: Counter,
    pub agent_connections_active: Gauge,
    pub agent_connection_errors_total: CounterVec,
    pub agent_requests_total: CounterVec,
    pub agent_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_percent = GaugeVec::new(
            opts!(
                "agent_cpu_percent",
                "Share of CPU time over the last sampling window by mode"
            ),
            &["mode"],
        )?;
        let agent_load_average = GaugeVec::new(
            opts!("agent_load_average", "System load average by window"),
            &["window"],
        )?;
        let agent_memory_kilobytes = GaugeVec::new(
            opts!("agent_memory_kilobytes", "Memory counters in kilobytes by kind"),
            &["kind"],
        )?;
        let agent_process_count =
            Gauge::with_opts(opts!("agent_process_count", "Number of processes"))?;
        let agent_cpu_core_count =
            Gauge::with_opts(opts!("agent_cpu_core_count", "Logical CPU count"))?;
        let agent_netif_count = Gauge::with_opts(opts!(
            "agent_netif_count",
            "Number of interfaces with an IPv4 address"
        ))?;
        let agent_snapshot_generation = Gauge::with_opts(opts!(
            "agent_snapshot_generation",
            "Generation number of the published snapshot"
        ))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;
        let agent_sampler_updates_total = CounterVec::new(
            opts!(
                "agent_sampler_updates_total",
                "Successful sampler cycles by sampler"
            ),
            &["sampler"],
        )?;
        let agent_collect_errors_total = CounterVec::new(
            opts!(
                "agent_collect_errors_total",
                "Failed sampler cycles by sampler"
            ),
            &["sampler"],
        )?;
        let agent_connections_total = Counter::with_opts(opts!(
            "agent_connections_total",
            "Accepted query connections"
        ))?;
        let agent_connections_active = Gauge::with_opts(opts!(
            "agent_connections_active",
            "Query connections currently being handled"
        ))?;
        let agent_connection_errors_total = CounterVec::new(
            opts!(
                "agent_connection_errors_total",
                "Query connection failures by stage"
            ),
            &["stage"],
        )?;
        let agent_requests_total = CounterVec::new(
            opts!("agent_requests_total", "Answered queries by route"),
            &["route"],
        )?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &agent_cpu_percent)?;
        register(&registry, &agent_load_average)?;
        register(&registry, &agent_memory_kilobytes)?;
        register(&registry, &agent_process_count)?;
        register(&registry, &agent_cpu_core_count)?;
        register(&registry, &agent_netif_count)?;
        register(&registry, &agent_snapshot_generation)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &agent_sampler_updates_total)?;
        register(&registry, &agent_collect_errors_total)?;
        register(&registry, &agent_connections_total)?;
        register(&registry, &agent_connections_active)?;
        register(&registry, &agent_connection_errors_total)?;
        register(&registry, &agent_requests_total)?;
        register(&registry, &agent_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            agent_cpu_percent,
            agent_load_average,
            agent_memory_kilobytes,
            agent_process_count,
            agent_cpu_core_count,
            agent_netif_count,
            agent_snapshot_generation,
            agent_uptime_seconds,
            agent_sampler_updates_total,
            agent_collect_errors_total,
            agent_connections_total,
            agent_connections_active,
            agent_connection_errors_total,
            agent_requests_total,
            agent_scrape_count_total,
        }))
    }

    pub fn update_from_snapshot(&self, snap: &Snapshot) {
        let cpu = [
            ("user", snap.cpu.user),
            ("nice", snap.cpu.nice),
            ("system", snap.cpu.system),
            ("idle", snap.cpu.idle),
            ("iowait", snap.cpu.iowait),
        ];
        for (mode, value) in cpu {
            self.agent_cpu_percent.with_label_values(&[mode]).set(value);
        }

        let load = [
            ("1m", snap.load.one),
            ("5m", snap.load.five),
            ("15m", snap.load.fifteen),
        ];
        for (window, value) in load {
            self.agent_load_average
                .with_label_values(&[window])
                .set(value);
        }

        let m = &snap.memory;
        let memory = [
            ("total_ram", m.total_ram_kb),
            ("free_ram", m.free_ram_kb),
            ("shared_ram", m.shared_ram_kb),
            ("buffer_ram", m.buffer_ram_kb),
            ("total_swap", m.total_swap_kb),
            ("free_swap", m.free_swap_kb),
            ("total_high", m.total_high_kb),
            ("free_high", m.free_high_kb),
        ];
        for (kind, value) in memory {
            self.agent_memory_kilobytes
                .with_label_values(&[kind])
                .set(value as f64);
        }

        self.agent_process_count.set(m.process_count as f64);
        self.agent_cpu_core_count.set(f64::from(snap.cores));
        self.agent_netif_count.set(snap.interfaces.len() as f64);
        self.agent_snapshot_generation.set(snap.generation as f64);
        self.agent_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn inc_sampler_update(&self, sampler: &str) {
        self.agent_sampler_updates_total
            .with_label_values(&[sampler])
            .inc();
    }

    pub fn inc_collect_error(&self, sampler: &str) {
        self.agent_collect_errors_total
            .with_label_values(&[sampler])
            .inc();
    }

    #[cfg(test)]
    pub fn collect_errors(&self, sampler: &str) -> f64 {
        self.agent_collect_errors_total
            .with_label_values(&[sampler])
            .get()
    }

    pub fn connection_opened(&self) {
        self.agent_connections_total.inc();
        self.agent_connections_active.inc();
    }

    pub fn connection_closed(&self) {
        self.agent_connections_active.dec();
    }

    pub fn inc_connection_error(&self, stage: &str) {
        self.agent_connection_errors_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn inc_request(&self, route: &str) {
        self.agent_requests_total
            .with_label_values(&[route])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
