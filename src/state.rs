use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub cpu: CpuUsage,
    pub load: LoadAverages,
    pub memory: MemoryStats,
    pub cores: u32,
    pub interfaces: Vec<NetInterface>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuUsage {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAverages {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_ram_kb: u64,
    pub free_ram_kb: u64,
    pub shared_ram_kb: u64,
    pub buffer_ram_kb: u64,
    pub total_swap_kb: u64,
    pub free_swap_kb: u64,
    pub total_high_kb: u64,
    pub free_high_kb: u64,
    pub mem_unit: u32,
    pub process_count: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub ipv4: Ipv4Addr,
}

impl Snapshot {
    pub fn new(cores: u32) -> Self {
        Self {
            cores,
            ..Self::default()
        }
    }
}

/// Generation-based publication point for the process-wide snapshot.
///
/// Writers apply their change to a private copy and publish it as a new
/// generation; readers get an `Arc` to a complete generation and never see a
/// half-applied update.
#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new(cores: u32) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::new(cores)));
        Self { tx: Arc::new(tx) }
    }

    pub fn publish<F>(&self, update: F) -> u64
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut generation = 0;
        self.tx.send_modify(|current| {
            let next = Arc::make_mut(current);
            update(next);
            next.generation += 1;
            generation = next.generation;
        });
        generation
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }
}
