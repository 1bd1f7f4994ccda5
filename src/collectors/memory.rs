use super::sources::{MemorySource, RawMemInfo};
use super::{SampleError, Sampler};
use crate::state::{MemoryStats, Snapshot};

fn to_kb(count: u64, unit: u32) -> u64 {
    let bytes = u128::from(count) * u128::from(unit);
    u64::try_from(bytes / 1024).unwrap_or(u64::MAX)
}

pub fn convert(raw: &RawMemInfo) -> MemoryStats {
    let unit = raw.mem_unit;
    MemoryStats {
        total_ram_kb: to_kb(raw.total_ram, unit),
        free_ram_kb: to_kb(raw.free_ram, unit),
        shared_ram_kb: to_kb(raw.shared_ram, unit),
        buffer_ram_kb: to_kb(raw.buffer_ram, unit),
        total_swap_kb: to_kb(raw.total_swap, unit),
        free_swap_kb: to_kb(raw.free_swap, unit),
        total_high_kb: to_kb(raw.total_high, unit),
        free_high_kb: to_kb(raw.free_high, unit),
        mem_unit: unit,
        process_count: raw.procs,
        uptime_secs: u64::try_from(raw.uptime_secs).unwrap_or(0),
    }
}

pub struct MemorySampler {
    source: Box<dyn MemorySource>,
}

impl MemorySampler {
    pub fn new(source: Box<dyn MemorySource>) -> Self {
        Self { source }
    }
}

impl Sampler for MemorySampler {
    const NAME: &'static str = "memory";
    type Output = MemoryStats;

    fn sample(&mut self) -> Result<MemoryStats, SampleError> {
        Ok(convert(&self.source.query()?))
    }

    fn apply(stats: MemoryStats, snapshot: &mut Snapshot) {
        snapshot.memory = stats;
    }
}
