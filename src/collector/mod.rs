pub mod cpu;
pub mod memory;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::AcquisitionError;

pub use cpu::{usage_ratio as cpu_usage_ratio, CpuCounters};
pub use memory::MemorySnapshot;

/// One reading of both tracked metrics, taken in a single call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSnapshot {
    pub cpu: CpuCounters,
    pub memory: MemorySnapshot,
}

/// Source of raw host counters.
///
/// CPU counters must be monotonically non-decreasing between calls; memory
/// figures are instantaneous. The sampler calls `snapshot` once per tick.
#[async_trait]
pub trait MetricSource: Send {
    /// Human-readable name for this source (e.g., "procfs")
    fn name(&self) -> &str;

    async fn snapshot(&mut self) -> Result<HostSnapshot, AcquisitionError>;
}

/// Reads /proc/stat and /proc/meminfo below a configurable root.
pub struct ProcSource {
    stat_path: PathBuf,
    meminfo_path: PathBuf,
}

impl ProcSource {
    pub fn new(proc_root: impl AsRef<Path>) -> Self {
        let root = proc_root.as_ref();
        Self {
            stat_path: root.join("stat"),
            meminfo_path: root.join("meminfo"),
        }
    }

    async fn read(path: &Path) -> Result<String, AcquisitionError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AcquisitionError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl MetricSource for ProcSource {
    fn name(&self) -> &str {
        "procfs"
    }

    async fn snapshot(&mut self) -> Result<HostSnapshot, AcquisitionError> {
        let stat = Self::read(&self.stat_path).await?;
        let meminfo = Self::read(&self.meminfo_path).await?;

        Ok(HostSnapshot {
            cpu: CpuCounters::parse_stat(&stat, &self.stat_path)?,
            memory: MemorySnapshot::parse_meminfo(&meminfo, &self.meminfo_path)?,
        })
    }
}
