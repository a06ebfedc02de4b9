use std::path::Path;

use crate::error::AcquisitionError;

/// Cumulative jiffy counters from the aggregate `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuCounters {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Parse the aggregate `cpu ` line out of a /proc/stat document
    pub fn parse_stat(content: &str, path: &Path) -> Result<Self, AcquisitionError> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| AcquisitionError::MissingField {
                path: path.to_path_buf(),
                field: "cpu",
            })?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| AcquisitionError::Parse {
                path: path.to_path_buf(),
                reason: format!("bad cpu counter: {}", e),
            })?;

        // Kernels before 2.6 report only user/nice/system/idle.
        if fields.len() < 4 {
            return Err(AcquisitionError::Parse {
                path: path.to_path_buf(),
                reason: format!("expected at least 4 cpu fields, found {}", fields.len()),
            });
        }

        let at = |i: usize| fields.get(i).copied().unwrap_or(0);
        Ok(Self {
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            softirq: at(6),
            steal: at(7),
        })
    }
}

/// Busy fraction between two snapshots taken one tick apart.
///
/// Only `idle` counts as idle time; iowait is treated as busy. Counters that
/// went backwards contribute zero. Returns `None` when no time elapsed,
/// since the ratio is undefined.
pub fn usage_ratio(prev: &CpuCounters, curr: &CpuCounters) -> Option<f64> {
    let delta = |a: u64, b: u64| b.saturating_sub(a);
    let idle_delta = delta(prev.idle, curr.idle);
    let total_delta = delta(prev.user, curr.user)
        + delta(prev.nice, curr.nice)
        + delta(prev.system, curr.system)
        + idle_delta
        + delta(prev.iowait, curr.iowait)
        + delta(prev.irq, curr.irq)
        + delta(prev.softirq, curr.softirq)
        + delta(prev.steal, curr.steal);

    if total_delta == 0 {
        return None;
    }

    let usage = (total_delta - idle_delta) as f64 / total_delta as f64;
    Some(usage.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  4705 356 584 3699176 23 0 30 0 0 0
cpu0 1393 280 290 1832346 17 0 20 0 0 0
intr 114930548 113199788 3 0 5 263 0 4
ctxt 1990473
btime 1062191376
";

    #[test]
    fn test_parse_aggregate_line() {
        let c = CpuCounters::parse_stat(STAT, Path::new("/proc/stat")).unwrap();
        assert_eq!(c.user, 4705);
        assert_eq!(c.nice, 356);
        assert_eq!(c.idle, 3_699_176);
        assert_eq!(c.softirq, 30);
        assert_eq!(c.total(), 4705 + 356 + 584 + 3_699_176 + 23 + 30);
    }

    #[test]
    fn test_parse_missing_cpu_line() {
        let err = CpuCounters::parse_stat("intr 1 2 3\n", Path::new("/proc/stat")).unwrap_err();
        assert!(matches!(err, AcquisitionError::MissingField { field: "cpu", .. }));
    }

    #[test]
    fn test_parse_garbage_counter() {
        let err = CpuCounters::parse_stat("cpu 1 2 x 4\n", Path::new("/proc/stat")).unwrap_err();
        assert!(matches!(err, AcquisitionError::Parse { .. }));
    }

    #[test]
    fn test_usage_half_busy() {
        let t0 = CpuCounters { user: 100, idle: 900, ..Default::default() };
        let t1 = CpuCounters { user: 150, idle: 950, ..Default::default() };
        assert_eq!(usage_ratio(&t0, &t1), Some(0.5));
    }

    #[test]
    fn test_iowait_counts_as_busy() {
        let t0 = CpuCounters { idle: 100, iowait: 0, ..Default::default() };
        let t1 = CpuCounters { idle: 150, iowait: 50, ..Default::default() };
        assert_eq!(usage_ratio(&t0, &t1), Some(0.5));
    }

    #[test]
    fn test_stalled_counters_are_undefined() {
        let t0 = CpuCounters { user: 10, idle: 90, ..Default::default() };
        assert_eq!(usage_ratio(&t0, &t0), None);
    }

    #[test]
    fn test_counter_reset_stays_in_range() {
        let t0 = CpuCounters { user: 1000, idle: 9000, ..Default::default() };
        let t1 = CpuCounters { user: 10, idle: 9100, ..Default::default() };
        assert_eq!(usage_ratio(&t0, &t1), Some(0.0));
    }
}
