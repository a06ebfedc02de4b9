use std::path::Path;

use crate::error::AcquisitionError;

/// Instantaneous memory figures from /proc/meminfo, in kB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemorySnapshot {
    pub fn parse_meminfo(content: &str, path: &Path) -> Result<Self, AcquisitionError> {
        let mut total_kb = None;
        let mut available_kb = None;
        let mut free_kb = 0u64;
        let mut buffers_kb = 0u64;
        let mut cached_kb = 0u64;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 { continue; }
            let val: u64 = match parts[1].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            match parts[0] {
                "MemTotal:" => total_kb = Some(val),
                "MemAvailable:" => available_kb = Some(val),
                "MemFree:" => free_kb = val,
                "Buffers:" => buffers_kb = val,
                "Cached:" => cached_kb = val,
                _ => {}
            }
        }

        let total_kb = total_kb.ok_or_else(|| AcquisitionError::MissingField {
            path: path.to_path_buf(),
            field: "MemTotal",
        })?;

        // Fallback for kernels without MemAvailable
        let available_kb = available_kb.unwrap_or(free_kb + buffers_kb + cached_kb);

        Ok(Self { total_kb, available_kb })
    }

    /// `1 - available/total`, clamped to [0,1]; `None` when total is zero
    pub fn usage_ratio(&self) -> Option<f64> {
        if self.total_kb == 0 {
            return None;
        }
        let usage = 1.0 - self.available_kb as f64 / self.total_kb as f64;
        Some(usage.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB
MemFree:         2000000 kB
MemAvailable:    4000000 kB
Buffers:          500000 kB
Cached:          1500000 kB
SwapTotal:       2000000 kB
";

    #[test]
    fn test_parse_with_available() {
        let m = MemorySnapshot::parse_meminfo(MEMINFO, Path::new("/proc/meminfo")).unwrap();
        assert_eq!(m.total_kb, 16_000_000);
        assert_eq!(m.available_kb, 4_000_000);
        assert_eq!(m.usage_ratio(), Some(0.75));
    }

    #[test]
    fn test_fallback_without_available() {
        let content = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 100 kB\n";
        let m = MemorySnapshot::parse_meminfo(content, Path::new("/proc/meminfo")).unwrap();
        assert_eq!(m.available_kb, 250);
        assert_eq!(m.usage_ratio(), Some(0.75));
    }

    #[test]
    fn test_missing_total() {
        let err = MemorySnapshot::parse_meminfo("MemFree: 1 kB\n", Path::new("/proc/meminfo"))
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::MissingField { field: "MemTotal", .. }));
    }

    #[test]
    fn test_usage_is_clamped() {
        let m = MemorySnapshot { total_kb: 100, available_kb: 250 };
        assert_eq!(m.usage_ratio(), Some(0.0));
        let m = MemorySnapshot { total_kb: 0, available_kb: 0 };
        assert_eq!(m.usage_ratio(), None);
    }
}
