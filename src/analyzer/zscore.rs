use super::window::WindowStats;

/// Standard deviations at or below this are treated as zero.
pub const MIN_STD_DEV: f64 = 1e-12;

/// Z-score of `value` against a baseline.
///
/// A flat baseline has no spread to measure against, so the score is 0.0
/// rather than a non-finite value.
pub fn z_score(value: f64, baseline: &WindowStats) -> f64 {
    if !baseline.std_dev.is_finite() || baseline.std_dev <= MIN_STD_DEV {
        return 0.0;
    }
    let z = (value - baseline.mean) / baseline.std_dev;
    if z.is_finite() {
        z
    } else {
        0.0
    }
}

/// Composite score: sum of absolute z-scores
pub fn anomaly_score(cpu_z: f64, mem_z: f64) -> f64 {
    cpu_z.abs() + mem_z.abs()
}
