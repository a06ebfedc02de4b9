use crate::config::ThresholdConfig;
use crate::types::State;

/// Maps a composite anomaly score onto a [`State`].
///
/// `score < warn` is NORMAL, `warn <= score < anomaly` is WARNING and
/// `score >= anomaly` is ANOMALY. Stateless: the result depends only on the
/// score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    warn: f64,
    anomaly: f64,
}

impl Classifier {
    /// Thresholds must satisfy `0 <= warn < anomaly`; config validation
    /// enforces this before a classifier is built.
    pub fn new(warn: f64, anomaly: f64) -> Self {
        debug_assert!(warn < anomaly);
        Self { warn, anomaly }
    }

    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self::new(config.warn, config.anomaly)
    }

    pub fn classify(&self, score: f64) -> State {
        if score >= self.anomaly {
            State::Anomaly
        } else if score >= self.warn {
            State::Warning
        } else {
            State::Normal
        }
    }

    pub fn warn(&self) -> f64 {
        self.warn
    }

    pub fn anomaly(&self) -> f64 {
        self.anomaly
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&ThresholdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries() {
        let c = Classifier::new(1.5, 3.0);
        assert_eq!(c.classify(0.0), State::Normal);
        assert_eq!(c.classify(1.499), State::Normal);
        assert_eq!(c.classify(1.5), State::Warning);
        assert_eq!(c.classify(2.999), State::Warning);
        assert_eq!(c.classify(3.0), State::Anomaly);
        assert_eq!(c.classify(42.0), State::Anomaly);
    }

    #[test]
    fn test_default_thresholds() {
        let c = Classifier::default();
        assert_eq!(c.warn(), 1.5);
        assert_eq!(c.anomaly(), 3.0);
    }

    proptest! {
        #[test]
        fn prop_classification_is_monotonic(
            warn in 0.0f64..10.0,
            gap in 0.001f64..10.0,
            a in 0.0f64..30.0,
            b in 0.0f64..30.0,
        ) {
            let c = Classifier::new(warn, warn + gap);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(c.classify(lo) <= c.classify(hi));
        }
    }
}
