pub mod analyzer;
pub mod channel;
pub mod collector;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sampler;
pub mod shutdown;
pub mod storage;

/// Common types used across modules
pub mod types {
    use serde::{Deserialize, Serialize};

    /// Classification of a single observation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum State {
        Normal,
        Warning,
        Anomaly,
    }

    impl std::fmt::Display for State {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                State::Normal => write!(f, "NORMAL"),
                State::Warning => write!(f, "WARNING"),
                State::Anomaly => write!(f, "ANOMALY"),
            }
        }
    }

    /// One labeled observation.
    ///
    /// Field order is the positional output contract: downstream tooling
    /// parses the columns in exactly this order.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Record {
        pub timestamp: i64,
        pub cpu_usage: f64,
        pub mem_usage: f64,
        pub cpu_mean: f64,
        pub mem_mean: f64,
        pub cpu_std: f64,
        pub mem_std: f64,
        pub cpu_z: f64,
        pub mem_z: f64,
        pub anomaly_score: f64,
        pub state: State,
    }

    impl Record {
        /// Column names in output order
        pub const FIELDS: [&'static str; 11] = [
            "timestamp",
            "cpu_usage",
            "mem_usage",
            "cpu_mean",
            "mem_mean",
            "cpu_std",
            "mem_std",
            "cpu_z",
            "mem_z",
            "anomaly_score",
            "state",
        ];

        /// Render as one CSV row (no trailing newline)
        pub fn to_csv_row(&self) -> String {
            format!(
                "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
                self.timestamp,
                self.cpu_usage,
                self.mem_usage,
                self.cpu_mean,
                self.mem_mean,
                self.cpu_std,
                self.mem_std,
                self.cpu_z,
                self.mem_z,
                self.anomaly_score,
                self.state,
            )
        }

        pub fn csv_header() -> String {
            Self::FIELDS.join(",")
        }
    }

}
