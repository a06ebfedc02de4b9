pub mod threshold;
pub mod window;
pub mod zscore;

pub use threshold::Classifier;
pub use window::{BaselineWindow, IncrementalWindow, RollingWindow, WindowStats};
pub use zscore::{anomaly_score, z_score};
