use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            log_level: default_log_level(),
            proc_root: default_proc_root(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplerConfig {
    /// Tick cadence; also the spacing of the two CPU counter snapshots
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Consecutive acquisition failures before health is reported degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    /// Queue depth step at which a backlog warning is logged
    #[serde(default = "default_backlog_warn")]
    pub backlog_warn: usize,
    /// Use running sums instead of recomputing window statistics
    #[serde(default)]
    pub incremental_stats: bool,
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            window_capacity: default_window_capacity(),
            degraded_after: default_degraded_after(),
            backlog_warn: default_backlog_warn(),
            incremental_stats: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdConfig {
    #[serde(default = "default_warn")]
    pub warn: f64,
    #[serde(default = "default_anomaly")]
    pub anomaly: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warn: default_warn(),
            anomaly: default_anomaly(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_format")]
    pub format: OutputFormat,
    #[serde(default = "default_true")]
    pub flush_every_record: bool,
    #[serde(default = "default_append_retries")]
    pub append_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            format: default_format(),
            flush_every_record: true,
            append_retries: default_append_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse a TOML document, expanding `${ENV_VAR}` references first
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;

        let config: Config =
            toml::from_str(&expanded).with_context(|| "Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampler.interval_ms == 0 {
            bail!("sampler.interval_ms must be greater than zero");
        }
        if self.sampler.window_capacity == 0 {
            bail!("sampler.window_capacity must be at least 1");
        }
        if self.sampler.degraded_after == 0 {
            bail!("sampler.degraded_after must be at least 1");
        }
        if self.sampler.backlog_warn == 0 {
            bail!("sampler.backlog_warn must be at least 1");
        }

        let t = &self.thresholds;
        if !t.warn.is_finite() || !t.anomaly.is_finite() {
            bail!("thresholds must be finite numbers");
        }
        if t.warn < 0.0 {
            bail!("thresholds.warn must not be negative (got {})", t.warn);
        }
        if t.warn >= t.anomaly {
            bail!(
                "thresholds.warn ({}) must be lower than thresholds.anomaly ({})",
                t.warn,
                t.anomaly
            );
        }

        if self.output.path.as_os_str().is_empty() {
            bail!("output.path must not be empty");
        }
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_proc_root() -> PathBuf { PathBuf::from("/proc") }
fn default_interval_ms() -> u64 { 1000 }
fn default_window_capacity() -> usize { 30 }
fn default_degraded_after() -> u32 { 3 }
fn default_backlog_warn() -> usize { 1000 }
fn default_warn() -> f64 { 1.5 }
fn default_anomaly() -> f64 { 3.0 }
fn default_output_path() -> PathBuf { PathBuf::from("sample.csv") }
fn default_format() -> OutputFormat { OutputFormat::Csv }
fn default_true() -> bool { true }
fn default_append_retries() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 50 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.sampler.interval(), Duration::from_secs(1));
        assert_eq!(config.sampler.window_capacity, 30);
        assert_eq!(config.output.format, OutputFormat::Csv);
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("SYSANOMALY_TEST_OUT", "/tmp/out.csv");
        let config = Config::parse(
            r#"
[output]
path = "${SYSANOMALY_TEST_OUT}"
"#,
        )
        .unwrap();
        assert_eq!(config.output.path, PathBuf::from("/tmp/out.csv"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = Config::parse(
            r#"
[thresholds]
warn = 3.0
anomaly = 1.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be lower"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config = Config::default();
        config.sampler.window_capacity = 0;
        assert!(config.validate().is_err());
    }
}
