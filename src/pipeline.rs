//! Wiring of source, sampler, channel and persister.
//!
//! Shutdown runs strictly in this order: the sampler stops at its next tick
//! boundary and drops its sender, the persister drains what is queued,
//! flushes and closes, and only then does [`Pipeline::run`] return.

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::analyzer::{BaselineWindow, Classifier, IncrementalWindow, RollingWindow};
use crate::channel::{sample_channel, RecordReceiver, RecordSender};
use crate::collector::MetricSource;
use crate::config::{Config, SamplerConfig};
use crate::error::ShutdownError;
use crate::sampler::{Sampler, SamplerHealth, SamplerLoop};
use crate::shutdown::ShutdownCoordinator;
use crate::storage::{drain, DrainReport, Persister, RetryPolicy};

/// Final accounting of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub sampler: SamplerHealth,
    pub drain: DrainReport,
}

pub struct Pipeline<S, P> {
    source: S,
    persister: P,
    sampler: SamplerConfig,
    classifier: Classifier,
    retry: RetryPolicy,
}

impl<S, P> Pipeline<S, P>
where
    S: MetricSource + 'static,
    P: Persister + 'static,
{
    pub fn new(config: &Config, source: S, persister: P) -> Self {
        Self {
            source,
            persister,
            sampler: config.sampler.clone(),
            classifier: Classifier::from_config(&config.thresholds),
            retry: RetryPolicy::from_config(&config.output),
        }
    }

    /// Run until `shutdown` fires and the queue is fully persisted.
    pub async fn run(self, shutdown: &ShutdownCoordinator) -> Result<PipelineReport, ShutdownError> {
        let (tx, rx) = sample_channel();

        let retry = self.retry;
        let mut persister = self.persister;
        let consumer = tokio::task::spawn_blocking(move || {
            let mut rx: RecordReceiver = rx;
            drain(&mut rx, &mut persister, retry)
        });

        let producer = if self.sampler.incremental_stats {
            spawn_sampler::<S, IncrementalWindow>(&self.sampler, self.classifier, self.source, tx, shutdown)
        } else {
            spawn_sampler::<S, RollingWindow>(&self.sampler, self.classifier, self.source, tx, shutdown)
        };

        // A sampler that died still dropped its sender, so the drain below
        // terminates either way.
        let sampler_result = producer.await;
        if sampler_result.is_err() {
            error!("Sampler task failed; draining queued records before exit");
        }

        let drain_result = consumer
            .await
            .map_err(|e| ShutdownError::PersisterPanicked(e.to_string()))?;
        let sampler = sampler_result.map_err(|e| ShutdownError::SamplerPanicked(e.to_string()))?;
        let drain = drain_result?;

        info!(
            records = sampler.records,
            persisted = drain.persisted,
            "Pipeline shut down cleanly"
        );
        Ok(PipelineReport { sampler, drain })
    }
}

fn spawn_sampler<S, W>(
    config: &SamplerConfig,
    classifier: Classifier,
    source: S,
    tx: RecordSender,
    shutdown: &ShutdownCoordinator,
) -> JoinHandle<SamplerHealth>
where
    S: MetricSource + 'static,
    W: BaselineWindow + Send + 'static,
{
    let sampler: Sampler<W> = Sampler::new(config.window_capacity, classifier, config.degraded_after);
    let task = SamplerLoop::new(sampler, source, tx, config.interval())
        .with_backlog_warn(config.backlog_warn);
    tokio::spawn(task.run(shutdown.token()))
}
