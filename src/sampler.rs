//! Tick-driven sampling, scoring and classification.
//!
//! [`Sampler`] holds the per-tick logic and owns both rolling windows. It is
//! a plain state machine fed one snapshot at a time. [`SamplerLoop`] drives
//! it from a [`MetricSource`] at a fixed cadence and publishes records into
//! the sample channel until shutdown is requested.
//!
//! The loop takes one priming snapshot before its first tick so that every
//! tick can derive a CPU usage. A tick's z-scores are computed against the
//! window as it stood *before* that tick's observation is pushed. The first
//! `capacity` successful ticks therefore only fill the windows, and the tick
//! after that emits the first record. Ticks whose snapshot could not be
//! acquired leave the windows untouched and do not count toward warm-up.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::{anomaly_score, z_score, BaselineWindow, Classifier, RollingWindow};
use crate::channel::RecordSender;
use crate::collector::{cpu_usage_ratio, CpuCounters, HostSnapshot, MetricSource};
use crate::error::{AcquisitionError, ChannelClosed};
use crate::types::Record;

/// Why a tick produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source failed to deliver a snapshot
    Acquisition,
    /// No CPU time elapsed between the two counter snapshots
    CpuCountersStalled,
    /// The memory snapshot reported a zero total
    MemoryTotalZero,
}

/// Result of feeding one snapshot to the sampler
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No CPU baseline yet because priming failed; this snapshot becomes it
    Primed,
    /// Windows updated, but the baseline is not full yet
    WarmingUp { filled: usize, capacity: usize },
    Emitted(Record),
    Skipped(SkipReason),
}

/// Running counters describing the sampler's health
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerHealth {
    pub ticks: u64,
    /// Ticks that updated both windows
    pub observations: u64,
    pub records: u64,
    pub skipped: u64,
    pub consecutive_failures: u32,
    pub degraded: bool,
    /// Failure streaks that reached the degraded threshold
    pub degraded_episodes: u64,
}

pub struct Sampler<W = RollingWindow> {
    cpu_window: W,
    mem_window: W,
    classifier: Classifier,
    prev_cpu: Option<CpuCounters>,
    degraded_after: u32,
    health: SamplerHealth,
}

impl<W: BaselineWindow> Sampler<W> {
    pub fn new(capacity: usize, classifier: Classifier, degraded_after: u32) -> Self {
        Self {
            cpu_window: W::with_capacity(capacity),
            mem_window: W::with_capacity(capacity),
            classifier,
            prev_cpu: None,
            degraded_after: degraded_after.max(1),
            health: SamplerHealth::default(),
        }
    }

    pub fn health(&self) -> &SamplerHealth {
        &self.health
    }

    pub fn capacity(&self) -> usize {
        self.cpu_window.capacity()
    }

    pub fn is_warm(&self) -> bool {
        self.cpu_window.is_full() && self.mem_window.is_full()
    }

    /// Seed the CPU counters ahead of the first tick.
    ///
    /// Not a tick: health counters are untouched. Returns `false` when the
    /// snapshot failed, in which case the first successful tick primes
    /// instead.
    pub fn prime(&mut self, snapshot: Result<HostSnapshot, AcquisitionError>) -> bool {
        match snapshot {
            Ok(s) => {
                self.prev_cpu = Some(s.cpu);
                true
            }
            Err(e) => {
                warn!(error = %e, "Priming snapshot failed, first tick will prime instead");
                false
            }
        }
    }

    /// Process one tick's snapshot taken at `timestamp` (Unix seconds).
    pub fn observe(
        &mut self,
        snapshot: Result<HostSnapshot, AcquisitionError>,
        timestamp: i64,
    ) -> TickOutcome {
        self.health.ticks += 1;

        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                self.record_failure(&e);
                return self.skip(SkipReason::Acquisition);
            }
        };
        self.record_success();

        let prev = match self.prev_cpu.replace(snapshot.cpu) {
            Some(prev) => prev,
            None => return TickOutcome::Primed,
        };

        let cpu_usage = match cpu_usage_ratio(&prev, &snapshot.cpu) {
            Some(u) => u,
            None => {
                warn!("CPU counters did not advance, skipping tick");
                return self.skip(SkipReason::CpuCountersStalled);
            }
        };
        let mem_usage = match snapshot.memory.usage_ratio() {
            Some(u) => u,
            None => {
                warn!("Memory total reported as zero, skipping tick");
                return self.skip(SkipReason::MemoryTotalZero);
            }
        };

        let baseline = self.cpu_window.stats().zip(self.mem_window.stats());
        self.cpu_window.push(cpu_usage);
        self.mem_window.push(mem_usage);
        self.health.observations += 1;

        let (cpu_stats, mem_stats) = match baseline {
            Some(b) => b,
            None => {
                return TickOutcome::WarmingUp {
                    filled: self.cpu_window.len(),
                    capacity: self.cpu_window.capacity(),
                }
            }
        };

        let cpu_z = z_score(cpu_usage, &cpu_stats);
        let mem_z = z_score(mem_usage, &mem_stats);
        let score = anomaly_score(cpu_z, mem_z);

        self.health.records += 1;
        TickOutcome::Emitted(Record {
            timestamp,
            cpu_usage,
            mem_usage,
            cpu_mean: cpu_stats.mean,
            mem_mean: mem_stats.mean,
            cpu_std: cpu_stats.std_dev,
            mem_std: mem_stats.std_dev,
            cpu_z,
            mem_z,
            anomaly_score: score,
            state: self.classifier.classify(score),
        })
    }

    fn skip(&mut self, reason: SkipReason) -> TickOutcome {
        self.health.skipped += 1;
        TickOutcome::Skipped(reason)
    }

    fn record_failure(&mut self, err: &AcquisitionError) {
        self.health.consecutive_failures += 1;
        let failures = self.health.consecutive_failures;

        if failures == self.degraded_after {
            self.health.degraded = true;
            self.health.degraded_episodes += 1;
            warn!(
                consecutive_failures = failures,
                error = %err,
                "Metric source degraded"
            );
        } else {
            warn!(consecutive_failures = failures, error = %err, "Snapshot acquisition failed, skipping tick");
        }
    }

    fn record_success(&mut self) {
        if self.health.degraded {
            info!(
                failed_ticks = self.health.consecutive_failures,
                "Metric source recovered"
            );
        }
        self.health.consecutive_failures = 0;
        self.health.degraded = false;
    }
}

/// Drives a [`Sampler`] at a fixed cadence and publishes its records.
pub struct SamplerLoop<S, W = RollingWindow> {
    sampler: Sampler<W>,
    source: S,
    tx: RecordSender,
    interval: Duration,
    backlog_warn: usize,
}

impl<S: MetricSource, W: BaselineWindow> SamplerLoop<S, W> {
    pub fn new(sampler: Sampler<W>, source: S, tx: RecordSender, interval: Duration) -> Self {
        Self {
            sampler,
            source,
            tx,
            interval: interval.max(Duration::from_millis(1)),
            backlog_warn: 1000,
        }
    }

    /// Queue depth step at which a backlog warning is logged
    pub fn with_backlog_warn(mut self, backlog_warn: usize) -> Self {
        self.backlog_warn = backlog_warn.max(1);
        self
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between ticks; a tick that has started
    /// always completes. The sender is dropped on return, which ends the
    /// stream for the consumer.
    pub async fn run(mut self, shutdown: CancellationToken) -> SamplerHealth {
        info!(
            source = self.source.name(),
            interval_ms = self.interval.as_millis() as u64,
            capacity = self.sampler.capacity(),
            "Starting sampler"
        );

        if !shutdown.is_cancelled() {
            let snapshot = self.source.snapshot().await;
            if self.sampler.prime(snapshot) {
                debug!("CPU counters primed");
            }
        }

        // First tick one period after priming so the CPU counters can move.
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Stop requested, sampler stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let snapshot = self.source.snapshot().await;
            let timestamp = chrono::Utc::now().timestamp();

            match self.sampler.observe(snapshot, timestamp) {
                TickOutcome::Emitted(record) => {
                    if let Err(ChannelClosed(record)) = self.publish(record) {
                        error!(
                            timestamp = record.timestamp,
                            "Sample channel closed, record lost; sampler stopping"
                        );
                        break;
                    }
                }
                TickOutcome::WarmingUp { filled, capacity } if filled == capacity => {
                    info!(capacity, "Warm-up complete, emitting from next tick");
                }
                TickOutcome::WarmingUp { filled, capacity } => {
                    debug!(filled, capacity, "Warming up");
                }
                TickOutcome::Primed => debug!("CPU counters primed on first successful tick"),
                TickOutcome::Skipped(reason) => debug!(?reason, "Tick skipped"),
            }
        }

        let health = self.sampler.health().clone();
        info!(
            ticks = health.ticks,
            records = health.records,
            skipped = health.skipped,
            "Sampler stopped"
        );
        health
    }

    fn publish(&self, record: Record) -> Result<(), ChannelClosed> {
        let state = record.state;
        let score = record.anomaly_score;
        let depth = self.tx.push(record)?;

        debug!(%state, score, depth, "Record queued");
        if depth % self.backlog_warn == 0 {
            warn!(depth, "Persister falling behind, sample queue growing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::IncrementalWindow;
    use crate::collector::MemorySnapshot;
    use crate::types::State;

    fn fixed(user: u64, idle: u64) -> HostSnapshot {
        HostSnapshot {
            cpu: CpuCounters { user, idle, ..Default::default() },
            memory: MemorySnapshot { total_kb: 100, available_kb: 50 },
        }
    }

    fn sampler(capacity: usize) -> Sampler {
        Sampler::new(capacity, Classifier::new(1.5, 3.0), 3)
    }

    fn fail() -> Result<HostSnapshot, AcquisitionError> {
        Err(AcquisitionError::Unavailable("test".into()))
    }

    /// Counters that advance by exactly `busy` busy and `idle` idle jiffies per tick
    struct Counters {
        cpu: CpuCounters,
    }

    impl Counters {
        fn new() -> Self {
            Self { cpu: CpuCounters::default() }
        }

        fn next(&mut self, busy: u64, idle: u64, mem_used_pct: u64) -> HostSnapshot {
            self.cpu.user += busy;
            self.cpu.idle += idle;
            HostSnapshot {
                cpu: self.cpu,
                memory: MemorySnapshot { total_kb: 100, available_kb: 100 - mem_used_pct },
            }
        }
    }

    #[test]
    fn test_primed_sampler_observes_on_first_tick() {
        let mut s = sampler(3);
        let mut c = Counters::new();
        assert!(s.prime(Ok(c.next(0, 0, 0))));
        assert_eq!(s.health().ticks, 0);

        let out = s.observe(Ok(c.next(10, 90, 40)), 1);
        assert_eq!(out, TickOutcome::WarmingUp { filled: 1, capacity: 3 });
        assert_eq!(s.health().observations, 1);
    }

    #[test]
    fn test_failed_prime_falls_back_to_first_tick() {
        let mut s = sampler(3);
        assert!(!s.prime(fail()));
        assert_eq!(s.health().consecutive_failures, 0);
        assert_eq!(s.observe(Ok(fixed(0, 0)), 0), TickOutcome::Primed);
        assert_eq!(s.health().observations, 0);
    }

    #[test]
    fn test_warm_up_then_first_record_on_capacity_plus_one() {
        let capacity = 5;
        let mut s = sampler(capacity);
        let mut c = Counters::new();
        s.prime(Ok(c.next(0, 0, 0)));

        for i in 1..=capacity {
            let out = s.observe(Ok(c.next(10 * i as u64, 100, 40)), i as i64);
            assert_eq!(
                out,
                TickOutcome::WarmingUp { filled: i, capacity },
                "tick {} must not emit",
                i
            );
        }
        assert!(s.is_warm());

        match s.observe(Ok(c.next(30, 100, 40)), 99) {
            TickOutcome::Emitted(r) => {
                assert_eq!(s.health().ticks, capacity as u64 + 1);
                assert_eq!(r.timestamp, 99);
                assert_eq!(r.mem_std, 0.0);
                assert_eq!(r.mem_z, 0.0);
            }
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_record_fields_against_prior_baseline() {
        let mut s = sampler(3);
        let mut c = Counters::new();
        s.prime(Ok(c.next(0, 0, 0)));
        // cpu usage 0.1, 0.2, 0.3 then 0.4
        for busy in [10, 20, 30] {
            s.observe(Ok(c.next(busy, 100 - busy, 50)), 1);
        }
        let r = match s.observe(Ok(c.next(40, 60, 50)), 4) {
            TickOutcome::Emitted(r) => r,
            other => panic!("expected a record, got {:?}", other),
        };

        assert!((r.cpu_usage - 0.4).abs() < 1e-12);
        assert!((r.cpu_mean - 0.2).abs() < 1e-12);
        assert!((r.cpu_std - 0.081_649_658).abs() < 1e-6);
        assert!((r.cpu_z - 0.2 / r.cpu_std).abs() < 1e-9);
        assert_eq!(r.mem_usage, 0.5);
        assert_eq!(r.mem_z, 0.0);
        assert_eq!(r.anomaly_score, r.cpu_z.abs() + r.mem_z.abs());
        assert_eq!(r.state, State::Warning);
    }

    #[test]
    fn test_spike_is_classified_anomaly() {
        let mut s = sampler(10);
        let mut c = Counters::new();
        s.prime(Ok(c.next(0, 0, 0)));
        for i in 0..10 {
            let busy = if i % 2 == 0 { 10 } else { 12 };
            s.observe(Ok(c.next(busy, 100 - busy, 30)), i);
        }
        match s.observe(Ok(c.next(95, 5, 90)), 11) {
            TickOutcome::Emitted(r) => {
                assert_eq!(r.state, State::Anomaly);
                assert!(r.cpu_z > 3.0);
            }
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_tick_leaves_windows_untouched() {
        let mut s = sampler(3);
        let mut c = Counters::new();
        s.prime(Ok(c.next(0, 0, 0)));
        s.observe(Ok(c.next(10, 90, 10)), 1);

        assert_eq!(s.observe(fail(), 2), TickOutcome::Skipped(SkipReason::Acquisition));
        assert_eq!(s.health().observations, 1);

        let out = s.observe(Ok(c.next(10, 90, 10)), 3);
        assert_eq!(out, TickOutcome::WarmingUp { filled: 2, capacity: 3 });
    }

    #[test]
    fn test_failure_on_tick_five_costs_exactly_one_record() {
        let run = |fail_on: Option<usize>| {
            let mut s: Sampler = sampler(30);
            let mut c = Counters::new();
            s.prime(Ok(c.next(0, 0, 0)));
            let mut emitted = 0;
            for tick in 1..=40 {
                let snap = if Some(tick) == fail_on {
                    fail()
                } else {
                    Ok(c.next(10 + (tick as u64 % 7), 90, 20 + (tick as u64 % 5)))
                };
                if let TickOutcome::Emitted(_) = s.observe(snap, tick as i64) {
                    emitted += 1;
                }
            }
            emitted
        };

        assert_eq!(run(None), 10);
        assert_eq!(run(Some(5)), 9);
        // The same holds for a failure after warm-up.
        assert_eq!(run(Some(35)), 9);
    }

    #[test]
    fn test_stalled_counters_are_skipped() {
        let mut s = sampler(3);
        let snap = fixed(150, 950);
        s.prime(Ok(snap));
        assert_eq!(
            s.observe(Ok(snap), 1),
            TickOutcome::Skipped(SkipReason::CpuCountersStalled)
        );
        assert_eq!(s.health().observations, 0);
    }

    #[test]
    fn test_zero_memory_total_is_skipped() {
        let mut s = sampler(3);
        let mut c = Counters::new();
        s.prime(Ok(c.next(0, 0, 0)));
        let mut snap = c.next(10, 90, 0);
        snap.memory = MemorySnapshot::default();
        assert_eq!(
            s.observe(Ok(snap), 1),
            TickOutcome::Skipped(SkipReason::MemoryTotalZero)
        );
        assert_eq!(s.health().observations, 0);
    }

    #[test]
    fn test_degraded_after_consecutive_failures() {
        let mut s = sampler(3);
        s.observe(fail(), 0);
        s.observe(fail(), 1);
        assert!(!s.health().degraded);
        s.observe(fail(), 2);
        assert!(s.health().degraded);
        s.observe(fail(), 3);
        assert!(s.health().degraded);
        assert_eq!(s.health().consecutive_failures, 4);
        assert_eq!(s.health().degraded_episodes, 1);

        s.observe(Ok(fixed(110, 990)), 4);
        assert!(!s.health().degraded);
        assert_eq!(s.health().consecutive_failures, 0);
    }

    #[test]
    fn test_incremental_window_gives_same_records() {
        let mut plain: Sampler<RollingWindow> = Sampler::new(8, Classifier::new(1.5, 3.0), 3);
        let mut inc: Sampler<IncrementalWindow> = Sampler::new(8, Classifier::new(1.5, 3.0), 3);
        let mut c = Counters::new();
        for tick in 0..200u64 {
            let snap = c.next(5 + (tick * 37) % 90, 50, (tick * 13) % 100);
            match (plain.observe(Ok(snap), 0), inc.observe(Ok(snap), 0)) {
                (TickOutcome::Emitted(a), TickOutcome::Emitted(b)) => {
                    assert!((a.cpu_mean - b.cpu_mean).abs() < 1e-9);
                    assert!((a.mem_std - b.mem_std).abs() < 1e-6);
                    assert_eq!(a.state, b.state);
                }
                (a, b) => assert_eq!(a, b),
            }
        }
    }
}
