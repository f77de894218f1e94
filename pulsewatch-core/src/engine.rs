//! Monitor Engine
//!
//! Single owner of the smoothing buffer, processing state and alert
//! escalator. [`MonitorEngine::process`] is the synchronous per-sample
//! step; [`MonitorEngine::run`] drives it from a bounded queue, hands
//! records to the sink writer and alerts to spawned dispatch tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::buffer::SmoothingBuffer;
use crate::classifier::{classify, is_rising_edge, ThresholdConfig, Tier};
use crate::error::ConfigError;
use crate::escalator::{dispatch, AlertEscalator, AlertResult, AlertTargets, Escalation, EscalationConfig};
use crate::notifier::Notifier;
use crate::sample::{Bpm, Sample, SampleRecord};
use crate::sink::{spawn_sink_writer, SampleSink};
use crate::throttle::should_process;
use crate::transport::SampleSender;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub min_interval: Duration,
    pub window_size: usize,
    pub resting_heart_rate: Bpm,
    pub thresholds: ThresholdConfig,
    pub escalation: EscalationConfig,
    pub targets: AlertTargets,
    /// Delivery reports kept for the final report; older ones are dropped.
    pub recent_alert_limit: usize,
    /// Records the sink writer may fall behind by before they are dropped.
    pub sink_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::seconds(5),
            window_size: 6,
            resting_heart_rate: 80,
            thresholds: ThresholdConfig { warning: 100, critical: 115 },
            escalation: EscalationConfig::default(),
            targets: AlertTargets::default(),
            recent_alert_limit: 32,
            sink_queue_capacity: 1024,
        }
    }
}

/// Mutated once per accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingState {
    /// `None` until the first sample is accepted.
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_average: Bpm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub received: u64,
    pub accepted: u64,
    pub throttled: u64,
    pub alerts_dispatched: u64,
    pub alerts_suppressed: u64,
    pub sink_failures: u64,
    pub delivery_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub record: SampleRecord,
    pub tier: Tier,
    pub escalation: Escalation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Throttled,
    Accepted(Accepted),
}

/// What a finished run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub stats: MonitorStats,
    /// The most recent delivery reports, oldest first.
    pub alerts: Vec<AlertResult>,
    pub final_average: Bpm,
}

/// Bounded sample queue feeding one engine.
pub fn sample_channel(capacity: usize) -> Result<(SampleSender, mpsc::Receiver<Sample>), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::ZeroQueue);
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((SampleSender::new(tx), rx))
}

pub struct MonitorEngine {
    settings: EngineSettings,
    buffer: SmoothingBuffer,
    state: ProcessingState,
    escalator: AlertEscalator,
    stats: MonitorStats,
}

impl MonitorEngine {
    pub fn new(settings: EngineSettings) -> Result<Self, ConfigError> {
        settings.thresholds.validate()?;
        if settings.sink_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        let buffer = SmoothingBuffer::seeded(settings.window_size, settings.resting_heart_rate)?;
        let escalator = AlertEscalator::new(settings.escalation.clone());

        debug!(
            "Engine ready: window {}, resting {} BPM, thresholds {}/{}",
            settings.window_size, settings.resting_heart_rate, settings.thresholds.warning, settings.thresholds.critical
        );

        Ok(Self {
            state: ProcessingState {
                last_processed_at: None,
                last_average: settings.resting_heart_rate,
            },
            settings,
            buffer,
            escalator,
            stats: MonitorStats::default(),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn buffer(&self) -> &SmoothingBuffer {
        &self.buffer
    }

    pub fn escalator(&self) -> &AlertEscalator {
        &self.escalator
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Run one sample through throttle, smoothing, classification and the
    /// alert decision. Time is taken from `sample.observed_at`.
    pub fn process(&mut self, sample: Sample) -> ProcessOutcome {
        self.stats.received += 1;

        let now = sample.observed_at;
        if !should_process(now, self.state.last_processed_at, self.settings.min_interval) {
            self.stats.throttled += 1;
            debug!("Throttled sample {} BPM", sample.value);
            return ProcessOutcome::Throttled;
        }

        self.buffer.push(sample.value);
        let average = self.buffer.average().unwrap_or(sample.value);
        let tier = classify(average, &self.settings.thresholds);
        let rising_edge = is_rising_edge(self.state.last_average, average, &self.settings.thresholds);

        info!("HR: {} BPM, average: {} BPM ({})", sample.value, average, tier);

        let escalation = self.escalator.maybe_notify(tier, rising_edge, &sample, average);
        match &escalation {
            Escalation::Fire(_) => self.stats.alerts_dispatched += 1,
            Escalation::Suppressed { .. } => self.stats.alerts_suppressed += 1,
            Escalation::Quiet => {}
        }

        self.state.last_processed_at = Some(now);
        self.state.last_average = average;
        self.stats.accepted += 1;

        ProcessOutcome::Accepted(Accepted {
            record: SampleRecord::new(&sample, average),
            tier,
            escalation,
        })
    }

    /// Process samples until every sender is dropped, then wait for
    /// in-flight alerts and the sink writer.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<Sample>,
        notifier: Arc<dyn Notifier>,
        sink: Box<dyn SampleSink>,
    ) -> MonitorReport {
        let (records, writer) = spawn_sink_writer(sink, self.settings.sink_queue_capacity);
        let targets = Arc::new(self.settings.targets.clone());
        let mut dispatches: JoinSet<AlertResult> = JoinSet::new();
        let mut alerts = VecDeque::with_capacity(self.settings.recent_alert_limit);

        info!("Monitoring started with notifier {}", notifier.name());

        loop {
            tokio::select! {
                received = samples.recv() => {
                    let sample = match received {
                        Some(sample) => sample,
                        None => break,
                    };

                    if let ProcessOutcome::Accepted(accepted) = self.process(sample) {
                        if records.submit(accepted.record).is_err() {
                            self.stats.sink_failures += 1;
                        }

                        if let Escalation::Fire(alert) = accepted.escalation {
                            let notifier = Arc::clone(&notifier);
                            let targets = Arc::clone(&targets);
                            dispatches.spawn(async move { dispatch(&alert, notifier.as_ref(), &targets).await });
                        }
                    }
                }
                Some(joined) = dispatches.join_next(), if !dispatches.is_empty() => {
                    self.collect_alert(joined, &mut alerts);
                }
            }
        }

        debug!("Sample queue closed, waiting for {} in-flight alerts", dispatches.len());
        while let Some(joined) = dispatches.join_next().await {
            self.collect_alert(joined, &mut alerts);
        }

        drop(records);
        match writer.await {
            Ok(failures) => self.stats.sink_failures += failures,
            Err(e) => warn!("Sample log writer task failed: {}", e),
        }

        info!(
            "Monitoring stopped: {} received, {} accepted, {} alerts",
            self.stats.received, self.stats.accepted, self.stats.alerts_dispatched
        );

        MonitorReport {
            stats: self.stats,
            alerts: alerts.into(),
            final_average: self.state.last_average,
        }
    }

    /// Start [`run`](Self::run) on its own task behind a queue of `capacity`.
    pub fn spawn(
        self,
        capacity: usize,
        notifier: Arc<dyn Notifier>,
        sink: Box<dyn SampleSink>,
    ) -> Result<(SampleSender, JoinHandle<MonitorReport>), ConfigError> {
        let (sender, receiver) = sample_channel(capacity)?;
        let handle = tokio::spawn(self.run(receiver, notifier, sink));
        Ok((sender, handle))
    }

    fn collect_alert(&mut self, joined: Result<AlertResult, JoinError>, alerts: &mut VecDeque<AlertResult>) {
        match joined {
            Ok(result) => {
                let failures = result.failures().len() as u64;
                self.stats.delivery_failures += failures;
                if failures == 0 {
                    info!("{} alert delivered:\n{}", result.tier, result.summary());
                } else {
                    warn!("{} alert had {} failed deliveries:\n{}", result.tier, failures, result.summary());
                }
                if self.settings.recent_alert_limit == 0 {
                    return;
                }
                if alerts.len() == self.settings.recent_alert_limit {
                    alerts.pop_front();
                }
                alerts.push_back(result);
            }
            Err(e) => {
                self.stats.delivery_failures += 1;
                warn!("Alert dispatch task failed: {}", e);
            }
        }
    }
}
