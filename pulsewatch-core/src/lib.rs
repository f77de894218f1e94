//! PulseWatch core: heart-rate sample processing and alert escalation.
//!
//! Samples flow through a throttle, a moving-average buffer and a threshold
//! classifier; elevated tiers are escalated to a [`Notifier`] with
//! per-tier cooldowns, and every accepted sample is persisted through a
//! [`SampleSink`].

pub mod buffer;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod escalator;
pub mod notifier;
pub mod sample;
pub mod sink;
pub mod throttle;
pub mod transport;

pub use buffer::SmoothingBuffer;
pub use classifier::{classify, AlertPolicy, ThresholdConfig, Tier};
pub use config::{ConfigManager, MonitorConfig};
pub use engine::{sample_channel, EngineSettings, MonitorEngine, MonitorReport, MonitorStats, ProcessOutcome};
pub use error::{BufferError, ConfigError, DecodeError, DeliveryError, SinkError, TransportError};
pub use escalator::{AlertEscalator, AlertResult, AlertTargets, CooldownScope, Escalation, EscalationConfig};
pub use notifier::{create_notifier, AlertChannel, LogNotifier, Notifier, NotifierKind, Outcome};
pub use sample::{Bpm, Sample, SampleRecord};
pub use sink::{CsvFileSink, LogFileNaming, NullSink, SampleSink, SinkFeed};
pub use throttle::should_process;
pub use transport::{run_supervised, RestartPolicy, SampleSender, SensorTransport};
