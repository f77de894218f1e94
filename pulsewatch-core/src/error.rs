use thiserror::Error;

/// Startup configuration problems. Any of these prevents the engine from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("warning threshold ({warning}) must be below critical threshold ({critical})")]
    ThresholdOrder { warning: u32, critical: u32 },
    #[error("moving average window size must be positive")]
    ZeroWindow,
    #[error("sample queue capacity must be positive")]
    ZeroQueue,
    #[error("alerting is enabled but no recipients are configured")]
    NoRecipients,
    #[error("recipient {0} is listed more than once")]
    DuplicateRecipient(String),
    #[error("voice alerts are enabled but no callback URL is configured")]
    MissingCallbackUrl,
    #[error("notifier '{notifier}' is missing credential '{field}'")]
    MissingCredential { notifier: String, field: &'static str },
    #[error("unknown notifier kind: {0}")]
    UnknownNotifier(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("smoothing buffer is empty")]
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },
    #[error("sensor reported no heart rate")]
    NoReading,
    #[error("cannot parse sample line '{0}'")]
    InvalidLine(String),
}

/// Sensor transport failures. The supervisor restarts the transport on these.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("sample queue closed")]
    Closed,
    #[error("transport failed: {0}")]
    Other(String),
}

/// A single recipient could not be reached. Never propagated past the notifier.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[cfg(feature = "twilio")]
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("channel not supported by notifier '{0}'")]
    Unsupported(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sample log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sample log encoding error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sample log queue is full")]
    QueueFull,
    #[error("sample log writer closed")]
    Closed,
}
