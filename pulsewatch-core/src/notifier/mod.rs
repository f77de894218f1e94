use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, DeliveryError};

pub mod log;
#[cfg(feature = "twilio")]
pub mod twilio;

pub use log::LogNotifier;
#[cfg(feature = "twilio")]
pub use twilio::{TwilioNotifier, TwilioTransport};

/// Delivery channel an alert can go out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Sms,
    Voice,
}

impl std::fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertChannel::Sms => write!(f, "SMS"),
            AlertChannel::Voice => write!(f, "Call"),
        }
    }
}

/// Result of delivering to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Per-recipient outcomes keyed by phone number.
pub type RecipientOutcomes = BTreeMap<String, Outcome>;

/// Alert delivery capability.
///
/// Implementations never fail as a whole: a transport error for one
/// recipient is reported as `Outcome::Failure` for that recipient only.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send_sms(&self, recipients: &[String], body: &str) -> RecipientOutcomes;
    async fn place_call(&self, recipients: &[String], callback_url: &str) -> RecipientOutcomes;
}

/// Single-recipient delivery that is allowed to fail.
#[async_trait::async_trait]
pub trait RecipientTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn sms_to(&self, recipient: &str, body: &str) -> Result<(), DeliveryError>;
    async fn call_to(&self, recipient: &str, callback_url: &str) -> Result<(), DeliveryError>;
}

/// Adapts a [`RecipientTransport`] into a [`Notifier`] by delivering to
/// each recipient in turn and recording failures instead of aborting.
pub struct FanoutNotifier<T> {
    transport: T,
}

impl<T: RecipientTransport> FanoutNotifier<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn record(
    outcomes: &mut RecipientOutcomes,
    channel: AlertChannel,
    recipient: &str,
    result: Result<(), DeliveryError>,
) {
    let outcome = match result {
        Ok(()) => {
            debug!("{}:{} SENT", channel, recipient);
            Outcome::Success
        }
        Err(e) => {
            warn!("{}:{} FAILED: {}", channel, recipient, e);
            Outcome::Failure(e.to_string())
        }
    };
    outcomes.insert(recipient.to_string(), outcome);
}

#[async_trait::async_trait]
impl<T: RecipientTransport> Notifier for FanoutNotifier<T> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    async fn send_sms(&self, recipients: &[String], body: &str) -> RecipientOutcomes {
        let mut outcomes = RecipientOutcomes::new();
        for recipient in recipients {
            let result = self.transport.sms_to(recipient, body).await;
            record(&mut outcomes, AlertChannel::Sms, recipient, result);
        }
        outcomes
    }

    async fn place_call(&self, recipients: &[String], callback_url: &str) -> RecipientOutcomes {
        let mut outcomes = RecipientOutcomes::new();
        for recipient in recipients {
            let result = self.transport.call_to(recipient, callback_url).await;
            record(&mut outcomes, AlertChannel::Voice, recipient, result);
        }
        outcomes
    }
}

/// Which notifier the monitor dispatches through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Twilio,
    #[default]
    Log,
}

impl std::str::FromStr for NotifierKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twilio" => Ok(NotifierKind::Twilio),
            "log" | "dry-run" | "dry_run" => Ok(NotifierKind::Log),
            other => Err(ConfigError::UnknownNotifier(other.to_string())),
        }
    }
}

/// `[notifier]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierSettings {
    #[serde(default)]
    pub kind: NotifierKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_number: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            kind: NotifierKind::default(),
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base: default_api_base(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl NotifierSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind != NotifierKind::Twilio {
            return Ok(());
        }
        let missing = |field: &'static str| ConfigError::MissingCredential {
            notifier: "twilio".to_string(),
            field,
        };
        if self.account_sid.as_deref().map_or(true, str::is_empty) {
            return Err(missing("account_sid"));
        }
        if self.auth_token.as_deref().map_or(true, str::is_empty) {
            return Err(missing("auth_token"));
        }
        if self.from_number.as_deref().map_or(true, str::is_empty) {
            return Err(missing("from_number"));
        }
        Ok(())
    }
}

/// Build the configured notifier. `dry_run` forces the logging notifier.
pub fn create_notifier(settings: &NotifierSettings, dry_run: bool) -> Result<Arc<dyn Notifier>, ConfigError> {
    let kind = if dry_run { NotifierKind::Log } else { settings.kind };
    info!("Creating notifier: {:?}", kind);

    match kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier::new())),
        #[cfg(feature = "twilio")]
        NotifierKind::Twilio => {
            settings.validate()?;
            let transport = TwilioTransport::from_settings(settings)?;
            Ok(Arc::new(FanoutNotifier::new(transport)))
        }
        #[cfg(not(feature = "twilio"))]
        NotifierKind::Twilio => Err(ConfigError::UnknownNotifier(
            "twilio (built without the 'twilio' feature)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakyTransport {
        failing: Vec<String>,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RecipientTransport for FlakyTransport {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn sms_to(&self, recipient: &str, _body: &str) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(recipient.to_string());
            if self.failing.iter().any(|r| r == recipient) {
                return Err(DeliveryError::Rejected { status: 400, body: "unreachable".into() });
            }
            Ok(())
        }

        async fn call_to(&self, _recipient: &str, _callback_url: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Unsupported("flaky".into()))
        }
    }

    fn recipients() -> Vec<String> {
        vec!["+15550001".into(), "+15550002".into(), "+15550003".into()]
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_others() {
        let notifier = FanoutNotifier::new(FlakyTransport {
            failing: vec!["+15550002".into()],
            attempts: Mutex::new(Vec::new()),
        });

        let outcomes = notifier.send_sms(&recipients(), "Unusual HR").await;

        let ordered: Vec<&Outcome> = outcomes.values().collect();
        assert!(ordered[0].is_success());
        assert!(matches!(ordered[1], Outcome::Failure(reason) if reason.contains("400")));
        assert!(ordered[2].is_success());
        assert_eq!(notifier.transport().attempts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unsupported_channel_is_a_per_recipient_failure() {
        let notifier = FanoutNotifier::new(FlakyTransport {
            failing: Vec::new(),
            attempts: Mutex::new(Vec::new()),
        });

        let outcomes = notifier.place_call(&recipients(), "http://example.com/twiml").await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.values().all(|o| !o.is_success()));
    }

    #[test]
    fn test_twilio_settings_require_credentials() {
        let settings = NotifierSettings {
            kind: NotifierKind::Twilio,
            account_sid: Some("AC123".into()),
            ..Default::default()
        };
        assert_eq!(
            settings.validate().unwrap_err(),
            ConfigError::MissingCredential { notifier: "twilio".into(), field: "auth_token" }
        );
        assert!(NotifierSettings::default().validate().is_ok());
    }

    #[test]
    fn test_dry_run_forces_log_notifier() {
        let settings = NotifierSettings {
            kind: NotifierKind::Twilio,
            ..Default::default()
        };
        let notifier = create_notifier(&settings, true).unwrap();
        assert_eq!(notifier.name(), "log");
    }
}
