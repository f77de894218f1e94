use tracing::info;

use super::{Notifier, Outcome, RecipientOutcomes};

/// Dry-run notifier: logs what would have been sent and reports success.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_sms(&self, recipients: &[String], body: &str) -> RecipientOutcomes {
        recipients
            .iter()
            .map(|recipient| {
                info!("[dry-run] SMS to {}: {}", recipient, body);
                (recipient.clone(), Outcome::Success)
            })
            .collect()
    }

    async fn place_call(&self, recipients: &[String], callback_url: &str) -> RecipientOutcomes {
        recipients
            .iter()
            .map(|recipient| {
                info!("[dry-run] call to {} using {}", recipient, callback_url);
                (recipient.clone(), Outcome::Success)
            })
            .collect()
    }
}
