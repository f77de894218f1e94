use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{FanoutNotifier, NotifierSettings, RecipientTransport};
use crate::error::{ConfigError, DeliveryError};

/// Twilio REST notifier: one HTTP request per recipient.
pub type TwilioNotifier = FanoutNotifier<TwilioTransport>;

pub struct TwilioTransport {
    client: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioTransport {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: "https://api.twilio.com".to_string(),
            account_sid,
            auth_token,
            from_number,
        })
    }

    pub fn from_settings(settings: &NotifierSettings) -> Result<Self, ConfigError> {
        let field = |value: &Option<String>, name: &'static str| {
            value.clone().ok_or(ConfigError::MissingCredential {
                notifier: "twilio".to_string(),
                field: name,
            })
        };

        let transport = Self::new(
            field(&settings.account_sid, "account_sid")?,
            field(&settings.auth_token, "auth_token")?,
            field(&settings.from_number, "from_number")?,
            Duration::from_secs(settings.timeout_seconds),
        )?;
        Ok(transport.with_api_base(settings.api_base.clone()))
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            self.api_base, self.account_sid, resource
        )
    }

    async fn post_form(&self, resource: &str, form: &[(&str, &str)]) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.resource_url(resource))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Twilio {} accepted with status {}", resource, status);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecipientTransport for TwilioTransport {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn sms_to(&self, recipient: &str, body: &str) -> Result<(), DeliveryError> {
        self.post_form(
            "Messages",
            &[("To", recipient), ("From", self.from_number.as_str()), ("Body", body)],
        )
        .await
    }

    async fn call_to(&self, recipient: &str, callback_url: &str) -> Result<(), DeliveryError> {
        self.post_form(
            "Calls",
            &[("To", recipient), ("From", self.from_number.as_str()), ("Url", callback_url)],
        )
        .await
    }
}
