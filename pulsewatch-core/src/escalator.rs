//! Alert Escalation
//!
//! Decides, per accepted sample, whether an alert fires and on which
//! channels, and tracks the cooldown clocks that rate-limit repeats.
//! Deciding is synchronous and owns [`AlertState`]; delivering the
//! resulting [`AlertDispatch`] is a separate async step that never fails.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{AlertPolicy, Tier};
use crate::notifier::{AlertChannel, Notifier, Outcome, RecipientOutcomes};
use crate::sample::{Bpm, Sample};

/// Whether warning and critical alerts share one cooldown clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    #[default]
    PerTier,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownClock {
    Tier(Tier),
    Shared,
}

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    pub warning_cooldown: Duration,
    pub critical_cooldown: Duration,
    pub sms_enabled: bool,
    pub voice_enabled: bool,
    pub policy: AlertPolicy,
    pub scope: CooldownScope,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            warning_cooldown: Duration::seconds(300),
            critical_cooldown: Duration::seconds(60),
            sms_enabled: true,
            voice_enabled: false,
            policy: AlertPolicy::default(),
            scope: CooldownScope::default(),
        }
    }
}

impl EscalationConfig {
    fn cooldown(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Critical => self.critical_cooldown,
            _ => self.warning_cooldown,
        }
    }

    fn clock(&self, tier: Tier) -> CooldownClock {
        match self.scope {
            CooldownScope::PerTier => CooldownClock::Tier(tier),
            CooldownScope::Shared => CooldownClock::Shared,
        }
    }

    /// Channels an alert of this tier goes out on.
    pub fn channels_for(&self, tier: Tier) -> Vec<AlertChannel> {
        let mut channels = Vec::new();
        match tier {
            Tier::Normal => {}
            Tier::Warning => {
                if self.sms_enabled {
                    channels.push(AlertChannel::Sms);
                }
            }
            Tier::Critical => {
                if self.sms_enabled {
                    channels.push(AlertChannel::Sms);
                }
                if self.voice_enabled {
                    channels.push(AlertChannel::Voice);
                }
            }
        }
        channels
    }
}

/// Where dispatched alerts are delivered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertTargets {
    pub recipients: Vec<String>,
    pub callback_url: String,
}

impl AlertTargets {
    /// Recipients in configured order, each listed once.
    pub fn distinct_recipients(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.recipients
            .iter()
            .filter(|recipient| seen.insert(recipient.as_str()))
            .cloned()
            .collect()
    }
}

/// Last-fired timestamps, one per cooldown clock.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    last_fired_at: HashMap<CooldownClock, DateTime<Utc>>,
}

impl AlertState {
    pub fn last_fired_at(&self, clock: CooldownClock) -> Option<DateTime<Utc>> {
        self.last_fired_at.get(&clock).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    Cooldown,
    NotRisingEdge,
    NoChannelEnabled,
}

/// An alert that passed the cooldown check and must be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDispatch {
    pub tier: Tier,
    pub channels: Vec<AlertChannel>,
    pub raw: Bpm,
    pub average: Bpm,
    pub observed_at: DateTime<Utc>,
    pub message: String,
}

impl AlertDispatch {
    fn new(tier: Tier, channels: Vec<AlertChannel>, sample: &Sample, average: Bpm) -> Self {
        let time = sample.observed_at.with_timezone(&Local).format("%I:%M%p");
        let message = format!(
            "Unusual HR {} BPM (average {} BPM, {}) was detected at {}.",
            sample.value, average, tier, time
        );
        Self {
            tier,
            channels,
            raw: sample.value,
            average,
            observed_at: sample.observed_at,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Tier is normal, nothing to consider.
    Quiet,
    Suppressed { tier: Tier, reason: SuppressReason },
    Fire(AlertDispatch),
}

/// Delivery report for one dispatched alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertResult {
    pub tier: Tier,
    pub observed_at: DateTime<Utc>,
    pub channels_attempted: Vec<AlertChannel>,
    pub outcomes: BTreeMap<AlertChannel, RecipientOutcomes>,
}

impl AlertResult {
    /// `(channel, recipient, reason)` for every failed delivery.
    pub fn failures(&self) -> Vec<(AlertChannel, &str, &str)> {
        self.outcomes
            .iter()
            .flat_map(|(channel, outcomes)| {
                outcomes.iter().filter_map(move |(recipient, outcome)| match outcome {
                    Outcome::Failure(reason) => Some((*channel, recipient.as_str(), reason.as_str())),
                    Outcome::Success => None,
                })
            })
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .values()
            .all(|outcomes| outcomes.values().all(Outcome::is_success))
    }

    /// One `SMS:+1555 SENT` / `Call:+1555 FAILED` line per delivery.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for (channel, outcomes) in &self.outcomes {
            for (recipient, outcome) in outcomes {
                let status = if outcome.is_success() { "SENT" } else { "FAILED" };
                lines.push(format!("{}:{} {}", channel, recipient, status));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct AlertEscalator {
    config: EscalationConfig,
    state: AlertState,
}

impl AlertEscalator {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            state: AlertState::default(),
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Decide whether `tier` fires at `sample.observed_at`.
    ///
    /// `rising_edge` says whether the average just crossed into `tier` and
    /// only matters for the edge-triggered policy. The cooldown clock is
    /// advanced only when the alert fires.
    pub fn maybe_notify(&mut self, tier: Tier, rising_edge: bool, sample: &Sample, average: Bpm) -> Escalation {
        if tier == Tier::Normal {
            return Escalation::Quiet;
        }

        let now = sample.observed_at;
        let clock = self.config.clock(tier);

        match self.config.policy {
            AlertPolicy::EdgeTriggered => {
                if !rising_edge {
                    debug!("{} sustained at {} BPM, edge-triggered alert already sent", tier, average);
                    return Escalation::Suppressed { tier, reason: SuppressReason::NotRisingEdge };
                }
            }
            AlertPolicy::CooldownRepeated => {
                if let Some(last) = self.state.last_fired_at(clock) {
                    let cooldown = self.config.cooldown(tier);
                    if now - last < cooldown {
                        debug!(
                            "{} alert suppressed, {}s of {}s cooldown elapsed",
                            tier,
                            (now - last).num_seconds(),
                            cooldown.num_seconds()
                        );
                        return Escalation::Suppressed { tier, reason: SuppressReason::Cooldown };
                    }
                }
            }
        }

        let channels = self.config.channels_for(tier);
        if channels.is_empty() {
            info!("{} heart rate {} BPM, but no alert channel is enabled", tier, average);
            return Escalation::Suppressed { tier, reason: SuppressReason::NoChannelEnabled };
        }

        self.state.last_fired_at.insert(clock, now);
        let alert = AlertDispatch::new(tier, channels, sample, average);
        info!("{}", alert.message);
        Escalation::Fire(alert)
    }
}

/// Deliver `alert` on each of its channels. Never fails: every problem is
/// a per-recipient `Outcome::Failure` in the returned report.
pub async fn dispatch(alert: &AlertDispatch, notifier: &dyn Notifier, targets: &AlertTargets) -> AlertResult {
    let mut outcomes = BTreeMap::new();
    let recipients = targets.distinct_recipients();

    for channel in &alert.channels {
        let channel_outcomes = match channel {
            AlertChannel::Sms => notifier.send_sms(&recipients, &alert.message).await,
            AlertChannel::Voice => notifier.place_call(&recipients, &targets.callback_url).await,
        };
        outcomes.insert(*channel, channel_outcomes);
    }

    AlertResult {
        tier: alert.tier,
        observed_at: alert.observed_at,
        channels_attempted: alert.channels.clone(),
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::DeliveryError;
    use crate::notifier::{FanoutNotifier, LogNotifier, RecipientTransport};

    fn at(seconds: i64) -> Sample {
        let base = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Sample::new(130, base + Duration::seconds(seconds))
    }

    fn fired(escalation: &Escalation) -> bool {
        matches!(escalation, Escalation::Fire(_))
    }

    #[test]
    fn test_normal_is_quiet() {
        let mut escalator = AlertEscalator::new(EscalationConfig::default());
        assert_eq!(escalator.maybe_notify(Tier::Normal, false, &at(0), 80), Escalation::Quiet);
    }

    #[test]
    fn test_critical_cooldown_window() {
        let mut escalator = AlertEscalator::new(EscalationConfig::default());

        assert!(fired(&escalator.maybe_notify(Tier::Critical, true, &at(0), 130)));
        assert_eq!(
            escalator.maybe_notify(Tier::Critical, false, &at(30), 130),
            Escalation::Suppressed { tier: Tier::Critical, reason: SuppressReason::Cooldown }
        );
        assert!(fired(&escalator.maybe_notify(Tier::Critical, false, &at(61), 130)));
    }

    #[test]
    fn test_suppressed_alert_does_not_reset_clock() {
        let mut escalator = AlertEscalator::new(EscalationConfig::default());
        escalator.maybe_notify(Tier::Critical, true, &at(0), 130);
        escalator.maybe_notify(Tier::Critical, false, &at(59), 130);

        let clock = CooldownClock::Tier(Tier::Critical);
        assert_eq!(escalator.state().last_fired_at(clock), Some(at(0).observed_at));
        assert!(fired(&escalator.maybe_notify(Tier::Critical, false, &at(60), 130)));
    }

    #[test]
    fn test_tiers_have_independent_clocks() {
        let mut escalator = AlertEscalator::new(EscalationConfig::default());
        assert!(fired(&escalator.maybe_notify(Tier::Warning, true, &at(0), 105)));
        assert!(fired(&escalator.maybe_notify(Tier::Critical, true, &at(10), 120)));
        // warning cooldown is 300s
        assert!(!fired(&escalator.maybe_notify(Tier::Warning, false, &at(200), 105)));
        assert!(fired(&escalator.maybe_notify(Tier::Warning, false, &at(300), 105)));
    }

    #[test]
    fn test_shared_clock() {
        let mut escalator = AlertEscalator::new(EscalationConfig {
            scope: CooldownScope::Shared,
            ..Default::default()
        });
        assert!(fired(&escalator.maybe_notify(Tier::Warning, true, &at(0), 105)));
        // critical cooldown (60s) measured against the shared clock
        assert!(!fired(&escalator.maybe_notify(Tier::Critical, true, &at(30), 120)));
        assert!(fired(&escalator.maybe_notify(Tier::Critical, false, &at(60), 120)));
    }

    #[test]
    fn test_edge_triggered_fires_once_per_rise() {
        let mut escalator = AlertEscalator::new(EscalationConfig {
            policy: AlertPolicy::EdgeTriggered,
            ..Default::default()
        });

        assert!(fired(&escalator.maybe_notify(Tier::Warning, true, &at(0), 105)));
        assert_eq!(
            escalator.maybe_notify(Tier::Warning, false, &at(1000), 105),
            Escalation::Suppressed { tier: Tier::Warning, reason: SuppressReason::NotRisingEdge }
        );
        // the rise into critical is a new edge, even inside a cooldown window
        assert!(fired(&escalator.maybe_notify(Tier::Critical, true, &at(1001), 120)));
        assert_eq!(escalator.maybe_notify(Tier::Normal, false, &at(1002), 90), Escalation::Quiet);
        assert!(fired(&escalator.maybe_notify(Tier::Warning, true, &at(1003), 105)));
    }

    #[test]
    fn test_channels_per_tier() {
        let mut config = EscalationConfig {
            voice_enabled: true,
            ..Default::default()
        };
        assert_eq!(config.channels_for(Tier::Warning), vec![AlertChannel::Sms]);
        assert_eq!(
            config.channels_for(Tier::Critical),
            vec![AlertChannel::Sms, AlertChannel::Voice]
        );

        config.sms_enabled = false;
        assert!(config.channels_for(Tier::Warning).is_empty());
        assert_eq!(config.channels_for(Tier::Critical), vec![AlertChannel::Voice]);
    }

    #[test]
    fn test_no_channel_leaves_clock_untouched() {
        let mut escalator = AlertEscalator::new(EscalationConfig {
            sms_enabled: false,
            ..Default::default()
        });
        assert_eq!(
            escalator.maybe_notify(Tier::Warning, true, &at(0), 105),
            Escalation::Suppressed { tier: Tier::Warning, reason: SuppressReason::NoChannelEnabled }
        );
        assert!(escalator.state().last_fired_at(CooldownClock::Tier(Tier::Warning)).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_covers_every_channel() {
        let mut escalator = AlertEscalator::new(EscalationConfig {
            voice_enabled: true,
            ..Default::default()
        });
        let alert = match escalator.maybe_notify(Tier::Critical, true, &at(0), 125) {
            Escalation::Fire(alert) => alert,
            other => panic!("expected alert, got {:?}", other),
        };
        assert!(alert.message.contains("130 BPM"));

        let targets = AlertTargets {
            recipients: vec!["+15550001".into(), "+15550002".into()],
            callback_url: "http://example.com/twiml".into(),
        };
        let result = dispatch(&alert, &LogNotifier::new(), &targets).await;

        assert_eq!(result.channels_attempted, vec![AlertChannel::Sms, AlertChannel::Voice]);
        assert!(result.all_succeeded());
        assert!(result.failures().is_empty());
        assert_eq!(result.summary().lines().count(), 4);
        assert!(result.summary().contains("Call:+15550002 SENT"));
    }

    #[derive(Default)]
    struct CountingCarrier {
        sms: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RecipientTransport for CountingCarrier {
        fn name(&self) -> &str {
            "counting"
        }

        async fn sms_to(&self, recipient: &str, _body: &str) -> Result<(), DeliveryError> {
            self.sms.lock().unwrap().push(recipient.to_string());
            Ok(())
        }

        async fn call_to(&self, _recipient: &str, _callback_url: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[test]
    fn test_distinct_recipients_keep_configured_order() {
        let targets = AlertTargets {
            recipients: vec!["+15550003".into(), "+15550001".into(), "+15550003".into()],
            callback_url: String::new(),
        };
        assert_eq!(targets.distinct_recipients(), vec!["+15550003".to_string(), "+15550001".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_recipient_is_messaged_once() {
        let mut escalator = AlertEscalator::new(EscalationConfig::default());
        let alert = match escalator.maybe_notify(Tier::Warning, true, &at(0), 105) {
            Escalation::Fire(alert) => alert,
            other => panic!("expected alert, got {:?}", other),
        };
        let targets = AlertTargets {
            recipients: vec!["+15550002".into(), "+15550001".into(), "+15550002".into()],
            callback_url: String::new(),
        };
        let notifier = FanoutNotifier::new(CountingCarrier::default());

        let result = dispatch(&alert, &notifier, &targets).await;

        let sent = notifier.transport().sms.lock().unwrap().clone();
        assert_eq!(sent, vec!["+15550002".to_string(), "+15550001".to_string()]);
        assert_eq!(result.outcomes[&AlertChannel::Sms].len(), 2);
        assert_eq!(result.summary().lines().count(), 2);
    }
}
