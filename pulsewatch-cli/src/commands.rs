use std::path::Path;

use anyhow::{bail, Context, Result};
use pulsewatch_core::config::ConfigManager;
use pulsewatch_core::transport::{LineTransport, ReplayTransport};
use pulsewatch_core::{
    create_notifier, run_supervised, CsvFileSink, MonitorConfig, MonitorEngine, MonitorReport, NotifierKind,
    NullSink, RestartPolicy, SampleSink, SensorTransport, TransportError,
};
use tracing::{info, warn};

use crate::cli::ConfigCommands;

/// Load and validate the configuration, forcing the log notifier when
/// alerts must not leave the machine.
fn load_config(path: Option<&Path>, dry_run: bool) -> Result<MonitorConfig> {
    let manager = ConfigManager::resolve(path)?;
    let mut config = manager.load_config()?;
    if dry_run {
        config.notifier.kind = NotifierKind::Log;
    }
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", manager.config_path()))?;
    Ok(config)
}

fn build_sink(config: &MonitorConfig) -> Box<dyn SampleSink> {
    match config.log_naming() {
        Some(naming) => {
            info!("Recording samples to {:?}", naming);
            Box::new(CsvFileSink::new(naming))
        }
        None => Box::new(NullSink),
    }
}

async fn monitor<T: SensorTransport>(
    config: &MonitorConfig,
    transport: &mut T,
    sink: Box<dyn SampleSink>,
    dry_run: bool,
    policy: RestartPolicy,
) -> Result<MonitorReport> {
    let engine = MonitorEngine::new(config.engine_settings())?;
    let notifier = create_notifier(&config.notifier, dry_run)?;
    let (sender, mut handle) = engine.spawn(config.runtime.queue_capacity, notifier, sink)?;

    let transport_result = tokio::select! {
        result = run_supervised(transport, sender, policy) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, finishing queued samples and alerts (Ctrl-C again to quit now)");
            Ok(())
        }
    };

    let report = tokio::select! {
        joined = &mut handle => joined.context("Monitor task failed")?,
        _ = tokio::signal::ctrl_c() => {
            handle.abort();
            bail!("Interrupted twice, in-flight alerts and sample log writes were abandoned");
        }
    };

    match transport_result {
        Ok(()) | Err(TransportError::Closed) => Ok(report),
        Err(e) => {
            print_report(&report, false)?;
            Err(e).context("Sensor transport stopped")
        }
    }
}

pub async fn run(config_path: Option<&Path>, dry_run: bool, json: bool) -> Result<()> {
    let config = load_config(config_path, dry_run)?;
    let sink = build_sink(&config);
    let mut transport = LineTransport::stdin();

    info!("Reading samples from stdin");
    let report = monitor(&config, &mut transport, sink, dry_run, config.restart_policy()).await?;
    if transport.skipped() > 0 {
        warn!("{} input lines could not be decoded", transport.skipped());
    }
    print_report(&report, json)
}

pub async fn replay(
    file: &Path,
    config_path: Option<&Path>,
    live_alerts: bool,
    record: bool,
    json: bool,
) -> Result<()> {
    let dry_run = !live_alerts;
    let config = load_config(config_path, dry_run)?;
    let sink: Box<dyn SampleSink> = if record { build_sink(&config) } else { Box::new(NullSink) };
    let mut transport = ReplayTransport::new(file);

    // A missing or unreadable file will not fix itself.
    let policy = RestartPolicy {
        max_restarts: 0,
        ..config.restart_policy()
    };
    let report = monitor(&config, &mut transport, sink, dry_run, policy).await?;
    print_report(&report, json)
}

pub fn config(action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Init { config } => {
            let manager = ConfigManager::resolve(config.as_deref())?;
            manager.create_default_config()?;
            println!("Created default configuration at {:?}", manager.config_path());
        }
        ConfigCommands::Show { config } => {
            let manager = ConfigManager::resolve(config.as_deref())?;
            let mut config = manager.load_config()?;
            if config.notifier.auth_token.is_some() {
                config.notifier.auth_token = Some("********".to_string());
            }
            println!("# {:?}", manager.config_path());
            println!("{}", config.to_toml_string()?);
        }
        ConfigCommands::Validate { config } => {
            let manager = ConfigManager::resolve(config.as_deref())?;
            let config = manager.validate_config()?;
            println!("Configuration is valid ({:?})", manager.config_path());
            println!(
                "  thresholds: warning > {} BPM, critical > {} BPM",
                config.thresholds.warning, config.thresholds.critical
            );
            println!("  notifier: {:?}, recipients: {}", config.notifier.kind, config.alerts.recipients.len());
        }
    }
    Ok(())
}

fn print_report(report: &MonitorReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let stats = &report.stats;
    println!("Samples: {} received, {} accepted, {} throttled", stats.received, stats.accepted, stats.throttled);
    println!("Final average: {} BPM", report.final_average);
    println!(
        "Alerts: {} dispatched, {} suppressed, {} delivery failures",
        stats.alerts_dispatched, stats.alerts_suppressed, stats.delivery_failures
    );
    if stats.sink_failures > 0 {
        println!("Sample log failures: {}", stats.sink_failures);
    }
    for alert in &report.alerts {
        println!("[{}] {} alert", alert.observed_at.format("%Y-%m-%d %H:%M:%S"), alert.tier);
        for line in alert.summary().lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}
