use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::{info, warn};

use super::{SampleSender, SensorTransport};
use crate::error::{DecodeError, TransportError};
use crate::sample::{Bpm, Sample, RECORD_TIMESTAMP_FORMAT};

/// Feeds a recorded `timestamp,raw,average` log back through the engine,
/// keeping the original timestamps so throttling and cooldowns behave as
/// they did live.
pub struct ReplayTransport {
    path: PathBuf,
    pending: Vec<Sample>,
    skipped: u64,
}

impl ReplayTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: Vec::new(),
            skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Reader for sample logs: no header row, `#` comment lines, and rows of
/// any width so a short row is reported instead of aborting the file.
fn log_reader(content: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(content)
}

/// Parse one sample log row. The recorded average is ignored: it is
/// recomputed by the engine.
pub fn parse_record(record: &csv::StringRecord) -> Result<Sample, DecodeError> {
    let invalid = || DecodeError::InvalidLine(record.iter().collect::<Vec<_>>().join(","));
    let timestamp = record.get(0).ok_or_else(invalid)?;
    let raw = record.get(1).ok_or_else(invalid)?;

    let naive = NaiveDateTime::parse_from_str(timestamp, RECORD_TIMESTAMP_FORMAT).map_err(|_| invalid())?;
    let observed_at: DateTime<Utc> = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(invalid)?
        .with_timezone(&Utc);

    let value: Bpm = raw.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(DecodeError::NoReading);
    }

    Ok(Sample::new(value, observed_at))
}

#[async_trait::async_trait]
impl SensorTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let content = tokio::fs::read(&self.path).await?;

        self.pending.clear();
        self.skipped = 0;
        let mut reader = log_reader(&content);
        for row in reader.records() {
            let parsed = match row {
                Ok(record) => parse_record(&record).map_err(|e| {
                    let line = record.position().map(|p| p.line()).unwrap_or_default();
                    format!("line {}: {}", line, e)
                }),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(sample) => self.pending.push(sample),
                Err(reason) => {
                    self.skipped += 1;
                    warn!("{}: {}", self.path.display(), reason);
                }
            }
        }

        info!(
            "Loaded {} samples from {} ({} skipped)",
            self.pending.len(),
            self.path.display(),
            self.skipped
        );
        Ok(())
    }

    async fn pump(&mut self, samples: &SampleSender) -> Result<(), TransportError> {
        for sample in self.pending.drain(..) {
            samples.on_sample(sample).await?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.pending.clear();
    }
}
