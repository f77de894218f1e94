//! Sample Log Persistence
//!
//! Append-only CSV record of every accepted sample. Writes happen on a
//! dedicated task fed through a bounded, ordered queue; when the disk
//! cannot keep up, records are dropped rather than delaying alerting.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::sample::SampleRecord;

#[async_trait::async_trait]
pub trait SampleSink: Send {
    async fn record(&mut self, record: &SampleRecord) -> Result<(), SinkError>;

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait::async_trait]
impl SampleSink for NullSink {
    async fn record(&mut self, _record: &SampleRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// How the CSV log file is named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "naming", rename_all = "lowercase")]
pub enum LogFileNaming {
    /// `<directory>/<prefix>_YYYYmmdd.csv`, one file per local day.
    Daily { directory: PathBuf, prefix: String },
    Fixed { path: PathBuf },
}

impl LogFileNaming {
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        match self {
            LogFileNaming::Daily { directory, prefix } => {
                let day = at.with_timezone(&Local).format("%Y%m%d");
                directory.join(format!("{}_{}.csv", prefix, day))
            }
            LogFileNaming::Fixed { path } => path.clone(),
        }
    }
}

/// Appends `timestamp,raw,average` lines to a CSV file.
pub struct CsvFileSink {
    naming: LogFileNaming,
    current: Option<(PathBuf, File)>,
}

impl CsvFileSink {
    pub fn new(naming: LogFileNaming) -> Self {
        Self { naming, current: None }
    }

    async fn file_for(&mut self, path: PathBuf) -> Result<&mut File, SinkError> {
        let reopen = match &self.current {
            Some((open_path, _)) => open_path != &path,
            None => true,
        };

        if reopen {
            if let Some((_, mut previous)) = self.current.take() {
                previous.flush().await?;
            }
            ensure_parent(&path).await?;
            let file = OpenOptions::new().create(true).append(true).open(&path).await?;
            debug!("Opened sample log {:?}", path);
            self.current = Some((path, file));
        }

        match self.current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(SinkError::Closed),
        }
    }
}

async fn ensure_parent(path: &Path) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl SampleSink for CsvFileSink {
    async fn record(&mut self, record: &SampleRecord) -> Result<(), SinkError> {
        let path = self.naming.path_for(record.observed_at);
        let row = record.to_csv_row()?;
        let file = self.file_for(path).await?;
        file.write_all(row.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if let Some((_, file)) = self.current.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

/// Producer side of the sink writer. Never waits: when the writer falls
/// behind by more than the queue capacity, records are dropped.
#[derive(Debug, Clone)]
pub struct SinkFeed {
    tx: mpsc::Sender<SampleRecord>,
}

impl SinkFeed {
    /// Queue `record` for writing. A full queue or a stopped writer is
    /// logged and returned as the reason the record was dropped.
    pub fn submit(&self, record: SampleRecord) -> Result<(), SinkError> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) => {
                warn!("Sample log writer is behind, dropping {}", record);
                Err(SinkError::QueueFull)
            }
            Err(TrySendError::Closed(record)) => {
                warn!("Sample log writer is gone, dropping {}", record);
                Err(SinkError::Closed)
            }
        }
    }
}

/// Spawn the single writer task behind a queue of `capacity` records.
/// The handle resolves to the number of failed writes once every feed is
/// dropped.
pub fn spawn_sink_writer(mut sink: Box<dyn SampleSink>, capacity: usize) -> (SinkFeed, JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::channel::<SampleRecord>(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut failures = 0u64;
        while let Some(record) = rx.recv().await {
            if let Err(e) = sink.record(&record).await {
                failures += 1;
                warn!("Failed to persist sample {}: {}", record, e);
            }
        }
        if let Err(e) = sink.flush().await {
            failures += 1;
            warn!("Failed to flush sample log: {}", e);
        }
        failures
    });

    (SinkFeed { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn record(value: u32, average: u32, at: DateTime<Utc>) -> SampleRecord {
        SampleRecord::new(&Sample::new(value, at), average)
    }

    #[test]
    fn test_daily_naming() {
        let naming = LogFileNaming::Daily {
            directory: PathBuf::from("/var/log/pulsewatch"),
            prefix: "hr_log".to_string(),
        };
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap().with_timezone(&Utc);
        assert_eq!(
            naming.path_for(at),
            PathBuf::from("/var/log/pulsewatch/hr_log_20240301.csv")
        );
    }

    #[tokio::test]
    async fn test_csv_sink_appends_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("hr.csv");
        let mut sink = CsvFileSink::new(LogFileNaming::Fixed { path: path.clone() });

        let t0 = Utc::now();
        sink.record(&record(80, 80, t0)).await.unwrap();
        sink.record(&record(120, 86, t0 + Duration::seconds(5))).await.unwrap();
        sink.flush().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",80,80"));
        assert!(lines[1].ends_with(",120,86"));
    }

    #[tokio::test]
    async fn test_daily_sink_rolls_over() {
        let dir = tempdir().unwrap();
        let mut sink = CsvFileSink::new(LogFileNaming::Daily {
            directory: dir.path().to_path_buf(),
            prefix: "hr_log".to_string(),
        });

        let day_one = Local.with_ymd_and_hms(2024, 3, 1, 23, 59, 58).unwrap().with_timezone(&Utc);
        let day_two = Local.with_ymd_and_hms(2024, 3, 2, 0, 0, 3).unwrap().with_timezone(&Utc);
        sink.record(&record(90, 85, day_one)).await.unwrap();
        sink.record(&record(95, 87, day_two)).await.unwrap();

        assert!(dir.path().join("hr_log_20240301.csv").exists());
        assert!(dir.path().join("hr_log_20240302.csv").exists());
    }

    #[tokio::test]
    async fn test_writer_counts_failures_without_stopping() {
        struct Failing {
            calls: u32,
        }

        #[async_trait::async_trait]
        impl SampleSink for Failing {
            async fn record(&mut self, _record: &SampleRecord) -> Result<(), SinkError> {
                self.calls += 1;
                if self.calls % 2 == 0 {
                    return Err(SinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
                }
                Ok(())
            }
        }

        let (feed, handle) = spawn_sink_writer(Box::new(Failing { calls: 0 }), 8);
        for i in 0..4 {
            feed.submit(record(80 + i, 80, Utc::now())).unwrap();
        }
        drop(feed);

        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_full_feed_drops_instead_of_growing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hr.csv");
        let sink = CsvFileSink::new(LogFileNaming::Fixed { path: path.clone() });
        let (feed, handle) = spawn_sink_writer(Box::new(sink), 2);

        // The writer task has not run yet on this single-threaded runtime.
        let t0 = Utc::now();
        assert!(feed.submit(record(81, 80, t0)).is_ok());
        assert!(feed.submit(record(82, 80, t0)).is_ok());
        assert!(matches!(feed.submit(record(83, 80, t0)), Err(SinkError::QueueFull)));
        drop(feed);

        assert_eq!(handle.await.unwrap(), 0);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
