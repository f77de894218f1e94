use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Heart rate in beats per minute.
pub type Bpm = u32;

/// Timestamp layout of the per-sample log, e.g. `20240131_14:05:09`.
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H:%M:%S";

/// One decoded heart-rate reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub value: Bpm,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: Bpm, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }

    /// Sample stamped with the current wall-clock time.
    pub fn now(value: Bpm) -> Self {
        Self::new(value, Utc::now())
    }
}

/// What gets persisted for every accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub observed_at: DateTime<Utc>,
    pub raw: Bpm,
    pub average: Bpm,
}

impl SampleRecord {
    pub fn new(sample: &Sample, average: Bpm) -> Self {
        Self {
            observed_at: sample.observed_at,
            raw: sample.value,
            average,
        }
    }

    /// Local-time timestamp as written to the sample log.
    pub fn local_timestamp(&self) -> String {
        self.observed_at
            .with_timezone(&Local)
            .format(RECORD_TIMESTAMP_FORMAT)
            .to_string()
    }

    /// One `timestamp,raw,average` row, newline terminated, no header.
    pub fn to_csv_row(&self) -> Result<String, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.serialize((self.local_timestamp(), self.raw, self.average))?;
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Display for SampleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} BPM (average {})", self.local_timestamp(), self.raw, self.average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_row_layout() {
        let sample = Sample::now(120);
        let row = SampleRecord::new(&sample, 96).to_csv_row().unwrap();
        assert!(row.ends_with('\n'));

        let fields: Vec<&str> = row.trim_end().split(',').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].len(), "20240131_14:05:09".len());
        assert_eq!(&fields[0][8..9], "_");
        assert_eq!(fields[1], "120");
        assert_eq!(fields[2], "96");
    }
}
