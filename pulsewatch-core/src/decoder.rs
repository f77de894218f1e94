//! Sample decoding
//!
//! Turns raw device payloads (ANT+ heart-rate data pages) and text lines
//! into [`Sample`] values.

use chrono::{DateTime, Utc};

use crate::error::DecodeError;
use crate::sample::{Bpm, Sample};

/// Length of an ANT+ broadcast/burst data page.
pub const ANT_PAGE_LEN: usize = 8;
/// Byte holding the computed heart rate on every HRM data page.
pub const COMPUTED_HR_OFFSET: usize = 7;

/// Extract the computed heart rate from an ANT+ HRM data page.
pub fn decode_payload(payload: &[u8], observed_at: DateTime<Utc>) -> Result<Sample, DecodeError> {
    if payload.len() < ANT_PAGE_LEN {
        return Err(DecodeError::ShortPayload {
            expected: ANT_PAGE_LEN,
            actual: payload.len(),
        });
    }

    let value = payload[COMPUTED_HR_OFFSET] as Bpm;
    if value == 0 {
        return Err(DecodeError::NoReading);
    }

    Ok(Sample::new(value, observed_at))
}

/// Decode one line of text input.
///
/// Accepts a decimal BPM value (`72`) or a hex-encoded data page
/// (`0000000000000048` or `00 00 00 00 00 00 00 48`). Blank lines and
/// `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str, observed_at: DateTime<Utc>) -> Result<Option<Sample>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let compact: String = trimmed.split_whitespace().collect();
    if compact.len() == ANT_PAGE_LEN * 2 && compact.chars().all(|c| c.is_ascii_hexdigit()) {
        let payload = hex::decode(&compact).map_err(|_| DecodeError::InvalidLine(trimmed.to_string()))?;
        return decode_payload(&payload, observed_at).map(Some);
    }

    let value: Bpm = trimmed
        .parse()
        .map_err(|_| DecodeError::InvalidLine(trimmed.to_string()))?;
    if value == 0 {
        return Err(DecodeError::NoReading);
    }

    Ok(Some(Sample::new(value, observed_at)))
}
