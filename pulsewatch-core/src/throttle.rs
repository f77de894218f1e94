use chrono::{DateTime, Duration, Utc};

/// Sampling throttle: true iff the sample at `now` should be processed.
///
/// A stream that has never been processed always passes. The caller owns
/// `last_processed_at` and advances it only when this returns true.
pub fn should_process(
    now: DateTime<Utc>,
    last_processed_at: Option<DateTime<Utc>>,
    min_interval: Duration,
) -> bool {
    match last_processed_at {
        None => true,
        Some(last) => now - last >= min_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_always_processed() {
        assert!(should_process(Utc::now(), None, Duration::seconds(5)));
    }

    #[test]
    fn test_interval_boundary() {
        let t0 = Utc::now();
        let interval = Duration::seconds(5);

        assert!(!should_process(t0 + Duration::milliseconds(4_999), Some(t0), interval));
        assert!(should_process(t0 + Duration::seconds(5), Some(t0), interval));
        assert!(should_process(t0 + Duration::seconds(7), Some(t0), interval));
    }

    #[test]
    fn test_zero_interval_accepts_everything() {
        let t0 = Utc::now();
        assert!(should_process(t0, Some(t0), Duration::zero()));
    }
}
