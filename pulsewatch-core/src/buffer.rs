//! Smoothing Buffer
//!
//! Fixed-capacity moving average over the most recent heart-rate readings.

use std::collections::VecDeque;

use crate::error::{BufferError, ConfigError};
use crate::sample::Bpm;

#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    capacity: usize,
    values: VecDeque<Bpm>,
}

impl SmoothingBuffer {
    /// Buffer filled with `capacity` copies of `resting`, so the first
    /// average reflects a plausible baseline instead of zero.
    pub fn seeded(capacity: usize, resting: Bpm) -> Result<Self, ConfigError> {
        let mut buffer = Self::unseeded(capacity)?;
        buffer.values.extend(std::iter::repeat(resting).take(capacity));
        Ok(buffer)
    }

    pub fn unseeded(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        })
    }

    /// Append a reading, evicting the oldest one once full.
    pub fn push(&mut self, value: Bpm) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Floor of the arithmetic mean of the current contents.
    pub fn average(&self) -> Result<Bpm, BufferError> {
        if self.values.is_empty() {
            return Err(BufferError::Empty);
        }
        let sum: u64 = self.values.iter().map(|&v| v as u64).sum();
        Ok((sum / self.values.len() as u64) as Bpm)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn values(&self) -> impl Iterator<Item = Bpm> + '_ {
        self.values.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_average_is_resting_value() {
        let buffer = SmoothingBuffer::seeded(6, 80).unwrap();
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.average(), Ok(80));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(SmoothingBuffer::seeded(0, 80).unwrap_err(), ConfigError::ZeroWindow);
    }

    #[test]
    fn test_unseeded_empty_average_fails() {
        let mut buffer = SmoothingBuffer::unseeded(3).unwrap();
        assert_eq!(buffer.average(), Err(BufferError::Empty));
        buffer.push(71);
        assert_eq!(buffer.average(), Ok(71));
    }

    #[test]
    fn test_average_floors() {
        let mut buffer = SmoothingBuffer::seeded(6, 80).unwrap();
        buffer.push(120);
        // (80 * 5 + 120) / 6 = 86.67
        assert_eq!(buffer.average(), Ok(86));
    }

    #[test]
    fn test_length_bounded_and_mean_of_window() {
        let capacity = 4;
        let resting = 65;
        let mut buffer = SmoothingBuffer::seeded(capacity, resting).unwrap();
        let mut effective: Vec<Bpm> = vec![resting; capacity];

        for (i, value) in [90, 130, 55, 101, 77, 140, 62, 88, 99].iter().enumerate() {
            buffer.push(*value);
            effective.push(*value);
            assert!(buffer.len() <= capacity, "overflow after push {}", i);

            let window = &effective[effective.len() - capacity..];
            let expected = window.iter().sum::<Bpm>() / capacity as Bpm;
            assert_eq!(buffer.average(), Ok(expected));
        }

        let tail: Vec<Bpm> = buffer.values().collect();
        assert_eq!(tail, vec![140, 62, 88, 99]);
    }
}
