//! Sensor Transports
//!
//! A transport turns some external source into [`Sample`]s and pushes them
//! through a [`SampleSender`]. [`run_supervised`] owns the open/release
//! lifecycle and restarts failed transports without touching engine state.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::sample::Sample;

pub mod lines;
pub mod replay;

pub use lines::LineTransport;
pub use replay::ReplayTransport;

/// Producer side of the engine's sample queue. Cheap to clone; any number
/// of transports may feed one engine. Each clone counts only the samples
/// it delivered itself.
#[derive(Debug)]
pub struct SampleSender {
    tx: mpsc::Sender<Sample>,
    sent: AtomicU64,
}

impl Clone for SampleSender {
    fn clone(&self) -> Self {
        Self::new(self.tx.clone())
    }
}

impl SampleSender {
    pub fn new(tx: mpsc::Sender<Sample>) -> Self {
        Self { tx, sent: AtomicU64::new(0) }
    }

    /// Queue a sample, waiting while the queue is full.
    pub async fn on_sample(&self, sample: Sample) -> Result<(), TransportError> {
        self.tx.send(sample).await.map_err(|_| TransportError::Closed)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Samples queued through this sender.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait::async_trait]
pub trait SensorTransport: Send {
    fn name(&self) -> &str;

    /// Acquire the underlying device or stream. Called again after a failure.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Push samples until the source is exhausted (`Ok`) or fails.
    async fn pump(&mut self, samples: &SampleSender) -> Result<(), TransportError>;

    /// Release whatever `open` acquired. Must tolerate being called when
    /// nothing is open.
    fn release(&mut self);
}

/// Scoped transport session: `release` runs when the guard goes out of
/// scope, on success, error and panic paths alike.
pub struct TransportGuard<'a, T: SensorTransport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: SensorTransport + ?Sized> TransportGuard<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }
}

impl<T: SensorTransport + ?Sized> Deref for TransportGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: SensorTransport + ?Sized> DerefMut for TransportGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: SensorTransport + ?Sized> Drop for TransportGuard<'_, T> {
    fn drop(&mut self) {
        debug!("Releasing transport {}", self.transport.name());
        self.transport.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Run `transport` until it ends, restarting it after failures.
///
/// Returns `Ok` when the source is exhausted, `Err(Closed)` when the
/// engine stopped accepting samples, or the last error once
/// `max_restarts` consecutive failures have been reached. A session that
/// delivered at least one sample before failing starts the count over.
pub async fn run_supervised<T: SensorTransport + ?Sized>(
    transport: &mut T,
    samples: SampleSender,
    policy: RestartPolicy,
) -> Result<(), TransportError> {
    let name = transport.name().to_string();
    let mut failures = 0u32;

    loop {
        let feed = samples.clone();
        let outcome = {
            let mut session = TransportGuard::new(&mut *transport);
            info!("Starting transport {}", name);
            match session.open().await {
                Ok(()) => session.pump(&feed).await,
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(()) => {
                info!("Transport {} finished", name);
                return Ok(());
            }
            Err(TransportError::Closed) => {
                info!("Sample queue closed, stopping transport {}", name);
                return Err(TransportError::Closed);
            }
            Err(e) => {
                if feed.sent() > 0 && failures > 0 {
                    debug!("Transport {} delivered {} samples, resetting failure count", name, feed.sent());
                    failures = 0;
                }
                failures += 1;
                if failures > policy.max_restarts {
                    error!("Transport {} failed {} times, giving up: {}", name, failures, e);
                    return Err(e);
                }
                warn!(
                    "Transport {} failed ({}), restart {}/{} in {:?}",
                    name, e, failures, policy.max_restarts, policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
