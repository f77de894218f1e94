use std::io;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, warn};

use super::{SampleSender, SensorTransport};
use crate::decoder::parse_line;
use crate::error::TransportError;

type Connect<R> = Box<dyn FnMut() -> io::Result<R> + Send>;

/// Line-oriented source: one decimal BPM or hex-encoded data page per line.
///
/// Samples are stamped with the wall-clock time they were read. Lines that
/// fail to decode are logged and skipped.
pub struct LineTransport<R> {
    name: String,
    connect: Connect<R>,
    lines: Option<Lines<R>>,
    skipped: u64,
}

impl LineTransport<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new("stdin", || Ok(BufReader::new(tokio::io::stdin())))
    }
}

impl<R> LineTransport<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// `connect` is called on every `open`, so a restarted transport gets a
    /// fresh reader.
    pub fn new<F>(name: impl Into<String>, connect: F) -> Self
    where
        F: FnMut() -> io::Result<R> + Send + 'static,
    {
        Self {
            name: name.into(),
            connect: Box::new(connect),
            lines: None,
            skipped: 0,
        }
    }

    /// Wrap a reader that can only be opened once.
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        let mut slot = Some(reader);
        Self::new(name, move || {
            slot.take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "source already consumed"))
        })
    }

    /// Lines that could not be decoded so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait::async_trait]
impl<R> SensorTransport for LineTransport<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.lines.is_none() {
            let reader = (self.connect)()?;
            self.lines = Some(reader.lines());
        }
        Ok(())
    }

    async fn pump(&mut self, samples: &SampleSender) -> Result<(), TransportError> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| TransportError::Other(format!("{} is not open", self.name)))?;

        while let Some(line) = lines.next_line().await? {
            match parse_line(&line, Utc::now()) {
                Ok(Some(sample)) => samples.on_sample(sample).await?,
                Ok(None) => {}
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping input line: {}", e);
                }
            }
        }

        debug!("{} reached end of input", self.name);
        Ok(())
    }

    fn release(&mut self) {
        self.lines = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_reads_values_and_pages_skipping_garbage() {
        let input: &[u8] = b"72\n# comment\n\nfast\n0000000000000078\n0\n95\n";
        let mut transport = LineTransport::from_reader("test", BufReader::new(input));
        let (tx, mut rx) = mpsc::channel(16);
        let sender = SampleSender::new(tx);

        transport.open().await.unwrap();
        transport.pump(&sender).await.unwrap();
        transport.release();
        drop(sender);

        let mut values = Vec::new();
        while let Some(sample) = rx.recv().await {
            values.push(sample.value);
        }
        assert_eq!(values, vec![72, 120, 95]);
        assert_eq!(transport.skipped(), 2);
    }

    #[tokio::test]
    async fn test_single_use_reader_fails_to_reopen() {
        let input: &[u8] = b"72\n";
        let mut transport = LineTransport::from_reader("test", BufReader::new(input));

        transport.open().await.unwrap();
        transport.release();

        assert!(matches!(transport.open().await, Err(TransportError::Io(_))));
    }
}
