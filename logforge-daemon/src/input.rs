//! JSON lines input.
//!
//! Each non-empty line is decoded into a map, decorated with the stream
//! fields and collected into a [`Bundle`]. A bundle is sent to the pool
//! when it reaches `batch_size` events or when `flush_interval_ms`
//! elapses, whichever comes first.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use logforge_core::config::LogforgeConfig;
use logforge_core::metrics as m;
use logforge_core::{Bundle, Event, EventError, StreamDecorator, Value};

/// Decodes input lines and groups them into batches.
#[derive(Debug, Clone)]
pub struct InputBatcher {
    decorator: StreamDecorator,
    batch_size: usize,
    flush_interval: Duration,
}

impl InputBatcher {
    pub fn from_config(config: &LogforgeConfig) -> Self {
        Self {
            decorator: StreamDecorator::new(&config.general, &config.stream),
            batch_size: config.input.batch_size.max(1),
            flush_interval: Duration::from_millis(config.input.flush_interval_ms.max(1)),
        }
    }

    /// Decode one line into a decorated event.
    ///
    /// The line must hold a single JSON object.
    pub fn decode(&self, line: &str) -> Result<Event, EventError> {
        let value: Value = serde_json::from_str(line).map_err(|e| EventError::Decode {
            reason: e.to_string(),
        })?;
        match value {
            Value::Map(map) => Ok(self.decorator.new_event(map)),
            other => Err(EventError::Decode {
                reason: format!("expected a JSON object, found {}", other.kind()),
            }),
        }
    }

    /// Read lines until EOF or cancellation, sending batches to `sender`.
    ///
    /// The pending batch is flushed before returning. Returns the number
    /// of events sent.
    ///
    /// # Errors
    ///
    /// - Reading from `reader` fails
    /// - The pool input channel is closed
    pub async fn run<R>(
        self,
        reader: R,
        sender: mpsc::Sender<Bundle>,
        shutdown: CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut sent = 0u64;

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::debug!("input cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    sent += flush(&mut batch, &sender).await?;
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read input line")? else {
                        tracing::info!("input reached end of stream");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match self.decode(&line) {
                        Ok(event) => batch.push(event),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping undecodable input line");
                            metrics::counter!(m::DAEMON_DECODE_ERRORS_TOTAL).increment(1);
                        }
                    }
                    if batch.len() >= self.batch_size {
                        sent += flush(&mut batch, &sender).await?;
                        ticker.reset();
                    }
                }
            }
        }

        sent += flush(&mut batch, &sender).await?;
        Ok(sent)
    }
}

async fn flush(batch: &mut Vec<Event>, sender: &mpsc::Sender<Bundle>) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    let events = std::mem::take(batch);
    let count = events.len() as u64;
    sender
        .send(Bundle::new(events))
        .await
        .map_err(|_| anyhow::anyhow!("pool input channel closed"))?;
    Ok(count)
}
