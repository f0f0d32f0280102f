//! JSON lines output.
//!
//! Writes every event of every processed bundle as one line, then
//! acknowledges the bundle's events.

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use logforge_core::{Bundle, dispatch_ack};

/// Drain `output` into `writer` until the pool closes the channel.
///
/// Returns the number of events written.
pub async fn write_bundles<W>(mut output: mpsc::Receiver<Bundle>, writer: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    let mut written = 0u64;

    while let Some(mut bundle) = output.recv().await {
        for event in bundle.events_mut().iter_mut() {
            let encoded = event.bytes();
            writer
                .write_all(&encoded)
                .await
                .context("failed to write event")?;
            writer
                .write_all(b"\n")
                .await
                .context("failed to write event")?;
            written += 1;
        }
        writer.flush().await.context("failed to flush output")?;
        dispatch_ack(bundle.events());
    }

    writer.shutdown().await.context("failed to close output")?;
    tracing::debug!(events = written, "output closed");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use logforge_core::{Acknowledger, Event, Map, Value};

    use super::*;

    #[derive(Default)]
    struct Counter {
        calls: Mutex<Vec<usize>>,
    }

    impl Acknowledger for Counter {
        fn acknowledge(&self, events: &[&Event]) {
            self.calls.lock().unwrap().push(events.len());
        }
    }

    #[tokio::test]
    async fn writes_lines_and_acknowledges() {
        let acker = Arc::new(Counter::default());
        let make = |n: i64| {
            let mut data = Map::new();
            data.insert("n".to_owned(), Value::Int(n));
            data.insert(
                "@timestamp".to_owned(),
                Value::from("2024-01-01T00:00:00Z"),
            );
            Event::new(data).with_acknowledger(acker.clone() as Arc<dyn Acknowledger>)
        };

        let (tx, rx) = mpsc::channel(4);
        tx.send(Bundle::new(vec![make(1), make(2)])).await.unwrap();
        tx.send(Bundle::new(vec![make(3)])).await.unwrap();
        drop(tx);

        let mut buffer = Vec::new();
        let written = write_bundles(rx, &mut buffer).await.unwrap();
        assert_eq!(written, 3);

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["n"], 1);
        assert!(first.get("@metadata").is_none());
        assert_eq!(*acker.calls.lock().unwrap(), vec![2, 1]);
    }
}
