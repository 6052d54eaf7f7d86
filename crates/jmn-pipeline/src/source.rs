//! Where raw event payloads come from. The broker client itself lives outside this
//! workspace; these sources cover file replay and in-process producers.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventSource: Send {
    /// Next payload in partition order, or `None` once the source is exhausted.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>>;

    /// Commit `delivery` so it is not handed out again.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;
}

/// Replays a file holding one JSON event per line. Offsets are 1-based line numbers.
///
/// Lines are handed out as raw bytes; a line that is not valid UTF-8 is still a
/// delivery and fails later as a malformed event.
pub struct JsonLinesSource {
    reader: BufReader<File>,
    line_no: u64,
    committed: Option<u64>,
}

impl JsonLinesSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            reader: BufReader::new(file),
            line_no: 0,
            committed: None,
        })
    }

    pub fn committed_offset(&self) -> Option<u64> {
        self.committed
    }
}

#[async_trait]
impl EventSource for JsonLinesSource {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        loop {
            let mut line = Vec::new();
            let read = self
                .reader
                .read_until(b'\n', &mut line)
                .await
                .context("reading event line")?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            while line.last().is_some_and(|b| matches!(b, b'\n' | b'\r')) {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(Delivery {
                partition: 0,
                offset: self.line_no,
                payload: line,
            }));
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        self.committed = Some(delivery.offset);
        Ok(())
    }
}

/// Source fed through a tokio channel; ends when every sender is dropped.
pub struct ChannelSource {
    partition: u32,
    rx: mpsc::Receiver<Vec<u8>>,
    next_offset: u64,
    committed: Option<u64>,
}

impl ChannelSource {
    pub fn new(partition: u32, capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                partition,
                rx,
                next_offset: 0,
                committed: None,
            },
        )
    }

    pub fn committed_offset(&self) -> Option<u64> {
        self.committed
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let Some(payload) = self.rx.recv().await else {
            return Ok(None);
        };
        let offset = self.next_offset;
        self.next_offset += 1;
        Ok(Some(Delivery {
            partition: self.partition,
            offset,
            payload,
        }))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        self.committed = Some(delivery.offset);
        Ok(())
    }
}
