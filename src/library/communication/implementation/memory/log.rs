use crate::library::communication::event::{AppendLog, Record, Sequence};
use crate::library::communication::StreamError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

/// Error used to simulate an unreachable store
#[derive(Error, Debug)]
#[error("memory log has been taken offline")]
pub struct MemoryLogOffline;

struct MemoryStream {
    records: VecDeque<Record>,
    last: Option<Sequence>,
    appended: watch::Sender<Option<Sequence>>,

    // Sending on a watch channel without receivers does not update its value,
    // thus one receiver is kept alive for as long as the stream exists.
    _appended_rx: watch::Receiver<Option<Sequence>>,
}

impl MemoryStream {
    fn new() -> Self {
        let (appended, appended_rx) = watch::channel(None);

        Self {
            records: VecDeque::new(),
            last: None,
            appended,
            _appended_rx: appended_rx,
        }
    }

    fn next_sequence(&self) -> Sequence {
        match self.last {
            Some(last) => last.successor(),
            None => Sequence::new(1, 0),
        }
    }

    fn trim(&mut self, limit: usize) {
        while self.records.len() > limit {
            self.records.pop_front();
        }
    }
}

/// [`AppendLog`] implementation held entirely in memory
///
/// Sequences are assigned as `1-0`, `2-0`, `3-0`, … so that a healthy stream never contains gaps.
/// The log can be switched offline to simulate an unavailable store.
#[derive(Default)]
pub struct MemoryLog {
    streams: Mutex<HashMap<String, MemoryStream>>,
    offline: AtomicBool,
}

impl MemoryLog {
    /// Makes all subsequent operations fail with [`StreamError::StoreUnavailable`] until brought back online
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of records currently retained in a stream
    pub async fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|s| s.records.len())
            .unwrap_or_default()
    }

    fn ensure_online(&self) -> Result<(), StreamError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StreamError::unavailable(MemoryLogOffline))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AppendLog for MemoryLog {
    async fn append(
        &self,
        stream: &str,
        payload: &[u8],
        limit: Option<usize>,
    ) -> Result<Sequence, StreamError> {
        self.ensure_online()?;

        let mut streams = self.streams.lock().await;
        let entry = streams
            .entry(stream.to_owned())
            .or_insert_with(MemoryStream::new);

        let sequence = entry.next_sequence();
        entry
            .records
            .push_back(Record::new(stream, sequence, payload.to_vec()));
        entry.last = Some(sequence);

        if let Some(limit) = limit {
            entry.trim(limit);
        }

        entry.appended.send(Some(sequence)).ok();

        Ok(sequence)
    }

    async fn read_after(
        &self,
        stream: &str,
        after: Option<Sequence>,
        count: usize,
    ) -> Result<Vec<Record>, StreamError> {
        self.ensure_online()?;

        let streams = self.streams.lock().await;
        let records = match streams.get(stream) {
            Some(entry) => entry
                .records
                .iter()
                .filter(|record| Some(record.sequence()) > after)
                .take(count)
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(records)
    }

    async fn read_sequences(
        &self,
        stream: &str,
        sequences: &[Sequence],
    ) -> Result<Vec<Record>, StreamError> {
        self.ensure_online()?;

        let streams = self.streams.lock().await;
        let records = match streams.get(stream) {
            Some(entry) => sequences
                .iter()
                .filter_map(|sequence| {
                    entry
                        .records
                        .binary_search_by_key(sequence, Record::sequence)
                        .ok()
                        .and_then(|index| entry.records.get(index))
                        .cloned()
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(records)
    }

    async fn last_sequence(&self, stream: &str) -> Result<Option<Sequence>, StreamError> {
        self.ensure_online()?;
        Ok(self
            .streams
            .lock()
            .await
            .get(stream)
            .and_then(|entry| entry.last))
    }

    async fn wait_for_append(
        &self,
        stream: &str,
        after: Option<Sequence>,
        duration: Duration,
    ) -> Result<(), StreamError> {
        self.ensure_online()?;

        let mut rx = self
            .streams
            .lock()
            .await
            .entry(stream.to_owned())
            .or_insert_with(MemoryStream::new)
            .appended
            .subscribe();

        let wait = async {
            loop {
                let last = *rx.borrow_and_update();
                if last > after || rx.changed().await.is_err() {
                    break;
                }
            }
        };

        timeout(duration, wait).await.ok();

        Ok(())
    }
}
