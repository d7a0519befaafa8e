use super::{AppendLog, Record, Sequence, StartOffset};
use crate::library::communication::StreamError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Record that has been handed to a consumer but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Position of the record in its stream
    pub sequence: Sequence,
    /// Consumer which currently owns the record
    pub consumer: String,
    /// How often the record has been delivered so far
    pub delivery_count: u64,
    /// Time passed since the last delivery
    pub idle: Duration,
}

/// Snapshot of a consumer group's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Highest sequence handed out for new delivery, `None` if nothing has been delivered yet
    pub cursor: Option<Sequence>,
    /// Number of delivered but unacknowledged records
    pub pending: usize,
}

/// Shared bookkeeping of consumer groups on top of a stream store
///
/// All members of a group talk to the same coordinator. It hands out every record at most once
/// per group (absent failures), remembers which consumer owns which delivered record and allows
/// crashed consumers' work to be taken over by their peers.
#[async_trait]
pub trait GroupCoordinator {
    /// Creates a consumer group, failing with [`StreamError::AlreadyExists`] if it is already present.
    ///
    /// The stream is created if it does not exist yet.
    async fn try_create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<(), StreamError>;

    /// Idempotently creates a consumer group
    ///
    /// An existing group is left untouched, including its cursor. Any other failure,
    /// most notably an unreachable store, is still reported.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<(), StreamError> {
        match self.try_create_group(stream, group, start).await {
            Err(StreamError::AlreadyExists { .. }) => {
                debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            result => result,
        }
    }

    /// Hands out up to `count` records that have never been delivered to this group before
    ///
    /// Returned records are marked as pending for `consumer`. When nothing new is available the call waits
    /// up to `block` for an append and then returns an empty batch, which is not considered an error.
    async fn claim_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Record>, StreamError>;

    /// Marks a record as processed, returning whether it was pending. Unknown records are ignored.
    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        sequence: Sequence,
    ) -> Result<bool, StreamError>;

    /// Transfers pending records that have been idle for at least `idle_threshold` to `consumer`
    /// and returns them for redelivery
    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_threshold: Duration,
        count: usize,
    ) -> Result<Vec<Record>, StreamError>;

    /// Lists all pending records of a group ordered by sequence
    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError>;

    /// Retrieves the current bookkeeping state of a group, `None` if it does not exist
    async fn group_info(&self, stream: &str, group: &str)
        -> Result<Option<GroupInfo>, StreamError>;
}

#[async_trait]
impl<C> GroupCoordinator for Arc<C>
where
    C: GroupCoordinator + Send + Sync + ?Sized,
{
    async fn try_create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<(), StreamError> {
        (**self).try_create_group(stream, group, start).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<(), StreamError> {
        (**self).create_group(stream, group, start).await
    }

    async fn claim_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Record>, StreamError> {
        (**self)
            .claim_next(stream, group, consumer, count, block)
            .await
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        sequence: Sequence,
    ) -> Result<bool, StreamError> {
        (**self).acknowledge(stream, group, sequence).await
    }

    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_threshold: Duration,
        count: usize,
    ) -> Result<Vec<Record>, StreamError> {
        (**self)
            .reclaim_stale(stream, group, consumer, idle_threshold, count)
            .await
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError> {
        (**self).pending(stream, group).await
    }

    async fn group_info(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Option<GroupInfo>, StreamError> {
        (**self).group_info(stream, group).await
    }
}

struct PendingState {
    consumer: String,
    delivery_count: u64,
    delivered_at: Instant,
}

#[derive(Default)]
struct GroupState {
    cursor: Option<Sequence>,
    pending: BTreeMap<Sequence, PendingState>,
}

type GroupKey = (String, String);

/// [`GroupCoordinator`] that keeps the group bookkeeping in-process on top of any [`AppendLog`]
///
/// Each group is guarded by its own lock so that concurrent claims within a group are serialized
/// while different groups never contend with each other.
pub struct LogCoordinator<L> {
    log: L,
    groups: RwLock<HashMap<GroupKey, Arc<Mutex<GroupState>>>>,
}

impl<L> LogCoordinator<L>
where
    L: AppendLog + Send + Sync,
{
    /// Creates a new coordinator without any groups
    pub fn new(log: L) -> Self {
        Self {
            log,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Underlying stream store
    pub fn log(&self) -> &L {
        &self.log
    }

    async fn group(&self, stream: &str, group: &str) -> Option<Arc<Mutex<GroupState>>> {
        self.groups
            .read()
            .await
            .get(&(stream.to_owned(), group.to_owned()))
            .cloned()
    }

    async fn existing_group(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Arc<Mutex<GroupState>>, StreamError> {
        self.group(stream, group)
            .await
            .ok_or_else(|| StreamError::UnknownGroup {
                stream: stream.to_owned(),
                group: group.to_owned(),
            })
    }
}

#[async_trait]
impl<L> GroupCoordinator for LogCoordinator<L>
where
    L: AppendLog + Send + Sync,
{
    async fn try_create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartOffset,
    ) -> Result<(), StreamError> {
        let key = (stream.to_owned(), group.to_owned());

        if self.groups.read().await.contains_key(&key) {
            return Err(StreamError::AlreadyExists {
                stream: stream.to_owned(),
                group: group.to_owned(),
            });
        }

        let cursor = match start {
            StartOffset::Head => None,
            StartOffset::Tail => self.log.last_sequence(stream).await?,
        };

        let mut groups = self.groups.write().await;
        if groups.contains_key(&key) {
            return Err(StreamError::AlreadyExists {
                stream: stream.to_owned(),
                group: group.to_owned(),
            });
        }

        debug!(stream, group, ?cursor, "Creating consumer group");
        groups.insert(
            key,
            Arc::new(Mutex::new(GroupState {
                cursor,
                pending: BTreeMap::new(),
            })),
        );

        Ok(())
    }

    async fn claim_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Record>, StreamError> {
        let state = self.existing_group(stream, group).await?;
        let deadline = block.map(|duration| Instant::now() + duration);

        if count == 0 {
            return Ok(Vec::new());
        }

        loop {
            let cursor = {
                let mut state = state.lock().await;
                let records = self.log.read_after(stream, state.cursor, count).await?;

                if let Some(last) = records.last() {
                    let now = Instant::now();

                    for record in records.iter() {
                        state.pending.insert(
                            record.sequence(),
                            PendingState {
                                consumer: consumer.to_owned(),
                                delivery_count: 1,
                                delivered_at: now,
                            },
                        );
                    }

                    state.cursor = Some(last.sequence());
                    trace!(stream, group, consumer, count = records.len(), cursor = %last.sequence(), "Claimed records");

                    return Ok(records);
                }

                state.cursor
            };

            // The group lock is released while waiting so that acknowledgements are not held up
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }

                    // Trimmed records never show up in read_after, so wait for anything newer
                    // than the log head instead of the cursor.
                    let newest = self.log.last_sequence(stream).await?.max(cursor);

                    self.log
                        .wait_for_append(stream, newest, deadline - now)
                        .await?;
                }
                None => return Ok(Vec::new()),
            }
        }
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        sequence: Sequence,
    ) -> Result<bool, StreamError> {
        let state = match self.group(stream, group).await {
            Some(state) => state,
            None => return Ok(false),
        };

        let removed = state.lock().await.pending.remove(&sequence).is_some();

        if !removed {
            trace!(stream, group, %sequence, "Ignoring acknowledgement of non-pending record");
        }

        Ok(removed)
    }

    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_threshold: Duration,
        count: usize,
    ) -> Result<Vec<Record>, StreamError> {
        let state = self.existing_group(stream, group).await?;
        let mut state = state.lock().await;
        let now = Instant::now();

        let stale: Vec<Sequence> = state
            .pending
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.delivered_at) >= idle_threshold)
            .map(|(sequence, _)| *sequence)
            .take(count)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.log.read_sequences(stream, &stale).await?;
        let retained: HashSet<Sequence> = records.iter().map(Record::sequence).collect();

        for sequence in stale {
            if !retained.contains(&sequence) {
                warn!(stream, group, %sequence, "Dropping pending entry of trimmed record");
                state.pending.remove(&sequence);
            } else if let Some(entry) = state.pending.get_mut(&sequence) {
                debug!(stream, group, %sequence, from = %entry.consumer, to = consumer, "Reclaiming stale record");
                entry.consumer = consumer.to_owned();
                entry.delivery_count += 1;
                entry.delivered_at = now;
            }
        }

        Ok(records)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError> {
        let state = self.existing_group(stream, group).await?;
        let state = state.lock().await;
        let now = Instant::now();

        Ok(state
            .pending
            .iter()
            .map(|(sequence, entry)| PendingEntry {
                sequence: *sequence,
                consumer: entry.consumer.clone(),
                delivery_count: entry.delivery_count,
                idle: now.saturating_duration_since(entry.delivered_at),
            })
            .collect())
    }

    async fn group_info(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Option<GroupInfo>, StreamError> {
        match self.group(stream, group).await {
            Some(state) => {
                let state = state.lock().await;
                Ok(Some(GroupInfo {
                    cursor: state.cursor,
                    pending: state.pending.len(),
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::memory::MemoryLog;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    const STREAM: &str = "orders";
    const GROUP: &str = "my-group";

    async fn coordinator_with_records(count: usize) -> Arc<LogCoordinator<Arc<MemoryLog>>> {
        let log = Arc::new(MemoryLog::default());

        for i in 0..count {
            log.append(STREAM, format!("record-{}", i).as_bytes(), None)
                .await
                .unwrap();
        }

        Arc::new(LogCoordinator::new(log))
    }

    fn sequences(records: &[Record]) -> Vec<Sequence> {
        records.iter().map(Record::sequence).collect()
    }

    /// Log which counts how often it has been scanned for new records
    #[derive(Default)]
    struct CountingLog {
        inner: MemoryLog,
        reads: std::sync::atomic::AtomicUsize,
    }

    impl CountingLog {
        fn reads(&self) -> usize {
            self.reads.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AppendLog for CountingLog {
        async fn append(
            &self,
            stream: &str,
            payload: &[u8],
            limit: Option<usize>,
        ) -> Result<Sequence, StreamError> {
            self.inner.append(stream, payload, limit).await
        }

        async fn read_after(
            &self,
            stream: &str,
            after: Option<Sequence>,
            count: usize,
        ) -> Result<Vec<Record>, StreamError> {
            self.reads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.read_after(stream, after, count).await
        }

        async fn read_sequences(
            &self,
            stream: &str,
            sequences: &[Sequence],
        ) -> Result<Vec<Record>, StreamError> {
            self.inner.read_sequences(stream, sequences).await
        }

        async fn last_sequence(&self, stream: &str) -> Result<Option<Sequence>, StreamError> {
            self.inner.last_sequence(stream).await
        }

        async fn wait_for_append(
            &self,
            stream: &str,
            after: Option<Sequence>,
            timeout: Duration,
        ) -> Result<(), StreamError> {
            self.inner.wait_for_append(stream, after, timeout).await
        }
    }

    #[tokio::test]
    async fn create_groups_idempotently() {
        let coordinator = coordinator_with_records(3).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        coordinator
            .claim_next(STREAM, GROUP, "consumer-1", 2, None)
            .await
            .unwrap();
        let before = coordinator.group_info(STREAM, GROUP).await.unwrap();

        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();
        let after = coordinator.group_info(STREAM, GROUP).await.unwrap();

        assert_eq!(before, after);
        assert_eq!(after.unwrap().cursor, Some(Sequence::new(2, 0)));
    }

    #[tokio::test]
    async fn report_existing_group_when_strict() {
        let coordinator = coordinator_with_records(0).await;
        coordinator
            .try_create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let result = coordinator
            .try_create_group(STREAM, GROUP, StartOffset::Head)
            .await;

        assert!(matches!(result, Err(StreamError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn start_at_tail() {
        let coordinator = coordinator_with_records(3).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Tail)
            .await
            .unwrap();

        let initial = coordinator
            .claim_next(STREAM, GROUP, "consumer-1", 10, None)
            .await
            .unwrap();
        assert!(initial.is_empty());

        let appended = coordinator
            .log()
            .append(STREAM, b"fresh", None)
            .await
            .unwrap();
        let claimed = coordinator
            .claim_next(STREAM, GROUP, "consumer-1", 10, None)
            .await
            .unwrap();

        assert_eq!(sequences(&claimed), vec![appended]);
    }

    #[tokio::test]
    async fn reject_claims_for_unknown_groups() {
        let coordinator = coordinator_with_records(1).await;
        let result = coordinator
            .claim_next(STREAM, "nobody", "consumer-1", 1, None)
            .await;

        assert!(matches!(result, Err(StreamError::UnknownGroup { .. })));
    }

    #[tokio::test]
    async fn never_deliver_twice_within_group() {
        let coordinator = coordinator_with_records(100).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let consumer = format!("consumer-{}", i);
                    let mut claimed = Vec::new();

                    loop {
                        let batch = coordinator
                            .claim_next(STREAM, GROUP, &consumer, 3, None)
                            .await
                            .unwrap();

                        if batch.is_empty() {
                            break claimed;
                        }

                        claimed.extend(sequences(&batch));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;

        for handle in handles {
            for sequence in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(sequence), "{} delivered twice", sequence);
            }
        }

        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn deliver_to_each_group_independently() {
        let coordinator = coordinator_with_records(2).await;
        coordinator
            .create_group(STREAM, "group-a", StartOffset::Head)
            .await
            .unwrap();
        coordinator
            .create_group(STREAM, "group-b", StartOffset::Head)
            .await
            .unwrap();

        let a = coordinator
            .claim_next(STREAM, "group-a", "consumer-1", 10, None)
            .await
            .unwrap();
        let b = coordinator
            .claim_next(STREAM, "group-b", "consumer-1", 10, None)
            .await
            .unwrap();

        assert_eq!(sequences(&a), sequences(&b));
        assert_eq!(a.len(), 2);
    }

    #[tokio::test]
    async fn track_pending_until_acknowledged() {
        let coordinator = coordinator_with_records(2).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let claimed = coordinator
            .claim_next(STREAM, GROUP, "consumer-1", 10, None)
            .await
            .unwrap();

        let pending = coordinator.pending(STREAM, GROUP).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .all(|entry| entry.consumer == "consumer-1" && entry.delivery_count == 1));

        let first = claimed[0].sequence();
        assert!(coordinator.acknowledge(STREAM, GROUP, first).await.unwrap());
        assert!(!coordinator.acknowledge(STREAM, GROUP, first).await.unwrap());
        assert!(!coordinator
            .acknowledge(STREAM, GROUP, Sequence::new(999, 0))
            .await
            .unwrap());
        assert!(!coordinator
            .acknowledge(STREAM, "nobody", first)
            .await
            .unwrap());

        let pending = coordinator.pending(STREAM, GROUP).await.unwrap();
        assert_eq!(sequences_of(&pending), vec![claimed[1].sequence()]);
    }

    fn sequences_of(entries: &[PendingEntry]) -> Vec<Sequence> {
        entries.iter().map(|entry| entry.sequence).collect()
    }

    #[tokio::test]
    async fn redeliver_stale_records_to_another_consumer() {
        tokio::time::pause();

        let coordinator = coordinator_with_records(1).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let claimed = coordinator
            .claim_next(STREAM, GROUP, "crashing", 1, None)
            .await
            .unwrap();

        let threshold = Duration::from_secs(30);
        let early = coordinator
            .reclaim_stale(STREAM, GROUP, "survivor", threshold, 10)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(threshold).await;

        let reclaimed = coordinator
            .reclaim_stale(STREAM, GROUP, "survivor", threshold, 10)
            .await
            .unwrap();
        assert_eq!(reclaimed, claimed);

        let pending = coordinator.pending(STREAM, GROUP).await.unwrap();
        assert_eq!(pending[0].consumer, "survivor");
        assert_eq!(pending[0].delivery_count, 2);
        assert_eq!(pending[0].idle, Duration::ZERO);
    }

    #[tokio::test]
    async fn drop_pending_entries_of_trimmed_records() {
        tokio::time::pause();

        let log = Arc::new(MemoryLog::default());
        log.append(STREAM, b"old", None).await.unwrap();
        let coordinator = LogCoordinator::new(log.clone());
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();
        coordinator
            .claim_next(STREAM, GROUP, "crashing", 1, None)
            .await
            .unwrap();

        log.append(STREAM, b"new", Some(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let reclaimed = coordinator
            .reclaim_stale(STREAM, GROUP, "survivor", Duration::from_secs(1), 10)
            .await
            .unwrap();

        assert!(reclaimed.is_empty());
        assert!(coordinator.pending(STREAM, GROUP).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_for_appends_while_blocking() {
        let coordinator = coordinator_with_records(0).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let waiting = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .claim_next(STREAM, GROUP, "consumer-1", 1, Some(Duration::from_secs(10)))
                    .await
                    .unwrap()
            })
        };

        tokio::task::yield_now().await;
        let sequence = coordinator
            .log()
            .append(STREAM, b"late", None)
            .await
            .unwrap();

        let claimed = waiting.await.unwrap();
        assert_eq!(sequences(&claimed), vec![sequence]);
    }

    #[tokio::test]
    async fn return_empty_batch_after_block_timeout() {
        tokio::time::pause();

        let coordinator = coordinator_with_records(0).await;
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let claimed = coordinator
            .claim_next(STREAM, GROUP, "consumer-1", 1, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(claimed.is_empty());
        assert_eq!(
            coordinator.group_info(STREAM, GROUP).await.unwrap(),
            Some(GroupInfo {
                cursor: None,
                pending: 0
            })
        );
    }

    #[tokio::test]
    async fn block_quietly_when_unread_records_were_trimmed() {
        let log = Arc::new(CountingLog::default());
        let coordinator = LogCoordinator::new(log.clone());
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        for _ in 0..3 {
            log.append(STREAM, b"gone", Some(0)).await.unwrap();
        }

        let claimed = coordinator
            .claim_next(STREAM, GROUP, "consumer-1", 1, Some(Duration::from_millis(200)))
            .await
            .unwrap();

        assert!(claimed.is_empty());
        assert!(log.reads() <= 3, "log was scanned {} times", log.reads());
    }
}
