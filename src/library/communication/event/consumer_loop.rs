use super::{
    ConsumerGroupDescriptor, ConsumerIdentifier, GroupCoordinator, Record, RecordHandler, Sequence,
};
use crate::library::communication::StreamError;
use crate::library::helpers::Backoff;
use crate::library::BoxedError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, trace, warn};

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Observable phase of a [`ConsumerLoop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between two cycles
    Idle,
    /// Waiting for the coordinator to hand out records
    Polling,
    /// A record is being processed by the handler
    Dispatching,
    /// Processed record is being acknowledged
    Acknowledging,
    /// Waiting after an empty poll or a failure
    Backoff,
    /// Loop has terminated
    Stopped,
}

/// Failure encountered while running a [`ConsumerLoop`]
#[derive(Error, Debug)]
pub enum LoopError {
    /// Consumer group could not be created
    #[error("failed to create consumer group")]
    GroupCreation(#[source] StreamError),
    /// Coordinator did not hand out records
    #[error("failed to poll for records")]
    Poll(#[source] StreamError),
    /// Stale records could not be reclaimed
    #[error("failed to reclaim stale records")]
    Reclaim(#[source] StreamError),
    /// Handler did not process a record successfully
    #[error("handler failed to process record {sequence}")]
    Handler {
        /// Record that caused the failure
        sequence: Sequence,
        /// Error returned by the handler
        #[source]
        source: BoxedError,
    },
    /// Processed record could not be acknowledged
    #[error("failed to acknowledge record {sequence}")]
    Acknowledge {
        /// Record that could not be acknowledged
        sequence: Sequence,
        /// Error returned by the coordinator
        #[source]
        source: StreamError,
    },
}

/// Reason why a [`ConsumerLoop`] terminated
#[derive(Debug)]
pub enum LoopExit {
    /// Stop was requested from the outside
    Stopped,
    /// The error predicate decided to cancel the loop
    Cancelled(LoopError),
}

/// Decides whether a [`LoopError`] terminates a [`ConsumerLoop`]
pub type CancelPredicate = Arc<dyn Fn(&LoopError) -> bool + Send + Sync>;

/// Periodic takeover of records whose consumer went quiet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimPolicy {
    /// Time between two reclaim passes
    pub interval: Duration,
    /// Minimum time a record has to be pending before it may be taken over
    pub idle_threshold: Duration,
}

/// Parameters of a [`ConsumerLoop`]
#[derive(Clone)]
pub struct ConsumerOptions {
    group: ConsumerGroupDescriptor,
    consumer: ConsumerIdentifier,
    batch_size: usize,
    poll_timeout: Duration,
    auto_acknowledge: bool,
    idle_backoff: Duration,
    error_backoff: Backoff,
    reclaim: Option<ReclaimPolicy>,
    cancel_on_error: CancelPredicate,
}

impl ConsumerOptions {
    /// Creates options for a consumer within a group
    ///
    /// Records are only acknowledged after successful processing, errors never cancel the loop
    /// and stale records are not reclaimed.
    pub fn new(group: ConsumerGroupDescriptor, consumer: impl Into<ConsumerIdentifier>) -> Self {
        Self {
            group,
            consumer: consumer.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            auto_acknowledge: false,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            error_backoff: Backoff::default(),
            reclaim: None,
            cancel_on_error: Arc::new(|_| false),
        }
    }

    /// Maximum number of records requested per poll
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Maximum time a single poll waits for new records
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Acknowledge records after dispatch regardless of the handler outcome.
    /// Failed records will not be redelivered!
    pub fn with_auto_acknowledge(mut self, auto_acknowledge: bool) -> Self {
        self.auto_acknowledge = auto_acknowledge;
        self
    }

    /// Pause after a poll that did not yield any records
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Pauses used after consecutive store failures
    pub fn with_error_backoff(mut self, error_backoff: Backoff) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    /// Periodically take over records that have been pending for too long
    pub fn with_reclaim(mut self, interval: Duration, idle_threshold: Duration) -> Self {
        self.reclaim = Some(ReclaimPolicy {
            interval,
            idle_threshold,
        });
        self
    }

    /// Predicate deciding which errors terminate the loop
    pub fn cancel_on_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&LoopError) -> bool + Send + Sync + 'static,
    {
        self.cancel_on_error = Arc::new(predicate);
        self
    }

    /// Group this consumer is part of
    pub fn group(&self) -> &ConsumerGroupDescriptor {
        &self.group
    }

    /// Identity of the consumer within its group
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Whether records are acknowledged regardless of the handler outcome
    pub fn auto_acknowledge(&self) -> bool {
        self.auto_acknowledge
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("batch_size", &self.batch_size)
            .field("poll_timeout", &self.poll_timeout)
            .field("auto_acknowledge", &self.auto_acknowledge)
            .field("idle_backoff", &self.idle_backoff)
            .field("reclaim", &self.reclaim)
            .finish()
    }
}

/// Drives the poll, dispatch and acknowledge cycle of one consumer
///
/// The loop first creates its consumer group (idempotently) and then repeatedly asks the
/// [`GroupCoordinator`] for new records, handing them to a [`RecordHandler`] in stream order.
/// Unless auto-acknowledgement is enabled, records are only acknowledged once the handler succeeded.
/// Failed records thus stay pending and are picked up again by a reclaim pass of any consumer in the group.
///
/// Store failures never terminate the loop on their own. They are logged, followed by an exponential
/// backoff and only end the loop if the [cancellation predicate](ConsumerOptions::cancel_on_error) says so.
pub struct ConsumerLoop<C, H> {
    coordinator: C,
    handler: H,
    stream: String,
    options: ConsumerOptions,
    state: watch::Sender<LoopState>,
    state_rx: watch::Receiver<LoopState>,
}

impl<C, H> ConsumerLoop<C, H>
where
    C: GroupCoordinator + Send + Sync,
    H: RecordHandler + Send + Sync,
{
    /// Creates a new loop for a given stream
    pub fn new(
        coordinator: C,
        stream: impl Into<String>,
        handler: H,
        options: ConsumerOptions,
    ) -> Self {
        let (state, state_rx) = watch::channel(LoopState::Idle);

        Self {
            coordinator,
            handler,
            stream: stream.into(),
            options,
            state,
            state_rx,
        }
    }

    /// Receiver reflecting the current [`LoopState`]
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state_rx.clone()
    }

    /// Runs the loop on the current task until a stop is signalled through `stop` or an error cancels it
    ///
    /// Dropping the sender of `stop` does not stop the loop.
    #[instrument(skip(self, stop), fields(stream = %self.stream, group = %self.options.group.name(), consumer = %self.options.consumer))]
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> LoopExit {
        info!("Starting consumer loop");
        let exit = self.cycle(&mut stop).await;
        self.transition(LoopState::Stopped);

        match &exit {
            LoopExit::Stopped => info!("Consumer loop stopped"),
            LoopExit::Cancelled(error) => warn!(?error, "Consumer loop cancelled"),
        }

        exit
    }

    async fn cycle(&self, stop: &mut watch::Receiver<bool>) -> LoopExit {
        let mut error_backoff = self.options.error_backoff.clone();
        let mut group_ready = false;
        let mut last_reclaim: Option<Instant> = None;

        loop {
            if *stop.borrow() {
                return LoopExit::Stopped;
            }

            self.transition(LoopState::Idle);

            if !group_ready {
                let group = &self.options.group;
                match self
                    .coordinator
                    .create_group(&self.stream, group.name(), group.start())
                    .await
                {
                    Ok(()) => {
                        debug!("Consumer group ready");
                        group_ready = true;
                        error_backoff.reset();
                    }
                    Err(e) => {
                        if let Some(exit) = self.handle_error(LoopError::GroupCreation(e)) {
                            return exit;
                        }

                        if self.back_off(&mut error_backoff, stop).await {
                            return LoopExit::Stopped;
                        }

                        continue;
                    }
                }
            }

            if let Some(policy) = self.options.reclaim {
                let due = last_reclaim
                    .map(|last| last.elapsed() >= policy.interval)
                    .unwrap_or(true);

                if due {
                    last_reclaim = Some(Instant::now());

                    match self.reclaim(policy).await {
                        Ok(records) if !records.is_empty() => {
                            debug!(count = records.len(), "Reclaimed stale records");
                            if let Some(exit) = self.dispatch(records).await {
                                return exit;
                            }
                            continue;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if let Some(exit) = self.handle_error(LoopError::Reclaim(e)) {
                                return exit;
                            }
                        }
                    }
                }
            }

            self.transition(LoopState::Polling);

            match self.poll().await {
                Ok(records) if records.is_empty() => {
                    error_backoff.reset();
                    self.transition(LoopState::Backoff);

                    if self.pause(self.options.idle_backoff, stop).await {
                        return LoopExit::Stopped;
                    }
                }
                Ok(records) => {
                    error_backoff.reset();

                    if let Some(exit) = self.dispatch(records).await {
                        return exit;
                    }
                }
                Err(e) => {
                    if matches!(e, StreamError::UnknownGroup { .. }) {
                        group_ready = false;
                    }

                    if let Some(exit) = self.handle_error(LoopError::Poll(e)) {
                        return exit;
                    }

                    if self.back_off(&mut error_backoff, stop).await {
                        return LoopExit::Stopped;
                    }
                }
            }
        }
    }

    async fn poll(&self) -> Result<Vec<Record>, StreamError> {
        self.coordinator
            .claim_next(
                &self.stream,
                self.options.group.name(),
                &self.options.consumer,
                self.options.batch_size,
                Some(self.options.poll_timeout),
            )
            .await
    }

    async fn reclaim(&self, policy: ReclaimPolicy) -> Result<Vec<Record>, StreamError> {
        self.coordinator
            .reclaim_stale(
                &self.stream,
                self.options.group.name(),
                &self.options.consumer,
                policy.idle_threshold,
                self.options.batch_size,
            )
            .await
    }

    /// Hands every record to the handler and acknowledges it. The whole batch is processed
    /// before a cancellation takes effect.
    async fn dispatch(&self, records: Vec<Record>) -> Option<LoopExit> {
        let mut exit = None;

        for record in records {
            let sequence = record.sequence();

            self.transition(LoopState::Dispatching);
            trace!(%sequence, "Dispatching record");
            let outcome = self.handler.handle(record).await;
            let succeeded = outcome.is_ok();

            if let Err(source) = outcome {
                let error = LoopError::Handler { sequence, source };
                if exit.is_none() {
                    exit = self.handle_error(error);
                }
            }

            if succeeded || self.options.auto_acknowledge {
                self.transition(LoopState::Acknowledging);

                match self
                    .coordinator
                    .acknowledge(&self.stream, self.options.group.name(), sequence)
                    .await
                {
                    Ok(true) => trace!(%sequence, "Acknowledged record"),
                    Ok(false) => debug!(%sequence, "Record was no longer pending"),
                    Err(source) => {
                        let error = LoopError::Acknowledge { sequence, source };
                        if exit.is_none() {
                            exit = self.handle_error(error);
                        }
                    }
                }
            }
        }

        exit
    }

    /// Returns the exit reason if the error cancels the loop, logs it otherwise
    fn handle_error(&self, error: LoopError) -> Option<LoopExit> {
        if (self.options.cancel_on_error)(&error) {
            Some(LoopExit::Cancelled(error))
        } else {
            warn!(?error, "Error in consumer loop");
            None
        }
    }

    async fn back_off(&self, backoff: &mut Backoff, stop: &mut watch::Receiver<bool>) -> bool {
        self.transition(LoopState::Backoff);
        let duration = backoff.next().unwrap_or(self.options.idle_backoff);
        debug!(?duration, "Backing off");
        self.pause(duration, stop).await
    }

    /// Sleeps for the given duration, returning early with `true` if a stop has been requested
    async fn pause(&self, duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
        let interrupted = tokio::select! {
            _ = sleep(duration) => false,
            _ = stop_requested(stop) => true,
        };

        interrupted || *stop.borrow()
    }

    fn transition(&self, state: LoopState) {
        self.state.send(state).ok();
    }
}

impl<C, H> ConsumerLoop<C, H>
where
    C: GroupCoordinator + Send + Sync + 'static,
    H: RecordHandler + Send + Sync + 'static,
{
    /// Runs the loop on a new task
    pub fn spawn(self) -> ConsumerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let state = self.state();
        let join = tokio::spawn(self.run(stop_rx));

        ConsumerHandle { stop, state, join }
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }

        if stop.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Controls a [`ConsumerLoop`] running on its own task
///
/// Dropping the handle detaches the loop, it keeps running until it is cancelled by an error.
pub struct ConsumerHandle {
    stop: watch::Sender<bool>,
    state: watch::Receiver<LoopState>,
    join: JoinHandle<LoopExit>,
}

impl ConsumerHandle {
    /// Current state of the loop
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Receiver to observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Whether the loop has terminated
    pub fn is_finished(&self) -> bool {
        self.state() == LoopState::Stopped
    }

    /// Signals the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop.send(true).ok();
    }

    /// Signals the loop to stop and waits until the in-flight cycle has completed
    pub async fn stop(self) -> Result<LoopExit, JoinError> {
        self.request_stop();
        self.join.await
    }

    /// Waits for the loop to terminate on its own
    pub async fn join(self) -> Result<LoopExit, JoinError> {
        self.join.await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::event::{LogCoordinator, StartOffset, StreamPublisher};
    use crate::library::communication::implementation::memory::MemoryLog;
    use crate::library::EmptyResult;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const STREAM: &str = "orders";
    const GROUP: &str = "my-group";
    const WAIT: Duration = Duration::from_secs(5);

    type Harness = (
        Arc<MemoryLog>,
        Arc<LogCoordinator<Arc<MemoryLog>>>,
        StreamPublisher<Arc<MemoryLog>>,
    );

    fn harness() -> Harness {
        let log = Arc::new(MemoryLog::default());
        let coordinator = Arc::new(LogCoordinator::new(log.clone()));
        let publisher = StreamPublisher::new(log.clone());
        (log, coordinator, publisher)
    }

    fn options(consumer: &str) -> ConsumerOptions {
        ConsumerOptions::new(ConsumerGroupDescriptor::new(GROUP, StartOffset::Head), consumer)
            .with_poll_timeout(Duration::from_millis(20))
            .with_idle_backoff(Duration::from_millis(5))
    }

    /// Handler forwarding the sequence of every record to a channel, failing on demand
    fn forwarding_handler(
        failures: usize,
    ) -> (
        impl RecordHandler + Send + Sync + 'static,
        mpsc::UnboundedReceiver<Sequence>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let remaining_failures = Arc::new(AtomicUsize::new(failures));

        let handler = move |record: Record| {
            let tx = tx.clone();
            let remaining_failures = remaining_failures.clone();

            async move {
                tx.send(record.sequence()).ok();

                let fail = remaining_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();

                if fail {
                    Err("handler failure".into())
                } else {
                    EmptyResult::Ok(())
                }
            }
        };

        (handler, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Sequence>) -> Sequence {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn process_and_acknowledge_records_in_order() {
        let (_, coordinator, publisher) = harness();
        let (handler, mut rx) = forwarding_handler(0);
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options("c1")).spawn();

        let mut published = Vec::new();
        for i in 0..5u8 {
            published.push(publisher.publish(STREAM, &[i]).await.unwrap());
        }

        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(next(&mut rx).await);
        }

        let exit = handle.stop().await.unwrap();

        assert!(matches!(exit, LoopExit::Stopped));
        assert_eq!(received, published);
        assert!(coordinator.pending(STREAM, GROUP).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_failed_records_pending_without_auto_acknowledge() {
        let (_, coordinator, publisher) = harness();
        let (handler, mut rx) = forwarding_handler(usize::MAX);
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options("c1")).spawn();

        let sequence = publisher.publish(STREAM, b"order").await.unwrap();
        assert_eq!(next(&mut rx).await, sequence);
        handle.stop().await.unwrap();

        let pending = coordinator.pending(STREAM, GROUP).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sequence, sequence);

        let redelivered = coordinator
            .reclaim_stale(STREAM, GROUP, "c2", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].sequence(), sequence);
    }

    #[tokio::test]
    async fn never_redeliver_failed_records_with_auto_acknowledge() {
        let (_, coordinator, publisher) = harness();
        let (handler, mut rx) = forwarding_handler(usize::MAX);
        let options = options("c1").with_auto_acknowledge(true);
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options).spawn();

        publisher.publish(STREAM, b"order").await.unwrap();
        next(&mut rx).await;
        handle.stop().await.unwrap();

        assert!(coordinator.pending(STREAM, GROUP).await.unwrap().is_empty());
        assert!(coordinator
            .reclaim_stale(STREAM, GROUP, "c2", Duration::ZERO, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn redeliver_failed_records_through_reclaim() {
        let (_, coordinator, publisher) = harness();
        let (handler, mut rx) = forwarding_handler(1);
        let options = options("c1").with_reclaim(Duration::from_millis(10), Duration::from_millis(10));
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options).spawn();

        let sequence = publisher.publish(STREAM, b"order").await.unwrap();
        assert_eq!(next(&mut rx).await, sequence);
        assert_eq!(next(&mut rx).await, sequence);
        handle.stop().await.unwrap();

        assert!(coordinator.pending(STREAM, GROUP).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn take_over_work_of_crashed_consumers() {
        let (_, coordinator, publisher) = harness();
        coordinator
            .create_group(STREAM, GROUP, StartOffset::Head)
            .await
            .unwrap();

        let sequence = publisher.publish(STREAM, b"order").await.unwrap();
        let claimed = coordinator
            .claim_next(STREAM, GROUP, "crashed", 1, None)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let (handler, mut rx) = forwarding_handler(0);
        let options = options("c1").with_reclaim(Duration::from_millis(10), Duration::from_millis(10));
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options).spawn();

        assert_eq!(next(&mut rx).await, sequence);
        handle.stop().await.unwrap();

        assert!(coordinator.pending(STREAM, GROUP).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_when_predicate_matches() {
        let (_, coordinator, publisher) = harness();
        let (handler, mut rx) = forwarding_handler(usize::MAX);
        let options =
            options("c1").cancel_on_error(|error| matches!(error, LoopError::Handler { .. }));
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options).spawn();

        let sequence = publisher.publish(STREAM, b"order").await.unwrap();
        next(&mut rx).await;

        let exit = timeout(WAIT, handle.join()).await.unwrap().unwrap();
        match exit {
            LoopExit::Cancelled(LoopError::Handler { sequence: failed, .. }) => {
                assert_eq!(failed, sequence)
            }
            other => panic!("unexpected exit {:?}", other),
        }
    }

    #[tokio::test]
    async fn survive_unavailable_store() {
        let (log, coordinator, publisher) = harness();
        log.set_offline(true);

        let (handler, mut rx) = forwarding_handler(0);
        let options = options("c1").with_error_backoff(Backoff::capped(
            Duration::from_millis(1),
            Duration::from_millis(10),
        ));
        let handle = ConsumerLoop::new(coordinator.clone(), STREAM, handler, options).spawn();

        let mut state = handle.watch_state();
        timeout(WAIT, async {
            while *state.borrow_and_update() != LoopState::Backoff {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(!handle.is_finished());

        log.set_offline(false);
        let sequence = publisher.publish(STREAM, b"order").await.unwrap();
        assert_eq!(next(&mut rx).await, sequence);

        assert!(matches!(handle.stop().await.unwrap(), LoopExit::Stopped));
    }

    #[tokio::test]
    async fn report_stopped_state() {
        let (_, coordinator, _) = harness();
        let (handler, _rx) = forwarding_handler(0);
        let consumer = ConsumerLoop::new(coordinator, STREAM, handler, options("c1"));
        let state = consumer.state();
        let handle = consumer.spawn();

        handle.stop().await.unwrap();

        assert_eq!(*state.borrow(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn split_work_between_group_members() {
        let (_, coordinator, publisher) = harness();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = ["c1", "c2", "c3"]
            .iter()
            .map(|consumer| {
                let tx = tx.clone();
                let handler = move |record: Record| {
                    let tx = tx.clone();
                    async move {
                        tx.send(record.sequence()).ok();
                        EmptyResult::Ok(())
                    }
                };

                ConsumerLoop::new(coordinator.clone(), STREAM, handler, options(consumer)).spawn()
            })
            .collect();

        let mut published = Vec::new();
        for i in 0..30u8 {
            published.push(publisher.publish(STREAM, &[i]).await.unwrap());
        }

        let mut received = Vec::new();
        for _ in 0..30 {
            received.push(next(&mut rx).await);
        }

        for handle in handles {
            handle.stop().await.unwrap();
        }

        received.sort();
        assert_eq!(received, published);
        assert!(timeout(Duration::from_millis(50), rx.recv())
            .await
            .map(|value| value.is_none())
            .unwrap_or(true));
    }
}
