use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

/// Receiving end of a graceful termination request
#[derive(Clone)]
pub struct TerminationSignal {
    rx: watch::Receiver<bool>,
}

impl TerminationSignal {
    /// Future that completes when the job should gracefully shut down
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether termination has been requested
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Raw receiver, e.g. to hand to a [`ConsumerLoop`](crate::library::communication::event::ConsumerLoop)
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

struct Job {
    name: String,
    handle: JoinHandle<()>,
}

/// Set of background jobs that are terminated together
pub struct JobSet {
    termination_tx: watch::Sender<bool>,
    termination_rx: watch::Receiver<bool>,
    jobs: Mutex<Vec<Job>>,
}

impl Default for JobSet {
    fn default() -> Self {
        let (termination_tx, termination_rx) = watch::channel(false);

        Self {
            termination_tx,
            termination_rx,
            jobs: Mutex::new(Vec::new()),
        }
    }
}

impl JobSet {
    /// Spawns a job which is expected to return once its [`TerminationSignal`] is triggered
    pub async fn spawn<F, Fut>(&self, name: &str, job: F)
    where
        F: FnOnce(TerminationSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signal = TerminationSignal {
            rx: self.termination_rx.clone(),
        };

        let span = tracing::info_span!("job", name);
        let handle = tokio::spawn(job(signal).instrument(span));
        debug!(name, "Spawned job");

        self.jobs.lock().await.push(Job {
            name: name.to_owned(),
            handle,
        });
    }

    /// Number of jobs spawned so far
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Whether no jobs have been spawned
    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Requests all jobs to terminate and waits up to `grace_period` for them, aborting stragglers
    pub async fn terminate(&self, grace_period: Duration) {
        self.termination_tx.send(true).ok();
        let jobs: Vec<Job> = self.jobs.lock().await.drain(..).collect();

        info!(count = jobs.len(), "Terminating jobs");

        let waits = jobs.into_iter().map(|job| async move {
            let Job { name, mut handle } = job;

            match timeout(grace_period, &mut handle).await {
                Ok(Ok(())) => debug!(%name, "Job terminated"),
                Ok(Err(error)) => warn!(%name, ?error, "Job crashed"),
                Err(_) => {
                    warn!(%name, "Job did not terminate in time, aborting");
                    handle.abort();
                }
            }
        });

        join_all(waits).await;
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn terminate_jobs_gracefully() {
        let jobs = JobSet::default();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        jobs.spawn("graceful", |mut signal| async move {
            signal.triggered().await;
            flag.store(true, Ordering::SeqCst);
        })
        .await;
        assert_eq!(jobs.len().await, 1);

        jobs.terminate(Duration::from_secs(1)).await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn abort_stubborn_jobs() {
        tokio::time::pause();
        let jobs = JobSet::default();

        jobs.spawn("stubborn", |_| futures::future::pending::<()>())
            .await;

        jobs.terminate(Duration::from_secs(1)).await;

        assert!(jobs.is_empty().await);
    }
}
