//! Structures to keep the process alive until some event occurs

use std::fmt;
use std::time::Duration;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// Predetermined lifetime has been exceeded
    LifetimeExceeded,
    /// SIGINT, SIGTERM or another process-external cause
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathReason::Killed(reason) => write!(f, "Killed ({})", reason),
            DeathReason::LifetimeExceeded => write!(f, "Lifetime was exceeded"),
            DeathReason::Terminated => write!(f, "Terminated due to external signal"),
        }
    }
}

#[derive(Debug)]
enum HeartInteraction {
    Kill(String),
    Rejuvenate,
}

/// Lifecycle primitive that keeps the application alive until it dies
pub struct Heart {
    rx: Receiver<HeartInteraction>,
    lifetime: Option<Duration>,
    lifetime_start: Instant,
}

impl Heart {
    /// Creates a new heart and linked stone with no lifetime limit
    pub fn new() -> (Self, HeartStone) {
        Self::internal_new(None)
    }

    /// Creates a new heart and linked stone which dies after the given lifetime
    pub fn with_lifetime(lifetime: Duration) -> (Self, HeartStone) {
        Self::internal_new(Some(lifetime))
    }

    fn internal_new(lifetime: Option<Duration>) -> (Self, HeartStone) {
        if let Some(lifetime) = lifetime {
            info!(?lifetime, "Lifetime set");
        }

        let (tx, rx) = channel(2);
        let heart = Self {
            rx,
            lifetime,
            lifetime_start: Instant::now(),
        };

        (heart, HeartStone { remote: tx })
    }

    /// Waits until the heart dies and returns the reason
    ///
    /// Dropping all stones does not kill the heart.
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");
        let mut stones_alive = true;

        loop {
            let deadline = self.lifetime.map(|lifetime| self.lifetime_start + lifetime);

            tokio::select! {
                interaction = self.rx.recv(), if stones_alive => match interaction {
                    Some(HeartInteraction::Kill(reason)) => return DeathReason::Killed(reason),
                    Some(HeartInteraction::Rejuvenate) => self.lifetime_start = Instant::now(),
                    None => stones_alive = false,
                },
                _ = lifetime_exceeded(deadline) => return DeathReason::LifetimeExceeded,
                _ = termination_signal() => return DeathReason::Terminated,
            }
        }
    }
}

async fn lifetime_exceeded(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

async fn termination_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = ctrl_c() => {},
            }
        }
        Err(error) => {
            warn!(?error, "Unable to listen for SIGTERM");
            ctrl_c().await.ok();
        }
    }
}

/// Remote controller for the heart
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<HeartInteraction>,
}

impl HeartStone {
    /// Kill the associated heart
    pub async fn kill(&self, reason: impl Into<String>) {
        self.send(HeartInteraction::Kill(reason.into())).await;
    }

    /// Reset the lifetime of the associated heart
    pub async fn reset_lifetime(&self) {
        self.send(HeartInteraction::Rejuvenate).await;
    }

    async fn send(&self, interaction: HeartInteraction) {
        if let Err(e) = self.remote.send(interaction).await {
            error!("Failed to interact with heart: {}", e);
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use futures::poll;
    use tokio::task::{spawn, yield_now};
    use tokio::time::{advance, timeout};

    #[tokio::test]
    async fn die_when_killed() {
        let (mut heart, stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        stone.kill("Testing").await;

        assert_eq!(
            handle.await.unwrap(),
            DeathReason::Killed("Testing".into())
        );
    }

    #[tokio::test]
    async fn die_after_lifetime() {
        tokio::time::pause();
        let (mut heart, _stone) = Heart::with_lifetime(Duration::from_secs(10));

        let reason = heart.death().await;

        assert_eq!(reason, DeathReason::LifetimeExceeded);
    }

    #[tokio::test]
    async fn live_without_lifetime() {
        tokio::time::pause();
        let (mut heart, _stone) = Heart::new();

        let result = timeout(Duration::from_secs(3600), heart.death()).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn live_longer_after_rejuvenation() {
        tokio::time::pause();
        let lifetime = Duration::from_secs(10);
        let (mut heart, stone) = Heart::with_lifetime(lifetime);

        let mut handle = spawn(async move { heart.death().await });

        advance(lifetime / 2).await;
        stone.reset_lifetime().await;
        yield_now().await;
        advance(lifetime * 3 / 4).await;
        assert!(poll!(&mut handle).is_pending());

        assert_eq!(handle.await.unwrap(), DeathReason::LifetimeExceeded);
    }
}
