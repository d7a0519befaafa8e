use super::{DeathReason, Heart, JobSet};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::any::type_name;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

/// Executable module
#[async_trait]
pub trait Module {
    /// Executed before running the core loop
    async fn pre_startup(&mut self) -> EmptyResult {
        Ok(())
    }

    /// Core run procedure of the module
    ///
    /// Long-running work is expected to be spawned onto the provided [`JobSet`]. When the function returns
    /// `Some(_)` the death of the returned [`Heart`] is awaited before shutting down, returning `None`
    /// initiates the shutdown right away.
    async fn run(&mut self, jobs: &JobSet) -> Result<Option<Heart>, BoxedError>;

    /// Executed after the core loop but before the jobs are terminated
    async fn pre_shutdown(&mut self) {}

    /// Shutdown hook executed after the core loop and all associated jobs have terminated
    #[instrument(skip(self))]
    async fn post_shutdown(&mut self, termination_reason: ModuleTerminationReason) {
        match termination_reason {
            ModuleTerminationReason::HeartDied(_) | ModuleTerminationReason::ExitedNormally => {
                info!("Module exited normally")
            }
            _ => error!("Module terminated with an error"),
        }
    }
}

/// Reason why a module has terminated
#[derive(Error, Debug)]
pub enum ModuleTerminationReason {
    /// Startup routine threw an error
    #[error("startup routine threw an error")]
    StartupFailed(#[source] BoxedError),
    /// Core run procedure threw an error
    #[error("error during operation")]
    OperationalError(#[source] BoxedError),
    /// [`Heart`] provided by module died
    #[error("heart provided by module died: {0}")]
    HeartDied(DeathReason),
    /// Run procedure exited cleanly
    #[error("run procedure exited cleanly")]
    ExitedNormally,
    /// Timeout during startup
    #[error("timeout during startup")]
    Timeout,
}

impl ModuleTerminationReason {
    /// Whether the module terminated as intended
    pub fn is_success(&self) -> bool {
        matches!(self, Self::HeartDied(_) | Self::ExitedNormally)
    }
}

/// Runner for [`Module`] implementations
pub struct ModuleRunner {
    startup_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ModuleRunner {
    /// Creates a new runner with custom timeouts
    pub fn new(startup_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            startup_timeout,
            shutdown_timeout,
        }
    }
}

impl Default for ModuleRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(60))
    }
}

impl ModuleRunner {
    /// Executes a [`Module`] until it exits by calling the corresponding lifecycle functions in order
    /// and returns whether it terminated successfully.
    #[instrument(skip(self, module), fields(module_name = type_name::<M>()))]
    pub async fn run<M: Module + Send + Sync>(&self, mut module: M) -> bool {
        let jobs = JobSet::default();

        info!("Commencing module startup sequence");
        let termination_reason = match timeout(self.startup_timeout, module.pre_startup()).await {
            Ok(Ok(())) => self.run_procedure(&mut module, &jobs).await,
            Ok(Err(error)) => {
                error!(?error, "Module startup sequence encountered an error");
                ModuleTerminationReason::StartupFailed(error)
            }
            Err(_) => {
                error!("Module startup sequence timed out");
                ModuleTerminationReason::Timeout
            }
        };

        let success = termination_reason.is_success();

        info!("Commencing module shutdown sequence");
        if timeout(self.shutdown_timeout, module.pre_shutdown())
            .await
            .is_err()
        {
            error!("Module pre-shutdown hook timed out");
        }

        jobs.terminate(self.shutdown_timeout).await;

        if timeout(
            self.shutdown_timeout,
            module.post_shutdown(termination_reason),
        )
        .await
        .is_err()
        {
            error!("Module shutdown sequence timed out");
        }

        success
    }

    async fn run_procedure<M: Module + Send + Sync>(
        &self,
        module: &mut M,
        jobs: &JobSet,
    ) -> ModuleTerminationReason {
        info!("Executing module run procedure");

        match module.run(jobs).await {
            Ok(None) => {
                debug!("Module run procedure completed successfully");
                ModuleTerminationReason::ExitedNormally
            }
            Ok(Some(mut heart)) => {
                debug!("Module run procedure completed successfully, waiting for heart to die");
                let death_reason = heart.death().await;
                info!(%death_reason, "Heart provided by run procedure died");
                ModuleTerminationReason::HeartDied(death_reason)
            }
            Err(error) => {
                error!(?error, "Module run procedure encountered an error");
                ModuleTerminationReason::OperationalError(error)
            }
        }
    }
}
