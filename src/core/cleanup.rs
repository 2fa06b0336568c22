//! Cleanup controller.
//!
//! Tears down every container in the live registry exactly once per
//! process, whether the run succeeded, failed, or was interrupted. The
//! normal path and the interrupt listener both call [`CleanupController::cleanup`];
//! the first caller performs teardown while holding the lock, and every later
//! caller waits for it and gets the first outcome back.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{ContainerRuntime, TerminalController};
use crate::error::PipelineError;

use super::registry::LiveRegistry;

/// What a cleanup call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Exit code chosen by the first caller
    pub exit_code: i32,

    /// Containers stopped by this cleanup
    pub stopped: Vec<String>,

    /// Containers that were already gone when killed
    pub already_stopped: Vec<String>,

    /// False when this call found teardown already done
    pub performed: bool,
}

impl CleanupOutcome {
    /// Every container that received a kill attempt
    pub fn visited(&self) -> usize {
        self.stopped.len() + self.already_stopped.len()
    }
}

/// Single, total teardown of a session's containers
pub struct CleanupController {
    registry: Arc<LiveRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    terminal: Arc<dyn TerminalController>,
    completed: Mutex<Option<CleanupOutcome>>,
}

impl CleanupController {
    pub fn new(
        registry: Arc<LiveRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        terminal: Arc<dyn TerminalController>,
    ) -> Self {
        Self {
            registry,
            runtime,
            terminal,
            completed: Mutex::new(None),
        }
    }

    /// Tear everything down and record `exit_code`. Only the first call
    /// does any work.
    pub async fn cleanup(&self, exit_code: i32, cause: Option<&PipelineError>) -> CleanupOutcome {
        let mut completed = self.completed.lock().await;
        if let Some(first) = completed.as_ref() {
            info!("Cleanup already done");
            return CleanupOutcome {
                performed: false,
                ..first.clone()
            };
        }

        info!("Do clean up");
        let mut outcome = CleanupOutcome {
            exit_code,
            stopped: Vec::new(),
            already_stopped: Vec::new(),
            performed: true,
        };

        for container_id in self.registry.drain() {
            match self.runtime.kill(&container_id).await {
                Ok(()) => {
                    info!(container = %container_id, "Container stopped");
                    outcome.stopped.push(container_id);
                }
                Err(e) => {
                    warn!(container = %container_id, error = %e, "Container already shut down");
                    outcome.already_stopped.push(container_id);
                }
            }
        }

        self.terminal.restore_state().await;

        match cause {
            Some(e) => error!(error = %e, exit_code, "Pipeline ended with error"),
            None if exit_code == 0 => info!("Pipeline succeeded"),
            None => warn!(exit_code, "Pipeline ended without a recorded cause"),
        }

        *completed = Some(outcome.clone());
        outcome
    }

    /// Whether teardown has already happened
    pub async fn is_done(&self) -> bool {
        self.completed.lock().await.is_some()
    }
}

/// Exit the process with the cleanup's exit code
pub fn terminate(outcome: &CleanupOutcome) -> ! {
    std::process::exit(outcome.exit_code)
}

/// Wait for `signal`, then run the interrupt cleanup path.
///
/// Returns `None` if the signal source itself failed.
pub async fn on_interrupt<F>(signal: F, cleanup: &CleanupController) -> Option<CleanupOutcome>
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            warn!("Interrupt received");
            Some(cleanup.cleanup(1, Some(&PipelineError::Interrupted)).await)
        }
        Err(e) => {
            warn!(error = %e, "Could not listen for interrupt");
            None
        }
    }
}

/// Spawn the one background task: on Ctrl-C, clean up and exit.
pub fn spawn_interrupt_listener(cleanup: Arc<CleanupController>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(outcome) = on_interrupt(tokio::signal::ctrl_c(), &cleanup).await {
            terminate(&outcome);
        }
    })
}
