//! Background work the engine starts but does not wait on inline.
//!
//! Each task carries a label so that joining or abandoning the set can say
//! what finished and what was cut short.

use std::future::Future;

use log::{debug, error, warn};
use tokio::task::JoinSet;

/// What [`TaskSet::join_all`] saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub completed: usize,
    pub panicked: usize,
    pub cancelled: usize,
}

/// Labelled tasks spawned on the current tokio runtime.
#[derive(Default)]
pub struct TaskSet {
    tasks: JoinSet<String>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` under `label`. Failures inside it are the future's
    /// own business; the set only reports panics and cancellation.
    pub fn spawn<F>(&mut self, label: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        debug!("[tasks] Spawning {}", label);
        self.tasks.spawn(async move {
            future.await;
            label
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to finish.
    pub async fn join_all(&mut self) -> JoinSummary {
        let mut summary = JoinSummary::default();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(label) => {
                    debug!("[tasks] {} finished", label);
                    summary.completed += 1;
                }
                Err(err) if err.is_panic() => {
                    error!("[tasks] Task panicked: {}", err);
                    summary.panicked += 1;
                }
                Err(err) => {
                    warn!("[tasks] Task cancelled: {}", err);
                    summary.cancelled += 1;
                }
            }
        }
        summary
    }

    /// Abort whatever is still running. Returns how many tasks were cut off.
    pub fn abandon(mut self, reason: &str) -> usize {
        let remaining = self.tasks.len();
        if remaining > 0 {
            warn!("[tasks] Abandoning {} tasks: {}", remaining, reason);
        }
        self.tasks.abort_all();
        remaining
    }
}
