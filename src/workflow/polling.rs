/*!
 * Polling stage: task listing, status classification and wait policy.
 */

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::WorkflowError;
use crate::gateway::ServiceGateway;
use crate::model::{Task, TaskStatus};

/// What the orchestrator should do with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    /// Completed, download it
    ReadyForRetrieval,
    /// Terminal and already confirmed; report only
    Delivered,
    /// Anything else; report and keep polling
    NotReady,
}

/// Classify a task status; total over every status the service can send
pub fn classify(status: &TaskStatus) -> TaskClass {
    match status {
        TaskStatus::Completed => TaskClass::ReadyForRetrieval,
        TaskStatus::Delivered => TaskClass::Delivered,
        TaskStatus::NotReady | TaskStatus::Other(_) => TaskClass::NotReady,
    }
}

/// Which listed tasks a run acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskScope {
    /// Every task visible to the account
    #[default]
    All,
    /// Only tasks of the job submitted by this run
    SubmittedJob,
}

/// Wait and re-poll settings
#[derive(Debug, Clone, PartialEq)]
pub struct PollingPolicy {
    /// Delay between submission and the first poll
    pub initial_wait: Duration,
    /// Task listings per run, at least 1
    pub max_polls: u32,
    /// Delay before the second poll, doubled after each round
    pub poll_interval: Duration,
    /// Cap on the doubled delay
    pub max_interval: Duration,
    /// Overall polling budget measured from the first poll
    pub deadline: Option<Duration>,
    pub scope: TaskScope,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::single_shot(Duration::from_secs(10))
    }
}

impl PollingPolicy {
    /// Wait once, poll once
    pub fn single_shot(initial_wait: Duration) -> Self {
        Self {
            initial_wait,
            max_polls: 1,
            poll_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(120),
            deadline: None,
            scope: TaskScope::All,
        }
    }

    /// Poll up to `max_polls` times with doubling delays
    pub fn repeating(initial_wait: Duration, max_polls: u32, poll_interval: Duration) -> Self {
        Self {
            initial_wait,
            max_polls: max_polls.max(1),
            poll_interval,
            max_interval: poll_interval.saturating_mul(8),
            deadline: None,
            scope: TaskScope::All,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_scope(mut self, scope: TaskScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn is_repeating(&self) -> bool {
        self.max_polls > 1
    }

    /// Delay after poll number `completed_polls` (1-based)
    pub fn backoff_for(&self, completed_polls: u32) -> Duration {
        let exponent = completed_polls.saturating_sub(1).min(16);
        self.poll_interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_interval.max(self.poll_interval))
    }
}

/// Read-only snapshot of every visible task
pub async fn list_tasks<G>(gateway: &G) -> Result<Vec<Task>, WorkflowError>
where
    G: ServiceGateway + ?Sized,
{
    let tasks = gateway
        .list_tasks()
        .await
        .map_err(|e| WorkflowError::from_gateway("listing tasks", e))?;
    debug!("Service reported {} task(s)", tasks.len());
    Ok(tasks)
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn wait(
    duration: Duration,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<(), WorkflowError> {
    if cancel.is_cancelled() {
        return Err(WorkflowError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    let spinner = show_progress.then(|| {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("Waiting {}s before polling tasks...", duration.as_secs()));
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    });

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    };

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    result
}
