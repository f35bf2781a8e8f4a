/*!
 * Orchestrator sequencing the workflow stages.
 *
 * State machine for one run:
 * `Idle → Uploading → Submitting → Waiting → Polling → Retrieving → Done`,
 * with `Failed` reachable from any stage. Between two polls the machine
 * returns to `Waiting`; no other backward edge exists.
 *
 * Upload and submission failures abort the run. A failed retrieval is
 * recorded for its task and the run continues.
 */

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::errors::WorkflowError;
use crate::file_utils::FileManager;
use crate::gateway::ServiceGateway;
use crate::model::{
    Job, JobDescriptor, JobRequest, RetrievalResult, RunReport, RunState, SourceFile, Task,
    TaskOutcome, TaskStatus, UploadedFile,
};
use crate::workflow::polling::{self, classify, PollingPolicy, TaskClass, TaskScope};
use crate::workflow::retrieval::{self, FileSinkFactory, SinkFactory};
use crate::workflow::{submission, upload};

/// Drives one upload/submit/poll/retrieve run against a gateway
pub struct Orchestrator<G: ServiceGateway, S: SinkFactory = FileSinkFactory> {
    // @field: Service gateway
    gateway: G,
    // @field: Destination sink opener
    sinks: S,
    // @field: Wait and re-poll settings
    policy: PollingPolicy,
    // @field: Where retrieved files go
    destination_dir: PathBuf,
    // @field: Process-level stop signal
    cancel: CancellationToken,
    // @field: Current run state
    state: RunState,
    // @field: Show a spinner while waiting
    show_progress: bool,
}

impl<G: ServiceGateway> Orchestrator<G, FileSinkFactory> {
    /// Create an orchestrator writing retrieved tasks to regular files
    pub fn new(gateway: G, policy: PollingPolicy, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            sinks: FileSinkFactory,
            policy,
            destination_dir: destination_dir.into(),
            cancel: CancellationToken::new(),
            state: RunState::Idle,
            show_progress: false,
        }
    }
}

impl<G: ServiceGateway, S: SinkFactory> Orchestrator<G, S> {
    /// Replace the sink factory
    pub fn with_sinks<S2: SinkFactory>(self, sinks: S2) -> Orchestrator<G, S2> {
        Orchestrator {
            gateway: self.gateway,
            sinks,
            policy: self.policy,
            destination_dir: self.destination_dir,
            cancel: self.cancel,
            state: self.state,
            show_progress: self.show_progress,
        }
    }

    /// Stop waits and polling when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    fn transition(&mut self, next: RunState) -> Result<(), WorkflowError> {
        if !self.state.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail<T>(&mut self, error: WorkflowError) -> Result<T, WorkflowError> {
        error!("Run failed while {}: {}", self.state, error);
        self.state = RunState::Failed;
        Err(error)
    }

    /// Full run: upload, submit, wait, poll and retrieve
    pub async fn run(
        &mut self,
        sources: &[SourceFile],
        request: &JobRequest,
    ) -> Result<RunReport, WorkflowError> {
        let (uploaded, job) = self.upload_and_submit(sources, request).await?;

        self.transition(RunState::Waiting)?;
        info!("Will wait for {} seconds before retrieval...", self.policy.initial_wait.as_secs());
        if let Err(e) = polling::wait(self.policy.initial_wait, &self.cancel, self.show_progress).await {
            return self.fail(e);
        }

        let job_filter = match self.policy.scope {
            TaskScope::All => None,
            TaskScope::SubmittedJob => Some(job.job_id.clone()),
        };
        let outcomes = self.poll_and_retrieve(job_filter.as_deref()).await?;
        self.transition(RunState::Done)?;

        Ok(RunReport {
            job: Some(job),
            uploaded,
            outcomes,
            final_state: self.state,
        })
    }

    /// Upload and submit without waiting for results
    pub async fn submit_only(
        &mut self,
        sources: &[SourceFile],
        request: &JobRequest,
    ) -> Result<(Vec<UploadedFile>, Job), WorkflowError> {
        let submitted = self.upload_and_submit(sources, request).await?;
        self.transition(RunState::Done)?;
        Ok(submitted)
    }

    /// Poll and retrieve without submitting anything first
    ///
    /// `job_filter` restricts handling to one job's tasks.
    pub async fn retrieve_only(&mut self, job_filter: Option<&str>) -> Result<RunReport, WorkflowError> {
        info!("Retrieving completed files...");
        let outcomes = self.poll_and_retrieve(job_filter).await?;
        self.transition(RunState::Done)?;

        Ok(RunReport {
            job: None,
            uploaded: Vec::new(),
            outcomes,
            final_state: self.state,
        })
    }

    async fn upload_and_submit(
        &mut self,
        sources: &[SourceFile],
        request: &JobRequest,
    ) -> Result<(Vec<UploadedFile>, Job), WorkflowError> {
        self.transition(RunState::Uploading)?;
        let uploaded = match upload::upload_all(&self.gateway, sources).await {
            Ok(uploaded) => uploaded,
            Err(e) => return self.fail(e),
        };

        self.transition(RunState::Submitting)?;
        let descriptor = JobDescriptor::from_request(request, &uploaded);
        let job = match submission::submit(&self.gateway, &descriptor).await {
            Ok(job) => job,
            Err(e) => return self.fail(e),
        };

        Ok((uploaded, job))
    }

    /// Poll until nothing is pending or the policy runs out, retrieving as tasks complete
    async fn poll_and_retrieve(
        &mut self,
        job_filter: Option<&str>,
    ) -> Result<Vec<(Task, TaskOutcome)>, WorkflowError> {
        let mut outcomes: Vec<(Task, TaskOutcome)> = Vec::new();
        let mut handled: HashSet<String> = HashSet::new();
        let mut pending: BTreeMap<String, Task> = BTreeMap::new();
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return self.fail(WorkflowError::Cancelled);
            }

            polls += 1;
            self.transition(RunState::Polling)?;
            let tasks = match polling::list_tasks(&self.gateway).await {
                Ok(tasks) => Some(tasks),
                Err(e) if polls == 1 => return self.fail(e),
                Err(e) => {
                    warn!("Poll {} failed, keeping previous task states: {}", polls, e);
                    None
                }
            };

            let mut ready: Vec<Task> = Vec::new();
            if let Some(tasks) = tasks {
                // Rebuilt from every successful snapshot
                let mut still_pending: BTreeMap<String, Task> = BTreeMap::new();
                let mut listed: HashSet<String> = HashSet::new();

                for task in tasks {
                    if handled.contains(&task.task_id) {
                        continue;
                    }
                    if job_filter.is_some_and(|job_id| job_id != task.job_id) {
                        continue;
                    }
                    if !listed.insert(task.task_id.clone()) {
                        debug!("Task [{}] listed more than once, ignoring the repeat", task.task_id);
                        continue;
                    }

                    match classify(&task.status) {
                        TaskClass::ReadyForRetrieval => {
                            info!(
                                "Task [{}] is READY: status {}, locale {}, job [{}]",
                                task.task_id, task.status, task.target_locale, task.job_id
                            );
                            ready.push(task);
                        }
                        TaskClass::Delivered => {
                            info!(
                                "Task [{}] is DELIVERED: name {}, locale {}, job [{}]",
                                task.task_id, task.name, task.target_locale, task.job_id
                            );
                            handled.insert(task.task_id.clone());
                            outcomes.push((task, TaskOutcome::Delivered));
                        }
                        TaskClass::NotReady => {
                            info!(
                                "Task [{}] is NOT READY: name {}, status {}, locale {}, job [{}]",
                                task.task_id, task.name, task.status, task.target_locale, task.job_id
                            );
                            still_pending.insert(task.task_id.clone(), task);
                        }
                    }
                }

                for (task_id, task) in std::mem::replace(&mut pending, still_pending) {
                    if listed.contains(&task_id) {
                        continue;
                    }
                    warn!(
                        "Task [{}] of job [{}] is no longer listed; last status {}",
                        task_id, task.job_id, task.status
                    );
                    handled.insert(task_id);
                    let status = task.status.clone();
                    outcomes.push((task, TaskOutcome::NotReady { status }));
                }
            }

            if !ready.is_empty() {
                self.transition(RunState::Retrieving)?;
                for task in ready {
                    let result = retrieval::retrieve(&self.gateway, &self.sinks, &task, &self.destination_dir).await;
                    handled.insert(task.task_id.clone());
                    let outcome = if result.success {
                        TaskOutcome::Retrieved(result)
                    } else {
                        TaskOutcome::RetrievalFailed(result)
                    };
                    outcomes.push((task, outcome));
                }
            }

            let deadline_passed = self
                .policy
                .deadline
                .is_some_and(|deadline| started.elapsed() >= deadline);
            if pending.is_empty() || polls >= self.policy.max_polls || deadline_passed {
                break;
            }

            let mut delay = self.policy.backoff_for(polls);
            if let Some(deadline) = self.policy.deadline {
                delay = delay.min(deadline.saturating_sub(started.elapsed()));
            }
            debug!("{} task(s) pending, polling again in {}s", pending.len(), delay.as_secs());
            self.transition(RunState::Waiting)?;
            if let Err(e) = polling::wait(delay, &self.cancel, self.show_progress).await {
                return self.fail(e);
            }
        }

        for (_, task) in pending {
            let status = task.status.clone();
            let outcome = if self.policy.is_repeating() {
                let timeout = WorkflowError::Timeout {
                    task_id: task.task_id.clone(),
                    job_id: task.job_id.clone(),
                    polls,
                };
                warn!("{}", timeout);
                TaskOutcome::TimedOut { status, polls }
            } else {
                TaskOutcome::NotReady { status }
            };
            outcomes.push((task, outcome));
        }

        Ok(outcomes)
    }

    /// Confirm delivery of a successfully retrieved task
    ///
    /// Only call this once the caller's own post-processing of the file
    /// succeeded. Failed retrievals and incomplete local copies are refused.
    pub async fn confirm_delivery(&self, result: &RetrievalResult) -> Result<(), WorkflowError> {
        if !result.success {
            return Err(WorkflowError::Validation(format!(
                "Refusing to confirm task [{}]: retrieval did not succeed",
                result.task_id
            )));
        }

        let metadata = tokio::fs::metadata(&result.local_path).await.map_err(|e| {
            WorkflowError::Validation(format!(
                "Refusing to confirm task [{}]: local copy {:?} is missing ({})",
                result.task_id, result.local_path, e
            ))
        })?;
        if metadata.len() != result.bytes_written {
            return Err(WorkflowError::Validation(format!(
                "Refusing to confirm task [{}]: local copy has {} bytes, expected {}",
                result.task_id,
                metadata.len(),
                result.bytes_written
            )));
        }

        self.confirm(&result.task_id, &result.job_id).await
    }

    /// Confirm delivery of a completed task whose file is already on disk
    pub async fn confirm_task(&self, task_id: &str) -> Result<(), WorkflowError> {
        let tasks = polling::list_tasks(&self.gateway).await?;
        let task = tasks
            .into_iter()
            .find(|task| task.task_id == task_id)
            .ok_or_else(|| WorkflowError::Validation(format!("Task [{}] is not visible to this account", task_id)))?;

        if task.status != TaskStatus::Completed {
            return Err(WorkflowError::Validation(format!(
                "Task [{}] cannot be confirmed in status {}",
                task_id, task.status
            )));
        }

        let path = retrieval::destination_path(&self.destination_dir, &task);
        let on_disk = FileManager::file_exists(&path)
            && tokio::fs::metadata(&path).await.is_ok_and(|m| m.len() > 0);
        if !on_disk {
            return Err(WorkflowError::Validation(format!(
                "Task [{}] has no retrieved file at {:?}",
                task_id, path
            )));
        }

        self.confirm(&task.task_id, &task.job_id).await
    }

    async fn confirm(&self, task_id: &str, job_id: &str) -> Result<(), WorkflowError> {
        self.gateway
            .confirm_delivery(task_id)
            .await
            .map_err(|e| WorkflowError::from_gateway(format!("confirming task [{}] of job [{}]", task_id, job_id), e))?;
        info!("Task [{}] delivery confirmed", task_id);
        Ok(())
    }
}
