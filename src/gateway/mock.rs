/*!
 * Mock gateway for testing.
 *
 * The mock never touches the network. Behaviour is scripted up front:
 * - task listings are served in order, the last one repeating
 * - downloads return fixed bytes, optionally failing after N bytes
 * - individual operations can be told to fail with a given error kind
 *
 * Clones share the same state, so a test can hand one clone to the
 * orchestrator and inspect the recorded calls through another.
 */

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;

use crate::errors::GatewayError;
use crate::gateway::{ByteStream, JobSubmission, ServiceGateway};
use crate::model::Task;

/// A call received by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Upload {
        display_name: String,
        format_hint: String,
    },
    Submit(JobSubmission),
    ListTasks,
    Download(String),
    Confirm(String),
}

/// Kind of error to simulate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockFailure {
    Transport,
    Authentication,
    Service,
}

impl MockFailure {
    fn to_error(self, operation: &str) -> GatewayError {
        match self {
            Self::Transport => GatewayError::Transport(format!("{}: connection refused", operation)),
            Self::Authentication => {
                GatewayError::Authentication(format!("{}: invalid credentials", operation))
            }
            Self::Service => GatewayError::Service {
                status: 400,
                message: format!("{}: rejected by service", operation),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum MockDownload {
    Complete(Vec<u8>),
    FailAfter { bytes: Vec<u8>, fail_after: usize },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<GatewayCall>,
    uploads: usize,
    job_id: Option<String>,
    task_lists: VecDeque<Vec<Task>>,
    downloads: HashMap<String, MockDownload>,
    upload_failure: Option<MockFailure>,
    submit_failure: Option<MockFailure>,
    list_failures: VecDeque<Option<MockFailure>>,
    confirm_failure: Option<MockFailure>,
    blank_file_ids: bool,
}

/// Scripted in-memory gateway
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job id returned by `submit_job` (default `job-1`)
    pub fn with_job_id(self, job_id: impl Into<String>) -> Self {
        self.state.lock().job_id = Some(job_id.into());
        self
    }

    /// Queue one `list_tasks` response; the last queued one keeps repeating
    pub fn with_task_list(self, tasks: Vec<Task>) -> Self {
        self.state.lock().task_lists.push_back(tasks);
        self
    }

    pub fn with_download(self, task_id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.state
            .lock()
            .downloads
            .insert(task_id.into(), MockDownload::Complete(bytes.into()));
        self
    }

    /// Stream `fail_after` bytes of `bytes`, then break the stream
    pub fn with_failing_download(
        self,
        task_id: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        fail_after: usize,
    ) -> Self {
        self.state.lock().downloads.insert(
            task_id.into(),
            MockDownload::FailAfter {
                bytes: bytes.into(),
                fail_after,
            },
        );
        self
    }

    pub fn fail_uploads(self, failure: MockFailure) -> Self {
        self.state.lock().upload_failure = Some(failure);
        self
    }

    pub fn fail_submissions(self, failure: MockFailure) -> Self {
        self.state.lock().submit_failure = Some(failure);
        self
    }

    /// Fail the next `list_tasks` call; repeatable to fail several in a row
    pub fn fail_next_listing(self, failure: MockFailure) -> Self {
        self.state.lock().list_failures.push_back(Some(failure));
        self
    }

    /// Let the next `list_tasks` call through, so a later one can be failed
    pub fn succeed_next_listing(self) -> Self {
        self.state.lock().list_failures.push_back(None);
        self
    }

    pub fn fail_confirmations(self, failure: MockFailure) -> Self {
        self.state.lock().confirm_failure = Some(failure);
        self
    }

    /// Make uploads succeed with a blank identifier
    pub fn with_blank_file_ids(self) -> Self {
        self.state.lock().blank_file_ids = true;
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn upload_calls(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Upload { .. }))
    }

    pub fn submit_calls(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Submit(_)))
    }

    pub fn list_calls(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::ListTasks))
    }

    /// Task ids passed to `download_task`, in call order
    pub fn downloaded_tasks(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Download(task_id) => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Task ids passed to `confirm_delivery`, in call order
    pub fn confirmed_tasks(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Confirm(task_id) => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_submission(&self) -> Option<JobSubmission> {
        self.state.lock().calls.iter().rev().find_map(|call| match call {
            GatewayCall::Submit(submission) => Some(submission.clone()),
            _ => None,
        })
    }

    fn count(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| predicate(call)).count()
    }
}

#[async_trait]
impl ServiceGateway for MockGateway {
    async fn upload_file(
        &self,
        _local_path: &Path,
        display_name: &str,
        format_hint: &str,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Upload {
            display_name: display_name.to_string(),
            format_hint: format_hint.to_string(),
        });
        if let Some(failure) = state.upload_failure {
            return Err(failure.to_error("upload"));
        }
        if state.blank_file_ids {
            return Ok("  ".to_string());
        }
        state.uploads += 1;
        Ok(format!("file-{}", state.uploads))
    }

    async fn submit_job(&self, submission: &JobSubmission) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Submit(submission.clone()));
        if let Some(failure) = state.submit_failure {
            return Err(failure.to_error("submit"));
        }
        Ok(state.job_id.clone().unwrap_or_else(|| "job-1".to_string()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::ListTasks);
        if let Some(Some(failure)) = state.list_failures.pop_front() {
            return Err(failure.to_error("task list"));
        }
        let tasks = if state.task_lists.len() > 1 {
            state.task_lists.pop_front().unwrap_or_default()
        } else {
            state.task_lists.front().cloned().unwrap_or_default()
        };
        Ok(tasks)
    }

    async fn download_task(&self, task_id: &str) -> Result<ByteStream, GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Download(task_id.to_string()));
        let download = state.downloads.get(task_id).cloned().ok_or_else(|| GatewayError::Service {
            status: 404,
            message: format!("task {} has no downloadable artifact", task_id),
        })?;

        let chunks: Vec<Result<Bytes, GatewayError>> = match download {
            MockDownload::Complete(bytes) => bytes
                .chunks(1024)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect(),
            MockDownload::FailAfter { bytes, fail_after } => {
                let head = &bytes[..fail_after.min(bytes.len())];
                let mut chunks: Vec<Result<Bytes, GatewayError>> = head
                    .chunks(1024)
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                chunks.push(Err(GatewayError::Transport(format!(
                    "stream for task {} reset after {} bytes",
                    task_id, fail_after
                ))));
                chunks
            }
        };
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn confirm_delivery(&self, task_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.calls.push(GatewayCall::Confirm(task_id.to_string()));
        if let Some(failure) = state.confirm_failure {
            return Err(failure.to_error("confirm"));
        }
        Ok(())
    }
}
