/*!
 * Gateway to the translation-management service.
 *
 * The workflow only depends on the `ServiceGateway` trait. Implementations:
 * - `gcc`: REST client for a GlobalLink Connect style API
 * - `mock`: scripted in-memory gateway that records every call
 */

use std::fmt::Debug;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;

use crate::errors::GatewayError;
use crate::model::Task;

/// Body of a downloaded task, delivered in chunks of unknown total length
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Validated job payload handed to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSubmission {
    pub name: String,
    /// Due date as epoch milliseconds
    pub due_date: i64,
    pub source_locale: String,
    pub target_locales: Vec<String>,
    pub file_ids: Vec<String>,
}

/// Operations the workflow invokes on the remote service
///
/// Every call is a single attempt; retry policy is the caller's concern.
#[async_trait]
pub trait ServiceGateway: Send + Sync + Debug {
    /// Upload one document, returning its remote file id
    async fn upload_file(
        &self,
        local_path: &Path,
        display_name: &str,
        format_hint: &str,
    ) -> Result<String, GatewayError>;

    /// Create a job, returning its id
    async fn submit_job(&self, submission: &JobSubmission) -> Result<String, GatewayError>;

    /// Snapshot of all tasks visible to the caller
    async fn list_tasks(&self) -> Result<Vec<Task>, GatewayError>;

    /// Open the translated artifact of a task
    async fn download_task(&self, task_id: &str) -> Result<ByteStream, GatewayError>;

    /// Acknowledge that a downloaded task was accepted
    async fn confirm_delivery(&self, task_id: &str) -> Result<(), GatewayError>;
}

pub mod gcc;
pub mod mock;

pub use gcc::GccGateway;
pub use mock::{GatewayCall, MockFailure, MockGateway};
