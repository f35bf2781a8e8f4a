/*!
 * Data model shared by the workflow stages.
 *
 * Everything here is a plain value: the orchestrator owns the run's transient
 * state, the remote service owns all durable job and task state.
 */

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use isolang::Language;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

static LOCALE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]{2,3})((?:[-_][A-Za-z0-9]{2,8})*)$").expect("locale pattern is valid")
});

/// Language/region identifier such as `de-DE`
///
/// The primary subtag must be a known ISO 639-1 or ISO 639-3 code. Region
/// subtags are upper-cased and script subtags title-cased, so `de_de` and
/// `de-DE` are the same locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Parse and canonicalize a locale tag
    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        let trimmed = raw.trim();
        let captures = LOCALE_PATTERN
            .captures(trimmed)
            .ok_or_else(|| WorkflowError::Validation(format!("Invalid locale: '{}'", raw)))?;

        let language = captures[1].to_lowercase();
        let known = match language.len() {
            2 => Language::from_639_1(&language).is_some(),
            _ => Language::from_639_3(&language).is_some(),
        };
        if !known {
            return Err(WorkflowError::Validation(format!(
                "Unknown language in locale: '{}'",
                raw
            )));
        }

        let mut canonical = language;
        for subtag in captures[2].split(['-', '_']).filter(|s| !s.is_empty()) {
            canonical.push('-');
            canonical.push_str(&canonical_subtag(subtag));
        }

        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonical_subtag(subtag: &str) -> String {
    let is_alpha = subtag.chars().all(|c| c.is_ascii_alphabetic());
    match subtag.len() {
        2 if is_alpha => subtag.to_uppercase(),
        4 if is_alpha => {
            let lower = subtag.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => lower,
            }
        }
        _ => subtag.to_lowercase(),
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locale {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Locale {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}

/// A local document to send for translation
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Where the document lives on disk
    pub local_path: PathBuf,
    /// Name the service shows for the document
    pub display_name: String,
    /// Parser configuration the service should apply (e.g. `XML-CDATA-Sample`)
    pub format_hint: String,
}

impl SourceFile {
    /// Create a source file whose display name is its file name
    pub fn new(local_path: impl Into<PathBuf>, format_hint: impl Into<String>) -> Self {
        let local_path = local_path.into();
        let display_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            local_path,
            display_name,
            format_hint: format_hint.into(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

/// Remote identifier of an uploaded document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
}

impl UploadedFile {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
        }
    }
}

/// Job parameters chosen by the caller, before any file is uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub name: String,
    /// Due date in `dd/MM/yyyy HH:mm`
    pub due_date: String,
    pub source_locale: Locale,
    pub target_locales: Vec<Locale>,
}

/// Everything the submission stage sends for one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub name: String,
    /// Due date in `dd/MM/yyyy HH:mm`; parsed and checked at submission
    pub due_date: String,
    pub source_locale: Locale,
    pub target_locales: Vec<Locale>,
    pub file_ids: Vec<UploadedFile>,
}

impl JobDescriptor {
    /// Combine a job request with the files uploaded for it
    pub fn from_request(request: &JobRequest, file_ids: &[UploadedFile]) -> Self {
        Self {
            name: request.name.clone(),
            due_date: request.due_date.clone(),
            source_locale: request.source_locale.clone(),
            target_locales: request.target_locales.clone(),
            file_ids: file_ids.to_vec(),
        }
    }
}

/// A submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
}

/// Status of a task as reported by the service
///
/// Parsing is total: any status string the client does not know is kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    NotReady,
    Completed,
    Delivered,
    Other(String),
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "completed" => Self::Completed,
            "delivered" => Self::Delivered,
            "notready" => Self::NotReady,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::NotReady => "NotReady",
            Self::Completed => "Completed",
            Self::Delivered => "Delivered",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TaskStatus {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Snapshot of one (job, target locale) unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub job_id: String,
    pub name: String,
    /// Target locale exactly as the service reported it
    pub target_locale: String,
    pub status: TaskStatus,
}

/// Result of downloading one completed task
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub task_id: String,
    pub job_id: String,
    pub target_locale: String,
    pub local_path: PathBuf,
    pub success: bool,
    pub error_detail: Option<String>,
    pub bytes_written: u64,
}

impl RetrievalResult {
    pub fn succeeded(task: &Task, local_path: &Path, bytes_written: u64) -> Self {
        Self {
            task_id: task.task_id.clone(),
            job_id: task.job_id.clone(),
            target_locale: task.target_locale.clone(),
            local_path: local_path.to_path_buf(),
            success: true,
            error_detail: None,
            bytes_written,
        }
    }

    pub fn failed(task: &Task, local_path: &Path, error_detail: impl Into<String>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            job_id: task.job_id.clone(),
            target_locale: task.target_locale.clone(),
            local_path: local_path.to_path_buf(),
            success: false,
            error_detail: Some(error_detail.into()),
            bytes_written: 0,
        }
    }
}

/// What happened to a task during a run
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Completed and copied to local storage
    Retrieved(RetrievalResult),
    /// Completed but the local copy failed
    RetrievalFailed(RetrievalResult),
    /// Already delivered; nothing to do
    Delivered,
    /// Still in progress after the single poll
    NotReady { status: TaskStatus },
    /// Still in progress when the polling budget ran out
    TimedOut { status: TaskStatus, polls: u32 },
}

/// Lifecycle of a single orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Uploading,
    Submitting,
    Waiting,
    Polling,
    Retrieving,
    Done,
    Failed,
}

impl RunState {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Uploading => 1,
            Self::Submitting => 2,
            Self::Waiting => 3,
            Self::Polling => 4,
            Self::Retrieving => 5,
            Self::Done => 6,
            Self::Failed => 7,
        }
    }

    /// Forward-only, except for the wait between two polls
    pub fn can_transition_to(self, next: RunState) -> bool {
        match (self, next) {
            (Self::Done | Self::Failed, _) => false,
            (_, Self::Failed) => true,
            (Self::Polling | Self::Retrieving, Self::Waiting) => true,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Uploading => "Uploading",
            Self::Submitting => "Submitting",
            Self::Waiting => "Waiting",
            Self::Polling => "Polling",
            Self::Retrieving => "Retrieving",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Summary of one orchestration run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Job submitted by this run, if any
    pub job: Option<Job>,
    pub uploaded: Vec<UploadedFile>,
    pub outcomes: Vec<(Task, TaskOutcome)>,
    pub final_state: RunState,
}

impl RunReport {
    pub fn retrieved(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            TaskOutcome::Retrieved(result) => Some(result),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            TaskOutcome::RetrievalFailed(result) => Some(result),
            _ => None,
        })
    }

    pub fn delivered(&self) -> impl Iterator<Item = &Task> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TaskOutcome::Delivered))
            .map(|(task, _)| task)
    }

    /// Tasks still in progress, whether reported not-ready or timed out
    pub fn not_ready(&self) -> impl Iterator<Item = &Task> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| {
                matches!(
                    outcome,
                    TaskOutcome::NotReady { .. } | TaskOutcome::TimedOut { .. }
                )
            })
            .map(|(task, _)| task)
    }

    pub fn outcome_for(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(task, _)| task.task_id == task_id)
            .map(|(_, outcome)| outcome)
    }
}
