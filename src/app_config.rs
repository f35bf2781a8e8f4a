use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::file_utils::FileManager;
use crate::model::{JobRequest, Locale, SourceFile};
use crate::workflow::polling::{PollingPolicy, TaskScope};
use crate::workflow::submission;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Service endpoint and credentials
    pub connection: ConnectionConfig,

    /// Job parameters
    pub job: JobConfig,

    /// Documents to send; when empty every file under `directories.source_dir` is sent
    #[serde(default)]
    pub source_files: Vec<SourceFileConfig>,

    /// Local directories
    #[serde(default)]
    pub directories: DirectoryConfig,

    /// Wait and polling settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Connection settings for the translation service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionConfig {
    // @field: REST API base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    // @field: Account user name
    #[serde(default = "String::new")]
    pub username: String,

    // @field: Account password
    #[serde(default = "String::new")]
    pub password: String,

    // @field: OAuth client secret
    #[serde(default = "String::new")]
    pub client_secret: String,

    // @field: User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: String::new(),
            password: String::new(),
            client_secret: String::new(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Job parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobConfig {
    /// Descriptive job name
    #[serde(default = "default_job_name")]
    pub name: String,

    /// When the job should be completed, `dd/MM/yyyy HH:mm`
    #[serde(default = "default_due_date")]
    pub due_date: String,

    /// Source locale (e.g. "en-US")
    #[serde(default = "default_source_locale")]
    pub source_locale: String,

    /// Target locales (e.g. ["de-DE", "fr-FR"])
    #[serde(default = "default_target_locales")]
    pub target_locales: Vec<String>,

    /// File type used for documents discovered in the source directory
    #[serde(default = "default_file_type")]
    pub file_type: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            due_date: default_due_date(),
            source_locale: default_source_locale(),
            target_locales: default_target_locales(),
            file_type: default_file_type(),
        }
    }
}

/// One document to upload
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourceFileConfig {
    /// Path, relative paths are resolved against `directories.source_dir`
    pub path: PathBuf,

    /// Name shown by the service, defaults to the file name
    #[serde(default)]
    pub name: Option<String>,

    /// Service-side parser configuration; defaults to `job.file_type`
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Local directories
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DirectoryConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Where retrieved translations are written
    #[serde(default = "default_destination_dir")]
    pub destination_dir: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            destination_dir: default_destination_dir(),
        }
    }
}

/// Wait and polling settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollingConfig {
    /// Seconds to wait between submission and the first poll
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Number of task listings per run; 1 means a single wait-then-poll
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Delay before the second poll, doubled for each later one
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound for the doubled delay
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Overall polling deadline in seconds (optional)
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Which tasks the run handles
    #[serde(default)]
    pub scope: TaskScope,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            wait_secs: default_wait_secs(),
            max_polls: default_max_polls(),
            poll_interval_secs: default_poll_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            deadline_secs: None,
            scope: TaskScope::default(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_endpoint() -> String {
    "https://connect-dev.translations.com/api/v2".to_string()
}

fn default_user_agent() -> String {
    format!("gcc-relay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_job_name() -> String {
    "Sample translation job".to_string()
}

fn default_due_date() -> String {
    "31/12/2026 21:00".to_string()
}

fn default_source_locale() -> String {
    "en-US".to_string()
}

fn default_target_locales() -> Vec<String> {
    vec!["de-DE".to_string(), "fr-FR".to_string()]
}

fn default_file_type() -> String {
    "XML-CDATA-Sample".to_string()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("resources/source")
}

fn default_destination_dir() -> PathBuf {
    PathBuf::from("resources/translated")
}

fn default_wait_secs() -> u64 {
    10
}

fn default_max_polls() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_interval_secs() -> u64 {
    120
}

impl Config {
    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {:?}", path))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write config to file: {:?}", path.as_ref()))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        self.validate_connection()?;

        let request = self.job_request()?;
        if request.name.trim().is_empty() {
            return Err(anyhow!("Job name must not be empty"));
        }
        if request.target_locales.is_empty() {
            return Err(anyhow!("At least one target locale is required"));
        }
        if request.target_locales.contains(&request.source_locale) {
            return Err(anyhow!(
                "Source locale {} must not be one of the target locales",
                request.source_locale
            ));
        }
        submission::parse_due_date(&request.due_date)?;

        if self.polling.max_polls == 0 {
            return Err(anyhow!("polling.max_polls must be at least 1"));
        }
        if self.polling.max_polls > 1 && self.polling.poll_interval_secs == 0 {
            return Err(anyhow!("polling.poll_interval_secs must be positive when polling repeatedly"));
        }

        for source in &self.source_files {
            if source.path.as_os_str().is_empty() {
                return Err(anyhow!("Source file entries need a path"));
            }
        }

        Ok(())
    }

    /// Validate only what is needed to talk to the service
    pub fn validate_connection(&self) -> Result<()> {
        let url = Url::parse(&self.connection.endpoint)
            .with_context(|| format!("Invalid endpoint URL: {}", self.connection.endpoint))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(anyhow!("Endpoint must use http or https: {}", self.connection.endpoint));
        }
        if self.connection.username.is_empty() || self.connection.password.is_empty() {
            return Err(anyhow!("Username and password are required"));
        }
        if self.connection.client_secret.is_empty() {
            return Err(anyhow!("Client secret is required"));
        }
        if self.connection.user_agent.trim().is_empty() {
            return Err(anyhow!("User agent must not be empty"));
        }
        Ok(())
    }

    /// Job parameters with parsed locales
    pub fn job_request(&self) -> Result<JobRequest> {
        let source_locale = Locale::parse(&self.job.source_locale)?;
        let target_locales = self
            .job
            .target_locales
            .iter()
            .map(|raw| Locale::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobRequest {
            name: self.job.name.clone(),
            due_date: self.job.due_date.clone(),
            source_locale,
            target_locales,
        })
    }

    /// Resolve the documents to upload
    pub fn source_files(&self) -> Result<Vec<SourceFile>> {
        if self.source_files.is_empty() {
            if !FileManager::dir_exists(&self.directories.source_dir) {
                return Err(anyhow!("Source directory not found: {:?}", self.directories.source_dir));
            }
            let discovered = FileManager::find_files(&self.directories.source_dir)
                .with_context(|| format!("Failed to scan source directory: {:?}", self.directories.source_dir))?;
            return Ok(discovered
                .into_iter()
                .map(|path| SourceFile::new(path, self.job.file_type.clone()))
                .collect());
        }

        Ok(self
            .source_files
            .iter()
            .map(|entry| {
                let path = if entry.path.is_absolute() {
                    entry.path.clone()
                } else {
                    self.directories.source_dir.join(&entry.path)
                };
                let file_type = entry.file_type.clone().unwrap_or_else(|| self.job.file_type.clone());
                let file = SourceFile::new(path, file_type);
                match &entry.name {
                    Some(name) => file.with_display_name(name.clone()),
                    None => file,
                }
            })
            .collect())
    }

    pub fn polling_policy(&self) -> PollingPolicy {
        PollingPolicy {
            initial_wait: Duration::from_secs(self.polling.wait_secs),
            max_polls: self.polling.max_polls.max(1),
            poll_interval: Duration::from_secs(self.polling.poll_interval_secs),
            max_interval: Duration::from_secs(self.polling.max_interval_secs),
            deadline: self.polling.deadline_secs.map(Duration::from_secs),
            scope: self.polling.scope,
        }
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            connection: ConnectionConfig::default(),
            job: JobConfig::default(),
            source_files: vec![SourceFileConfig {
                path: PathBuf::from("sample-file.xml"),
                name: None,
                file_type: None,
            }],
            directories: DirectoryConfig::default(),
            polling: PollingConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
