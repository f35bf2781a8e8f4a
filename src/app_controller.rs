use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::file_utils::FileManager;
use crate::gateway::{GccGateway, ServiceGateway};
use crate::model::{Job, RunReport, TaskOutcome, UploadedFile};
use crate::workflow::Orchestrator;

// @module: Application controller wiring configuration, gateway and workflow

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Stop signal shared with every run
    cancel: CancellationToken,
    // @field: Show spinners while waiting
    show_progress: bool,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops the controller's runs when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel running work when the process receives Ctrl-C
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
        });
    }

    fn gateway(&self) -> Result<GccGateway> {
        self.config.validate_connection().context("Connection configuration is invalid")?;
        GccGateway::new(&self.config.connection).context("Failed to create service client")
    }

    fn orchestrator<G: ServiceGateway>(&self, gateway: G) -> Result<Orchestrator<G>> {
        let destination_dir = &self.config.directories.destination_dir;
        FileManager::ensure_dir(destination_dir)?;
        Ok(Orchestrator::new(gateway, self.config.polling_policy(), destination_dir.clone())
            .with_cancellation(self.cancel.clone())
            .with_progress(self.show_progress))
    }

    /// Upload, submit, wait and retrieve against the configured service
    pub async fn run(&self, confirm: bool) -> Result<RunReport> {
        let gateway = self.gateway()?;
        self.run_with(gateway, confirm).await
    }

    /// Full workflow against the given gateway
    pub async fn run_with<G: ServiceGateway>(&self, gateway: G, confirm: bool) -> Result<RunReport> {
        self.config.validate().context("Configuration validation failed")?;
        let sources = self.config.source_files()?;
        let request = self.config.job_request()?;

        let mut orchestrator = self.orchestrator(gateway)?;
        let report = orchestrator
            .run(&sources, &request)
            .await
            .context("Translation run failed")?;

        if confirm {
            Self::confirm_retrieved(&orchestrator, &report).await;
        }
        Self::log_report(&report);
        Ok(report)
    }

    /// Upload and submit only
    pub async fn submit(&self) -> Result<(Vec<UploadedFile>, Job)> {
        let gateway = self.gateway()?;
        self.submit_with(gateway).await
    }

    pub async fn submit_with<G: ServiceGateway>(&self, gateway: G) -> Result<(Vec<UploadedFile>, Job)> {
        self.config.validate().context("Configuration validation failed")?;
        let sources = self.config.source_files()?;
        let request = self.config.job_request()?;

        let mut orchestrator = self.orchestrator(gateway)?;
        let submitted = orchestrator
            .submit_only(&sources, &request)
            .await
            .context("Submission failed")?;
        info!("Job [{}] submitted with {} file(s)", submitted.1.job_id, submitted.0.len());
        Ok(submitted)
    }

    /// Poll and retrieve without submitting, optionally for a single job
    pub async fn retrieve(&self, job_id: Option<&str>, confirm: bool) -> Result<RunReport> {
        let gateway = self.gateway()?;
        self.retrieve_with(gateway, job_id, confirm).await
    }

    pub async fn retrieve_with<G: ServiceGateway>(
        &self,
        gateway: G,
        job_id: Option<&str>,
        confirm: bool,
    ) -> Result<RunReport> {
        let mut orchestrator = self.orchestrator(gateway)?;
        let report = orchestrator
            .retrieve_only(job_id)
            .await
            .context("Retrieval failed")?;

        if confirm {
            Self::confirm_retrieved(&orchestrator, &report).await;
        }
        Self::log_report(&report);
        Ok(report)
    }

    /// Confirm delivery of a task already retrieved to the destination directory
    pub async fn confirm(&self, task_id: &str) -> Result<()> {
        let gateway = self.gateway()?;
        self.confirm_with(gateway, task_id).await
    }

    pub async fn confirm_with<G: ServiceGateway>(&self, gateway: G, task_id: &str) -> Result<()> {
        if task_id.trim().is_empty() {
            return Err(anyhow!("Task id must not be empty"));
        }
        let orchestrator = self.orchestrator(gateway)?;
        orchestrator
            .confirm_task(task_id)
            .await
            .with_context(|| format!("Failed to confirm task [{}]", task_id))
    }

    async fn confirm_retrieved<G: ServiceGateway>(orchestrator: &Orchestrator<G>, report: &RunReport) {
        for result in report.retrieved() {
            if let Err(e) = orchestrator.confirm_delivery(result).await {
                error!("Task [{}] of job [{}] was not confirmed: {}", result.task_id, result.job_id, e);
            }
        }
    }

    fn log_report(report: &RunReport) {
        for (task, outcome) in &report.outcomes {
            match outcome {
                TaskOutcome::Retrieved(result) => {
                    info!("[{}] {} -> {:?}", task.task_id, task.target_locale, result.local_path)
                }
                TaskOutcome::RetrievalFailed(result) => warn!(
                    "[{}] {} failed: {}",
                    task.task_id,
                    task.target_locale,
                    result.error_detail.as_deref().unwrap_or("unknown error")
                ),
                TaskOutcome::Delivered => info!("[{}] {} already delivered", task.task_id, task.target_locale),
                TaskOutcome::NotReady { status } => {
                    info!("[{}] {} not ready ({})", task.task_id, task.target_locale, status)
                }
                TaskOutcome::TimedOut { status, polls } => warn!(
                    "[{}] {} still {} after {} poll(s)",
                    task.task_id, task.target_locale, status, polls
                ),
            }
        }

        info!(
            "Retrieved: {} - Failed: {} - Delivered: {} - Not ready: {}",
            report.retrieved().count(),
            report.failed().count(),
            report.delivered().count(),
            report.not_ready().count()
        );
    }
}
