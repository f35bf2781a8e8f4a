/*!
 * End-to-end orchestrator scenarios against the mock gateway
 */

use std::time::Duration;

use anyhow::Result;
use gcc_relay::errors::WorkflowError;
use gcc_relay::gateway::{GatewayCall, MockFailure, MockGateway};
use gcc_relay::model::{RunState, TaskOutcome, TaskStatus};
use gcc_relay::workflow::{Orchestrator, PollingPolicy, TaskScope};
use tokio_util::sync::CancellationToken;

use crate::common::{self, RecordingSinkFactory};

const GERMAN: &str = "<?xml version=\"1.0\"?>\n<root><item><![CDATA[Hallo Welt]]></item></root>\n";

fn single_shot() -> PollingPolicy {
    PollingPolicy::single_shot(Duration::ZERO)
}

fn repeating(max_polls: u32) -> PollingPolicy {
    PollingPolicy::repeating(Duration::ZERO, max_polls, Duration::from_millis(1))
}

#[tokio::test]
async fn test_run_withOneCompletedTask_shouldRetrieveItAndReportTheRest() -> Result<()> {
    common::init_logging();
    let source_dir = common::create_temp_dir()?;
    let destination_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;

    let gateway = MockGateway::new()
        .with_job_id("job-1")
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("102", "job-1", "fr-FR", "NotReady"),
        ])
        .with_download("101", GERMAN);

    let mut orchestrator = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(orchestrator.state(), RunState::Done);
    assert_eq!(report.job.as_ref().map(|j| j.job_id.as_str()), Some("job-1"));
    assert_eq!(report.uploaded.len(), 1);

    let retrieved: Vec<_> = report.retrieved().collect();
    assert_eq!(retrieved.len(), 1);
    assert_eq!(
        retrieved[0].local_path,
        destination_dir.path().join("de-DE_101_sample-file.xml")
    );
    assert_eq!(std::fs::read_to_string(&retrieved[0].local_path)?, GERMAN);

    let not_ready: Vec<_> = report.not_ready().map(|t| t.task_id.as_str()).collect();
    assert_eq!(not_ready, vec!["102"]);
    assert_eq!(
        report.outcome_for("102"),
        Some(&TaskOutcome::NotReady {
            status: TaskStatus::NotReady
        })
    );

    // Confirmation is never implicit
    assert!(gateway.confirmed_tasks().is_empty());
    assert_eq!(gateway.downloaded_tasks(), vec!["101"]);
    Ok(())
}

#[tokio::test]
async fn test_run_shouldCallGatewayInWorkflowOrder() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let first = common::create_source_file(source_dir.path(), "a.xml")?;
    let second = common::create_source_file(source_dir.path(), "b.xml")?;
    let gateway = MockGateway::new();

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/unused").with_sinks(RecordingSinkFactory::new());
    let report = orchestrator.run(&[first, second], &common::job_request()).await?;

    assert!(report.outcomes.is_empty());
    let calls = gateway.calls();
    assert_eq!(calls.len(), 4);
    assert!(matches!(calls[0], GatewayCall::Upload { ref display_name, .. } if display_name == "a.xml"));
    assert!(matches!(calls[1], GatewayCall::Upload { ref display_name, .. } if display_name == "b.xml"));
    match &calls[2] {
        GatewayCall::Submit(submission) => {
            assert_eq!(submission.file_ids, vec!["file-1", "file-2"]);
            assert_eq!(submission.target_locales, vec!["de-DE", "fr-FR"]);
        }
        other => panic!("expected submission, got {:?}", other),
    }
    assert_eq!(calls[3], GatewayCall::ListTasks);
    Ok(())
}

#[tokio::test]
async fn test_run_withDeliveredTask_shouldNeitherDownloadNorConfirm() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new()
        .with_task_list(vec![common::task("100", "job-0", "it-IT", "Delivered")])
        .with_download("100", GERMAN);
    let sinks = RecordingSinkFactory::new();

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/translated").with_sinks(sinks.clone());
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.delivered().count(), 1);
    assert!(gateway.downloaded_tasks().is_empty());
    assert!(gateway.confirmed_tasks().is_empty());
    assert!(sinks.log.lock().unwrap().opened.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_run_withUploadFailure_shouldAbortBeforeSubmission() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new().fail_uploads(MockFailure::Transport);

    let mut orchestrator = Orchestrator::new(gateway.clone(), single_shot(), "/translated");
    let result = orchestrator.run(&[source], &common::job_request()).await;

    assert!(matches!(result, Err(WorkflowError::Transport { .. })));
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert_eq!(gateway.submit_calls(), 0);
    assert_eq!(gateway.list_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_run_withSubmissionFailure_shouldAbortBeforePolling() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new().fail_submissions(MockFailure::Service);

    let mut orchestrator = Orchestrator::new(gateway.clone(), single_shot(), "/translated");
    let result = orchestrator.run(&[source], &common::job_request()).await;

    assert!(matches!(result, Err(WorkflowError::Service { .. })));
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert_eq!(gateway.upload_calls(), 1);
    assert_eq!(gateway.list_calls(), 0);

    // Failed is absorbing
    let again = orchestrator.retrieve_only(None).await;
    assert!(matches!(again, Err(WorkflowError::InvalidTransition { .. })));
    Ok(())
}

#[tokio::test]
async fn test_run_withFailedFirstListing_shouldFailRun() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new().fail_next_listing(MockFailure::Authentication);

    let mut orchestrator = Orchestrator::new(gateway, single_shot(), "/translated");
    let result = orchestrator.run(&[source], &common::job_request()).await;

    assert!(matches!(result, Err(WorkflowError::Transport { .. })));
    assert_eq!(orchestrator.state(), RunState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_run_withBrokenDownload_shouldRecordFailureAndContinue() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new()
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("102", "job-1", "fr-FR", "Completed"),
        ])
        .with_failing_download("101", vec![b'x'; 2048], 1024)
        .with_download("102", "Bonjour");
    let sinks = RecordingSinkFactory::new();

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/translated").with_sinks(sinks.clone());
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(report.failed().map(|r| r.task_id.as_str()).collect::<Vec<_>>(), vec!["101"]);
    assert_eq!(report.retrieved().map(|r| r.task_id.as_str()).collect::<Vec<_>>(), vec!["102"]);
    assert_eq!(sinks.closes(), 2);
    assert_eq!(gateway.downloaded_tasks(), vec!["101", "102"]);
    Ok(())
}

#[tokio::test]
async fn test_run_withRepeatingPolicy_shouldRetrieveTaskCompletedOnLaterPoll() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new()
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("102", "job-1", "fr-FR", "NotReady"),
        ])
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("102", "job-1", "fr-FR", "Completed"),
        ])
        .with_download("101", GERMAN)
        .with_download("102", "Bonjour");

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), repeating(5), "/translated").with_sinks(RecordingSinkFactory::new());
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.retrieved().count(), 2);
    assert_eq!(report.not_ready().count(), 0);
    assert_eq!(gateway.list_calls(), 2);
    // Already retrieved tasks are not fetched again
    assert_eq!(gateway.downloaded_tasks(), vec!["101", "102"]);
    Ok(())
}

#[tokio::test]
async fn test_run_withRepeatingPolicy_shouldTimeOutPendingTasks() -> Result<()> {
    common::init_logging();
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new().with_task_list(vec![common::task("102", "job-1", "fr-FR", "In Progress")]);

    let mut orchestrator = Orchestrator::new(gateway.clone(), repeating(3), "/translated");
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(gateway.list_calls(), 3);
    assert_eq!(
        report.outcome_for("102"),
        Some(&TaskOutcome::TimedOut {
            status: TaskStatus::Other("In Progress".to_string()),
            polls: 3
        })
    );
    assert!(gateway.downloaded_tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_retrieve_only_withTransientListingFailure_shouldKeepPolling() -> Result<()> {
    // Listing order: pending, transport error, completed
    let gateway = MockGateway::new()
        .with_task_list(vec![common::task("102", "job-1", "fr-FR", "NotReady")])
        .with_task_list(vec![common::task("102", "job-1", "fr-FR", "Completed")])
        .succeed_next_listing()
        .fail_next_listing(MockFailure::Transport)
        .with_download("102", "Bonjour");

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), repeating(4), "/translated").with_sinks(RecordingSinkFactory::new());
    let report = orchestrator.retrieve_only(None).await?;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(report.retrieved().count(), 1);
    assert_eq!(gateway.list_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_retrieve_only_withTaskGoneFromListing_shouldStopWaitingForIt() -> Result<()> {
    let gateway = MockGateway::new()
        .with_task_list(vec![common::task("102", "job-1", "fr-FR", "NotReady")])
        .with_task_list(vec![]);

    let mut orchestrator = Orchestrator::new(gateway.clone(), repeating(4), "/translated");
    let report = orchestrator.retrieve_only(None).await?;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(gateway.list_calls(), 2);
    assert_eq!(
        report.outcome_for("102"),
        Some(&TaskOutcome::NotReady {
            status: TaskStatus::NotReady
        })
    );
    assert_eq!(report.outcomes.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retrieve_only_withTaskListedTwice_shouldDownloadOnce() -> Result<()> {
    let gateway = MockGateway::new()
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("101", "job-1", "de-DE", "Completed"),
        ])
        .with_download("101", GERMAN);
    let sinks = RecordingSinkFactory::new();

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/translated").with_sinks(sinks.clone());
    let report = orchestrator.retrieve_only(None).await?;

    assert_eq!(gateway.downloaded_tasks(), vec!["101"]);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.retrieved().count(), 1);
    assert_eq!(sinks.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn test_run_withSubmittedJobScope_shouldIgnoreOtherJobs() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new()
        .with_job_id("job-2")
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("201", "job-2", "de-DE", "Completed"),
        ])
        .with_download("101", GERMAN)
        .with_download("201", GERMAN);

    let policy = single_shot().with_scope(TaskScope::SubmittedJob);
    let mut orchestrator =
        Orchestrator::new(gateway.clone(), policy, "/translated").with_sinks(RecordingSinkFactory::new());
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(gateway.downloaded_tasks(), vec!["201"]);
    Ok(())
}

#[tokio::test]
async fn test_run_withAllScope_shouldHandleEveryVisibleTask() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new()
        .with_job_id("job-2")
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("201", "job-2", "de-DE", "Completed"),
        ])
        .with_download("101", GERMAN)
        .with_download("201", GERMAN);

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/translated").with_sinks(RecordingSinkFactory::new());
    let report = orchestrator.run(&[source], &common::job_request()).await?;

    assert_eq!(report.retrieved().count(), 2);
    assert_eq!(gateway.downloaded_tasks(), vec!["101", "201"]);
    Ok(())
}

#[tokio::test]
async fn test_retrieve_only_withJobFilter_shouldOnlyTouchThatJob() -> Result<()> {
    let gateway = MockGateway::new()
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("201", "job-2", "de-DE", "Completed"),
        ])
        .with_download("101", GERMAN)
        .with_download("201", GERMAN);

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/translated").with_sinks(RecordingSinkFactory::new());
    let report = orchestrator.retrieve_only(Some("job-1")).await?;

    assert!(report.job.is_none());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(gateway.downloaded_tasks(), vec!["101"]);
    assert_eq!(gateway.upload_calls() + gateway.submit_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_submit_only_shouldNotPoll() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new().with_job_id("4711");

    let mut orchestrator = Orchestrator::new(gateway.clone(), single_shot(), "/translated");
    let (uploaded, job) = orchestrator.submit_only(&[source], &common::job_request()).await?;

    assert_eq!(uploaded.len(), 1);
    assert_eq!(job.job_id, "4711");
    assert_eq!(orchestrator.state(), RunState::Done);
    assert_eq!(gateway.list_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_run_whenCancelledBeforeStart_shouldStopBeforePolling() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut orchestrator =
        Orchestrator::new(gateway.clone(), single_shot(), "/translated").with_cancellation(cancel);
    let result = orchestrator.run(&[source], &common::job_request()).await;

    assert!(matches!(result, Err(WorkflowError::Cancelled)));
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert_eq!(gateway.list_calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_run_whenCancelledDuringWait_shouldStopPromptly() -> Result<()> {
    let source_dir = common::create_temp_dir()?;
    let source = common::create_source_file(source_dir.path(), "sample-file.xml")?;
    let gateway = MockGateway::new();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
    });

    let policy = PollingPolicy::single_shot(Duration::from_secs(3600));
    let mut orchestrator = Orchestrator::new(gateway.clone(), policy, "/translated").with_cancellation(cancel);
    let result = orchestrator.run(&[source], &common::job_request()).await;

    assert!(matches!(result, Err(WorkflowError::Cancelled)));
    assert_eq!(gateway.list_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_confirm_delivery_shouldOnlyConfirmCompleteLocalCopies() -> Result<()> {
    let destination_dir = common::create_temp_dir()?;
    let gateway = MockGateway::new()
        .with_task_list(vec![
            common::task("101", "job-1", "de-DE", "Completed"),
            common::task("102", "job-1", "fr-FR", "Completed"),
        ])
        .with_download("101", GERMAN)
        .with_failing_download("102", vec![b'x'; 2048], 100);

    let mut orchestrator = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());
    let report = orchestrator.retrieve_only(None).await?;

    let good = report.retrieved().next().cloned().unwrap();
    let bad = report.failed().next().cloned().unwrap();

    let refused = orchestrator.confirm_delivery(&bad).await;
    assert!(matches!(refused, Err(WorkflowError::Validation(_))));
    assert!(gateway.confirmed_tasks().is_empty());

    orchestrator.confirm_delivery(&good).await?;
    assert_eq!(gateway.confirmed_tasks(), vec!["101"]);

    // A truncated local copy is refused as well
    std::fs::write(&good.local_path, "short")?;
    let truncated = orchestrator.confirm_delivery(&good).await;
    assert!(matches!(truncated, Err(WorkflowError::Validation(_))));
    assert_eq!(gateway.confirmed_tasks(), vec!["101"]);
    Ok(())
}

#[tokio::test]
async fn test_confirm_delivery_withServiceRejection_shouldReturnError() -> Result<()> {
    let destination_dir = common::create_temp_dir()?;
    let gateway = MockGateway::new()
        .with_task_list(vec![common::task("101", "job-1", "de-DE", "Completed")])
        .with_download("101", GERMAN)
        .fail_confirmations(MockFailure::Service);

    let mut orchestrator = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());
    let report = orchestrator.retrieve_only(None).await?;
    let good = report.retrieved().next().cloned().unwrap();

    let result = orchestrator.confirm_delivery(&good).await;
    assert!(matches!(result, Err(WorkflowError::Service { .. })));
    Ok(())
}

#[tokio::test]
async fn test_confirm_task_shouldRequireCompletedTaskWithLocalFile() -> Result<()> {
    let destination_dir = common::create_temp_dir()?;
    let gateway = MockGateway::new().with_task_list(vec![
        common::task("101", "job-1", "de-DE", "Completed"),
        common::task("102", "job-1", "fr-FR", "NotReady"),
    ]);
    let orchestrator = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());

    // Not on disk yet
    assert!(matches!(
        orchestrator.confirm_task("101").await,
        Err(WorkflowError::Validation(_))
    ));
    // Not completed
    assert!(matches!(
        orchestrator.confirm_task("102").await,
        Err(WorkflowError::Validation(_))
    ));
    // Unknown
    assert!(matches!(
        orchestrator.confirm_task("999").await,
        Err(WorkflowError::Validation(_))
    ));
    assert!(gateway.confirmed_tasks().is_empty());

    common::create_test_file(destination_dir.path(), "de-DE_101_sample-file.xml", GERMAN)?;
    orchestrator.confirm_task("101").await?;
    assert_eq!(gateway.confirmed_tasks(), vec!["101"]);
    Ok(())
}

#[tokio::test]
async fn test_confirm_task_afterBrokenDownload_shouldRefuse() -> Result<()> {
    let destination_dir = common::create_temp_dir()?;
    let gateway = MockGateway::new()
        .with_task_list(vec![common::task("101", "job-1", "de-DE", "Completed")])
        .with_failing_download("101", vec![b'x'; 4096], 1500);

    let mut retriever = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());
    let report = retriever.retrieve_only(None).await?;
    assert_eq!(report.failed().count(), 1);
    assert!(!destination_dir.path().join("de-DE_101_sample-file.xml").exists());

    let confirmer = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());
    assert!(matches!(
        confirmer.confirm_task("101").await,
        Err(WorkflowError::Validation(_))
    ));
    assert!(gateway.confirmed_tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_confirm_task_withDirectoryAtTaskPath_shouldRefuse() -> Result<()> {
    let destination_dir = common::create_temp_dir()?;
    std::fs::create_dir(destination_dir.path().join("de-DE_101_sample-file.xml"))?;
    let gateway = MockGateway::new().with_task_list(vec![common::task("101", "job-1", "de-DE", "Completed")]);
    let orchestrator = Orchestrator::new(gateway.clone(), single_shot(), destination_dir.path());

    assert!(matches!(
        orchestrator.confirm_task("101").await,
        Err(WorkflowError::Validation(_))
    ));
    assert!(gateway.confirmed_tasks().is_empty());
    Ok(())
}
