/*!
 * Submission stage: validates a job descriptor and creates the job.
 */

use chrono::NaiveDateTime;
use log::{debug, info};

use crate::errors::WorkflowError;
use crate::gateway::{JobSubmission, ServiceGateway};
use crate::model::{Job, JobDescriptor, Locale};

/// Fixed due-date format, e.g. `31/12/2025 21:00`
pub const DUE_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Parse a due date; never falls back to a default
pub fn parse_due_date(raw: &str) -> Result<NaiveDateTime, WorkflowError> {
    NaiveDateTime::parse_from_str(raw.trim(), DUE_DATE_FORMAT).map_err(|e| {
        WorkflowError::Validation(format!(
            "Invalid due date '{}' (expected dd/MM/yyyy HH:mm): {}",
            raw, e
        ))
    })
}

/// Check every descriptor invariant and build the wire payload
pub fn validate(descriptor: &JobDescriptor) -> Result<JobSubmission, WorkflowError> {
    if descriptor.name.trim().is_empty() {
        return Err(WorkflowError::Validation("Job name must not be empty".to_string()));
    }
    if descriptor.target_locales.is_empty() {
        return Err(WorkflowError::Validation(format!(
            "Job '{}' has no target locales",
            descriptor.name
        )));
    }
    if descriptor.target_locales.contains(&descriptor.source_locale) {
        return Err(WorkflowError::Validation(format!(
            "Job '{}': source locale {} is also a target locale",
            descriptor.name, descriptor.source_locale
        )));
    }
    if descriptor.file_ids.is_empty() {
        return Err(WorkflowError::Validation(format!(
            "Job '{}' has no files",
            descriptor.name
        )));
    }
    if let Some(blank) = descriptor.file_ids.iter().find(|f| f.file_id.trim().is_empty()) {
        return Err(WorkflowError::Validation(format!(
            "Job '{}' references a blank file id '{}'",
            descriptor.name, blank.file_id
        )));
    }

    let due_date = parse_due_date(&descriptor.due_date)?;

    Ok(JobSubmission {
        name: descriptor.name.clone(),
        due_date: due_date.and_utc().timestamp_millis(),
        source_locale: descriptor.source_locale.to_string(),
        target_locales: unique_locales(&descriptor.target_locales),
        file_ids: descriptor.file_ids.iter().map(|f| f.file_id.clone()).collect(),
    })
}

// Target locales form a set; keep the first occurrence of each
fn unique_locales(locales: &[Locale]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(locales.len());
    for locale in locales {
        let tag = locale.to_string();
        if unique.contains(&tag) {
            debug!("Ignoring duplicate target locale {}", tag);
        } else {
            unique.push(tag);
        }
    }
    unique
}

/// Submit a job; creates one remote task per target locale
pub async fn submit<G>(gateway: &G, descriptor: &JobDescriptor) -> Result<Job, WorkflowError>
where
    G: ServiceGateway + ?Sized,
{
    let submission = validate(descriptor)?;

    info!(
        "Submitting job '{}': {} -> {} ({} file(s))",
        submission.name,
        submission.source_locale,
        submission.target_locales.join(", "),
        submission.file_ids.len()
    );

    let context = format!("submitting job '{}'", descriptor.name);
    let job_id = gateway
        .submit_job(&submission)
        .await
        .map_err(|e| WorkflowError::from_gateway(context.clone(), e))?;

    let job_id = job_id.trim();
    if job_id.is_empty() {
        return Err(WorkflowError::Service {
            context,
            message: "service returned an empty job identifier".to_string(),
        });
    }

    info!("Job created: '{}' [{}]", descriptor.name, job_id);
    Ok(Job {
        job_id: job_id.to_string(),
    })
}
