/*!
 * Upload stage: pushes source documents to the service.
 */

use log::{debug, info};
use std::io::ErrorKind;

use crate::errors::WorkflowError;
use crate::gateway::ServiceGateway;
use crate::model::{SourceFile, UploadedFile};

/// Check a source file locally, before any network call
pub async fn validate_source(file: &SourceFile) -> Result<(), WorkflowError> {
    if file.display_name.trim().is_empty() {
        return Err(WorkflowError::Validation(format!(
            "Source file {:?} has no display name",
            file.local_path
        )));
    }
    if file.format_hint.trim().is_empty() {
        return Err(WorkflowError::Validation(format!(
            "Source file '{}' has no file type",
            file.display_name
        )));
    }

    let metadata = match tokio::fs::metadata(&file.local_path).await {
        Ok(metadata) => metadata,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            return Err(WorkflowError::Validation(format!(
                "Source file {:?} is not readable: {}",
                file.local_path, e
            )));
        }
        Err(e) => {
            return Err(WorkflowError::LocalIo {
                context: format!("reading metadata of {:?}", file.local_path),
                source: e,
            });
        }
    };

    if !metadata.is_file() {
        return Err(WorkflowError::Validation(format!(
            "Source path {:?} is not a regular file",
            file.local_path
        )));
    }
    if metadata.len() == 0 {
        return Err(WorkflowError::Validation(format!(
            "Source file {:?} is empty",
            file.local_path
        )));
    }

    // Metadata can be readable while the content is not
    tokio::fs::File::open(&file.local_path).await.map_err(|e| {
        WorkflowError::Validation(format!("Source file {:?} is not readable: {}", file.local_path, e))
    })?;

    Ok(())
}

/// Upload one document and return its remote id
pub async fn upload<G>(gateway: &G, file: &SourceFile) -> Result<UploadedFile, WorkflowError>
where
    G: ServiceGateway + ?Sized,
{
    validate_source(file).await?;

    info!("Uploading {} (type {})", file.display_name, file.format_hint);
    let context = format!("uploading '{}'", file.display_name);
    let file_id = gateway
        .upload_file(&file.local_path, &file.display_name, &file.format_hint)
        .await
        .map_err(|e| WorkflowError::from_gateway(context.clone(), e))?;

    let file_id = file_id.trim();
    if file_id.is_empty() {
        return Err(WorkflowError::Service {
            context,
            message: "service returned an empty file identifier".to_string(),
        });
    }

    info!("File uploaded: {} [{}]", file.display_name, file_id);
    Ok(UploadedFile::new(file_id))
}

/// Upload documents in order, stopping at the first failure
///
/// No deduplication: the same document listed twice is uploaded twice.
pub async fn upload_all<G>(gateway: &G, files: &[SourceFile]) -> Result<Vec<UploadedFile>, WorkflowError>
where
    G: ServiceGateway + ?Sized,
{
    if files.is_empty() {
        return Err(WorkflowError::Validation("No source files to upload".to_string()));
    }

    let mut uploaded = Vec::with_capacity(files.len());
    for file in files {
        uploaded.push(upload(gateway, file).await?);
    }
    debug!("Uploaded {} file(s)", uploaded.len());
    Ok(uploaded)
}
