/*!
 * Retrieval stage: streams completed tasks into local files.
 *
 * Output files are named `{targetLocale}_{taskId}_{taskName}` inside the
 * destination directory. Other tooling reads that layout, so the pattern is
 * fixed.
 */

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::WorkflowError;
use crate::gateway::{ByteStream, ServiceGateway};
use crate::model::{RetrievalResult, Task};
use crate::workflow::polling::{classify, TaskClass};

/// Largest single write issued to a sink
pub const COPY_CHUNK_SIZE: usize = 8 * 1024;

/// Opens destination sinks for downloaded tasks
///
/// A download is written to a partial location first and only moved to its
/// final path once the copy and the close both succeeded.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    type Sink: AsyncWrite + Unpin + Send;

    /// Open `path` for writing, truncating any previous content
    async fn open(&self, path: &Path) -> io::Result<Self::Sink>;

    /// Move a completely written partial file to its final path
    async fn commit(&self, partial: &Path, path: &Path) -> io::Result<()>;

    /// Drop a partial file after a failed copy
    async fn discard(&self, partial: &Path) -> io::Result<()>;
}

/// Writes tasks to regular files
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSinkFactory;

#[async_trait]
impl SinkFactory for FileSinkFactory {
    type Sink = tokio::fs::File;

    async fn open(&self, path: &Path) -> io::Result<Self::Sink> {
        tokio::fs::File::create(path).await
    }

    async fn commit(&self, partial: &Path, path: &Path) -> io::Result<()> {
        tokio::fs::rename(partial, path).await
    }

    async fn discard(&self, partial: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(partial).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Deterministic output path for a task
pub fn destination_path(destination_dir: &Path, task: &Task) -> PathBuf {
    let file_name = format!(
        "{}_{}_{}",
        sanitize(&task.target_locale),
        sanitize(&task.task_id),
        sanitize(&task.name)
    );
    destination_dir.join(file_name)
}

/// Where a download is written before it is complete
pub fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

// Keep every component inside the destination directory
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if cleaned == ".." || cleaned == "." {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

/// Copy a byte stream into a sink in chunks of at most `COPY_CHUNK_SIZE`
///
/// Does not close the sink.
pub async fn copy_stream<W>(mut stream: ByteStream, sink: &mut W, task: &Task) -> Result<u64, WorkflowError>
where
    W: AsyncWrite + Unpin,
{
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            WorkflowError::from_gateway(
                format!("downloading task [{}] of job [{}]", task.task_id, task.job_id),
                e,
            )
        })?;
        for piece in chunk.chunks(COPY_CHUNK_SIZE) {
            sink.write_all(piece).await.map_err(|e| WorkflowError::LocalIo {
                context: format!("writing task [{}]", task.task_id),
                source: e,
            })?;
            written += piece.len() as u64;
        }
    }
    Ok(written)
}

/// Download one completed task
///
/// Never fails as a whole: every problem ends up in the returned result.
/// Once opened, the sink is shut down exactly once on every path, and the
/// final path only ever holds a complete copy.
pub async fn retrieve<G, S>(gateway: &G, sinks: &S, task: &Task, destination_dir: &Path) -> RetrievalResult
where
    G: ServiceGateway + ?Sized,
    S: SinkFactory + ?Sized,
{
    let path = destination_path(destination_dir, task);

    if classify(&task.status) != TaskClass::ReadyForRetrieval {
        return RetrievalResult::failed(
            task,
            &path,
            format!("task is not completed (status: {})", task.status),
        );
    }

    info!("Downloading task [{}] ({}) to {:?}", task.task_id, task.target_locale, path);

    let stream = match gateway.download_task(&task.task_id).await {
        Ok(stream) => stream,
        Err(e) => {
            let e = WorkflowError::from_gateway(
                format!("opening download of task [{}] of job [{}]", task.task_id, task.job_id),
                e,
            );
            error!("{}", e);
            return RetrievalResult::failed(task, &path, e.to_string());
        }
    };

    let partial = partial_path(&path);
    let mut sink = match sinks.open(&partial).await {
        Ok(sink) => sink,
        Err(source) => {
            let e = WorkflowError::LocalIo {
                context: format!("creating {:?} for task [{}]", partial, task.task_id),
                source,
            };
            error!("{}", e);
            return RetrievalResult::failed(task, &path, e.to_string());
        }
    };

    let copied = copy_stream(stream, &mut sink, task).await;
    let closed = sink.shutdown().await;
    drop(sink);

    let outcome = match (copied, closed) {
        (Ok(bytes), Ok(())) => sinks.commit(&partial, &path).await.map(|()| bytes).map_err(|source| {
            WorkflowError::LocalIo {
                context: format!("moving {:?} to {:?} for task [{}]", partial, path, task.task_id),
                source,
            }
        }),
        (Err(e), _) => Err(e),
        (Ok(_), Err(source)) => Err(WorkflowError::LocalIo {
            context: format!("closing {:?} for task [{}]", partial, task.task_id),
            source,
        }),
    };

    match outcome {
        Ok(bytes) => {
            info!("Task [{}] downloaded ({} bytes)", task.task_id, bytes);
            RetrievalResult::succeeded(task, &path, bytes)
        }
        Err(e) => {
            error!("Could not save task [{}] of job [{}]: {}", task.task_id, task.job_id, e);
            if let Err(cleanup) = sinks.discard(&partial).await {
                warn!("Could not remove partial file {:?}: {}", partial, cleanup);
            }
            RetrievalResult::failed(task, &path, e.to_string())
        }
    }
}
