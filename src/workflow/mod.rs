/*!
 * Upload → submit → poll → retrieve workflow.
 *
 * Each stage is a small module of free functions over a `ServiceGateway`;
 * the `orchestrator` sequences them and owns the run's state:
 * 1. `upload`: push source documents, collect file ids
 * 2. `submission`: validate the job descriptor and create the job
 * 3. `polling`: list tasks and classify their status
 * 4. `retrieval`: stream completed tasks to local storage
 */

pub mod orchestrator;
pub mod polling;
pub mod retrieval;
pub mod submission;
pub mod upload;

pub use orchestrator::Orchestrator;
pub use polling::{classify, PollingPolicy, TaskClass, TaskScope};
pub use retrieval::{FileSinkFactory, SinkFactory};
