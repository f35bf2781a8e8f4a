/*!
 * # gcc-relay - client-side orchestrator for translation jobs
 *
 * Sends documents to a translation-management service and brings the
 * translations back.
 *
 * ## Features
 *
 * - Upload source documents and submit them as one job with target locales
 *   and a due date
 * - Wait, then poll the per-locale tasks (single shot or bounded re-polling
 *   with backoff)
 * - Stream completed tasks to `{targetLocale}_{taskId}_{taskName}` files
 * - Explicit, opt-in delivery confirmation
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `model`: Jobs, tasks, locales and run reports
 * - `gateway`: The `ServiceGateway` trait and its implementations:
 *   - `gateway::gcc`: REST client
 *   - `gateway::mock`: Scripted in-memory gateway
 * - `workflow`: The workflow stages:
 *   - `workflow::upload`, `workflow::submission`, `workflow::polling`,
 *     `workflow::retrieval`
 *   - `workflow::orchestrator`: Run state machine
 * - `app_controller`: Wires configuration, gateway and workflow
 * - `file_utils`: File system operations
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod errors;
pub mod file_utils;
pub mod gateway;
pub mod model;
pub mod workflow;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::Controller;
pub use errors::{GatewayError, WorkflowError};
pub use gateway::{GccGateway, MockGateway, ServiceGateway};
pub use model::{Job, JobRequest, Locale, RetrievalResult, RunReport, RunState, SourceFile, Task, TaskOutcome, TaskStatus};
pub use workflow::Orchestrator;
