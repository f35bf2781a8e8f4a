use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::app_config::ConnectionConfig;
use crate::errors::GatewayError;
use crate::gateway::{ByteStream, JobSubmission, ServiceGateway};
use crate::model::{Task, TaskStatus};

/// REST client for a GlobalLink Connect style translation service
pub struct GccGateway {
    /// HTTP client for API requests
    client: Client,
    /// Base URL every operation path is joined to
    base_url: Url,
    username: String,
    password: String,
    client_secret: String,
    /// Per-request timeout for everything except download bodies
    timeout: Duration,
    /// Bearer token from the last successful login
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for GccGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GccGateway")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Response envelope wrapping every JSON payload
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: u16,
    message: Option<String>,
    response_data: Option<T>,
}

impl<T> Envelope<T> {
    fn check(&self) -> Result<(), GatewayError> {
        if self.status != 200 {
            return Err(GatewayError::Service {
                status: self.status,
                message: self.message.clone().unwrap_or_else(|| "no message".to_string()),
            });
        }
        Ok(())
    }

    fn into_data(self) -> Result<T, GatewayError> {
        self.check()?;
        self.response_data
            .ok_or_else(|| GatewayError::Parse("response_data missing from payload".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    basic_document: Value,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    job_id: Value,
}

#[derive(Debug, Deserialize)]
struct TaskListData {
    #[serde(default)]
    tasks_list: Vec<WireTask>,
}

#[derive(Debug, Deserialize)]
struct WireLocale {
    locale: String,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    task_id: Value,
    job_id: Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    target_locale: WireLocale,
}

impl TryFrom<WireTask> for Task {
    type Error = GatewayError;

    fn try_from(wire: WireTask) -> Result<Self, Self::Error> {
        Ok(Task {
            task_id: id_to_string(&wire.task_id)?,
            job_id: id_to_string(&wire.job_id)?,
            name: wire.name,
            target_locale: wire.target_locale.locale,
            status: TaskStatus::parse(&wire.status),
        })
    }
}

/// Service ids arrive as JSON numbers or strings
fn id_to_string(value: &Value) -> Result<String, GatewayError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(GatewayError::Parse(format!("unexpected identifier: {}", other))),
    }
}

impl GccGateway {
    /// Create a client from connection settings
    pub fn new(config: &ConnectionConfig) -> Result<Self, GatewayError> {
        let mut base_url = Url::parse(&config.endpoint)
            .map_err(|e| GatewayError::Transport(format!("Invalid endpoint '{}': {}", config.endpoint, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            client_secret: config.client_secret.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::Transport(format!("Invalid request path '{}': {}", path, e)))
    }

    /// Return the cached bearer token, logging in first if needed
    async fn bearer_token(&self) -> Result<String, GatewayError> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        debug!("Requesting access token for user {}", self.username);
        let response = self
            .client
            .post(self.url("oauth2/token")?)
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let response = check_status(response).await?;
        let issued = response.json::<TokenResponse>().await?;
        *token = Some(issued.access_token.clone());
        Ok(issued.access_token)
    }

    /// Send an authorized request; a rejected token is dropped so the next call logs in again
    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let token = self.bearer_token().await?;
        let response = request.bearer_auth(token).send().await?;
        match check_status(response).await {
            Err(GatewayError::Authentication(message)) => {
                *self.token.lock().await = None;
                Err(GatewayError::Authentication(message))
            }
            other => other,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.send(request.timeout(self.timeout)).await?;
        let body = response.text().await?;
        decode_envelope(&body)
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error response text".to_string());
    error!("Service error ({}): {}", status, body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(GatewayError::Authentication(format!("{}: {}", status, body)))
        }
        _ => Err(GatewayError::Service {
            status: status.as_u16(),
            message: body,
        }),
    }
}

fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| GatewayError::Parse(format!("{}: {}", e, body)))?;
    envelope.into_data()
}

#[async_trait]
impl ServiceGateway for GccGateway {
    async fn upload_file(
        &self,
        local_path: &Path,
        display_name: &str,
        format_hint: &str,
    ) -> Result<String, GatewayError> {
        let contents = tokio::fs::read(local_path).await?;
        let part = Part::bytes(contents).file_name(display_name.to_string());
        let form = Form::new()
            .part("file", part)
            .text("name", display_name.to_string())
            .text("type", format_hint.to_string());

        let request = self.client.post(self.url("files/upload")?).multipart(form);
        let data: UploadData = self.send_json(request).await?;
        id_to_string(&data.basic_document)
    }

    async fn submit_job(&self, submission: &JobSubmission) -> Result<String, GatewayError> {
        let request = self.client.post(self.url("jobs/submit")?).json(submission);
        let data: SubmitData = self.send_json(request).await?;
        id_to_string(&data.job_id)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, GatewayError> {
        let request = self.client.get(self.url("tasks")?);
        let data: TaskListData = self.send_json(request).await?;
        data.tasks_list.into_iter().map(Task::try_from).collect()
    }

    async fn download_task(&self, task_id: &str) -> Result<ByteStream, GatewayError> {
        let url = self.url(&format!("tasks/{}/download", task_id))?;
        let response = self.send(self.client.get(url)).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatewayError::from));
        Ok(Box::pin(stream))
    }

    async fn confirm_delivery(&self, task_id: &str) -> Result<(), GatewayError> {
        let url = self.url(&format!("tasks/{}/confirm", task_id))?;
        let response = self.send(self.client.post(url).timeout(self.timeout)).await?;
        let body = response.text().await?;
        let envelope: Envelope<Value> = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Parse(format!("{}: {}", e, body)))?;
        envelope.check()
    }
}
