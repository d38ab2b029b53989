//! Client for the remote generation service.
//!
//! Endpoints:
//! - `POST {base}/generate` with JSON `{prompt, model, duration}` (seconds)
//! - `POST {base}/generate_continuation` multipart (`file`, `model`,
//!   `duration`, optional `description`)
//! - `GET  {base}/task_status/{task_id}`

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use tunesmith_types::ms_to_seconds;

use crate::error::ClientError;

/// What the service says about a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Accepted but not started ("queued" / "pending").
    Queued,
    Processing,
    Completed { download_url: Option<String> },
    Failed { error: Option<String> },
    /// Anything else the service sends.
    Unknown(String),
}

impl RemoteStatus {
    fn from_wire(status: &str, download_url: Option<String>, error: Option<String>) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => RemoteStatus::Queued,
            "processing" | "running" => RemoteStatus::Processing,
            "completed" | "complete" | "done" => RemoteStatus::Completed { download_url },
            "failed" | "error" => RemoteStatus::Failed { error },
            other => RemoteStatus::Unknown(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationRequest {
    pub seed_audio: PathBuf,
    pub description: Option<String>,
    pub model: String,
    pub duration_ms: u64,
}

/// The remote generation service, as the lifecycle manager sees it.
#[async_trait]
pub trait GenerationService: Send + Sync + 'static {
    /// Submit a prompt; returns the server-assigned task id.
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ClientError>;

    /// Submit a continuation of `seed_audio`; returns the task id.
    async fn submit_continuation(&self, request: &ContinuationRequest) -> Result<String, ClientError>;

    async fn poll_status(&self, task_id: &str) -> Result<RemoteStatus, ClientError>;
}

/// Settings for [`HttpGenerationClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Prefix for model names that carry no namespace, e.g. `small` becomes
    /// `facebook/musicgen-small`.
    pub model_namespace: String,
    pub proxy: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_owned(),
            timeout: Duration::from_secs(120),
            model_namespace: "facebook/musicgen-".to_owned(),
            proxy: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// reqwest-backed [`GenerationService`].
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    base_url: Url,
    model_namespace: String,
}

impl HttpGenerationClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Server(format!("invalid base url {:?}: {e}", config.base_url)))?;
        // Url::join drops the last path segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder()
            .user_agent(concat!("tunesmith/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout);

        if let Some(ref proxy_url) = config.proxy {
            match reqwest::Proxy::all(proxy_url) {
                Ok(p) => {
                    builder = builder.proxy(p);
                }
                Err(e) => {
                    warn!(proxy = %proxy_url, error = %e, "ignoring invalid proxy URL");
                }
            }
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            model_namespace: config.model_namespace,
        })
    }

    /// Expand a short model name with the configured namespace.
    pub fn qualified_model(&self, model: &str) -> String {
        qualify_model(&self.model_namespace, model)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Server(format!("invalid endpoint {path:?}: {e}")))
    }

    async fn read_task_id(response: reqwest::Response) -> Result<String, ClientError> {
        let body: SubmitResponse = response.error_for_status()?.json().await?;
        match body.task_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(ClientError::Server(format!(
                "service acknowledged without a task id ({})",
                body.message.unwrap_or_else(|| "no message".to_owned())
            ))),
        }
    }
}

pub(crate) fn qualify_model(namespace: &str, model: &str) -> String {
    let model = model.trim();
    if model.contains('/') || namespace.is_empty() || model.starts_with(namespace) {
        model.to_owned()
    } else {
        format!("{namespace}{model}")
    }
}

fn seed_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "seed.wav".to_owned())
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ClientError> {
        let url = self.endpoint("generate")?;
        let model = self.qualified_model(&request.model);
        debug!(%url, %model, duration_ms = request.duration_ms, "submitting prompt");

        let response = self
            .client
            .post(url)
            .json(&json!({
                "prompt": request.prompt,
                "model": model,
                "duration": ms_to_seconds(request.duration_ms),
            }))
            .send()
            .await?;
        Self::read_task_id(response).await
    }

    async fn submit_continuation(&self, request: &ContinuationRequest) -> Result<String, ClientError> {
        let url = self.endpoint("generate_continuation")?;
        let model = self.qualified_model(&request.model);
        let bytes = tokio::fs::read(&request.seed_audio).await?;
        debug!(%url, %model, seed = %request.seed_audio.display(), bytes = bytes.len(), "submitting continuation");

        let mut form = Form::new()
            .part("file", Part::bytes(bytes).file_name(seed_file_name(&request.seed_audio)))
            .text("model", model)
            .text("duration", ms_to_seconds(request.duration_ms).to_string());
        if let Some(description) = request.description.as_ref().filter(|d| !d.trim().is_empty()) {
            form = form.text("description", description.clone());
        }

        let response = self.client.post(url).multipart(form).send().await?;
        Self::read_task_id(response).await
    }

    async fn poll_status(&self, task_id: &str) -> Result<RemoteStatus, ClientError> {
        let url = self.endpoint(&format!("task_status/{task_id}"))?;
        let body: StatusResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(RemoteStatus::from_wire(&body.status, body.download_url, body.error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_model_names_get_the_namespace() {
        assert_eq!(qualify_model("facebook/musicgen-", "small"), "facebook/musicgen-small");
        assert_eq!(qualify_model("facebook/musicgen-", "acme/custom"), "acme/custom");
        assert_eq!(
            qualify_model("facebook/musicgen-", "facebook/musicgen-large"),
            "facebook/musicgen-large"
        );
        assert_eq!(qualify_model("", "small"), "small");
    }

    #[test]
    fn wire_statuses_map_to_remote_status() {
        assert_eq!(RemoteStatus::from_wire("processing", None, None), RemoteStatus::Processing);
        assert_eq!(RemoteStatus::from_wire(" Pending ", None, None), RemoteStatus::Queued);
        assert_eq!(
            RemoteStatus::from_wire("completed", Some("http://h/a.wav".into()), None),
            RemoteStatus::Completed { download_url: Some("http://h/a.wav".into()) }
        );
        assert_eq!(
            RemoteStatus::from_wire("cancelled", None, None),
            RemoteStatus::Unknown("cancelled".into())
        );
    }

    #[test]
    fn endpoints_keep_the_base_path() {
        let client = HttpGenerationClient::new(ClientConfig {
            base_url: "http://example.test/api".into(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint("task_status/abc").unwrap().as_str(),
            "http://example.test/api/task_status/abc"
        );
    }

    #[test]
    fn status_body_tolerates_missing_fields() {
        let body: StatusResponse = serde_json::from_str(r#"{"status":"processing"}"#).unwrap();
        assert!(body.download_url.is_none());
        let body: SubmitResponse =
            serde_json::from_str(r#"{"message":"ok","task_id":"abc","download_url":null}"#).unwrap();
        assert_eq!(body.task_id.as_deref(), Some("abc"));
    }
}
