use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::error::{ClientError, ClientResult};
use crate::task::{NewTask, Task};

pub const DEFAULT_API_URL: &str = "https://srwr-backend.onrender.com";
pub const DEFAULT_SHEETS_URL: &str = "https://docs.google.com/spreadsheets";

/// The task endpoints of the remote backend.
///
/// Every method is a single request. Nothing is retried and nothing is cached here; the
/// table view-model owns the local copy.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn list_tasks(&self, owner_id: Option<&str>) -> ClientResult<Vec<Task>>;

    async fn create_task(&self, task: &NewTask) -> ClientResult<Task>;

    async fn import_tasks(&self, tasks: &[NewTask]) -> ClientResult<()>;

    /// Full replace. Returns the server's copy when the response body decodes as a task.
    async fn update_task(&self, task: &Task) -> ClientResult<Option<Task>>;

    async fn complete_task(&self, id: &str) -> ClientResult<()>;

    async fn delete_task(&self, id: &str) -> ClientResult<()>;
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn signup(&self, signup: &Signup) -> ClientResult<()>;

    /// Returns the issued bearer token.
    async fn signin(&self, credentials: &Credentials) -> ClientResult<String>;
}

/// Source of the CSV export of a shared spreadsheet.
#[async_trait]
pub trait SheetExporter: Send + Sync {
    async fn export_csv(&self, sheet_id: &str) -> ClientResult<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Signup {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub sheets_url: String,
    pub timeout: Option<Duration>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            sheets_url: DEFAULT_SHEETS_URL.to_string(),
            timeout: None,
        }
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    sheets_url: String,
    bearer: Option<String>,
}

impl HttpBackend {
    pub fn new(settings: &ApiSettings, bearer: Option<String>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("failed building HTTP client for the task API")?;
        let base_url = Url::parse(settings.base_url.trim())
            .with_context(|| format!("invalid api.url {:?}", settings.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("invalid api.url {:?}: not a base URL", settings.base_url);
        }

        Ok(Self {
            client,
            base_url,
            sheets_url: settings.sheets_url.trim_end_matches('/').to_string(),
            bearer,
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> ClientResult<(StatusCode, String)> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(reqwest::header::ACCEPT, "application/json");

        if let Some(token) = self.bearer.as_deref() {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            let payload = serde_json::to_vec(&body)
                .map_err(|err| ClientError::network(format!("failed encoding request: {err}")))?;
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload);
        }

        let response = request.send().await.map_err(|err| {
            warn!(%method, url, error = %err, "request failed");
            ClientError::network(format!("request to {url} failed: {err}"))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            ClientError::network(format!("failed reading response from {url}: {err}"))
        })?;
        debug!(%method, url, %status, bytes = text.len(), "response received");
        Ok((status, text))
    }

    /// Sends a request and fails on any non-success status.
    async fn send_ok(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
        failure: &str,
    ) -> ClientResult<String> {
        let url = self.url(segments);
        let (status, text) = self.send(method.clone(), url.as_str(), body).await?;
        if !status.is_success() {
            warn!(%method, url = url.as_str(), %status, "backend returned non-success status");
            return Err(ClientError::network(format!("{failure} (HTTP {status})")));
        }
        Ok(text)
    }
}

fn decode<T: DeserializeOwned>(text: &str, what: &str) -> ClientResult<T> {
    serde_json::from_str(text)
        .map_err(|err| ClientError::network(format!("unexpected {what} response: {err}")))
}

fn to_json<T: Serialize>(value: &T) -> ClientResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|err| ClientError::network(format!("failed encoding request: {err}")))
}

#[async_trait]
impl TaskBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn list_tasks(&self, owner_id: Option<&str>) -> ClientResult<Vec<Task>> {
        let segments = match owner_id {
            Some(owner) => vec!["api", "taskers", owner],
            None => vec!["api", "tasks"],
        };
        let text = self
            .send_ok(Method::GET, &segments, None, "failed to fetch tasks")
            .await?;
        decode(&text, "task list")
    }

    #[instrument(skip(self, task), fields(task_name = %task.task_name))]
    async fn create_task(&self, task: &NewTask) -> ClientResult<Task> {
        let text = self
            .send_ok(Method::POST, &["api", "tasks"], Some(to_json(task)?), "failed to add task")
            .await?;
        decode(&text, "create task")
    }

    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn import_tasks(&self, tasks: &[NewTask]) -> ClientResult<()> {
        let body = json!({ "tasks": tasks });
        self.send_ok(Method::POST, &["api", "import"], Some(body), "failed to save tasks")
            .await?;
        Ok(())
    }

    #[instrument(skip(self, task), fields(id = %task.id))]
    async fn update_task(&self, task: &Task) -> ClientResult<Option<Task>> {
        let text = self
            .send_ok(
                Method::PUT,
                &["api", "tasks", task.id.as_str()],
                Some(to_json(task)?),
                "failed to update task",
            )
            .await?;
        Ok(serde_json::from_str::<Task>(&text).ok())
    }

    #[instrument(skip(self))]
    async fn complete_task(&self, id: &str) -> ClientResult<()> {
        self.send_ok(
            Method::PUT,
            &["api", "tasks", id],
            Some(json!({ "completed": true })),
            "failed to update task status",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> ClientResult<()> {
        self.send_ok(Method::DELETE, &["api", "tasks", id], None, "failed to delete task")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    #[instrument(skip_all, fields(username = %signup.username))]
    async fn signup(&self, signup: &Signup) -> ClientResult<()> {
        let url = self.url(&["auth", "signup"]);
        let (status, text) = self
            .send(Method::POST, url.as_str(), Some(to_json(signup)?))
            .await?;
        if status.is_success() {
            return Ok(());
        }

        let message = serde_json::from_str::<MessageResponse>(&text)
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| "signup failed".to_string());
        warn!(%status, message = %message, "signup rejected");
        Err(ClientError::network(message))
    }

    #[instrument(skip_all, fields(username = %credentials.username))]
    async fn signin(&self, credentials: &Credentials) -> ClientResult<String> {
        let url = self.url(&["auth", "signin"]);
        let invalid = || ClientError::network("invalid username or password");

        let (status, text) = self
            .send(Method::POST, url.as_str(), Some(to_json(credentials)?))
            .await
            .map_err(|err| {
                warn!(error = %err, "signin transport failure");
                invalid()
            })?;
        if !status.is_success() {
            warn!(%status, "signin rejected");
            return Err(invalid());
        }

        serde_json::from_str::<TokenResponse>(&text)
            .map(|body| body.token)
            .map_err(|_| invalid())
    }
}

#[async_trait]
impl SheetExporter for HttpBackend {
    #[instrument(skip(self))]
    async fn export_csv(&self, sheet_id: &str) -> ClientResult<String> {
        let url = sheet_export_url(&self.sheets_url, sheet_id);
        let (status, text) = self.send(Method::GET, &url, None).await?;
        if !status.is_success() {
            return Err(ClientError::network(format!(
                "failed to fetch tasks from Google Sheets (HTTP {status})"
            )));
        }
        Ok(text)
    }
}

pub fn sheet_export_url(sheets_url: &str, sheet_id: &str) -> String {
    format!(
        "{}/d/{sheet_id}/gviz/tq?tqx=out:csv",
        sheets_url.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::{
        ApiSettings, AuthBackend, Credentials, HttpBackend, Signup, TaskBackend, sheet_export_url,
    };
    use crate::error::ClientError;

    /// Serves one canned response on a loopback port and hands back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                } else if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{addr}"), handle)
    }

    fn backend(base_url: String, bearer: Option<&str>) -> HttpBackend {
        let settings = ApiSettings {
            base_url,
            ..ApiSettings::default()
        };
        HttpBackend::new(&settings, bearer.map(str::to_string)).unwrap()
    }

    #[test]
    fn export_url_is_derived_from_sheet_id() {
        assert_eq!(
            sheet_export_url("https://docs.google.com/spreadsheets/", "abc_123"),
            "https://docs.google.com/spreadsheets/d/abc_123/gviz/tq?tqx=out:csv"
        );
    }

    #[test]
    fn path_segments_are_joined_and_encoded() {
        let local = backend("http://localhost:5000/".to_string(), None);
        assert_eq!(
            local.url(&["api", "tasks"]).as_str(),
            "http://localhost:5000/api/tasks"
        );
        assert_eq!(
            local.url(&["api", "tasks", "a/b?c#d"]).as_str(),
            "http://localhost:5000/api/tasks/a%2Fb%3Fc%23d"
        );

        let prefixed = backend("https://example.com/v1".to_string(), None);
        assert_eq!(
            prefixed.url(&["api", "taskers", "u 1"]).as_str(),
            "https://example.com/v1/api/taskers/u%201"
        );
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        let settings = ApiSettings {
            base_url: "not a url".to_string(),
            ..ApiSettings::default()
        };
        assert!(HttpBackend::new(&settings, None).is_err());
    }

    #[tokio::test]
    async fn failed_delete_status_is_a_network_failure() {
        let (base, server) = serve_once("500 Internal Server Error", "{}").await;
        let err = backend(base, Some("tok"))
            .delete_task("abc/1")
            .await
            .unwrap_err();

        match err {
            ClientError::NetworkFailure(message) => assert!(message.contains("500"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
        let request = server.await.unwrap();
        assert!(request.starts_with("DELETE /api/tasks/abc%2F1 "), "{request}");
        assert!(
            request.to_ascii_lowercase().contains("authorization: bearer tok"),
            "{request}"
        );
    }

    #[tokio::test]
    async fn complete_sends_the_completed_flag() {
        let (base, server) = serve_once("200 OK", "{}").await;
        backend(base, None).complete_task("t9").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/tasks/t9 "), "{request}");
        assert!(request.ends_with(r#"{"completed":true}"#), "{request}");
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn signin_failures_are_generic() {
        let (base, server) =
            serve_once("401 Unauthorized", r#"{"message":"User not found"}"#).await;
        let err = backend(base, None)
            .signin(&Credentials {
                username: "ghost".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "invalid username or password");
        assert!(server.await.unwrap().starts_with("POST /auth/signin "));
    }

    #[tokio::test]
    async fn signin_returns_the_issued_token() {
        let (base, _server) = serve_once("200 OK", r#"{"token":"a.b.c"}"#).await;
        let token = backend(base, None)
            .signin(&Credentials {
                username: "alice".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(token, "a.b.c");
    }

    #[tokio::test]
    async fn signup_rejection_carries_server_message() {
        let signup = Signup {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "pw".to_string(),
        };

        let (base, _server) =
            serve_once("400 Bad Request", r#"{"message":"Username already exists"}"#).await;
        let err = backend(base, None).signup(&signup).await.unwrap_err();
        assert_eq!(err.to_string(), "Username already exists");

        let (base, _server) = serve_once("500 Internal Server Error", "oops").await;
        let err = backend(base, None).signup(&signup).await.unwrap_err();
        assert_eq!(err.to_string(), "signup failed");
    }
}
