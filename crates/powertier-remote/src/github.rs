//! GitHub contents API backed remote store

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::{RemoteError, RemoteObject, RemoteResult, RemoteStore};

/// Connection settings for [`GitHubContentsStore`]
#[derive(Clone)]
pub struct GitHubSettings {
    pub api_base: String,
    /// `owner/name`
    pub repo: String,
    pub branch: String,
    pub token: String,
    pub timeout: Duration,
}

/// Stores objects as files in a GitHub repository branch
pub struct GitHubContentsStore {
    client: Client,
    settings: GitHubSettings,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

impl GitHubContentsStore {
    pub fn new(settings: GitHubSettings) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .user_agent(concat!("powertierd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        contents_url(&self.settings.api_base, &self.settings.repo, path)
    }
}

#[async_trait]
impl RemoteStore for GitHubContentsStore {
    async fn get(&self, path: &str) -> RemoteResult<Option<RemoteObject>> {
        let url = format!("{}?ref={}", self.url(path), self.settings.branch);
        debug!(url = %url, "GET remote object");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(path, status.as_u16(), body, false));
        }

        let body: ContentsResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        if body.encoding != "base64" {
            return Err(RemoteError::Decode(format!(
                "{} returned unsupported encoding '{}'",
                path, body.encoding
            )));
        }

        Ok(Some(RemoteObject {
            content: decode_content(&body.content)?,
            sha: body.sha,
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> RemoteResult<String> {
        let url = self.url(path);
        debug!(url = %url, conditioned = sha.is_some(), "PUT remote object");

        let request = PutRequest {
            message,
            content: STANDARD.encode(content),
            branch: &self.settings.branch,
            sha,
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.settings.token)
            .header("Accept", "application/vnd.github+json")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(path, status.as_u16(), body, sha.is_some()));
        }

        let body: PutResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(body.content.sha)
    }

    fn describe(&self) -> String {
        format!("github:{}@{}", self.settings.repo, self.settings.branch)
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Transport(format!("timed out: {}", e))
    } else {
        RemoteError::Transport(e.to_string())
    }
}

/// `{api_base}/repos/{repo}/contents/{path}`
pub fn contents_url(api_base: &str, repo: &str, path: &str) -> String {
    format!(
        "{}/repos/{}/contents/{}",
        api_base.trim_end_matches('/'),
        repo,
        path.trim_start_matches('/')
    )
}

/// Decode the contents API's line-wrapped base64
pub fn decode_content(encoded: &str) -> RemoteResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Map a non-success status to an error.
///
/// 409 is a SHA mismatch and 422 a create over an existing object. A 404 on a
/// conditioned write means the object was deleted remotely.
pub fn classify_status(path: &str, code: u16, body: String, conditioned: bool) -> RemoteError {
    match code {
        409 | 422 => RemoteError::Conflict {
            path: path.to_string(),
            message: body,
        },
        404 if conditioned => RemoteError::Missing {
            path: path.to_string(),
        },
        _ => RemoteError::Status { code, body },
    }
}
