//! Pose-analysis backend client.
//!
//! The backend does all of the pose estimation and rep counting. This side
//! only probes it, asks it to zero a counter, and reads its latest snapshot.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, FetchError};
use crate::session::state::ExerciseKind;

/// Body of `GET /status`. Parsed leniently; only the 2xx matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub exercises: Vec<String>,
    #[serde(default)]
    pub current_exercise: Option<String>,
}

/// The remote collaborator a session controller talks to.
#[async_trait]
pub trait PoseBackend: Send + Sync {
    /// Reachability probe.
    async fn status(&self) -> Result<ServerStatus, FetchError>;

    /// Zero the server-side rep counter for `kind`.
    async fn reset_count(&self, kind: ExerciseKind) -> Result<(), FetchError>;

    /// Latest pose-analysis snapshot, unvalidated.
    async fn exercise_data(&self) -> Result<Value, FetchError>;

    /// Display-only processed video stream.
    fn video_feed_url(&self, kind: ExerciseKind) -> String;
}

/// `PoseBackend` over plain HTTP.
pub struct HttpPoseBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPoseBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, FetchError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                endpoint: path.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl PoseBackend for HttpPoseBackend {
    async fn status(&self) -> Result<ServerStatus, FetchError> {
        let resp = self.get("/status", &[]).await?;
        Ok(resp.json::<ServerStatus>().await.unwrap_or_default())
    }

    async fn reset_count(&self, kind: ExerciseKind) -> Result<(), FetchError> {
        self.get("/reset_count", &[("exercise", kind.as_str())])
            .await
            .map(|_| ())
    }

    async fn exercise_data(&self) -> Result<Value, FetchError> {
        let resp = self.get("/exercise_data", &[]).await?;
        resp.json::<Value>().await.map_err(|e| FetchError::Decode {
            endpoint: "/exercise_data".to_string(),
            reason: e.to_string(),
        })
    }

    fn video_feed_url(&self, kind: ExerciseKind) -> String {
        format!("{}/video_feed?exercise={}", self.base_url, kind.as_str())
    }
}
