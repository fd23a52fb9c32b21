//! Shared JSON-over-HTTP plumbing for the diet and nutrition services.
//!
//! Both services answer with an envelope carrying `success` and, on failure,
//! an `error` string. This maps that envelope and the HTTP status onto
//! `ApiError` so the clients only deal with their payload types.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, ConfigError};

pub(crate) struct ApiClient {
    service: &'static str,
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub(crate) fn new(
        service: &'static str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self::with_client(service, base_url, client))
    }

    pub(crate) fn with_client(
        service: &'static str,
        base_url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            service,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.read(resp).await
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.read(resp).await
    }

    fn transport(&self, e: reqwest::Error) -> ApiError {
        ApiError::Transport {
            service: self.service.to_string(),
            reason: e.to_string(),
        }
    }

    async fn read<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| self.transport(e))?;
        let body: Option<Value> = serde_json::from_slice(&bytes).ok();
        let error_text = body
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match status {
            StatusCode::NOT_FOUND => {
                return Err(ApiError::NotFound(
                    error_text.unwrap_or_else(|| "resource not found".to_string()),
                ));
            }
            StatusCode::BAD_REQUEST => {
                return Err(ApiError::Validation(
                    error_text.unwrap_or_else(|| "bad request".to_string()),
                ));
            }
            s if !s.is_success() => {
                return Err(ApiError::Server {
                    service: self.service.to_string(),
                    message: error_text.unwrap_or_else(|| format!("HTTP {}", s.as_u16())),
                });
            }
            _ => {}
        }

        let Some(body) = body else {
            return Err(ApiError::Decode {
                service: self.service.to_string(),
                reason: "response is not JSON".to_string(),
            });
        };

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ApiError::Server {
                service: self.service.to_string(),
                message: error_text.unwrap_or_else(|| "request failed".to_string()),
            });
        }

        serde_json::from_value(body).map_err(|e| ApiError::Decode {
            service: self.service.to_string(),
            reason: e.to_string(),
        })
    }
}
