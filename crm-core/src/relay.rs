use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::class::{ApiErrorClass, classify_api_status, classify_request_error, mentions_quota};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("relay returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("relay rejected upload: {0}")]
    Rejected(String),
}

impl RelayError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            RelayError::Request(err) => classify_request_error(err),
            RelayError::Api { status, body } => classify_api_status(*status, body),
            RelayError::Rejected(message) if mentions_quota(message) => ApiErrorClass::Quota,
            RelayError::Rejected(_) => ApiErrorClass::Transient,
            RelayError::Url(_) => ApiErrorClass::Permanent,
        }
    }
}

/// One image destined for the relay. `base64_data` is passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFile {
    pub client_name: String,
    pub filename: String,
    pub content_type: String,
    pub base64_data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    parent_folder_id: &'a str,
    client_name: &'a str,
    filename: &'a str,
    content_type: &'a str,
    base64_data: &'a str,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub status: String,
    #[serde(default)]
    pub folder_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct RelayClient {
    http: Client,
    endpoint: Url,
    parent_folder_id: String,
}

impl RelayClient {
    pub fn new(endpoint: &str, parent_folder_id: impl Into<String>) -> Result<Self, RelayError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            parent_folder_id: parent_folder_id.into(),
        })
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub async fn upload(&self, file: &RelayFile) -> Result<RelayResponse, RelayError> {
        let body = RelayRequest {
            parent_folder_id: &self.parent_folder_id,
            client_name: &file.client_name,
            filename: &file.filename,
            content_type: &file.content_type,
            base64_data: &file.base64_data,
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }
        let payload: RelayResponse = response.json().await?;
        if payload.status != "success" {
            return Err(RelayError::Rejected(
                payload
                    .message
                    .unwrap_or_else(|| format!("status {}", payload.status)),
            ));
        }
        Ok(payload)
    }
}
