use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::auth::{AuthError, TokenSource};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("base url cannot carry path segments")]
    BaseUrl,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    tokens: TokenSource,
}

impl DriveClient {
    pub fn new(tokens: TokenSource) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, tokens)
    }

    pub fn with_base_url(base_url: &str, tokens: TokenSource) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            tokens,
        })
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Returns `false` when the file was already gone.
    pub async fn delete_file(&self, file_id: &str) -> Result<bool, DriveError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DriveError::BaseUrl)?
            .pop_if_empty()
            .extend(["drive", "v3", "files", file_id]);
        url.query_pairs_mut().append_pair("supportsAllDrives", "true");
        let token = self.tokens.bearer().await?;
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DriveError::Api { status, body })
            }
        }
    }
}

/// Extracts the folder id from a Drive sharing URL such as
/// `https://drive.google.com/drive/folders/<id>?usp=sharing` or `...open?id=<id>`.
pub fn folder_id_from_url(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let Ok(url) = Url::parse(value) else {
        let bare = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        return (bare && value.len() >= 10).then(|| value.to_string());
    };
    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id") {
        return Some(id.into_owned());
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(2)
        .find(|pair| matches!(pair[0], "folders" | "d"))
        .map(|pair| pair[1].to_string())
        .filter(|id| !id.is_empty())
}
