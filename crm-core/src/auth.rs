use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("credentials are not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("credentials are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to sign assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Decodes a base64 service-account JSON document. Missing `=` padding
    /// is tolerated since the value usually travels through env files.
    pub fn from_base64(encoded: &str) -> Result<Self, AuthError> {
        let mut encoded = encoded.trim().to_string();
        let missing = encoded.len() % 4;
        if missing != 0 {
            encoded.push_str(&"=".repeat(4 - missing));
        }
        let raw = STANDARD.decode(encoded.as_bytes())?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

pub struct ServiceAccountAuth {
    http: Client,
    key: ServiceAccountKey,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
    refresh_skew_secs: i64,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, scopes: &[&str]) -> Self {
        Self {
            http: Client::new(),
            key,
            scope: scopes.join(" "),
            cached: Mutex::new(None),
            refresh_skew_secs: 60,
        }
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > now_unix().saturating_add(self.refresh_skew_secs)
        {
            return Ok(token.access_token.clone());
        }
        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<CachedToken, AuthError> {
        let issued_at = now_unix();
        let assertion = self.signed_assertion(issued_at)?;
        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)];
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api { status, body });
        }
        let token: TokenResponse = response.json().await?;
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: issued_at.saturating_add(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS)),
        })
    }

    fn signed_assertion(&self, issued_at: i64) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &key,
        )?)
    }
}

/// Where a client gets its bearer token from.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    ServiceAccount(Arc<ServiceAccountAuth>),
}

impl TokenSource {
    pub async fn bearer(&self) -> Result<String, AuthError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount(auth) => auth.access_token().await,
        }
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_base64_repairs_missing_padding() {
        let json = r#"{"client_email":"svc@example.iam","private_key":"k"}"#;
        let encoded = STANDARD.encode(json);
        let trimmed = encoded.trim_end_matches('=');
        let key = ServiceAccountKey::from_base64(trimmed).unwrap();
        assert_eq!(key.client_email, "svc@example.iam");
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(matches!(
            ServiceAccountKey::from_base64("###"),
            Err(AuthError::Base64(_))
        ));
    }

    #[tokio::test]
    async fn static_source_returns_token_verbatim() {
        let source = TokenSource::Static("abc".into());
        assert_eq!(source.bearer().await.unwrap(), "abc");
    }
}
