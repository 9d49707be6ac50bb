use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crm_core::{
    DRIVE_SCOPE, DriveClient, RelayClient, SHEETS_SCOPE, ServiceAccountAuth, ServiceAccountKey,
    SheetsClient, TokenSource,
};

use crate::journal::Journal;
use crate::service::CrmService;
use crate::store::LocalStore;
use crate::sync::backoff::Backoff;
use crate::sync::fields::FieldMap;
use crate::sync::sheets_adapter::SheetsAdapter;
use crate::sync::worker::{SyncWorker, WorkerSettings};

const APP_DIR_NAME: &str = "crmd";
const DB_FILE_NAME: &str = "crm.sqlite3";
const JOURNAL_FILE_NAME: &str = "journal.log";
const DEFAULT_WORKSHEET: &str = "Seguimientos";
const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";
const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com";
const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u64 = 25;
const DEFAULT_QUOTA_RETRIES: u64 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Static(String),
    /// Base64 of the service-account JSON key.
    ServiceAccount(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfig {
    pub spreadsheet_id: String,
    pub worksheet: String,
    pub sheets_base_url: String,
    pub drive_base_url: String,
    pub relay_url: Option<String>,
    pub parent_folder_id: String,
    pub credentials: Option<Credentials>,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub journal_path: PathBuf,
    pub poll_interval: Duration,
    pub remote_timeout: Duration,
    pub max_attempts: u32,
    pub quota_retries: u32,
    /// `None` when no spreadsheet is configured; only `run` needs it.
    pub remote: Option<RemoteConfig>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Ok(Self::from_lookup(|name| std::env::var(name).ok(), &home))
    }

    pub fn from_lookup<F>(lookup: F, home: &Path) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let db_path = var("CRM_DB_PATH")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(default_db_path);
        let journal_path = var("CRM_JOURNAL_PATH")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| sibling_path(&db_path, JOURNAL_FILE_NAME));
        let poll_interval = Duration::from_secs(read_u64_var(
            &lookup,
            "CRM_POLL_SECS",
            DEFAULT_POLL_SECS,
        ));
        let remote_timeout = Duration::from_secs(read_u64_var(
            &lookup,
            "CRM_REMOTE_TIMEOUT_SECS",
            DEFAULT_REMOTE_TIMEOUT_SECS,
        ));
        let max_attempts = clamp_u32(read_u64_var(&lookup, "CRM_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS));
        let quota_retries = clamp_u32(read_u64_var(
            &lookup,
            "CRM_QUOTA_MAX_RETRIES",
            DEFAULT_QUOTA_RETRIES,
        ));

        let remote = var("CRM_SPREADSHEET_ID").map(|spreadsheet_id| {
            let credentials = var("CRM_ACCESS_TOKEN")
                .map(Credentials::Static)
                .or_else(|| var("GOOGLE_CREDS_BASE64").map(Credentials::ServiceAccount));
            RemoteConfig {
                spreadsheet_id,
                worksheet: var("CRM_WORKSHEET").unwrap_or_else(|| DEFAULT_WORKSHEET.to_string()),
                sheets_base_url: var("CRM_SHEETS_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.to_string()),
                drive_base_url: var("CRM_DRIVE_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_DRIVE_BASE_URL.to_string()),
                relay_url: var("CRM_RELAY_URL"),
                parent_folder_id: var("CRM_PARENT_FOLDER_ID").unwrap_or_default(),
                credentials,
            }
        });

        Self {
            db_path,
            journal_path,
            poll_interval,
            remote_timeout,
            max_attempts,
            quota_retries,
            remote,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_attempts: self.max_attempts,
            quota_retries: self.quota_retries,
            quota_backoff: Backoff::quota(),
        }
    }
}

/// Opens the local store and builds the request-facing service. Needs no
/// remote configuration.
pub async fn open_service(config: &DaemonConfig) -> anyhow::Result<CrmService> {
    let store = LocalStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open local store at {:?}", config.db_path))?;
    let fields = Arc::new(FieldMap::standard().context("invalid field mapping")?);
    Ok(CrmService::new(
        store,
        fields,
        Journal::new(config.journal_path.clone()),
    ))
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    service: CrmService,
    worker: Arc<SyncWorker<SheetsAdapter>>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let remote = config
            .remote
            .as_ref()
            .context("CRM_SPREADSHEET_ID is not set")?;
        let service = open_service(&config).await?;
        let fields = Arc::new(FieldMap::standard().context("invalid field mapping")?);

        let http = reqwest::Client::builder()
            .timeout(config.remote_timeout)
            .build()
            .context("failed to build HTTP client")?;
        let tokens = token_source(remote, &http)?;
        let sheets = SheetsClient::with_base_url(
            &remote.sheets_base_url,
            remote.spreadsheet_id.clone(),
            tokens.clone(),
        )
        .context("invalid spreadsheet API base url")?
        .with_http(http.clone());
        let drive = DriveClient::with_base_url(&remote.drive_base_url, tokens)
            .context("invalid Drive API base url")?
            .with_http(http.clone());

        let mut adapter = SheetsAdapter::new(sheets, fields, remote.worksheet.clone()).with_drive(drive);
        match &remote.relay_url {
            Some(url) => {
                let relay = RelayClient::new(url, remote.parent_folder_id.clone())
                    .context("invalid CRM_RELAY_URL")?
                    .with_http(http);
                adapter = adapter.with_relay(relay);
            }
            None => tracing::warn!("CRM_RELAY_URL is not set; mutations with images will fail to sync"),
        }

        let journal = Journal::new(config.journal_path.clone());
        let worker = SyncWorker::new(service.store().clone(), adapter, journal)
            .with_settings(config.worker_settings());

        Ok(Self {
            config,
            service,
            worker: Arc::new(worker),
        })
    }

    pub fn service(&self) -> &CrmService {
        &self.service
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let requeued = self
            .service
            .store()
            .reset_stale_processing()
            .await
            .context("failed to requeue interrupted entries")?;
        if requeued > 0 {
            tracing::warn!(requeued, "requeued entries interrupted mid-sync");
        }
        tracing::info!(
            db = %self.config.db_path.display(),
            journal = %self.config.journal_path.display(),
            poll_secs = self.config.poll_interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "crmd started"
        );

        let worker = Arc::clone(&self.worker);
        let poll_interval = self.config.poll_interval;
        let worker_handle = tokio::spawn(async move {
            worker.run(poll_interval).await;
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        tracing::info!("shutdown requested");
        worker_handle.abort();

        Ok(())
    }
}

fn token_source(remote: &RemoteConfig, http: &reqwest::Client) -> anyhow::Result<TokenSource> {
    match &remote.credentials {
        Some(Credentials::Static(token)) => Ok(TokenSource::Static(token.clone())),
        Some(Credentials::ServiceAccount(encoded)) => {
            let key = ServiceAccountKey::from_base64(encoded)
                .context("GOOGLE_CREDS_BASE64 is not a valid service-account key")?;
            let auth = ServiceAccountAuth::new(key, &[SHEETS_SCOPE, DRIVE_SCOPE]).with_http(http.clone());
            tracing::info!(client_email = auth.client_email(), "using service-account credentials");
            Ok(TokenSource::ServiceAccount(Arc::new(auth)))
        }
        None => anyhow::bail!("neither CRM_ACCESS_TOKEN nor GOOGLE_CREDS_BASE64 is set"),
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
