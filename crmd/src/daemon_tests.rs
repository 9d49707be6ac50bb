use std::collections::HashMap;

use tempfile::tempdir;

use super::*;

fn config_from(vars: &[(&str, &str)]) -> DaemonConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    DaemonConfig::from_lookup(|name| vars.get(name).cloned(), Path::new("/tmp/home-user"))
}

#[test]
fn expands_tilde_to_home() {
    let home = PathBuf::from("/tmp/home-user");
    assert_eq!(
        expand_with_home("~/crm/data.sqlite3", &home),
        PathBuf::from("/tmp/home-user/crm/data.sqlite3")
    );
    assert_eq!(expand_with_home("~", &home), home);
    assert_eq!(expand_with_home("/var/crm.db", &home), PathBuf::from("/var/crm.db"));
}

#[test]
fn defaults_without_environment() {
    let config = config_from(&[]);
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.remote_timeout, Duration::from_secs(30));
    assert_eq!(config.max_attempts, 25);
    assert_eq!(config.quota_retries, 5);
    assert!(config.db_path.ends_with("crmd/crm.sqlite3"));
    assert_eq!(
        config.journal_path.parent(),
        config.db_path.parent(),
        "journal defaults to the database directory"
    );
    assert!(config.remote.is_none());
}

#[test]
fn reads_overrides_and_ignores_garbage_numbers() {
    let config = config_from(&[
        ("CRM_DB_PATH", "~/crm/store.db"),
        ("CRM_POLL_SECS", "2"),
        ("CRM_MAX_ATTEMPTS", "zero"),
        ("CRM_QUOTA_MAX_RETRIES", "0"),
    ]);
    assert_eq!(config.db_path, PathBuf::from("/tmp/home-user/crm/store.db"));
    assert_eq!(config.journal_path, PathBuf::from("/tmp/home-user/crm/journal.log"));
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.max_attempts, 25);
    assert_eq!(config.quota_retries, 5);
}

#[test]
fn remote_section_requires_spreadsheet_id() {
    let config = config_from(&[
        ("CRM_SPREADSHEET_ID", "sheet-1"),
        ("CRM_ACCESS_TOKEN", "token"),
        ("GOOGLE_CREDS_BASE64", "ignored"),
        ("CRM_RELAY_URL", "https://relay.example/exec"),
    ]);
    let remote = config.remote.unwrap();
    assert_eq!(remote.spreadsheet_id, "sheet-1");
    assert_eq!(remote.worksheet, "Seguimientos");
    assert_eq!(remote.sheets_base_url, "https://sheets.googleapis.com");
    assert_eq!(remote.credentials, Some(Credentials::Static("token".into())));
    assert_eq!(remote.relay_url.as_deref(), Some("https://relay.example/exec"));
    assert_eq!(remote.parent_folder_id, "");
}

#[tokio::test]
async fn bootstrap_fails_without_spreadsheet() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("crm.sqlite3");
    let config = config_from(&[("CRM_DB_PATH", db.to_str().unwrap())]);
    let err = DaemonRuntime::bootstrap(config).await.err().unwrap();
    assert!(err.to_string().contains("CRM_SPREADSHEET_ID"));
}

#[tokio::test]
async fn bootstrap_fails_without_credentials() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("crm.sqlite3");
    let config = config_from(&[
        ("CRM_DB_PATH", db.to_str().unwrap()),
        ("CRM_SPREADSHEET_ID", "sheet-1"),
    ]);
    let err = DaemonRuntime::bootstrap(config).await.err().unwrap();
    assert!(err.to_string().contains("CRM_ACCESS_TOKEN"));
}

#[tokio::test]
async fn open_service_creates_store_on_disk() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("nested").join("crm.sqlite3");
    let config = config_from(&[("CRM_DB_PATH", db.to_str().unwrap())]);
    let service = open_service(&config).await.unwrap();
    assert!(service.all_clients().await.unwrap().is_empty());
    assert!(db.exists());
}
