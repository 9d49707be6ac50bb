use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::store::MutationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEvent {
    Received,
    Enqueued,
    Duplicate,
    Success,
    Error,
    Dead,
}

impl fmt::Display for JournalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JournalEvent::Received => "RECEIVED",
            JournalEvent::Enqueued => "ENQUEUED",
            JournalEvent::Duplicate => "DUPLICATE",
            JournalEvent::Success => "SUCCESS",
            JournalEvent::Error => "ERROR",
            JournalEvent::Dead => "DEAD",
        })
    }
}

/// Append-only audit trail, one line per transition.
///
/// Never read back by the sync machinery; only the administrative tail view
/// looks at it. Write failures are logged and swallowed.
#[derive(Clone)]
pub struct Journal {
    path: Option<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// A journal that drops every line.
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn record(&self, event: JournalEvent, sync_id: &str, kind: MutationKind, detail: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let line = format_line(OffsetDateTime::now_utc(), event, sync_id, kind, detail);
        let _guard = self.lock.lock().await;
        if let Err(err) = append_line(path, &line).await {
            tracing::warn!(path = %path.display(), error = %err, "journal write failed");
        }
    }

    /// Last `limit` lines, oldest first. A missing file reads as empty.
    pub async fn tail(&self, limit: usize) -> std::io::Result<Vec<String>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let lines: Vec<&str> = contents.lines().filter(|line| !line.is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        Ok(lines[start..].iter().map(|line| line.to_string()).collect())
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

fn format_line(
    at: OffsetDateTime,
    event: JournalEvent,
    sync_id: &str,
    kind: MutationKind,
    detail: &str,
) -> String {
    let stamp = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    let detail = detail.replace(['\r', '\n'], " ");
    format!(
        "{stamp} {event} sync_id={sync_id} kind={} {detail}",
        kind.as_str()
    )
    .trim_end()
    .to_string()
}
