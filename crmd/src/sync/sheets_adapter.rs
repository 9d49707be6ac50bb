use std::sync::Arc;

use async_trait::async_trait;
use crm_core::{
    CellUpdate, DriveClient, RelayClient, RelayError, RelayFile, SheetsClient, SheetsError,
    folder_id_from_url,
};

use super::adapter::{FailureCode, RemoteAdapter, SyncFailure, SyncReceipt};
use super::columns::{column_index, plan_columns};
use super::fields::{FieldKey, FieldMap, format_timestamp, freshness_label};
use super::mutation::{ColumnValue, ImageUpload, QueuedMutation};
use super::normalize::{normalize_channel, normalize_header};
use crate::store::{Prospect, ValidationFlag};

impl From<SheetsError> for SyncFailure {
    fn from(err: SheetsError) -> Self {
        SyncFailure::new(err.classification().into(), err.to_string())
    }
}

impl From<RelayError> for SyncFailure {
    fn from(err: RelayError) -> Self {
        SyncFailure::new(err.classification().into(), err.to_string())
    }
}

/// Mirrors queued mutations into one worksheet, uploading attached images
/// through the file relay first.
pub struct SheetsAdapter {
    sheets: SheetsClient,
    relay: Option<RelayClient>,
    drive: Option<DriveClient>,
    fields: Arc<FieldMap>,
    worksheet: String,
}

impl SheetsAdapter {
    pub fn new(sheets: SheetsClient, fields: Arc<FieldMap>, worksheet: impl Into<String>) -> Self {
        Self {
            sheets,
            relay: None,
            drive: None,
            fields,
            worksheet: worksheet.into(),
        }
    }

    pub fn with_relay(mut self, relay: RelayClient) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_drive(mut self, drive: DriveClient) -> Self {
        self.drive = Some(drive);
        self
    }

    async fn snapshot(&self) -> Result<Snapshot, SyncFailure> {
        let mut rows = self.sheets.read_all(&self.worksheet).await?;
        let headers = if rows.is_empty() {
            Vec::new()
        } else {
            rows.remove(0)
        };
        Ok(Snapshot { headers, rows })
    }

    /// Appends any missing titles to the header row and returns the result.
    async fn provision(
        &self,
        headers: &[String],
        required: &[String],
    ) -> Result<Vec<String>, SyncFailure> {
        let plan = plan_columns(headers, required);
        if !plan.is_unchanged() {
            tracing::info!(worksheet = %self.worksheet, added = ?plan.added, "adding remote columns");
            self.sheets
                .write_header_row(&self.worksheet, &plan.headers)
                .await?;
        }
        Ok(plan.headers)
    }

    /// Uploads every image in order. The first folder reference wins.
    async fn upload_images(
        &self,
        client_name: &str,
        images: &[ImageUpload],
    ) -> Result<Option<String>, SyncFailure> {
        if images.is_empty() {
            return Ok(None);
        }
        let Some(relay) = &self.relay else {
            return Err(SyncFailure::new(
                FailureCode::Permanent,
                "mutation carries images but no file relay is configured",
            ));
        };
        let mut folder_url = None;
        for image in images {
            let response = relay
                .upload(&RelayFile {
                    client_name: client_name.to_string(),
                    filename: image.filename.clone(),
                    content_type: image.content_type.clone(),
                    base64_data: image.base64_data.clone(),
                })
                .await?;
            tracing::debug!(filename = %image.filename, "image uploaded");
            if folder_url.is_none() {
                folder_url = response.folder_url.filter(|url| !url.is_empty());
            }
        }
        Ok(folder_url)
    }

    async fn add(
        &self,
        sync_id: &str,
        record: &Prospect,
        images: &[ImageUpload],
        snapshot: Snapshot,
    ) -> Result<SyncReceipt, SyncFailure> {
        let required: Vec<String> = self
            .fields
            .columns_for(record)
            .into_iter()
            .map(|key| self.fields.display_name(key))
            .collect();
        let headers = self.provision(&snapshot.headers, &required).await?;

        let images_url = self.upload_images(&record.name, images).await?;
        let mut record = record.clone();
        if images_url.is_some() {
            record.images_url = images_url.clone();
        }

        let values = self.fields.to_display_map(&record, sync_id);
        let row: Vec<String> = headers
            .iter()
            .map(|header| {
                let key = normalize_header(header);
                values
                    .iter()
                    .find(|(display, _)| normalize_header(display) == key)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();
        let range = self.sheets.append_row(&self.worksheet, &row).await?;

        Ok(SyncReceipt {
            remote_ref: range,
            images_url,
        })
    }

    async fn update(
        &self,
        sync_id: &str,
        record: &Prospect,
        lookup_name: &str,
        changes: &[ColumnValue],
        images: &[ImageUpload],
        snapshot: Snapshot,
    ) -> Result<SyncReceipt, SyncFailure> {
        let row = snapshot
            .locate(
                &self.fields,
                &record.record_id,
                Some(&record.channel),
                Some(lookup_name),
            )?
            .ok_or_else(|| {
                SyncFailure::new(
                    FailureCode::NotFound,
                    format!("no remote row for {} ({lookup_name})", record.record_id),
                )
            })?;

        let images_url = self.upload_images(&record.name, images).await?;

        let mut cells: Vec<ColumnValue> = changes.to_vec();
        let mut system = vec![
            (FieldKey::Freshness, freshness_label(record.freshness).to_string()),
            (FieldKey::SyncId, sync_id.to_string()),
            (FieldKey::UpdatedAt, format_timestamp(record.updated_at)),
            (FieldKey::Validation, ValidationFlag::Ok.as_str().to_string()),
        ];
        if let Some(url) = &images_url {
            system.push((FieldKey::Images, url.clone()));
        }
        for (key, value) in system {
            cells.push(ColumnValue {
                column: self.fields.display_name(key),
                value,
            });
        }

        let required: Vec<String> = cells.iter().map(|cell| cell.column.clone()).collect();
        let headers = self.provision(&snapshot.headers, &required).await?;
        let updates = cell_updates(&headers, row, &cells);
        self.sheets.batch_update(&self.worksheet, &updates).await?;

        Ok(SyncReceipt {
            remote_ref: Some(format!("row {row}")),
            images_url,
        })
    }

    async fn rename(
        &self,
        sync_id: &str,
        channel: &str,
        old_name: &str,
        new_name: &str,
        updated_at: i64,
        snapshot: Snapshot,
    ) -> Result<SyncReceipt, SyncFailure> {
        // The record identifier is the channel's digits.
        let row = snapshot
            .locate(&self.fields, channel, Some(channel), Some(old_name))?
            .ok_or_else(|| {
                SyncFailure::new(
                    FailureCode::NotFound,
                    format!("no remote row for channel {channel}"),
                )
            })?;

        let cells: Vec<ColumnValue> = [
            (FieldKey::Name, new_name.to_string()),
            (FieldKey::SyncId, sync_id.to_string()),
            (FieldKey::UpdatedAt, format_timestamp(updated_at)),
        ]
        .into_iter()
        .map(|(key, value)| ColumnValue {
            column: self.fields.display_name(key),
            value,
        })
        .collect();
        let required: Vec<String> = cells.iter().map(|cell| cell.column.clone()).collect();
        let headers = self.provision(&snapshot.headers, &required).await?;
        self.sheets
            .batch_update(&self.worksheet, &cell_updates(&headers, row, &cells))
            .await?;

        Ok(SyncReceipt {
            remote_ref: Some(format!("row {row}")),
            images_url: None,
        })
    }

    async fn delete(
        &self,
        record_id: &str,
        channel: &str,
        name: &str,
        images_url: Option<&str>,
        snapshot: Snapshot,
    ) -> Result<SyncReceipt, SyncFailure> {
        let row = if snapshot.rows.is_empty() {
            None
        } else {
            snapshot.locate(&self.fields, record_id, Some(channel), Some(name))?
        };
        let remote_ref = match row {
            Some(row) => {
                self.sheets.delete_row(&self.worksheet, row).await?;
                format!("deleted row {row}")
            }
            None => "row already absent".to_string(),
        };

        if let (Some(drive), Some(folder_id)) =
            (&self.drive, images_url.and_then(folder_id_from_url))
        {
            match drive.delete_file(&folder_id).await {
                Ok(true) => tracing::info!(folder_id = %folder_id, "image folder deleted"),
                Ok(false) => tracing::debug!(folder_id = %folder_id, "image folder already gone"),
                Err(err) => {
                    tracing::warn!(folder_id = %folder_id, error = %err, "image folder delete failed")
                }
            }
        }

        Ok(SyncReceipt {
            remote_ref: Some(remote_ref),
            images_url: None,
        })
    }
}

#[async_trait]
impl RemoteAdapter for SheetsAdapter {
    async fn apply(
        &self,
        sync_id: &str,
        mutation: &QueuedMutation,
    ) -> Result<SyncReceipt, SyncFailure> {
        let snapshot = self.snapshot().await?;

        // A previous attempt may have landed remotely without being recorded
        // locally. Deletes are naturally idempotent and skip this.
        if !matches!(mutation, QueuedMutation::Delete { .. })
            && let Some(row) = snapshot.row_with_sync_id(&self.fields, sync_id)
        {
            tracing::info!(sync_id, row, "mutation already present remotely");
            return Ok(SyncReceipt {
                remote_ref: Some(format!("row {row}")),
                images_url: snapshot
                    .cell(&self.fields.display_name(FieldKey::Images), row)
                    .filter(|url| !url.is_empty()),
            });
        }

        match mutation {
            QueuedMutation::Add { record, images } => {
                self.add(sync_id, record, images, snapshot).await
            }
            QueuedMutation::Update {
                record,
                lookup_name,
                changes,
                images,
            } => {
                self.update(sync_id, record, lookup_name, changes, images, snapshot)
                    .await
            }
            QueuedMutation::Rename {
                channel,
                old_name,
                new_name,
                updated_at,
                ..
            } => {
                self.rename(sync_id, channel, old_name, new_name, *updated_at, snapshot)
                    .await
            }
            QueuedMutation::Delete {
                record_id,
                channel,
                name,
                images_url,
            } => {
                self.delete(record_id, channel, name, images_url.as_deref(), snapshot)
                    .await
            }
        }
    }
}

/// The worksheet as read at the start of an attempt. `rows` excludes the
/// header, so `rows[i]` is sheet row `i + 2`.
struct Snapshot {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Snapshot {
    fn cell(&self, column: &str, sheet_row: usize) -> Option<String> {
        let column = column_index(&self.headers, column)?;
        self.rows
            .get(sheet_row.checked_sub(2)?)?
            .get(column)
            .map(|value| value.trim().to_string())
    }

    fn find(&self, column: usize, matches: impl Fn(&str) -> bool) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(column).is_some_and(|cell| matches(cell)))
            .map(|index| index + 2)
    }

    fn row_with_sync_id(&self, fields: &FieldMap, sync_id: &str) -> Option<usize> {
        let column = column_index(&self.headers, &fields.display_name(FieldKey::SyncId))?;
        self.find(column, |cell| cell.trim() == sync_id)
    }

    /// Identifier column first, then channel digits, then normalized name.
    fn locate(
        &self,
        fields: &FieldMap,
        record_id: &str,
        channel: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<usize>, SyncFailure> {
        let id_column = column_index(&self.headers, &fields.display_name(FieldKey::RecordId));
        let channel_column = column_index(&self.headers, &fields.display_name(FieldKey::Channel));
        let name_column = column_index(&self.headers, &fields.display_name(FieldKey::Name));
        if id_column.is_none() && channel_column.is_none() && name_column.is_none() {
            return Err(SyncFailure::new(
                FailureCode::Schema,
                "worksheet has no identifier, channel or name column",
            ));
        }

        if let Some(column) = id_column
            && let Some(row) = self.find(column, |cell| cell.trim() == record_id)
        {
            return Ok(Some(row));
        }
        if let (Some(column), Some(channel)) = (channel_column, channel.and_then(normalize_channel))
            && let Some(row) = self.find(column, |cell| {
                normalize_channel(cell).as_deref() == Some(channel.as_str())
            })
        {
            return Ok(Some(row));
        }
        // Names are not unique, so they only identify rows on sheets that
        // carry neither an id nor a channel column.
        if id_column.is_none()
            && channel_column.is_none()
            && let (Some(column), Some(name)) = (name_column, name.map(normalize_header))
            && !name.is_empty()
        {
            return Ok(self.find(column, |cell| normalize_header(cell) == name));
        }
        Ok(None)
    }
}

fn cell_updates(headers: &[String], row: usize, cells: &[ColumnValue]) -> Vec<CellUpdate> {
    cells
        .iter()
        .filter_map(|cell| {
            column_index(headers, &cell.column).map(|index| CellUpdate {
                row,
                column: index + 1,
                value: cell.value.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "sheets_adapter_tests.rs"]
mod tests;
