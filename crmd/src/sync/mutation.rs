use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{MutationKind, Prospect};

/// A mutation as submitted by the request layer.
///
/// Field names follow the canonical spelling; the column titles used by the
/// agents' forms are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct MutationEnvelope {
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(flatten)]
    pub mutation: MutationRequest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum MutationRequest {
    Add(AddRequest),
    Update(UpdateRequest),
    Rename(RenameRequest),
    Delete(DeleteRequest),
}

impl MutationRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationRequest::Add(_) => MutationKind::Add,
            MutationRequest::Update(_) => MutationKind::Update,
            MutationRequest::Rename(_) => MutationKind::Rename,
            MutationRequest::Delete(_) => MutationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddRequest {
    #[serde(default, alias = "Nombre")]
    pub name: Option<String>,
    #[serde(default, alias = "Canal", alias = "Canal (Tel/WhatsApp)")]
    pub channel: Option<String>,
    #[serde(default, alias = "Fecha 1er Contacto")]
    pub first_contact: Option<String>,
    #[serde(default, alias = "Nivel de Interés")]
    pub interest: Option<String>,
    #[serde(default, alias = "Resumen Conversación")]
    pub summary: Option<String>,
    #[serde(default, alias = "Fecha Próx. Contacto")]
    pub next_contact: Option<String>,
    #[serde(default, alias = "Estado Final")]
    pub final_status: Option<String>,
    #[serde(default, alias = "Comentarios")]
    pub comments: Option<String>,
    #[serde(default, alias = "Asesora")]
    pub agent: Option<String>,
    #[serde(default)]
    pub files_payload: Vec<FilePayload>,
    #[serde(default)]
    pub file_payload: Option<FilePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    #[serde(default, alias = "id_cliente")]
    pub record_id: Option<String>,
    /// Fallback target when no identifier is given.
    #[serde(default, alias = "nombre_original")]
    pub name: Option<String>,
    #[serde(default)]
    pub updates: BTreeMap<String, Value>,
    #[serde(default)]
    pub files_payload: Vec<FilePayload>,
    #[serde(default)]
    pub file_payload: Option<FilePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenameRequest {
    #[serde(default, alias = "Canal")]
    pub channel: Option<String>,
    #[serde(default, alias = "nombre_original")]
    pub old_name: Option<String>,
    #[serde(default, alias = "nombre_nuevo")]
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default, alias = "id_cliente")]
    pub record_id: Option<String>,
    #[serde(default, alias = "Canal")]
    pub channel: Option<String>,
    #[serde(default, alias = "nombre")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilePayload {
    #[serde(default, alias = "contentType")]
    pub content_type: Option<String>,
    #[serde(default, alias = "base64Data")]
    pub base64_data: Option<String>,
}

impl FilePayload {
    pub fn has_data(&self) -> bool {
        self.base64_data
            .as_deref()
            .is_some_and(|data| !data.trim().is_empty())
    }
}

/// Image prepared for the file relay, named at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub base64_data: String,
}

/// One remote cell to rewrite, addressed by column title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub column: String,
    pub value: String,
}

/// The queue payload: everything the remote adapter needs, frozen at
/// enqueue time so later local edits cannot leak into an earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum QueuedMutation {
    Add {
        record: Prospect,
        #[serde(default)]
        images: Vec<ImageUpload>,
    },
    Update {
        record: Prospect,
        /// Name the remote row is found under if the identifier column is absent.
        lookup_name: String,
        changes: Vec<ColumnValue>,
        #[serde(default)]
        images: Vec<ImageUpload>,
    },
    Rename {
        record_id: String,
        channel: String,
        old_name: String,
        new_name: String,
        updated_at: i64,
    },
    Delete {
        record_id: String,
        channel: String,
        name: String,
        images_url: Option<String>,
    },
}

impl QueuedMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            QueuedMutation::Add { .. } => MutationKind::Add,
            QueuedMutation::Update { .. } => MutationKind::Update,
            QueuedMutation::Rename { .. } => MutationKind::Rename,
            QueuedMutation::Delete { .. } => MutationKind::Delete,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            QueuedMutation::Add { record, .. } | QueuedMutation::Update { record, .. } => {
                &record.record_id
            }
            QueuedMutation::Rename { record_id, .. } | QueuedMutation::Delete { record_id, .. } => {
                record_id
            }
        }
    }
}

/// Text form of a JSON update value. `null` clears the field.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// File extension for a MIME type; `png` when unknown.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "application/pdf" => "pdf",
        _ => "png",
    }
}

/// Collects the attached files in submission order, legacy single payload
/// last, and names them `<name>_<stage>_<n>.<ext>`.
pub fn prepare_images(
    name: &str,
    stage: &str,
    files: &[FilePayload],
    legacy: Option<&FilePayload>,
) -> Vec<ImageUpload> {
    files
        .iter()
        .chain(legacy)
        .filter(|file| file.has_data())
        .enumerate()
        .map(|(position, file)| {
            let content_type = file
                .content_type
                .clone()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "image/png".to_string());
            ImageUpload {
                filename: format!(
                    "{}_{stage}_{}.{}",
                    name.trim(),
                    position + 1,
                    extension_for(&content_type)
                ),
                base64_data: file.base64_data.clone().unwrap_or_default(),
                content_type,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_accepts_canonical_and_form_spellings() {
        let envelope: MutationEnvelope = serde_json::from_value(json!({
            "type": "ADD",
            "sync_id": "S1",
            "Nombre": "Ana",
            "channel": "55 1234 5678",
            "Nivel de Interés": "Alto",
            "Asesora": "Lucia",
            "files_payload": [{ "contentType": "image/jpeg", "base64Data": "aGk=" }]
        }))
        .unwrap();

        assert_eq!(envelope.sync_id.as_deref(), Some("S1"));
        let MutationRequest::Add(add) = envelope.mutation else {
            panic!("expected ADD");
        };
        assert_eq!(add.name.as_deref(), Some("Ana"));
        assert_eq!(add.interest.as_deref(), Some("Alto"));
        assert_eq!(add.agent.as_deref(), Some("Lucia"));
        assert_eq!(add.files_payload.len(), 1);
    }

    #[test]
    fn update_keeps_arbitrary_field_names_for_validation() {
        let envelope: MutationEnvelope = serde_json::from_value(json!({
            "type": "UPDATE",
            "nombre_original": "Ana",
            "updates": { "Seguimiento 2": "llamar", "interest": 3 }
        }))
        .unwrap();
        assert!(envelope.sync_id.is_none());
        let MutationRequest::Update(update) = envelope.mutation else {
            panic!("expected UPDATE");
        };
        assert_eq!(update.name.as_deref(), Some("Ana"));
        assert_eq!(value_text(&update.updates["interest"]), "3");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<MutationEnvelope, _> =
            serde_json::from_value(json!({ "type": "MERGE", "name": "Ana" }));
        assert!(result.is_err());
    }

    #[test]
    fn images_are_named_by_stage_and_position() {
        let files = vec![
            FilePayload {
                content_type: Some("image/jpeg".into()),
                base64_data: Some("AAA".into()),
            },
            FilePayload {
                content_type: None,
                base64_data: Some("  ".into()),
            },
        ];
        let legacy = FilePayload {
            content_type: None,
            base64_data: Some("BBB".into()),
        };
        let images = prepare_images("Ana", "seguimiento2", &files, Some(&legacy));
        let names: Vec<&str> = images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["Ana_seguimiento2_1.jpg", "Ana_seguimiento2_2.png"]);
        assert_eq!(images[1].content_type, "image/png");
    }

    #[test]
    fn queued_payload_is_tagged_by_kind() {
        let queued = QueuedMutation::Delete {
            record_id: "5512345678".into(),
            channel: "5512345678".into(),
            name: "Ana".into(),
            images_url: None,
        };
        let encoded = serde_json::to_value(&queued).unwrap();
        assert_eq!(encoded["kind"], "DELETE");
        let decoded: QueuedMutation = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, queued);
        assert_eq!(decoded.kind(), MutationKind::Delete);
    }
}
