use std::collections::HashSet;

use thiserror::Error;

use super::normalize::normalize_header;
use crate::store::{FinalStatus, Freshness, Prospect, ValidationFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Name,
    Channel,
    FirstContact,
    Interest,
    Summary,
    Freshness,
    NextContact,
    FinalStatus,
    Comments,
    Agent,
    Images,
    RecordId,
    SyncId,
    Validation,
    UpdatedAt,
    FollowUpDate(u32),
    FollowUpNotes(u32),
}

const STANDARD_FIELDS: &[(FieldKey, &str, &str)] = &[
    (FieldKey::Name, "name", "Nombre"),
    (FieldKey::Channel, "channel", "Canal (Tel/WhatsApp)"),
    (FieldKey::FirstContact, "first_contact", "Fecha 1er Contacto"),
    (FieldKey::Interest, "interest", "Nivel de Interés"),
    (FieldKey::Summary, "summary", "Resumen Conversación"),
    (FieldKey::Freshness, "freshness", "Vigencia"),
    (FieldKey::NextContact, "next_contact", "Fecha Próx. Contacto"),
    (FieldKey::FinalStatus, "final_status", "Estado Final"),
    (FieldKey::Comments, "comments", "Comentarios"),
    (FieldKey::Agent, "agent", "Asesora"),
    (FieldKey::Images, "images", "Imagenes"),
    (FieldKey::RecordId, "record_id", "ID Cliente"),
    (FieldKey::SyncId, "sync_id", "Sync ID"),
    (FieldKey::Validation, "validation", "Validación"),
    (FieldKey::UpdatedAt, "updated_at", "Última Modificación"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldMapError {
    #[error("canonical field name used twice: {0}")]
    DuplicateCanonical(String),
    #[error("display names collide after normalization: {0}")]
    DuplicateDisplay(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown field: {0}")]
    Unknown(String),
    #[error("field cannot be updated: {0}")]
    ReadOnly(String),
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },
}

#[derive(Debug, Clone)]
struct FieldEntry {
    key: FieldKey,
    canonical: String,
    display: String,
    normalized: String,
}

/// Two-way mapping between canonical field names and remote column titles.
#[derive(Debug, Clone)]
pub struct FieldMap {
    entries: Vec<FieldEntry>,
}

impl FieldMap {
    pub fn standard() -> Result<Self, FieldMapError> {
        Self::new(
            STANDARD_FIELDS
                .iter()
                .map(|(key, canonical, display)| (*key, *canonical, *display)),
        )
    }

    pub fn new<'a>(
        fields: impl IntoIterator<Item = (FieldKey, &'a str, &'a str)>,
    ) -> Result<Self, FieldMapError> {
        let mut canonical_seen = HashSet::new();
        let mut display_seen = HashSet::new();
        let mut entries = Vec::new();
        for (key, canonical, display) in fields {
            if !canonical_seen.insert(canonical.to_string()) {
                return Err(FieldMapError::DuplicateCanonical(canonical.to_string()));
            }
            let normalized = normalize_header(display);
            if !display_seen.insert(normalized.clone()) {
                return Err(FieldMapError::DuplicateDisplay(display.to_string()));
            }
            entries.push(FieldEntry {
                key,
                canonical: canonical.to_string(),
                display: display.to_string(),
                normalized,
            });
        }
        Ok(Self { entries })
    }

    /// Resolves a canonical name or any spelling of a display name.
    pub fn resolve(&self, name: &str) -> Option<FieldKey> {
        let trimmed = name.trim();
        let normalized = normalize_header(trimmed);
        if normalized.is_empty() {
            return None;
        }
        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.canonical == trimmed || entry.normalized == normalized)
        {
            return Some(entry.key);
        }
        parse_follow_up_canonical(trimmed).or_else(|| parse_follow_up_display(&normalized))
    }

    pub fn resolve_updatable(&self, name: &str) -> Result<FieldKey, FieldError> {
        let key = self
            .resolve(name)
            .ok_or_else(|| FieldError::Unknown(name.to_string()))?;
        if !key.is_updatable() {
            return Err(FieldError::ReadOnly(name.to_string()));
        }
        Ok(key)
    }

    pub fn display_name(&self, key: FieldKey) -> String {
        match key {
            FieldKey::FollowUpDate(n) => format!("Fecha Seguimiento {n}"),
            FieldKey::FollowUpNotes(n) => format!("Seguimiento {n}"),
            _ => self
                .entries
                .iter()
                .find(|entry| entry.key == key)
                .map(|entry| entry.display.clone())
                .unwrap_or_else(|| format!("{key:?}")),
        }
    }

    pub fn canonical_name(&self, key: FieldKey) -> String {
        match key {
            FieldKey::FollowUpDate(n) => format!("followup_{n}_date"),
            FieldKey::FollowUpNotes(n) => format!("followup_{n}_notes"),
            _ => self
                .entries
                .iter()
                .find(|entry| entry.key == key)
                .map(|entry| entry.canonical.clone())
                .unwrap_or_else(|| format!("{key:?}")),
        }
    }

    /// Fixed columns plus one date/notes pair per follow-up the record carries.
    pub fn columns_for(&self, prospect: &Prospect) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = self.entries.iter().map(|entry| entry.key).collect();
        for follow_up in &prospect.follow_ups {
            keys.push(FieldKey::FollowUpDate(follow_up.index));
            keys.push(FieldKey::FollowUpNotes(follow_up.index));
        }
        keys
    }

    /// Display name and remote cell value for every column of the record.
    pub fn to_display_map(&self, prospect: &Prospect, sync_id: &str) -> Vec<(String, String)> {
        self.columns_for(prospect)
            .into_iter()
            .map(|key| (self.display_name(key), key.read(prospect, sync_id)))
            .collect()
    }
}

fn parse_follow_up_canonical(name: &str) -> Option<FieldKey> {
    let rest = name.strip_prefix("followup_")?;
    if let Some(n) = rest.strip_suffix("_date") {
        return parse_index(n).map(FieldKey::FollowUpDate);
    }
    rest.strip_suffix("_notes")
        .and_then(parse_index)
        .map(FieldKey::FollowUpNotes)
}

fn parse_follow_up_display(normalized: &str) -> Option<FieldKey> {
    if let Some(n) = normalized.strip_prefix("fechaseguimiento") {
        return parse_index(n).map(FieldKey::FollowUpDate);
    }
    normalized
        .strip_prefix("seguimiento")
        .and_then(parse_index)
        .map(FieldKey::FollowUpNotes)
}

fn parse_index(value: &str) -> Option<u32> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok().filter(|n| *n >= 1)
}

impl FieldKey {
    /// Channel and the identifier derived from it are fixed at creation;
    /// the rest of the read-only set is maintained by the system.
    pub fn is_updatable(&self) -> bool {
        !matches!(
            self,
            FieldKey::Channel
                | FieldKey::RecordId
                | FieldKey::Freshness
                | FieldKey::Validation
                | FieldKey::Images
                | FieldKey::SyncId
                | FieldKey::UpdatedAt
        )
    }

    pub fn follow_up_index(&self) -> Option<u32> {
        match self {
            FieldKey::FollowUpDate(n) | FieldKey::FollowUpNotes(n) => Some(*n),
            _ => None,
        }
    }

    /// Writes `value` into the record. Blank text clears optional fields.
    pub fn apply(&self, prospect: &mut Prospect, value: &str) -> Result<(), FieldError> {
        let trimmed = value.trim();
        let text = (!trimmed.is_empty()).then(|| trimmed.to_string());
        let invalid = |field: &str| FieldError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        };
        match self {
            FieldKey::Name => prospect.name = text.ok_or_else(|| invalid("name"))?,
            FieldKey::Agent => prospect.agent = text.ok_or_else(|| invalid("agent"))?,
            FieldKey::FirstContact => prospect.first_contact = text,
            FieldKey::Interest => prospect.interest = text,
            FieldKey::Summary => prospect.summary = text,
            FieldKey::NextContact => prospect.next_contact = text,
            FieldKey::Comments => prospect.comments = text,
            FieldKey::FinalStatus => {
                prospect.final_status = match text {
                    None => FinalStatus::InProgress,
                    Some(label) => {
                        FinalStatus::from_label(&label).ok_or_else(|| invalid("final_status"))?
                    }
                }
            }
            FieldKey::FollowUpDate(n) => prospect.follow_up_mut(*n).date = text,
            FieldKey::FollowUpNotes(n) => prospect.follow_up_mut(*n).notes = text,
            FieldKey::Channel
            | FieldKey::RecordId
            | FieldKey::Freshness
            | FieldKey::Validation
            | FieldKey::Images
            | FieldKey::SyncId
            | FieldKey::UpdatedAt => return Err(FieldError::ReadOnly(format!("{self:?}"))),
        }
        Ok(())
    }

    /// Value written to the remote cell for this field.
    pub fn read(&self, prospect: &Prospect, sync_id: &str) -> String {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        match self {
            FieldKey::Name => prospect.name.clone(),
            FieldKey::Channel => prospect.channel.clone(),
            FieldKey::FirstContact => text(&prospect.first_contact),
            FieldKey::Interest => text(&prospect.interest),
            FieldKey::Summary => text(&prospect.summary),
            FieldKey::Freshness => freshness_label(prospect.freshness).to_string(),
            FieldKey::NextContact => text(&prospect.next_contact),
            FieldKey::FinalStatus => prospect.final_status.display().to_string(),
            FieldKey::Comments => text(&prospect.comments),
            FieldKey::Agent => prospect.agent.clone(),
            FieldKey::Images => text(&prospect.images_url),
            FieldKey::RecordId => prospect.record_id.clone(),
            FieldKey::SyncId => sync_id.to_string(),
            // The remote copy is by definition the confirmed one.
            FieldKey::Validation => ValidationFlag::Ok.as_str().to_string(),
            FieldKey::UpdatedAt => format_timestamp(prospect.updated_at),
            FieldKey::FollowUpDate(n) => prospect
                .follow_up(*n)
                .and_then(|entry| entry.date.clone())
                .unwrap_or_default(),
            FieldKey::FollowUpNotes(n) => prospect
                .follow_up(*n)
                .and_then(|entry| entry.notes.clone())
                .unwrap_or_default(),
        }
    }
}

pub fn freshness_label(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::Current => "Vigente",
        Freshness::Overdue => "Vencido",
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC; empty if the timestamp is out of range.
pub fn format_timestamp(unix: i64) -> String {
    let Ok(at) = time::OffsetDateTime::from_unix_timestamp(unix) else {
        return String::new();
    };
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FollowUp;

    fn sample() -> Prospect {
        Prospect {
            record_id: "5512345678".into(),
            name: "Ana".into(),
            channel: "5512345678".into(),
            first_contact: None,
            interest: None,
            summary: None,
            freshness: Freshness::Overdue,
            next_contact: None,
            final_status: FinalStatus::Sold,
            comments: None,
            agent: "Lucia".into(),
            images_url: None,
            follow_ups: vec![FollowUp {
                index: 2,
                date: Some("01/03/2025".into()),
                notes: None,
            }],
            validation: ValidationFlag::Pending,
            updated_at: 0,
        }
    }

    #[test]
    fn standard_map_is_valid() {
        let map = FieldMap::standard().unwrap();
        assert_eq!(map.display_name(FieldKey::Interest), "Nivel de Interés");
        assert_eq!(map.canonical_name(FieldKey::FollowUpNotes(3)), "followup_3_notes");
    }

    #[test]
    fn resolves_canonical_and_display_spellings() {
        let map = FieldMap::standard().unwrap();
        assert_eq!(map.resolve("interest"), Some(FieldKey::Interest));
        assert_eq!(map.resolve("Nivel de Interés"), Some(FieldKey::Interest));
        assert_eq!(map.resolve("nivel de interes"), Some(FieldKey::Interest));
        assert_eq!(map.resolve("ESTADO FINAL"), Some(FieldKey::FinalStatus));
        assert_eq!(map.resolve("followup_4_date"), Some(FieldKey::FollowUpDate(4)));
        assert_eq!(map.resolve("Fecha Seguimiento 4"), Some(FieldKey::FollowUpDate(4)));
        assert_eq!(map.resolve("Seguimiento 12"), Some(FieldKey::FollowUpNotes(12)));
        assert_eq!(map.resolve("Seguimiento 0"), None);
        assert_eq!(map.resolve("Color favorito"), None);
        assert_eq!(map.resolve("   "), None);
    }

    #[test]
    fn rejects_unknown_and_system_fields_for_update() {
        let map = FieldMap::standard().unwrap();
        assert_eq!(
            map.resolve_updatable("Color favorito"),
            Err(FieldError::Unknown("Color favorito".into()))
        );
        assert!(matches!(
            map.resolve_updatable("Canal (Tel/WhatsApp)"),
            Err(FieldError::ReadOnly(_))
        ));
        assert!(matches!(map.resolve_updatable("Sync ID"), Err(FieldError::ReadOnly(_))));
        assert_eq!(map.resolve_updatable("comentarios"), Ok(FieldKey::Comments));
    }

    #[test]
    fn construction_rejects_colliding_names() {
        let err = FieldMap::new([
            (FieldKey::Name, "name", "Nombre"),
            (FieldKey::Agent, "agent", " NOMBRE "),
        ])
        .unwrap_err();
        assert_eq!(err, FieldMapError::DuplicateDisplay(" NOMBRE ".into()));

        let err = FieldMap::new([
            (FieldKey::Name, "name", "Nombre"),
            (FieldKey::Agent, "name", "Asesora"),
        ])
        .unwrap_err();
        assert_eq!(err, FieldMapError::DuplicateCanonical("name".into()));
    }

    #[test]
    fn apply_validates_status_and_required_text() {
        let mut prospect = sample();
        FieldKey::FinalStatus.apply(&mut prospect, "En proceso").unwrap();
        assert_eq!(prospect.final_status, FinalStatus::InProgress);
        FieldKey::FinalStatus.apply(&mut prospect, "Vendido").unwrap();
        assert_eq!(prospect.final_status, FinalStatus::Sold);
        assert!(FieldKey::FinalStatus.apply(&mut prospect, "tal vez").is_err());
        assert!(FieldKey::Name.apply(&mut prospect, "  ").is_err());

        FieldKey::FollowUpNotes(1).apply(&mut prospect, "llamó").unwrap();
        let indexes: Vec<u32> = prospect.follow_ups.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[test]
    fn display_map_covers_follow_up_columns() {
        let map = FieldMap::standard().unwrap();
        let row = map.to_display_map(&sample(), "S1");
        let lookup = |name: &str| {
            row.iter()
                .find(|(display, _)| display == name)
                .map(|(_, value)| value.as_str())
        };
        assert_eq!(lookup("Estado Final"), Some("Vendido"));
        assert_eq!(lookup("Vigencia"), Some("Vencido"));
        assert_eq!(lookup("Sync ID"), Some("S1"));
        assert_eq!(lookup("Fecha Seguimiento 2"), Some("01/03/2025"));
        assert_eq!(lookup("Seguimiento 2"), Some(""));
        assert_eq!(lookup("Última Modificación"), Some("1970-01-01 00:00:00"));
    }
}
