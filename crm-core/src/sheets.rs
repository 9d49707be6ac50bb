use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::auth::{AuthError, TokenSource};
use crate::class::{ApiErrorClass, classify_api_status, classify_request_error};

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Error)]
pub enum SheetsError {
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
    #[error("worksheet not found: {0}")]
    MissingWorksheet(String),
}

impl SheetsError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            SheetsError::Api { status, body } => classify_api_status(*status, body),
            SheetsError::Request(err) => classify_request_error(err),
            SheetsError::Auth(AuthError::Request(err)) => classify_request_error(err),
            SheetsError::Auth(AuthError::Api { status, body }) if status.is_server_error() => {
                classify_api_status(*status, body)
            }
            SheetsError::Auth(_) => ApiErrorClass::Auth,
            SheetsError::MissingWorksheet(_) => ApiErrorClass::NotFound,
            SheetsError::Url(_) | SheetsError::BaseUrl => ApiErrorClass::Permanent,
        }
    }

    pub fn is_quota(&self) -> bool {
        self.classification() == ApiErrorClass::Quota
    }
}

/// One cell write addressed by 1-based row and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub row: usize,
    pub column: usize,
    pub value: String,
}

#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    spreadsheet_id: String,
    tokens: TokenSource,
}

impl SheetsClient {
    pub fn new(spreadsheet_id: impl Into<String>, tokens: TokenSource) -> Result<Self, SheetsError> {
        Self::with_base_url(DEFAULT_BASE_URL, spreadsheet_id, tokens)
    }

    pub fn with_base_url(
        base_url: &str,
        spreadsheet_id: impl Into<String>,
        tokens: TokenSource,
    ) -> Result<Self, SheetsError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        })
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let url = self.values_endpoint(range)?;
        let payload: ValueRange = self.send(self.http.get(url)).await?;
        Ok(payload
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    /// Every populated row of the worksheet, header row included.
    pub async fn read_all(&self, worksheet: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        self.read_range(&worksheet_range(worksheet, "")).await
    }

    pub async fn write_header_row(
        &self,
        worksheet: &str,
        headers: &[String],
    ) -> Result<(), SheetsError> {
        let range = worksheet_range(worksheet, "A1");
        let mut url = self.values_endpoint(&range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [headers],
        });
        let _: Value = self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    /// Appends one row below the current table and returns the written range.
    pub async fn append_row(
        &self,
        worksheet: &str,
        row: &[String],
    ) -> Result<Option<String>, SheetsError> {
        let range = worksheet_range(worksheet, "A1");
        let mut url = self.endpoint(&[
            "v4",
            "spreadsheets",
            &self.spreadsheet_id,
            "values",
            &format!("{range}:append"),
        ])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({
            "majorDimension": "ROWS",
            "values": [row],
        });
        let payload: AppendResponse = self.send(self.http.post(url).json(&body)).await?;
        Ok(payload.updates.and_then(|updates| updates.updated_range))
    }

    pub async fn batch_update(
        &self,
        worksheet: &str,
        updates: &[CellUpdate],
    ) -> Result<usize, SheetsError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let url = self.endpoint(&[
            "v4",
            "spreadsheets",
            &self.spreadsheet_id,
            "values:batchUpdate",
        ])?;
        let data: Vec<Value> = updates
            .iter()
            .map(|update| {
                json!({
                    "range": worksheet_range(worksheet, &rowcol_to_a1(update.row, update.column)),
                    "values": [[update.value]],
                })
            })
            .collect();
        let body = json!({
            "valueInputOption": "RAW",
            "data": data,
        });
        let payload: BatchUpdateResponse = self.send(self.http.post(url).json(&body)).await?;
        Ok(payload.total_updated_cells.unwrap_or(updates.len()))
    }

    pub async fn sheet_id(&self, worksheet: &str) -> Result<i64, SheetsError> {
        let mut url = self.endpoint(&["v4", "spreadsheets", &self.spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties");
        let payload: SpreadsheetMeta = self.send(self.http.get(url)).await?;
        payload
            .sheets
            .into_iter()
            .find(|sheet| sheet.properties.title == worksheet)
            .map(|sheet| sheet.properties.sheet_id)
            .ok_or_else(|| SheetsError::MissingWorksheet(worksheet.to_string()))
    }

    pub async fn delete_row(&self, worksheet: &str, row: usize) -> Result<(), SheetsError> {
        let sheet_id = self.sheet_id(worksheet).await?;
        let url = self.endpoint(&[
            "v4",
            "spreadsheets",
            &format!("{}:batchUpdate", self.spreadsheet_id),
        ])?;
        let start = row.saturating_sub(1);
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": start + 1,
                    }
                }
            }]
        });
        let _: Value = self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    fn values_endpoint(&self, range: &str) -> Result<Url, SheetsError> {
        self.endpoint(&["v4", "spreadsheets", &self.spreadsheet_id, "values", range])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SheetsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SheetsError::BaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SheetsError> {
        let token = self.tokens.bearer().await?;
        let response = request.bearer_auth(token).send().await?;
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SheetsError::Api { status, body })
        }
    }
}

/// Spreadsheet column label for a 1-based index: 1 → `A`, 27 → `AA`.
pub fn column_letter(column: usize) -> String {
    let mut n = column.max(1);
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

pub fn rowcol_to_a1(row: usize, column: usize) -> String {
    format!("{}{}", column_letter(column), row.max(1))
}

/// Prefixes `range` with the worksheet name, quoting names that need it.
/// An empty range addresses the whole worksheet.
pub fn worksheet_range(worksheet: &str, range: &str) -> String {
    let plain = !worksheet.is_empty()
        && worksheet
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    let name = if plain {
        worksheet.to_string()
    } else {
        format!("'{}'", worksheet.replace('\'', "''"))
    };
    if range.is_empty() {
        name
    } else {
        format!("{name}!{range}")
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_range: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateResponse {
    #[serde(default)]
    total_updated_cells: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(703), "AAA");
        assert_eq!(rowcol_to_a1(3, 2), "B3");
    }

    #[test]
    fn worksheet_names_with_spaces_are_quoted() {
        assert_eq!(worksheet_range("Seguimientos", "1:1"), "Seguimientos!1:1");
        assert_eq!(worksheet_range("Mis Clientes", "A1"), "'Mis Clientes'!A1");
        assert_eq!(worksheet_range("O'Neil", ""), "'O''Neil'");
    }
}
