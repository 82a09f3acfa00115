// Client for the Sheets API: sheet metadata, one column read, one column
// write. Ranges are built in A1 notation with the sheet title always
// quoted, since titles are user-controlled text.

use std::sync::Arc;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use async_trait::async_trait;

use crate::core::auth::SessionProvider;
use crate::core::job::{SheetError, SheetStore};

pub struct SheetsApiClient {
    client: Client,
    provider: Arc<dyn SessionProvider>,
    base_url: String,
}

impl SheetsApiClient {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            client: Client::new(),
            provider,
            base_url: "https://sheets.googleapis.com".to_string(),
        }
    }

    async fn bearer(&self) -> Result<String, SheetError> {
        let token = self
            .provider
            .access_token()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;
        Ok(format!("Bearer {}", token.secret()))
    }

    /// URL for a values endpoint. The range embeds the sheet title, which
    /// may contain '#', '?' or spaces; pushing it as a path segment encodes
    /// it safely.
    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<Url, SheetError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| SheetError::Api(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::Api("invalid base url".to_string()))?
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", range]);
        Ok(url)
    }
}

#[async_trait]
impl SheetStore for SheetsApiClient {
    async fn first_sheet_title(&self, spreadsheet_id: &str) -> Result<String, SheetError> {
        let url = format!("{}/v4/spreadsheets/{}", self.base_url, spreadsheet_id);
        let resp = self
            .client
            .get(&url)
            .query(&[("fields", "sheets.properties.title")])
            .header("Authorization", self.bearer().await?)
            .send()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetError::Api(format!(
                "spreadsheet metadata request returned {}: {}",
                status, body
            )));
        }

        let spreadsheet: Spreadsheet = resp
            .json()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;

        spreadsheet
            .sheets
            .into_iter()
            .next()
            .map(|sheet| sheet.properties.title)
            .ok_or_else(|| SheetError::Api("spreadsheet has no sheets".to_string()))
    }

    async fn read_column(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        column: u32,
    ) -> Result<Vec<String>, SheetError> {
        let range = column_range(sheet, column);
        debug!("reading range {}", range);

        let url = self.values_url(spreadsheet_id, &range)?;
        let resp = self
            .client
            .get(url)
            .header("Authorization", self.bearer().await?)
            .send()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetError::Api(format!(
                "column read returned {}: {}",
                status, body
            )));
        }

        let value_range: ValueRange = resp
            .json()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;

        Ok(column_values(value_range.values))
    }

    async fn write_column(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        column: u32,
        start_row: u32,
        values: &[String],
    ) -> Result<usize, SheetError> {
        if values.is_empty() {
            return Ok(0);
        }

        let end_row = start_row + values.len() as u32 - 1;
        let range = cell_range(sheet, column, start_row, end_row);
        debug!("writing {} cells to range {}", values.len(), range);

        let request = WriteRequest {
            range: &range,
            major_dimension: "ROWS",
            values: values.iter().map(|value| vec![value.as_str()]).collect(),
        };

        let url = self.values_url(spreadsheet_id, &range)?;
        let resp = self
            .client
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .header("Authorization", self.bearer().await?)
            .json(&request)
            .send()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetError::Api(format!(
                "column write returned {}: {}",
                status, body
            )));
        }

        let update: UpdateResponse = resp
            .json()
            .await
            .map_err(|e| SheetError::Api(e.to_string()))?;

        Ok(update.updated_cells.unwrap_or(0) as usize)
    }
}

// ============================================================================
// A1 NOTATION HELPERS
// ============================================================================

/// 1-indexed column number to its A1 letters: 1 -> A, 18 -> R, 27 -> AA.
fn column_letter(column: u32) -> String {
    let mut column = column;
    let mut letters: Vec<char> = Vec::new();
    while column > 0 {
        column -= 1;
        letters.push(char::from(b'A' + (column % 26) as u8));
        column /= 26;
    }
    letters.iter().rev().collect()
}

/// Sheet title quoted for A1 notation; embedded quotes double.
fn quoted_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Whole-column range like `'Imports'!R:R`.
fn column_range(sheet: &str, column: u32) -> String {
    let letter = column_letter(column);
    format!("{}!{}:{}", quoted_title(sheet), letter, letter)
}

/// Bounded one-column range like `'Imports'!S2:S41`.
fn cell_range(sheet: &str, column: u32, start_row: u32, end_row: u32) -> String {
    let letter = column_letter(column);
    format!(
        "{}!{}{}:{}{}",
        quoted_title(sheet),
        letter,
        start_row,
        letter,
        end_row
    )
}

/// First cell of each returned row. The API sends ragged rows: a blank
/// cell in the requested column comes back as an empty row.
fn column_values(rows: Vec<Vec<String>>) -> Vec<String> {
    rows.into_iter()
        .map(|row| row.into_iter().next().unwrap_or_default())
        .collect()
}

// ============================================================================
// SHEETS API STRUCTURES
// ============================================================================

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Reply to a values read. The `values` key is absent entirely when the
/// requested range holds no data.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest<'a> {
    range: &'a str,
    major_dimension: &'a str,
    values: Vec<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    updated_cells: Option<u64>,
}
