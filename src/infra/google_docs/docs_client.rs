// Client for the Docs API: fetches a document's structured body and
// flattens it into plain text. The core layer only sees the `DocumentStore`
// port and the flattened string; all HTTP status handling and the JSON
// shape of the API live here.

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use async_trait::async_trait;

use crate::core::auth::SessionProvider;
use crate::core::job::{DocumentStore, FetchError};
use crate::core::links::DocumentId;

/// Client for reading document bodies, authorized per request through the
/// shared session provider.
pub struct DocsApiClient {
    client: Client,
    provider: Arc<dyn SessionProvider>,
    base_url: String,
}

impl DocsApiClient {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            client: Client::new(),
            provider,
            base_url: "https://docs.googleapis.com".to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for DocsApiClient {
    async fn fetch_text(&self, id: &DocumentId) -> Result<String, FetchError> {
        let token = self
            .provider
            .access_token()
            .await
            .map_err(|e| FetchError::Unknown(e.to_string()))?;

        let url = format!("{}/v1/documents/{}", self.base_url, id.as_str());
        debug!("fetching document body: {}", id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token.secret()))
            .send()
            .await
            .map_err(|e| FetchError::Unknown(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let document: Document = response
            .json()
            .await
            .map_err(|e| FetchError::Unknown(e.to_string()))?;

        Ok(flatten_document(&document))
    }
}

/// Map an API failure onto the fetch error taxonomy. The service reports
/// per-user quota exhaustion as 403 with a rate-limit reason in the body
/// (rateLimitExceeded, userRateLimitExceeded, dailyLimitExceeded, ...), so
/// a plain 403 is a sharing problem and a flagged one is backpressure.
fn classify_failure(status: StatusCode, body: &str) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::FORBIDDEN => {
            let reason = body.to_lowercase();
            if reason.contains("ratelimitexceeded")
                || reason.contains("dailylimitexceeded")
                || reason.contains("resource_exhausted")
                || reason.contains("quota")
            {
                FetchError::RateLimited
            } else {
                FetchError::PermissionDenied
            }
        }
        _ => FetchError::Unknown(format!(
            "{}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )),
    }
}

// ============================================================================
// DOCS API RESPONSE STRUCTURES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuralElement {
    paragraph: Option<Paragraph>,
    table: Option<Table>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    text_run: Option<TextRun>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextRun {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    table_rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    #[serde(default)]
    table_cells: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableCell {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

// ============================================================================
// FLATTENING
// ============================================================================

/// Flatten a structured body into plain text: paragraph run texts in
/// document order with a newline between consecutive paragraphs, tables as
/// tab-separated rows. Runs of three or more newlines collapse to two and
/// the result is trimmed.
fn flatten_document(document: &Document) -> String {
    let content = match &document.body {
        Some(body) => &body.content,
        None => return String::new(),
    };

    let mut text = String::new();
    // True right after a lone separator newline, so a table never stacks
    // an extra blank line onto one that is already there.
    let mut at_separator = false;
    let mut last_was_paragraph = false;

    for element in content {
        if let Some(paragraph) = &element.paragraph {
            if last_was_paragraph {
                text.push('\n');
                at_separator = true;
            }
            for run in paragraph_runs(paragraph) {
                text.push_str(run);
                at_separator = false;
            }
            last_was_paragraph = true;
        } else if let Some(table) = &element.table {
            if !text.is_empty() && !at_separator {
                text.push('\n');
            }
            for row in &table.table_rows {
                let cells: Vec<String> = row.table_cells.iter().map(cell_text).collect();
                if cells.is_empty() {
                    continue;
                }
                text.push_str(&cells.join("\t"));
                text.push('\n');
                at_separator = true;
            }
            last_was_paragraph = false;
        }
    }

    collapse_blank_lines(&text).trim().to_string()
}

fn paragraph_runs(paragraph: &Paragraph) -> impl Iterator<Item = &str> + '_ {
    paragraph
        .elements
        .iter()
        .filter_map(|element| element.text_run.as_ref())
        .filter_map(|run| run.content.as_deref())
}

/// A cell's text: the run texts of its paragraphs joined with spaces, so a
/// multi-paragraph cell stays on one line of the flattened row. Nested
/// tables inside cells are not descended into.
fn cell_text(cell: &TableCell) -> String {
    let runs: Vec<&str> = cell
        .content
        .iter()
        .filter_map(|element| element.paragraph.as_ref())
        .flat_map(|paragraph| paragraph_runs(paragraph))
        .collect();
    runs.join(" ").trim().to_string()
}

/// Collapse three or more consecutive newlines down to two.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(content: Vec<serde_json::Value>) -> Document {
        serde_json::from_value(json!({ "body": { "content": content } })).unwrap()
    }

    fn paragraph(text: &str) -> serde_json::Value {
        json!({ "paragraph": { "elements": [ { "textRun": { "content": text } } ] } })
    }

    fn cell(texts: &[&str]) -> serde_json::Value {
        let paragraphs: Vec<serde_json::Value> = texts.iter().map(|t| paragraph(t)).collect();
        json!({ "content": paragraphs })
    }

    fn table(rows: Vec<Vec<serde_json::Value>>) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = rows
            .into_iter()
            .map(|cells| json!({ "tableCells": cells }))
            .collect();
        json!({ "table": { "tableRows": rows } })
    }

    #[test]
    fn test_paragraph_then_table_separation() {
        let document = doc(vec![
            paragraph("Intro\n"),
            table(vec![
                vec![cell(&["A\n"]), cell(&["B\n"])],
                vec![cell(&["C\n"]), cell(&["D\n"])],
            ]),
        ]);

        assert_eq!(flatten_document(&document), "Intro\n\nA\tB\nC\tD");
    }

    #[test]
    fn test_blank_line_between_paragraphs() {
        let document = doc(vec![paragraph("One\n"), paragraph("Two\n")]);
        assert_eq!(flatten_document(&document), "One\n\nTwo");
    }

    #[test]
    fn test_newline_collapse() {
        let document = doc(vec![paragraph("First\n\n\n\n"), paragraph("Last\n")]);
        assert_eq!(flatten_document(&document), "First\n\nLast");
    }

    #[test]
    fn test_leading_table_has_no_leading_newline() {
        let document = doc(vec![table(vec![vec![cell(&["A"]), cell(&["B"])]])]);
        assert_eq!(flatten_document(&document), "A\tB");
    }

    #[test]
    fn test_multi_paragraph_cell_join() {
        let document = doc(vec![table(vec![vec![cell(&["top", "bottom"]), cell(&["right"])]])]);
        assert_eq!(flatten_document(&document), "top bottom\tright");
    }

    #[test]
    fn test_document_without_body() {
        let document: Document = serde_json::from_value(json!({ "documentId": "X" })).unwrap();
        assert_eq!(flatten_document(&document), "");

        let empty = doc(vec![]);
        assert_eq!(flatten_document(&empty), "");
    }

    #[test]
    fn test_elements_without_runs_ignored() {
        let document = doc(vec![
            json!({ "sectionBreak": {} }),
            paragraph("Text\n"),
            json!({ "paragraph": { "elements": [ { "inlineObjectElement": {} } ] } }),
        ]);
        assert_eq!(flatten_document(&document), "Text");
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            classify_failure(StatusCode::NOT_FOUND, ""),
            FetchError::NotFound
        );
        assert_eq!(
            classify_failure(StatusCode::FORBIDDEN, r#"{"error":{"status":"PERMISSION_DENIED"}}"#),
            FetchError::PermissionDenied
        );
        assert_eq!(
            classify_failure(
                StatusCode::FORBIDDEN,
                r#"{"error":{"errors":[{"reason":"rateLimitExceeded"}]}}"#
            ),
            FetchError::RateLimited
        );
        assert_eq!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            FetchError::RateLimited
        );
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            FetchError::Unknown(_)
        ));
    }

    #[test]
    fn test_quota_reasons_match_in_any_casing() {
        for body in [
            r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#,
            r#"{"error":{"errors":[{"reason":"dailyLimitExceeded"}]}}"#,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#,
            r#"{"error":{"message":"Quota exceeded for metric 'Read requests'"}}"#,
        ] {
            assert_eq!(
                classify_failure(StatusCode::FORBIDDEN, body),
                FetchError::RateLimited,
                "body should flag backpressure: {}",
                body
            );
        }
    }
}
