// The batch job: read one column of document links, fetch each document's
// text, write the aligned destination column back in a single call. This
// module has no HTTP in it - the document and spreadsheet services are
// ports implemented by the infra layer, so the whole flow runs against
// in-memory fakes in tests.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::links::{extract_document_id, DocumentId};

// ============================================================================
// ERRORS
// ============================================================================

/// Why a single row's document fetch failed.
///
/// All of these are non-fatal to the batch: the row's destination is left
/// blank and processing continues with the next row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("document not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("rate limited by the document service")]
    RateLimited,

    #[error("document service error: {0}")]
    Unknown(String),
}

/// Spreadsheet service failure. Unlike fetch errors these abort the run:
/// without the source column there is nothing to process, and a failed
/// final write leaves the sheet in an unknown state the operator must see.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("spreadsheet service error: {0}")]
    Api(String),
}

/// Fatal job outcomes, tagged by which phase failed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to resolve sheet metadata: {0}")]
    Metadata(SheetError),

    #[error("failed to read the source column: {0}")]
    Read(SheetError),

    #[error("failed to write the destination column: {0}")]
    Write(SheetError),
}

// ============================================================================
// PORTS
// ============================================================================

/// Read access to a hosted document, already flattened to plain text.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch_text(&self, id: &DocumentId) -> Result<String, FetchError>;
}

/// Column-level access to one spreadsheet.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Title of the spreadsheet's first sheet tab.
    async fn first_sheet_title(&self, spreadsheet_id: &str) -> Result<String, SheetError>;

    /// All values of a 1-indexed column, row 1 through the last non-empty
    /// row, one string per row (blank cells come back as `""`).
    async fn read_column(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        column: u32,
    ) -> Result<Vec<String>, SheetError>;

    /// Overwrite `values.len()` consecutive cells of a column starting at
    /// `start_row`, in one update call. Returns the number of cells the
    /// service reports as updated.
    async fn write_column(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        column: u32,
        start_row: u32,
        values: &[String],
    ) -> Result<usize, SheetError>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Sheets rejects cell values above 50,000 characters; leave headroom for
/// the truncation marker and a margin.
pub const DEFAULT_CELL_CHAR_LIMIT: usize = 49_500;

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Everything one extraction run needs to know, passed in explicitly so
/// tests can point the job at alternate sheets and columns.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub spreadsheet_id: String,

    /// Sheet tab title; `None` means use the spreadsheet's first tab.
    pub sheet_title: Option<String>,

    /// 1-indexed column holding the document links (18 = R).
    pub source_column: u32,

    /// 1-indexed column receiving the extracted text (19 = S).
    pub dest_column: u32,

    /// Treat row 1 as a header: don't read a link from it, don't write over it.
    pub skip_header: bool,

    /// Hard cap on characters written to a single destination cell.
    pub cell_char_limit: usize,
}

impl JobConfig {
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_title: None,
            source_column: 18,
            dest_column: 19,
            skip_header: true,
            cell_char_limit: DEFAULT_CELL_CHAR_LIMIT,
        }
    }
}

// ============================================================================
// ROW RESULTS AND RUN SUMMARY
// ============================================================================

/// What happened to one row. Every outcome still produces a destination
/// value (possibly empty) so the column stays aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Extracted { truncated: bool },
    EmptySource,
    Unrecognized,
    Failed(FetchError),
}

/// Report entry for a row that needs operator attention: an unrecognized
/// link or a failed fetch.
#[derive(Debug, Clone)]
pub struct RowReport {
    /// 1-indexed sheet row the issue occurred on.
    pub row: u32,
    /// The cell text or document id the row was processed with.
    pub input: String,
    pub issue: RowIssue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIssue {
    UnrecognizedLink,
    Fetch(FetchError),
}

/// Counts for the end-of-run report. `rows` always equals
/// `extracted + empty + unrecognized + failed`.
#[derive(Debug, Default)]
pub struct JobSummary {
    pub rows: usize,
    pub extracted: usize,
    pub empty: usize,
    pub unrecognized: usize,
    pub failed: usize,
    pub truncated: usize,
    pub updated_cells: usize,
    pub reports: Vec<RowReport>,
}

// ============================================================================
// THE JOB
// ============================================================================

/// Sequential batch job over one spreadsheet.
///
/// Generic over its two ports so the orchestration logic is testable with
/// in-memory fakes, independent of network access.
pub struct ExtractionJob<D: DocumentStore, S: SheetStore> {
    docs: D,
    sheets: S,
    config: JobConfig,
}

impl<D, S> ExtractionJob<D, S>
where
    D: DocumentStore,
    S: SheetStore,
{
    pub fn new(docs: D, sheets: S, config: JobConfig) -> Self {
        Self {
            docs,
            sheets,
            config,
        }
    }

    /// Run the whole batch: one column read, strictly sequential row
    /// processing, one aligned column write.
    ///
    /// Row-level problems are recorded in the summary and never abort the
    /// run; only metadata/read/write failures do.
    pub async fn run(&self) -> Result<JobSummary, JobError> {
        let sheet = match &self.config.sheet_title {
            Some(title) => title.clone(),
            None => self
                .sheets
                .first_sheet_title(&self.config.spreadsheet_id)
                .await
                .map_err(JobError::Metadata)?,
        };
        info!(sheet = %sheet, "processing sheet");

        let column = self
            .sheets
            .read_column(&self.config.spreadsheet_id, &sheet, self.config.source_column)
            .await
            .map_err(JobError::Read)?;
        info!(rows = column.len(), "read source column");

        let first_data_row: u32 = if self.config.skip_header { 2 } else { 1 };
        let data: &[String] = if self.config.skip_header && !column.is_empty() {
            &column[1..]
        } else {
            &column[..]
        };

        let mut summary = JobSummary::default();
        let mut destinations: Vec<String> = Vec::with_capacity(data.len());

        for (offset, source) in data.iter().enumerate() {
            let row = first_data_row + offset as u32;
            let (value, outcome) = self.process_row(row, source).await;

            match outcome {
                RowOutcome::Extracted { truncated } => {
                    summary.extracted += 1;
                    if truncated {
                        summary.truncated += 1;
                    }
                }
                RowOutcome::EmptySource => summary.empty += 1,
                RowOutcome::Unrecognized => {
                    summary.unrecognized += 1;
                    summary.reports.push(RowReport {
                        row,
                        input: source.clone(),
                        issue: RowIssue::UnrecognizedLink,
                    });
                }
                RowOutcome::Failed(err) => {
                    summary.failed += 1;
                    summary.reports.push(RowReport {
                        row,
                        input: source.clone(),
                        issue: RowIssue::Fetch(err),
                    });
                }
            }

            destinations.push(value);
        }
        summary.rows = destinations.len();

        if destinations.is_empty() {
            info!("no data rows in the source column, nothing to write");
            return Ok(summary);
        }

        // One update call covering the full range read above. Skipped and
        // failed rows write "" so stale text from a previous run never
        // survives a removed link.
        summary.updated_cells = self
            .sheets
            .write_column(
                &self.config.spreadsheet_id,
                &sheet,
                self.config.dest_column,
                first_data_row,
                &destinations,
            )
            .await
            .map_err(JobError::Write)?;
        info!(cells = summary.updated_cells, "wrote destination column");

        Ok(summary)
    }

    /// Per-row state machine: empty cell -> skip, unrecognized link -> skip,
    /// fetched -> text (capped), failed fetch -> blank. Always returns a
    /// destination value so the caller preserves row alignment.
    async fn process_row(&self, row: u32, source: &str) -> (String, RowOutcome) {
        if source.trim().is_empty() {
            return (String::new(), RowOutcome::EmptySource);
        }

        let Some(id) = extract_document_id(source) else {
            warn!(row, link = %preview(source), "unrecognized link, skipping");
            return (String::new(), RowOutcome::Unrecognized);
        };

        info!(row, document = %id, "fetching document");
        match self.docs.fetch_text(&id).await {
            Ok(text) => {
                let (value, truncated) = truncate_for_cell(&text, self.config.cell_char_limit);
                if truncated {
                    warn!(
                        row,
                        document = %id,
                        chars = text.chars().count(),
                        limit = self.config.cell_char_limit,
                        "content exceeds the cell limit, truncating"
                    );
                }
                info!(row, chars = value.chars().count(), "extracted");
                (value, RowOutcome::Extracted { truncated })
            }
            Err(err) => {
                warn!(row, document = %id, error = %err, "fetch failed, leaving cell blank");
                (String::new(), RowOutcome::Failed(err))
            }
        }
    }
}

/// First 80 characters of a cell, for log lines about long URLs.
fn preview(s: &str) -> String {
    let mut p: String = s.chars().take(80).collect();
    if p.len() < s.len() {
        p.push_str("...");
    }
    p
}

/// Cap text for a destination cell. Counts `char`s, not bytes, since the
/// spreadsheet service's limit is per character; appends a marker so a
/// capped cell is distinguishable from a document that happens to end there.
fn truncate_for_cell(text: &str, limit: usize) -> (String, bool) {
    if text.chars().count() <= limit {
        return (text.to_string(), false);
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if limit <= marker_len {
        return (text.chars().take(limit).collect(), true);
    }

    let mut capped: String = text.chars().take(limit - marker_len).collect();
    capped.push_str(TRUNCATION_MARKER);
    (capped, true)
}

// ============================================================================
// TESTS
// ============================================================================
