// This is the entry point of the extractor.
//
// **Architecture Overview:**
// - `core/` = Business logic (no HTTP)
// - `infra/` = Implementations of core traits (Google APIs, token storage)
//
// This file's job is to:
// 1. Parse the command line
// 2. Pick a session provider and verify it can mint a token
// 3. Wire the clients into the job (dependency injection)
// 4. Run the batch once and print the summary

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a pair of mod.rs files that both look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::core::auth::SessionProvider;
use crate::core::job::{
    ExtractionJob, JobConfig, JobSummary, RowIssue, DEFAULT_CELL_CHAR_LIMIT,
};
use crate::infra::google_auth::{InstalledFlowProvider, ServiceAccountProvider, TokenCache};
use crate::infra::google_docs::DocsApiClient;
use crate::infra::google_sheets::SheetsApiClient;

#[derive(Parser)]
#[command(
    name = "gdoc-extract",
    about = "Extracts the text of linked Google Docs into a spreadsheet column"
)]
struct Cli {
    /// Spreadsheet to process; falls back to the SPREADSHEET_ID environment variable
    #[arg(long)]
    spreadsheet_id: Option<String>,

    /// Sheet tab title (default: the spreadsheet's first tab)
    #[arg(long)]
    sheet: Option<String>,

    /// 1-indexed column holding the document links
    #[arg(long, default_value_t = 18)]
    source_column: u32,

    /// 1-indexed column receiving the extracted text
    #[arg(long, default_value_t = 19)]
    dest_column: u32,

    /// Process row 1 too, instead of treating it as a header
    #[arg(long)]
    no_header: bool,

    /// Max characters written to one destination cell
    #[arg(long, default_value_t = DEFAULT_CELL_CHAR_LIMIT)]
    cell_limit: usize,

    /// OAuth client credentials file for the interactive flow
    #[arg(long, default_value = "credentials.json")]
    credentials: String,

    /// Where the refresh token is cached between runs
    #[arg(long, default_value = "token.json")]
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let spreadsheet_id = cli
        .spreadsheet_id
        .or_else(|| std::env::var("SPREADSHEET_ID").ok());
    let spreadsheet_id = match spreadsheet_id {
        Some(id) => id,
        None => anyhow::bail!("no spreadsheet given: pass --spreadsheet-id or set SPREADSHEET_ID"),
    };

    if cli.source_column == 0 || cli.dest_column == 0 {
        anyhow::bail!("columns are 1-indexed; 0 is not a valid column");
    }
    if cli.source_column == cli.dest_column {
        anyhow::bail!("source and destination columns must differ");
    }

    let mut config = JobConfig::new(spreadsheet_id);
    config.sheet_title = cli.sheet;
    config.source_column = cli.source_column;
    config.dest_column = cli.dest_column;
    config.skip_header = !cli.no_header;
    config.cell_char_limit = cli.cell_limit;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Pick a session provider and hand it to both API clients. Service
    // account credentials win when present so deployments never block on a
    // browser; otherwise the installed-app flow handles consent and caching.

    let provider: Arc<dyn SessionProvider> = if ServiceAccountProvider::configured_in_env() {
        info!("using service account credentials from the environment");
        Arc::new(ServiceAccountProvider::from_env().await?)
    } else {
        info!("using installed-app credentials from {}", cli.credentials);
        let cache = TokenCache::new(&cli.token);
        Arc::new(InstalledFlowProvider::from_file(&cli.credentials, cache).await?)
    };

    // Authorization problems abort here, before any row is touched.
    provider.access_token().await?;

    let docs = DocsApiClient::new(Arc::clone(&provider));
    let sheets = SheetsApiClient::new(Arc::clone(&provider));
    let job = ExtractionJob::new(docs, sheets, config);

    let summary = job.run().await?;
    print_summary(&summary);

    Ok(())
}

/// End-of-run report. Row-level problems are listed here and never affect
/// the exit code; only fatal errors do.
fn print_summary(summary: &JobSummary) {
    println!();
    println!("Rows processed: {}", summary.rows);
    println!("  extracted:    {}", summary.extracted);
    println!("  empty:        {}", summary.empty);
    println!("  unrecognized: {}", summary.unrecognized);
    println!("  failed:       {}", summary.failed);
    if summary.truncated > 0 {
        println!("  truncated:    {}", summary.truncated);
    }
    println!("Cells updated:  {}", summary.updated_cells);

    if !summary.reports.is_empty() {
        println!("\nRows needing attention:");
        for report in &summary.reports {
            match &report.issue {
                RowIssue::UnrecognizedLink => println!(
                    "  row {}: unrecognized link: {}",
                    report.row,
                    truncate(&report.input, 60)
                ),
                RowIssue::Fetch(err) => println!(
                    "  row {}: {} ({})",
                    report.row,
                    err,
                    truncate(&report.input, 60)
                ),
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
