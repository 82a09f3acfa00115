// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "google_auth/mod.rs"]
pub mod google_auth;

#[path = "google_docs/docs_client.rs"]
pub mod google_docs;

#[path = "google_sheets/sheets_client.rs"]
pub mod google_sheets;
