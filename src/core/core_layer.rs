// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "links/link_extractor.rs"]
pub mod links;

#[path = "auth/session.rs"]
pub mod auth;

#[path = "job/extraction_job.rs"]
pub mod job;
