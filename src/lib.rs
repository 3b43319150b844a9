//! Bronze-layer import of NCUA 5300 call report data.
//!
//! Each quarterly archive holds a fixed set of comma-delimited text files; each
//! file lands verbatim in its own `bronze_*` table, one row per credit union per
//! quarter. Columns are discovered from file headers and added to the destination
//! table on the fly, and rows are upserted on `(cu_number, year, quarter)` so any
//! period can be re-imported safely.

pub mod config;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod period;
pub mod process;
pub mod schema;
pub mod source;
pub mod store;

pub use orchestrator::{Orchestrator, RunSummary};
pub use period::Period;
