// src/process/mod.rs

pub mod ingest;
pub mod project;

pub use ingest::{FileOutcome, FileStatus, Ingestor};
pub use project::{project, PeriodContext};
