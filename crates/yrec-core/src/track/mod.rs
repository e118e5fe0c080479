//! YREC evolutionary tracks: ingestion, loading and classification.

pub mod classify;
pub mod ingest;
pub mod loader;
pub mod table;
