//! CLI command handlers

pub mod ask;
pub mod config;
pub mod ingest;
pub mod memory;
