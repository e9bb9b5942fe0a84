//! CLI module for Mirrorflow
//!
//! `catalog` drives the catalog fetch pipeline and lookups, `op` supervises
//! mirroring tool operations. Every command accepts `--json`.

pub mod catalog;
pub mod context;
pub mod error;
pub mod op;
pub mod output;
