//! Best-effort visitor session tracking: one tracker per browsing visit, fire-and-forget
//! writes to a row store, and per-page engagement summaries.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
