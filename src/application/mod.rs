//! Application services: the tracker, its registry and engagement reporting.

pub mod analytics;
pub mod error;
pub mod registry;
pub mod repos;
pub mod tracker;
