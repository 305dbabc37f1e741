//! I/O helpers and collaborator implementations for the orchestrator.

pub mod config;
pub mod fleet;
pub mod process;
pub mod report;
pub mod setup;
pub mod suite;
