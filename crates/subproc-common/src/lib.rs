//! # Subproc Common
//!
//! Shared types for the subproc workspace:
//! - The [`Error`] taxonomy and [`Result`] alias used by every crate
//! - The [`ExitStatus`] model for reaped children
//! - [`format_status`] for human-readable status reporting

pub mod errors;
pub mod types;

pub use errors::{Error, Result};
pub use types::{format_status, ExitStatus};
