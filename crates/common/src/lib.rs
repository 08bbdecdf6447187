//! Shared configuration and error types for the mxlimit workspace.

pub mod config;
pub mod error;

pub use config::*;
pub use error::{LimitError, LimitResult};
