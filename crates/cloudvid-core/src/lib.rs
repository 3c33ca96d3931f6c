//! # cloudvid-core
//!
//! Core crate for the CloudVid transfer engine. Contains the unified error
//! system, configuration schemas, typed identifiers, the provider capability
//! traits consumed by the transfer pipeline, and the injectable clock.
//!
//! This crate has **no** internal dependencies on other CloudVid crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
