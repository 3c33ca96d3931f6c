//! Bundled provider implementations.

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "local")]
pub use local::{LocalDestination, LocalSource};
