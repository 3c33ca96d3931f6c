//! Upload budget entities.

pub mod state;

pub use state::QuotaState;
