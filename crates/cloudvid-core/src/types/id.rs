//! Typed identifiers for jobs and batches.
//!
//! Both wrap a UUID v7, so identifiers minted later sort later. With the
//! `sqlx` feature they map transparently onto PostgreSQL `UUID` columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a transfer job.
    JobId
);

define_id!(
    /// Identifier shared by all jobs admitted in one batch enqueue.
    BatchId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert_ne!(BatchId::new(), BatchId::new());
    }

    #[test]
    fn test_parse_accepts_display_form() {
        let id = JobId::new();
        let parsed: JobId = format!(" {id}\n").parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-job".parse::<JobId>().is_err());
    }
}
