//! Core traits defined in `cloudvid-core` and implemented by other crates.

pub mod clock;
pub mod destination;
pub mod source;

pub use clock::{Clock, SystemClock};
pub use destination::DestinationProvider;
pub use source::{ByteStream, SourceProvider};
