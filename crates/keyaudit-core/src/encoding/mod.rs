//! Text encodings for attribute values in report files.
//!
//! Two forms are used:
//!
//! - [`plain`]: the bare value, with its type implied by context (table keys,
//!   operator-supplied update values). Binary values are base64.
//! - [`typed`]: a single-entry JSON object carrying the type tag, used where
//!   the type must survive the round trip (recorded candidate values that feed
//!   conditional updates).

pub mod plain;
pub mod typed;

pub use plain::{parse_plain, to_plain};
pub use typed::{parse_typed, to_typed};
