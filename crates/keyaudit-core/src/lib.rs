//! keyaudit-core: find and repair item values that a new secondary index key
//! cannot hold.
//!
//! A scan ([`scan::TableReader`]) walks the whole table in parallel segments,
//! paced by the table's provisioned capacity, and checks each item's candidate
//! index key attributes for type and size problems. Findings go to a CSV
//! report which an operator can edit and feed back to a correction run
//! ([`correction::Correction`]).

pub mod backend;
pub mod checker;
pub mod config;
pub mod correction;
pub mod encoding;
pub mod error;
pub mod rate_limiter;
pub mod record;
pub mod report;
pub mod scan;
pub mod types;
pub mod writer;

pub use backend::{MemoryTable, TableBackend};
pub use config::AuditConfig;
pub use correction::{Correction, CorrectionSummary};
pub use error::{Error, Result};
pub use scan::{DetectionMode, ScanSummary, TableReader};
