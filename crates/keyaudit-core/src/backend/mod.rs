//! The remote table seam.
//!
//! [`TableBackend`] is the four-operation view of a key-value store that the
//! scanner, writer and correction engine need. [`MemoryTable`] serves tests
//! and dry runs; `DynamoDbBackend` talks to the real service.

use std::collections::BTreeMap;

use crate::error::BackendError;
use crate::types::{AttributeValue, Item, PrimaryKey, TableDescription};

#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoDbBackend;
pub use memory::MemoryTable;

/// One page request of a parallel scan.
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    pub table_name: &'a str,
    pub segment: u32,
    pub total_segments: u32,
    /// Attributes to return; empty means all.
    pub projection: &'a [String],
    /// Cursor returned by the previous page of the same segment.
    pub exclusive_start_key: Option<PrimaryKey>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// `None` once the segment is exhausted.
    pub last_evaluated_key: Option<PrimaryKey>,
    /// `None` when the backend does not report capacity.
    pub consumed_capacity: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchDeleteOutcome {
    /// Keys the backend declined to process.
    pub unprocessed: Vec<PrimaryKey>,
    pub consumed_capacity: Option<f64>,
}

/// An individual attribute change within an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    /// Replace (or create) the attribute.
    Put { name: String, value: AttributeValue },
    /// Remove the attribute. Silent no-op if it does not exist.
    Delete { name: String },
}

impl UpdateAction {
    pub fn name(&self) -> &str {
        match self {
            UpdateAction::Put { name, .. } | UpdateAction::Delete { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub table_name: String,
    pub key: PrimaryKey,
    pub actions: Vec<UpdateAction>,
    /// Attribute values that must currently exist and be equal for the
    /// update to apply. Empty means unconditional.
    pub expected: BTreeMap<String, AttributeValue>,
}

/// Result of a single-item update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied { consumed_capacity: Option<f64> },
    /// An expected value did not match; nothing was written.
    ConditionalCheckFailed,
}

/// A remote key-value table.
///
/// Implementations are shared by reference across scan workers, so every
/// operation takes `&self`.
pub trait TableBackend: Send + Sync {
    fn describe_table(&self, table_name: &str) -> Result<TableDescription, BackendError>;

    fn scan(&self, request: &ScanRequest<'_>) -> Result<ScanPage, BackendError>;

    /// Delete up to 25 items in one call.
    fn batch_delete(
        &self,
        table_name: &str,
        keys: &[PrimaryKey],
    ) -> Result<BatchDeleteOutcome, BackendError>;

    fn update_item(&self, request: &UpdateRequest) -> Result<UpdateOutcome, BackendError>;
}
