//! In-process table with DynamoDB-compatible scan, batch delete and update
//! semantics.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;
use xxhash_rust::xxh3::xxh3_64;

use super::{
    BatchDeleteOutcome, ScanPage, ScanRequest, TableBackend, UpdateAction, UpdateOutcome,
    UpdateRequest,
};
use crate::encoding::to_typed;
use crate::error::BackendError;
use crate::types::{
    Item, MAX_BATCH_WRITE_SIZE, PrimaryKey, TableDescription, item_size, primary_key_of,
};

/// Default number of items returned per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

const READ_UNIT_BYTES: usize = 4096;
const WRITE_UNIT_BYTES: usize = 1024;

/// A table held in memory.
///
/// Items are assigned to scan segments by hashing their primary key, so a
/// given item always lands in the same segment for a given segment count.
pub struct MemoryTable {
    description: TableDescription,
    items: RwLock<BTreeMap<PrimaryKey, Item>>,
    page_size: usize,
    report_capacity: bool,
    batch_write_limit: usize,
}

impl MemoryTable {
    pub fn new(description: TableDescription) -> Self {
        Self {
            description,
            items: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            report_capacity: true,
            batch_write_limit: MAX_BATCH_WRITE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Behave like a local store that reports no consumed capacity.
    pub fn without_capacity_reporting(mut self) -> Self {
        self.report_capacity = false;
        self
    }

    /// Process at most `limit` deletes per batch; the rest come back as
    /// unprocessed keys.
    pub fn with_batch_write_limit(mut self, limit: usize) -> Self {
        self.batch_write_limit = limit;
        self
    }

    pub fn description(&self) -> &TableDescription {
        &self.description
    }

    /// Insert or replace an item. The item must carry the table's key.
    pub fn put_item(&self, item: Item) -> Result<(), BackendError> {
        let key = self.key_of(&item)?;
        self.items.write().insert(key, item);
        Ok(())
    }

    pub fn get_item(&self, key: &PrimaryKey) -> Option<Item> {
        self.items.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// The scan segment `key` belongs to out of `total_segments`.
    pub fn segment_of(key: &PrimaryKey, total_segments: u32) -> u32 {
        let mut encoded = String::new();
        for (name, value) in key {
            encoded.push_str(name);
            encoded.push('=');
            encoded.push_str(&to_typed(value));
            encoded.push(';');
        }
        (xxh3_64(encoded.as_bytes()) % u64::from(total_segments.max(1))) as u32
    }

    fn key_of(&self, item: &Item) -> Result<PrimaryKey, BackendError> {
        primary_key_of(item, &self.description.key_schema).ok_or_else(|| {
            BackendError::Validation(format!(
                "item is missing a key attribute of table {}",
                self.description.name
            ))
        })
    }

    fn check_table(&self, table_name: &str) -> Result<(), BackendError> {
        if table_name == self.description.name {
            Ok(())
        } else {
            Err(BackendError::TableNotFound(table_name.to_string()))
        }
    }

    fn capacity(&self, units: f64) -> Option<f64> {
        self.report_capacity.then_some(units)
    }
}

fn project(item: &Item, projection: &[String]) -> Item {
    if projection.is_empty() {
        return item.clone();
    }
    item.iter()
        .filter(|(name, _)| projection.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn read_units(bytes: usize) -> f64 {
    bytes.div_ceil(READ_UNIT_BYTES).max(1) as f64 * 0.5
}

fn write_units(bytes: usize) -> f64 {
    bytes.div_ceil(WRITE_UNIT_BYTES).max(1) as f64
}

impl TableBackend for MemoryTable {
    fn describe_table(&self, table_name: &str) -> Result<TableDescription, BackendError> {
        self.check_table(table_name)?;
        Ok(self.description.clone())
    }

    fn scan(&self, request: &ScanRequest<'_>) -> Result<ScanPage, BackendError> {
        self.check_table(request.table_name)?;
        if request.total_segments == 0 || request.segment >= request.total_segments {
            return Err(BackendError::Validation(format!(
                "segment {} is out of range for {} total segments",
                request.segment, request.total_segments
            )));
        }

        let items = self.items.read();
        let lower = match &request.exclusive_start_key {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let mut in_segment = items
            .range::<PrimaryKey, _>((lower, Bound::Unbounded))
            .filter(|(key, _)| Self::segment_of(key, request.total_segments) == request.segment);

        let mut page = Vec::new();
        let mut scanned_bytes = 0;
        let mut last_key = None;
        for (key, item) in in_segment.by_ref().take(self.page_size) {
            scanned_bytes += item_size(item);
            page.push(project(item, request.projection));
            last_key = Some(key.clone());
        }
        let has_more = in_segment.next().is_some();

        Ok(ScanPage {
            items: page,
            last_evaluated_key: if has_more { last_key } else { None },
            consumed_capacity: self.capacity(read_units(scanned_bytes)),
        })
    }

    fn batch_delete(
        &self,
        table_name: &str,
        keys: &[PrimaryKey],
    ) -> Result<BatchDeleteOutcome, BackendError> {
        self.check_table(table_name)?;
        if keys.len() > MAX_BATCH_WRITE_SIZE {
            return Err(BackendError::Validation(format!(
                "batch of {} deletes exceeds the limit of {MAX_BATCH_WRITE_SIZE}",
                keys.len()
            )));
        }

        let split = keys.len().min(self.batch_write_limit);
        let (processed, unprocessed) = keys.split_at(split);
        let mut items = self.items.write();
        let mut units = 0.0;
        for key in processed {
            let bytes = items.remove(key).map(|item| item_size(&item)).unwrap_or(0);
            units += write_units(bytes);
        }

        Ok(BatchDeleteOutcome {
            unprocessed: unprocessed.to_vec(),
            consumed_capacity: self.capacity(units),
        })
    }

    fn update_item(&self, request: &UpdateRequest) -> Result<UpdateOutcome, BackendError> {
        self.check_table(&request.table_name)?;
        let key_names = self.description.key_schema.attribute_names();
        if let Some(action) = request
            .actions
            .iter()
            .find(|a| key_names.contains(&a.name()))
        {
            return Err(BackendError::Validation(format!(
                "cannot update key attribute '{}'",
                action.name()
            )));
        }
        if request.key.len() != key_names.len()
            || !key_names.iter().all(|n| request.key.contains_key(*n))
        {
            return Err(BackendError::Validation(
                "the provided key does not match the table key schema".to_string(),
            ));
        }

        let mut items = self.items.write();
        let existing = items.get(&request.key);
        for (name, expected) in &request.expected {
            if existing.and_then(|item| item.get(name)) != Some(expected) {
                return Ok(UpdateOutcome::ConditionalCheckFailed);
            }
        }

        let creates = request
            .actions
            .iter()
            .any(|a| matches!(a, UpdateAction::Put { .. }));
        if !creates && !items.contains_key(&request.key) {
            return Ok(UpdateOutcome::Applied {
                consumed_capacity: self.capacity(write_units(0)),
            });
        }
        let item = items
            .entry(request.key.clone())
            .or_insert_with(|| request.key.clone());
        for action in &request.actions {
            match action {
                UpdateAction::Put { name, value } => {
                    item.insert(name.clone(), value.clone());
                }
                UpdateAction::Delete { name } => {
                    item.remove(name);
                }
            }
        }

        Ok(UpdateOutcome::Applied {
            consumed_capacity: self.capacity(write_units(item_size(item))),
        })
    }
}
