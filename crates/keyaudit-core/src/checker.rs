//! Per-item key violation rules.
//!
//! A candidate index key attribute is checked in a fixed order: a value of
//! the wrong kind (including any set) is a type violation; a string or binary
//! value of the right kind that exceeds the role's byte ceiling is a size
//! violation; numbers never size-violate. An absent attribute is not a
//! violation since the index simply skips the item.

use std::fmt;

use crate::encoding::{to_plain, to_typed};
use crate::error::RecordError;
use crate::record::{RoleFinding, SIZE_VIOLATION, TYPE_VIOLATION, ViolationRecord};
use crate::types::{AttributeValue, CandidateKeys, Item, KeyDefinition, KeyRole, KeySchema, KeyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Size,
    Type,
}

impl ViolationKind {
    /// The label written to the violation type column.
    pub fn label(&self) -> &'static str {
        match self {
            ViolationKind::Size => SIZE_VIOLATION,
            ViolationKind::Type => TYPE_VIOLATION,
        }
    }
}

/// What was found instead of an acceptable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Found {
    /// Byte length of an oversized string or binary value.
    Bytes(usize),
    /// Type descriptor of a wrongly typed value (`N`, `SS`, `BOOL`, ...).
    Type(String),
}

impl fmt::Display for Found {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Found::Bytes(n) => write!(f, "{n}"),
            Found::Type(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub role: KeyRole,
    pub expected: KeyType,
    pub found: Found,
    /// The offending value as read from the item.
    pub value: AttributeValue,
}

impl Violation {
    pub fn description(&self) -> String {
        match self.kind {
            ViolationKind::Size => {
                format!("Max Bytes Allowed: {} Found: {}", self.role.max_size(), self.found)
            }
            ViolationKind::Type => format!("Expected: {} Found: {}", self.expected, self.found),
        }
    }
}

/// Check the attribute named by `key` in `item` against its role's contract.
pub fn check(item: &Item, role: KeyRole, key: &KeyDefinition) -> Option<Violation> {
    let value = item.get(&key.name)?;
    let violation = |kind, found| Violation {
        kind,
        role,
        expected: key.key_type,
        found,
        value: value.clone(),
    };

    if value.scalar_type() != Some(key.key_type) {
        return Some(violation(
            ViolationKind::Type,
            Found::Type(value.type_tag().to_string()),
        ));
    }
    let size = match value {
        AttributeValue::S(s) => s.len(),
        AttributeValue::B(b) => b.len(),
        _ => return None,
    };
    if size > role.max_size() {
        return Some(violation(ViolationKind::Size, Found::Bytes(size)));
    }
    None
}

/// Violations of one item, at most one per role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemViolations {
    pub hash: Option<Violation>,
    pub range: Option<Violation>,
}

impl ItemViolations {
    pub fn is_empty(&self) -> bool {
        self.hash.is_none() && self.range.is_none()
    }

    pub fn get(&self, role: KeyRole) -> Option<&Violation> {
        match role {
            KeyRole::Hash => self.hash.as_ref(),
            KeyRole::Range => self.range.as_ref(),
        }
    }
}

/// Applies the rules for every configured candidate role and turns findings
/// into report records.
pub struct ViolationChecker<'a> {
    table_key: &'a KeySchema,
    candidates: &'a CandidateKeys,
    record_values: bool,
}

impl<'a> ViolationChecker<'a> {
    pub fn new(table_key: &'a KeySchema, candidates: &'a CandidateKeys, record_values: bool) -> Self {
        Self {
            table_key,
            candidates,
            record_values,
        }
    }

    pub fn check_item(&self, item: &Item) -> ItemViolations {
        ItemViolations {
            hash: self
                .candidates
                .hash_key
                .as_ref()
                .and_then(|key| check(item, KeyRole::Hash, key)),
            range: self
                .candidates
                .range_key
                .as_ref()
                .and_then(|key| check(item, KeyRole::Range, key)),
        }
    }

    /// Build the report row for `item`, carrying its table key in plain form.
    pub fn record(&self, item: &Item, violations: &ItemViolations) -> Result<ViolationRecord, RecordError> {
        let table_hash_key = self.table_key_cell(item, &self.table_key.hash_key)?;
        let table_range_key = match &self.table_key.range_key {
            Some(range) => Some(self.table_key_cell(item, range)?),
            None => None,
        };
        let finding = |violation: Option<&Violation>| {
            violation.map(|v| RoleFinding {
                value: self.record_values.then(|| to_typed(&v.value)),
                violation_type: v.kind.label(),
                description: v.description(),
            })
        };
        Ok(ViolationRecord {
            table_hash_key,
            table_range_key,
            hash: finding(violations.hash.as_ref()),
            range: finding(violations.range.as_ref()),
        })
    }

    fn table_key_cell(&self, item: &Item, key: &KeyDefinition) -> Result<String, RecordError> {
        let value = item
            .get(&key.name)
            .ok_or_else(|| RecordError::MissingTableKey(key.name.clone()))?;
        to_plain(value).map_err(|_| RecordError::UnsupportedKeyKind {
            name: key.name.clone(),
            tag: value.type_tag().to_string(),
        })
    }
}
