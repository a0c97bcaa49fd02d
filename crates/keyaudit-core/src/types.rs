//! Core types: attribute values, key definitions, table descriptions.

use std::collections::BTreeMap;
use std::fmt;

/// Maximum hash (partition) key size in bytes (2048, matching DynamoDB).
pub const MAX_HASH_KEY_SIZE: usize = 2048;

/// Maximum range (sort) key size in bytes (1024, matching DynamoDB).
pub const MAX_RANGE_KEY_SIZE: usize = 1024;

/// Maximum number of write requests accepted by one batch write call.
pub const MAX_BATCH_WRITE_SIZE: usize = 25;

/// Provisioned capacity assumed when the backend reports zero (on-demand tables).
pub const DEFAULT_CAPACITY_UNITS: u64 = 100;

/// The scalar type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    Number,
    Binary,
}

impl KeyType {
    /// The one-letter descriptor used in reports (`S`, `N`, `B`).
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "S",
            KeyType::Number => "N",
            KeyType::Binary => "B",
        }
    }

    /// Parse a one-letter descriptor. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "S" => Some(KeyType::String),
            "N" => Some(KeyType::Number),
            "B" => Some(KeyType::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The position a key attribute occupies in a table or index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Hash,
    Range,
}

impl KeyRole {
    /// Size ceiling in bytes for string and binary values in this role.
    pub fn max_size(&self) -> usize {
        match self {
            KeyRole::Hash => MAX_HASH_KEY_SIZE,
            KeyRole::Range => MAX_RANGE_KEY_SIZE,
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::Hash => f.write_str("hash"),
            KeyRole::Range => f.write_str("range"),
        }
    }
}

/// A key attribute definition (name + type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDefinition {
    pub name: String,
    pub key_type: KeyType,
}

impl KeyDefinition {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// The primary key schema of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub hash_key: KeyDefinition,
    pub range_key: Option<KeyDefinition>,
}

impl KeySchema {
    pub fn has_range_key(&self) -> bool {
        self.range_key.is_some()
    }

    /// Names of the key attributes, hash first.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = vec![self.hash_key.name.as_str()];
        if let Some(range) = &self.range_key {
            names.push(range.name.as_str());
        }
        names
    }
}

/// The prospective key of the secondary index being audited.
///
/// Either role may be omitted, but not both; the checker only inspects the
/// roles that are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKeys {
    pub hash_key: Option<KeyDefinition>,
    pub range_key: Option<KeyDefinition>,
}

impl CandidateKeys {
    pub fn get(&self, role: KeyRole) -> Option<&KeyDefinition> {
        match role {
            KeyRole::Hash => self.hash_key.as_ref(),
            KeyRole::Range => self.range_key.as_ref(),
        }
    }

    /// Roles that are configured, hash first.
    pub fn roles(&self) -> impl Iterator<Item = (KeyRole, &KeyDefinition)> {
        self.hash_key
            .iter()
            .map(|k| (KeyRole::Hash, k))
            .chain(self.range_key.iter().map(|k| (KeyRole::Range, k)))
    }
}

/// What `DescribeTable` reports about a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub name: String,
    pub key_schema: KeySchema,
    pub read_capacity_units: u64,
    pub write_capacity_units: u64,
    pub secondary_index_names: Vec<String>,
}

impl TableDescription {
    /// Read capacity used for pacing; on-demand tables report 0.
    pub fn effective_read_capacity(&self) -> f64 {
        effective_capacity(self.read_capacity_units)
    }

    /// Write capacity used for pacing; on-demand tables report 0.
    pub fn effective_write_capacity(&self) -> f64 {
        effective_capacity(self.write_capacity_units)
    }
}

fn effective_capacity(units: u64) -> f64 {
    if units == 0 {
        DEFAULT_CAPACITY_UNITS as f64
    } else {
        units as f64
    }
}

/// A single attribute value as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeValue {
    S(String),
    /// Numbers travel as their decimal text.
    N(String),
    B(Vec<u8>),
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
    /// A value kind that can never be a key (boolean, null, list, map).
    /// `tag` is the backend's type descriptor, `text` a printable rendering.
    Other { tag: String, text: String },
}

impl AttributeValue {
    /// The backend type descriptor (`S`, `N`, `B`, `SS`, `NS`, `BS`, ...).
    pub fn type_tag(&self) -> &str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
            AttributeValue::Other { tag, .. } => tag,
        }
    }

    /// The scalar key type of this value, or `None` for sets and other kinds.
    pub fn scalar_type(&self) -> Option<KeyType> {
        match self {
            AttributeValue::S(_) => Some(KeyType::String),
            AttributeValue::N(_) => Some(KeyType::Number),
            AttributeValue::B(_) => Some(KeyType::Binary),
            _ => None,
        }
    }

    /// Approximate stored size in bytes (used for simulated capacity).
    pub fn byte_size(&self) -> usize {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => s.len(),
            AttributeValue::B(b) => b.len(),
            AttributeValue::Ss(v) | AttributeValue::Ns(v) => v.iter().map(String::len).sum(),
            AttributeValue::Bs(v) => v.iter().map(Vec::len).sum(),
            AttributeValue::Other { text, .. } => text.len(),
        }
    }
}

/// An item: attribute name to value, ordered by name.
pub type Item = BTreeMap<String, AttributeValue>;

/// The key attributes identifying one item.
pub type PrimaryKey = BTreeMap<String, AttributeValue>;

/// Approximate item size: attribute names plus values.
pub fn item_size(item: &Item) -> usize {
    item.iter().map(|(k, v)| k.len() + v.byte_size()).sum()
}

/// Extract the primary key of `item` under `schema`.
///
/// Returns `None` if a key attribute is missing.
pub fn primary_key_of(item: &Item, schema: &KeySchema) -> Option<PrimaryKey> {
    let mut key = PrimaryKey::new();
    for name in schema.attribute_names() {
        key.insert(name.to_string(), item.get(name)?.clone());
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with_range() -> KeySchema {
        KeySchema {
            hash_key: KeyDefinition::new("pk", KeyType::String),
            range_key: Some(KeyDefinition::new("sk", KeyType::Number)),
        }
    }

    #[test]
    fn test_key_type_parse() {
        assert_eq!(KeyType::parse("S"), Some(KeyType::String));
        assert_eq!(KeyType::parse(" N "), Some(KeyType::Number));
        assert_eq!(KeyType::parse("B"), Some(KeyType::Binary));
        assert_eq!(KeyType::parse("SS"), None);
        assert_eq!(KeyType::parse("s"), None);
    }

    #[test]
    fn test_role_max_size() {
        assert_eq!(KeyRole::Hash.max_size(), 2048);
        assert_eq!(KeyRole::Range.max_size(), 1024);
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(AttributeValue::S("a".into()).type_tag(), "S");
        assert_eq!(AttributeValue::Ns(vec!["1".into()]).type_tag(), "NS");
        let other = AttributeValue::Other {
            tag: "BOOL".into(),
            text: "true".into(),
        };
        assert_eq!(other.type_tag(), "BOOL");
        assert_eq!(other.scalar_type(), None);
    }

    #[test]
    fn test_primary_key_of() {
        let mut item = Item::new();
        item.insert("pk".into(), AttributeValue::S("a".into()));
        item.insert("sk".into(), AttributeValue::N("1".into()));
        item.insert("other".into(), AttributeValue::S("x".into()));

        let key = primary_key_of(&item, &schema_with_range()).unwrap();
        assert_eq!(key.len(), 2);
        assert!(!key.contains_key("other"));

        item.remove("sk");
        assert!(primary_key_of(&item, &schema_with_range()).is_none());
    }

    #[test]
    fn test_effective_capacity_fallback() {
        let desc = TableDescription {
            name: "t".into(),
            key_schema: schema_with_range(),
            read_capacity_units: 0,
            write_capacity_units: 40,
            secondary_index_names: vec!["idx".into()],
        };
        assert_eq!(desc.effective_read_capacity(), 100.0);
        assert_eq!(desc.effective_write_capacity(), 40.0);
    }

    #[test]
    fn test_candidate_roles_order() {
        let candidates = CandidateKeys {
            hash_key: Some(KeyDefinition::new("gh", KeyType::String)),
            range_key: Some(KeyDefinition::new("gr", KeyType::Number)),
        };
        let roles: Vec<KeyRole> = candidates.roles().map(|(r, _)| r).collect();
        assert_eq!(roles, vec![KeyRole::Hash, KeyRole::Range]);

        let range_only = CandidateKeys {
            hash_key: None,
            range_key: Some(KeyDefinition::new("gr", KeyType::Number)),
        };
        assert!(range_only.get(KeyRole::Hash).is_none());
        assert_eq!(range_only.roles().count(), 1);
    }
}
