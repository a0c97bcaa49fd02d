//! Violation records and the column layout shared by detection reports and
//! correction input files.

use crate::types::{CandidateKeys, KeyRole, KeySchema};

/// Cell value of the violation type column for an oversized value.
pub const SIZE_VIOLATION: &str = "Size Violation";
/// Cell value of the violation type column for a wrongly typed value.
pub const TYPE_VIOLATION: &str = "Type Violation";

/// A report column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    TableHashKey,
    TableRangeKey,
    /// The offending value, in typed encoding.
    Value(KeyRole),
    ViolationType(KeyRole),
    ViolationDescription(KeyRole),
    /// Filled in by the operator before a correction run.
    UpdateValue(KeyRole),
    DeleteBlank,
    /// Only present in correction failure reports.
    UpdateError,
}

const ALL_COLUMNS: [Column; 12] = [
    Column::TableHashKey,
    Column::TableRangeKey,
    Column::Value(KeyRole::Hash),
    Column::ViolationType(KeyRole::Hash),
    Column::ViolationDescription(KeyRole::Hash),
    Column::UpdateValue(KeyRole::Hash),
    Column::Value(KeyRole::Range),
    Column::ViolationType(KeyRole::Range),
    Column::ViolationDescription(KeyRole::Range),
    Column::UpdateValue(KeyRole::Range),
    Column::DeleteBlank,
    Column::UpdateError,
];

impl Column {
    pub fn title(&self) -> &'static str {
        use KeyRole::{Hash, Range};
        match self {
            Column::TableHashKey => "Table Hash Key",
            Column::TableRangeKey => "Table Range Key",
            Column::Value(Hash) => "GSI Hash Key Value",
            Column::ViolationType(Hash) => "GSI Hash Key Violation Type",
            Column::ViolationDescription(Hash) => "GSI Hash Key Violation Description",
            Column::UpdateValue(Hash) => "GSI Hash Key Update Value(FOR USER)",
            Column::Value(Range) => "GSI Range Key Value",
            Column::ViolationType(Range) => "GSI Range Key Violation Type",
            Column::ViolationDescription(Range) => "GSI Range Key Violation Description",
            Column::UpdateValue(Range) => "GSI Range Key Update Value(FOR USER)",
            Column::DeleteBlank => "Delete Blank Attributes When Updating?(Y/N)",
            Column::UpdateError => "Error While Updating Value",
        }
    }

    /// Look up a column by its header title. Surrounding whitespace is ignored.
    pub fn from_title(title: &str) -> Option<Column> {
        let title = title.trim();
        ALL_COLUMNS.into_iter().find(|c| c.title() == title)
    }
}

/// The findings for one candidate key role of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleFinding {
    /// Typed encoding of the offending value, when value recording is on.
    pub value: Option<String>,
    pub violation_type: &'static str,
    pub description: String,
}

/// One report row: the item's table key plus its findings per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    pub table_hash_key: String,
    pub table_range_key: Option<String>,
    pub hash: Option<RoleFinding>,
    pub range: Option<RoleFinding>,
}

impl ViolationRecord {
    pub fn finding(&self, role: KeyRole) -> Option<&RoleFinding> {
        match role {
            KeyRole::Hash => self.hash.as_ref(),
            KeyRole::Range => self.range.as_ref(),
        }
    }
}

/// The ordered columns of a detection report.
///
/// The table range key column exists only for tables with a range key; each
/// configured candidate role contributes its value column (when values are
/// recorded), violation type, description and update value columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLayout {
    columns: Vec<Column>,
}

impl ReportLayout {
    pub fn new(table: &KeySchema, candidates: &CandidateKeys, record_values: bool) -> Self {
        let mut columns = vec![Column::TableHashKey];
        if table.has_range_key() {
            columns.push(Column::TableRangeKey);
        }
        for (role, _) in candidates.roles() {
            if record_values {
                columns.push(Column::Value(role));
            }
            columns.push(Column::ViolationType(role));
            columns.push(Column::ViolationDescription(role));
            columns.push(Column::UpdateValue(role));
        }
        columns.push(Column::DeleteBlank);
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&'static str> {
        self.columns.iter().map(Column::title).collect()
    }

    /// Cells of `record` in column order. Roles without a finding, update
    /// values and the delete flag are left blank.
    pub fn render(&self, record: &ViolationRecord) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| match column {
                Column::TableHashKey => record.table_hash_key.clone(),
                Column::TableRangeKey => record.table_range_key.clone().unwrap_or_default(),
                Column::Value(role) => record
                    .finding(*role)
                    .and_then(|f| f.value.clone())
                    .unwrap_or_default(),
                Column::ViolationType(role) => record
                    .finding(*role)
                    .map(|f| f.violation_type.to_string())
                    .unwrap_or_default(),
                Column::ViolationDescription(role) => record
                    .finding(*role)
                    .map(|f| f.description.clone())
                    .unwrap_or_default(),
                Column::UpdateValue(_) | Column::DeleteBlank | Column::UpdateError => {
                    String::new()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyDefinition, KeyType};

    fn hash_only_table() -> KeySchema {
        KeySchema {
            hash_key: KeyDefinition::new("id", KeyType::String),
            range_key: None,
        }
    }

    fn both_candidates() -> CandidateKeys {
        CandidateKeys {
            hash_key: Some(KeyDefinition::new("gh", KeyType::String)),
            range_key: Some(KeyDefinition::new("gr", KeyType::Number)),
        }
    }

    #[test]
    fn test_titles_round_trip() {
        for column in ALL_COLUMNS {
            assert_eq!(Column::from_title(column.title()), Some(column));
        }
        assert_eq!(
            Column::from_title(" Table Hash Key "),
            Some(Column::TableHashKey)
        );
        assert_eq!(Column::from_title("Something Else"), None);
    }

    #[test]
    fn test_layout_without_range_key_or_values() {
        let layout = ReportLayout::new(&hash_only_table(), &both_candidates(), false);
        assert_eq!(
            layout.headers(),
            vec![
                "Table Hash Key",
                "GSI Hash Key Violation Type",
                "GSI Hash Key Violation Description",
                "GSI Hash Key Update Value(FOR USER)",
                "GSI Range Key Violation Type",
                "GSI Range Key Violation Description",
                "GSI Range Key Update Value(FOR USER)",
                "Delete Blank Attributes When Updating?(Y/N)",
            ]
        );
    }

    #[test]
    fn test_layout_with_values_and_range_key() {
        let table = KeySchema {
            hash_key: KeyDefinition::new("id", KeyType::String),
            range_key: Some(KeyDefinition::new("ts", KeyType::Number)),
        };
        let candidates = CandidateKeys {
            hash_key: None,
            range_key: Some(KeyDefinition::new("gr", KeyType::Number)),
        };
        let layout = ReportLayout::new(&table, &candidates, true);
        assert_eq!(
            layout.columns(),
            &[
                Column::TableHashKey,
                Column::TableRangeKey,
                Column::Value(KeyRole::Range),
                Column::ViolationType(KeyRole::Range),
                Column::ViolationDescription(KeyRole::Range),
                Column::UpdateValue(KeyRole::Range),
                Column::DeleteBlank,
            ]
        );
    }

    #[test]
    fn test_render_leaves_clean_role_blank() {
        let layout = ReportLayout::new(&hash_only_table(), &both_candidates(), false);
        let record = ViolationRecord {
            table_hash_key: "item-1".into(),
            table_range_key: None,
            hash: None,
            range: Some(RoleFinding {
                value: None,
                violation_type: TYPE_VIOLATION,
                description: "Expected: N Found: S".into(),
            }),
        };
        assert_eq!(
            layout.render(&record),
            vec![
                "item-1",
                "",
                "",
                "",
                "Type Violation",
                "Expected: N Found: S",
                "",
                "",
            ]
        );
    }
}
