//! CSV report files: the shared violation writer and the correction reader.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::StringRecord;
use parking_lot::Mutex;

use crate::error::{InputError, ReportError};
use crate::record::{Column, ReportLayout, ViolationRecord};
use crate::types::{CandidateKeys, KeyRole, KeySchema};

/// Append-only CSV sink shared by all scan workers.
///
/// The file is truncated and the header written once at creation. Each row is
/// written under the lock, so rows from different workers never interleave.
pub struct ViolationWriter {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl ViolationWriter {
    pub fn create<I, T>(path: &Path, headers: I) -> Result<Self, ReportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let file = File::create(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(headers)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    /// Create a detection report with the header of `layout`.
    pub fn for_layout(path: &Path, layout: &ReportLayout) -> Result<Self, ReportError> {
        Self::create(path, layout.headers())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_row<I, T>(&self, row: I) -> Result<(), ReportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.lock().write_record(row)?;
        Ok(())
    }

    pub fn write_record(
        &self,
        layout: &ReportLayout,
        record: &ViolationRecord,
    ) -> Result<(), ReportError> {
        self.write_row(layout.render(record))
    }

    pub fn flush(&self) -> Result<(), ReportError> {
        self.writer
            .lock()
            .flush()
            .map_err(|source| ReportError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Header title to column position.
#[derive(Debug, Default)]
struct ColumnIndex {
    positions: HashMap<Column, usize>,
}

/// Streams the rows of a correction input file.
///
/// Any header row carrying the known column titles is accepted, so operators
/// may reorder columns or drop the ones they do not need.
pub struct CorrectionReader {
    path: PathBuf,
    headers: StringRecord,
    index: Arc<ColumnIndex>,
    reader: csv::Reader<File>,
}

impl CorrectionReader {
    pub fn open(path: &Path) -> Result<Self, ReportError> {
        let file = File::open(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = reader.headers()?.clone();
        let mut index = ColumnIndex::default();
        for (position, title) in headers.iter().enumerate() {
            if let Some(column) = Column::from_title(title) {
                index.positions.entry(column).or_insert(position);
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            index: Arc::new(index),
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.index.positions.contains_key(&column)
    }

    /// Check that the header carries the columns a correction run needs.
    ///
    /// The table key columns must match the table's key schema. With
    /// conditional updates, every configured candidate role also needs its
    /// recorded value column, and no value column may name an unconfigured
    /// role.
    pub fn check_columns(
        &self,
        table_key: &KeySchema,
        candidates: &CandidateKeys,
        conditional: bool,
    ) -> Result<(), InputError> {
        if !self.has_column(Column::TableHashKey) {
            return Err(InputError::MissingColumn(Column::TableHashKey.title()));
        }
        match (
            table_key.has_range_key(),
            self.has_column(Column::TableRangeKey),
        ) {
            (true, false) => {
                return Err(InputError::MissingColumn(Column::TableRangeKey.title()));
            }
            (false, true) => {
                return Err(InputError::UnexpectedColumn(Column::TableRangeKey.title()));
            }
            _ => {}
        }
        if conditional {
            for role in [KeyRole::Hash, KeyRole::Range] {
                let column = Column::Value(role);
                match (candidates.get(role).is_some(), self.has_column(column)) {
                    (true, false) => return Err(InputError::MissingColumn(column.title())),
                    (false, true) => return Err(InputError::UnexpectedColumn(column.title())),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// The next row, or `None` at end of file.
    pub fn next_record(&mut self) -> Option<Result<CorrectionRecord, ReportError>> {
        let mut raw = StringRecord::new();
        match self.reader.read_record(&mut raw) {
            Ok(true) => Some(Ok(CorrectionRecord {
                index: Arc::clone(&self.index),
                raw,
            })),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl Iterator for CorrectionReader {
    type Item = Result<CorrectionRecord, ReportError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

/// One row of a correction input file.
#[derive(Debug, Clone)]
pub struct CorrectionRecord {
    index: Arc<ColumnIndex>,
    raw: StringRecord,
}

impl CorrectionRecord {
    /// The cell under `column`; `None` if the file has no such column. Short
    /// rows read as empty cells.
    pub fn get(&self, column: Column) -> Option<&str> {
        let position = *self.index.positions.get(&column)?;
        Some(self.raw.get(position).unwrap_or(""))
    }

    /// The cell under `column`, with a missing column or blank cell as `None`.
    pub fn non_empty(&self, column: Column) -> Option<&str> {
        self.get(column).filter(|cell| !cell.is_empty())
    }

    /// The row exactly as read.
    pub fn raw(&self) -> &StringRecord {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use tempfile::tempdir;

    use super::*;
    use crate::record::RoleFinding;
    use crate::types::{KeyDefinition, KeyType};

    fn table_key(with_range: bool) -> KeySchema {
        KeySchema {
            hash_key: KeyDefinition::new("id", KeyType::String),
            range_key: with_range.then(|| KeyDefinition::new("ts", KeyType::Number)),
        }
    }

    fn hash_candidate() -> CandidateKeys {
        CandidateKeys {
            hash_key: Some(KeyDefinition::new("gh", KeyType::String)),
            range_key: None,
        }
    }

    #[test]
    fn test_writer_truncates_and_writes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        fs::write(&path, "stale contents\nmore\n").unwrap();

        let writer = ViolationWriter::create(&path, ["a", "b"]).unwrap();
        writer.write_row(["1", "x, with comma"]).unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a,b\n1,\"x, with comma\"\n");
    }

    #[test]
    fn test_concurrent_rows_do_not_interleave() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let writer = ViolationWriter::create(&path, ["worker", "row"]).unwrap();

        thread::scope(|s| {
            for w in 0..4 {
                let writer = &writer;
                s.spawn(move || {
                    for r in 0..50 {
                        writer
                            .write_row([w.to_string(), "x".repeat(r * 10)])
                            .unwrap();
                    }
                });
            }
        });
        writer.flush().unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 200);
        assert!(rows.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_reader_round_trips_detection_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let layout = ReportLayout::new(&table_key(true), &hash_candidate(), true);
        let writer = ViolationWriter::for_layout(&path, &layout).unwrap();
        writer
            .write_record(
                &layout,
                &ViolationRecord {
                    table_hash_key: "a,b".into(),
                    table_range_key: Some("7".into()),
                    hash: Some(RoleFinding {
                        value: Some(r#"{"N":"1"}"#.into()),
                        violation_type: "Type Violation",
                        description: "Expected: S Found: N".into(),
                    }),
                    range: None,
                },
            )
            .unwrap();
        writer.flush().unwrap();

        let mut reader = CorrectionReader::open(&path).unwrap();
        assert_eq!(reader.headers().len(), layout.columns().len());
        reader
            .check_columns(&table_key(true), &hash_candidate(), true)
            .unwrap();

        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.get(Column::TableHashKey), Some("a,b"));
        assert_eq!(record.get(Column::TableRangeKey), Some("7"));
        assert_eq!(record.get(Column::Value(KeyRole::Hash)), Some(r#"{"N":"1"}"#));
        assert_eq!(record.non_empty(Column::UpdateValue(KeyRole::Hash)), None);
        assert_eq!(record.get(Column::ViolationType(KeyRole::Range)), None);
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_short_rows_read_as_blank() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        fs::write(
            &path,
            "Table Hash Key,GSI Hash Key Violation Type,Delete Blank Attributes When Updating?(Y/N)\nk1\n",
        )
        .unwrap();
        let mut reader = CorrectionReader::open(&path).unwrap();
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.get(Column::TableHashKey), Some("k1"));
        assert_eq!(record.get(Column::DeleteBlank), Some(""));
        assert_eq!(record.raw().len(), 1);
    }

    #[test]
    fn test_check_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");

        fs::write(&path, "GSI Hash Key Violation Type\n").unwrap();
        let reader = CorrectionReader::open(&path).unwrap();
        match reader.check_columns(&table_key(false), &hash_candidate(), false) {
            Err(InputError::MissingColumn("Table Hash Key")) => {}
            other => panic!("expected missing hash key column, got {other:?}"),
        }

        fs::write(&path, "Table Hash Key\n").unwrap();
        let reader = CorrectionReader::open(&path).unwrap();
        match reader.check_columns(&table_key(true), &hash_candidate(), false) {
            Err(InputError::MissingColumn("Table Range Key")) => {}
            other => panic!("expected missing range key column, got {other:?}"),
        }
        match reader.check_columns(&table_key(false), &hash_candidate(), true) {
            Err(InputError::MissingColumn("GSI Hash Key Value")) => {}
            other => panic!("expected missing value column, got {other:?}"),
        }
        assert!(
            reader
                .check_columns(&table_key(false), &hash_candidate(), false)
                .is_ok()
        );

        fs::write(&path, "Table Hash Key,Table Range Key\n").unwrap();
        let reader = CorrectionReader::open(&path).unwrap();
        match reader.check_columns(&table_key(false), &hash_candidate(), false) {
            Err(InputError::UnexpectedColumn("Table Range Key")) => {}
            other => panic!("expected unexpected range key column, got {other:?}"),
        }

        fs::write(&path, "Table Hash Key,GSI Hash Key Value,GSI Range Key Value\n").unwrap();
        let reader = CorrectionReader::open(&path).unwrap();
        match reader.check_columns(&table_key(false), &hash_candidate(), true) {
            Err(InputError::UnexpectedColumn("GSI Range Key Value")) => {}
            other => panic!("expected unexpected range value column, got {other:?}"),
        }
    }

    #[test]
    fn test_open_missing_file() {
        match CorrectionReader::open(Path::new("/nonexistent/input.csv")) {
            Err(ReportError::Io { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/input.csv"))
            }
            Err(e) => panic!("expected Io error, got {e:?}"),
            Ok(_) => panic!("expected Io error, got a reader"),
        }
    }
}
