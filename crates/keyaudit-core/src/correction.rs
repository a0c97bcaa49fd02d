//! Apply operator corrections from an edited violation report.
//!
//! Two modes exist. Update mode rewrites (or removes) the candidate key
//! attributes of each listed item, optionally guarded by the value recorded at
//! detection time. Delete mode removes every listed item through the batched
//! write path.
//!
//! Header problems abort the run before any write. Problems with a single row
//! are counted, logged and copied to a failure report, and the run continues.

use std::collections::BTreeMap;
use std::iter;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{info, warn};

use crate::backend::{TableBackend, UpdateAction, UpdateOutcome, UpdateRequest};
use crate::config::AuditConfig;
use crate::encoding::{parse_plain, parse_typed};
use crate::error::{Error, InputError, Result};
use crate::rate_limiter::RateLimiter;
use crate::record::Column;
use crate::report::{CorrectionReader, CorrectionRecord, ViolationWriter};
use crate::types::{AttributeValue, KeySchema, PrimaryKey, TableDescription};
use crate::writer::TableWriter;

/// Corrections run on a single worker.
const CORRECTION_WORKERS: u32 = 1;

/// Totals of a finished correction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionSummary {
    /// Rows that produced an update or a delete.
    pub violation_update_requests: u64,
    pub successful_updates: u64,
    pub conditional_update_failures: u64,
    pub unexpected_errors: u64,
    pub items_deleted: u64,
    /// Set when at least one row failed and was copied to the failure report.
    pub failure_report: Option<PathBuf>,
}

impl CorrectionSummary {
    pub fn has_failures(&self) -> bool {
        self.conditional_update_failures > 0 || self.unexpected_errors > 0
    }
}

/// Parse the delete-blank cell. Blank and `N` mean keep, `Y` means remove.
pub fn parse_delete_flag(cell: &str) -> std::result::Result<bool, InputError> {
    let cell = cell.trim();
    if cell.eq_ignore_ascii_case("y") {
        Ok(true)
    } else if cell.is_empty() || cell.eq_ignore_ascii_case("n") {
        Ok(false)
    } else {
        Err(InputError::InvalidDeleteFlag(cell.to_string()))
    }
}

/// Rebuild the table primary key from the key cells of a row.
pub fn primary_key(table_key: &KeySchema, record: &CorrectionRecord) -> Result<PrimaryKey> {
    let mut key = PrimaryKey::new();
    let hash = record
        .get(Column::TableHashKey)
        .ok_or(InputError::MissingColumn(Column::TableHashKey.title()))?;
    key.insert(
        table_key.hash_key.name.clone(),
        parse_plain(table_key.hash_key.key_type, hash)?,
    );
    if let Some(range_key) = &table_key.range_key {
        let range = record
            .get(Column::TableRangeKey)
            .ok_or(InputError::MissingColumn(Column::TableRangeKey.title()))?;
        key.insert(range_key.name.clone(), parse_plain(range_key.key_type, range)?);
    }
    Ok(key)
}

/// Copies failed rows, plus the error, to the failure report.
///
/// The file is only created once the first row fails.
struct FailureReport<'a> {
    path: &'a Path,
    headers: &'a StringRecord,
    writer: Option<ViolationWriter>,
}

impl<'a> FailureReport<'a> {
    fn new(path: &'a Path, headers: &'a StringRecord) -> Self {
        Self {
            path,
            headers,
            writer: None,
        }
    }

    fn append(&mut self, record: &CorrectionRecord, error: &str) -> Result<()> {
        if self.writer.is_none() {
            let headers = self
                .headers
                .iter()
                .chain(iter::once(Column::UpdateError.title()));
            self.writer = Some(ViolationWriter::create(self.path, headers)?);
        }
        let row = record
            .raw()
            .iter()
            .chain(iter::repeat(""))
            .take(self.headers.len())
            .chain(iter::once(error));
        if let Some(writer) = &self.writer {
            writer.write_row(row)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<Option<PathBuf>> {
        match self.writer {
            Some(writer) => {
                writer.flush()?;
                Ok(Some(writer.path().to_path_buf()))
            }
            None => Ok(None),
        }
    }
}

/// Drives a correction run against one table.
pub struct Correction<'a> {
    config: &'a AuditConfig,
    backend: &'a dyn TableBackend,
}

impl<'a> Correction<'a> {
    pub fn new(config: &'a AuditConfig, backend: &'a dyn TableBackend) -> Self {
        Self { config, backend }
    }

    fn open(&self, conditional: bool) -> Result<(TableDescription, CorrectionReader)> {
        let description = self.backend.describe_table(&self.config.table_name)?;
        self.config.check_against_table(&description.key_schema)?;
        let reader = CorrectionReader::open(self.config.correction_input()?)?;
        reader.check_columns(
            &description.key_schema,
            &self.config.candidates,
            conditional,
        )?;
        Ok((description, reader))
    }

    fn table_writer(&self, description: &TableDescription) -> Result<TableWriter<'a>> {
        let limiter = RateLimiter::new(
            description.effective_write_capacity(),
            self.config.read_write_percent,
            CORRECTION_WORKERS,
        )?;
        Ok(TableWriter::new(
            self.backend,
            &self.config.table_name,
            limiter,
        ))
    }

    /// Apply the update values of every row.
    ///
    /// With `conditional`, each edited attribute must still hold the value
    /// recorded at detection time or the row fails with a conditional-check
    /// failure.
    pub fn update_from_file(&self, conditional: bool) -> Result<CorrectionSummary> {
        let (description, mut reader) = self.open(conditional)?;
        let mut writer = self.table_writer(&description)?;
        let headers = reader.headers().clone();
        let mut failures = FailureReport::new(&self.config.correction_output_path, &headers);
        info!(
            table = %self.config.table_name,
            input = %reader.path().display(),
            conditional,
            "starting correction update"
        );

        let mut summary = CorrectionSummary::default();
        while let Some(record) = reader.next_record() {
            let record = record?;
            let result = self
                .plan_update(&description.key_schema, &record, conditional, &mut summary)
                .and_then(|request| match request {
                    Some(request) => Ok(Some(writer.update(&request)?)),
                    None => Ok(None),
                });
            match result {
                Ok(Some(UpdateOutcome::Applied { .. })) => summary.successful_updates += 1,
                Ok(None) => {}
                Ok(Some(UpdateOutcome::ConditionalCheckFailed)) => {
                    summary.conditional_update_failures += 1;
                    warn!(row = ?record.raw(), "conditional check failed");
                    failures.append(&record, "The conditional request failed")?;
                }
                Err(e) => {
                    summary.unexpected_errors += 1;
                    warn!(row = ?record.raw(), error = %e, "correction failed");
                    failures.append(&record, &e.to_string())?;
                }
            }
        }
        summary.failure_report = failures.finish()?;

        info!(
            violation_update_requests = summary.violation_update_requests,
            successful_updates = summary.successful_updates,
            conditional_update_failures = summary.conditional_update_failures,
            unexpected_errors = summary.unexpected_errors,
            failure_report = ?summary.failure_report,
            "correction update finished"
        );
        Ok(summary)
    }

    /// Build the update for one row, or `None` when the row asks for nothing.
    fn plan_update(
        &self,
        table_key: &KeySchema,
        record: &CorrectionRecord,
        conditional: bool,
        summary: &mut CorrectionSummary,
    ) -> Result<Option<UpdateRequest>> {
        let key = primary_key(table_key, record)?;
        let delete_blank = parse_delete_flag(record.get(Column::DeleteBlank).unwrap_or(""))?;

        let mut actions = Vec::new();
        for (role, candidate) in self.config.candidates.roles() {
            if record.non_empty(Column::ViolationType(role)).is_none() {
                continue;
            }
            let update = record
                .non_empty(Column::UpdateValue(role))
                .map(|text| parse_plain(candidate.key_type, text))
                .transpose()?;
            match update {
                Some(value) => actions.push(UpdateAction::Put {
                    name: candidate.name.clone(),
                    value,
                }),
                None if delete_blank => actions.push(UpdateAction::Delete {
                    name: candidate.name.clone(),
                }),
                None => {}
            }
        }
        if actions.is_empty() {
            return Ok(None);
        }
        summary.violation_update_requests += 1;

        let mut expected: BTreeMap<String, AttributeValue> = BTreeMap::new();
        if conditional {
            for (role, candidate) in self.config.candidates.roles() {
                if !actions.iter().any(|a| a.name() == candidate.name) {
                    continue;
                }
                let recorded = record.get(Column::Value(role)).unwrap_or("");
                expected.insert(candidate.name.clone(), parse_typed(recorded)?);
            }
        }

        Ok(Some(UpdateRequest {
            table_name: self.config.table_name.clone(),
            key,
            actions,
            expected,
        }))
    }

    /// Delete every item listed in the input file.
    ///
    /// Rows with blank or malformed table key cells are skipped.
    pub fn delete_from_file(&self) -> Result<CorrectionSummary> {
        let (description, mut reader) = self.open(false)?;
        let mut writer = self.table_writer(&description)?;
        info!(
            table = %self.config.table_name,
            input = %reader.path().display(),
            "starting correction delete"
        );

        let mut summary = CorrectionSummary::default();
        while let Some(record) = reader.next_record() {
            let record = record?;
            match primary_key(&description.key_schema, &record) {
                Ok(key) => {
                    summary.violation_update_requests += 1;
                    summary.items_deleted += writer.add_delete(key)?;
                }
                Err(Error::Encoding(e)) => {
                    warn!(row = ?record.raw(), error = %e, "skipping row with unusable table key");
                }
                Err(e) => return Err(e),
            }
        }
        summary.items_deleted += writer.flush()?;

        info!(
            violation_update_requests = summary.violation_update_requests,
            items_deleted = summary.items_deleted,
            unprocessed = writer.unprocessed_total(),
            "correction delete finished"
        );
        Ok(summary)
    }
}
