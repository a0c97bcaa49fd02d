//! Parallel violation scan.
//!
//! The table is split into `num_segments` disjoint segments. Each segment is
//! scanned by its own named thread with its own rate limiters and delete
//! buffer; the only shared state is the report writer and a set of atomic
//! counters. Item and violation limits are checked against those shared
//! counters, so the aggregate may pass a limit by at most one item per other
//! segment before every worker notices.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::{debug, info};

use crate::backend::{ScanRequest, TableBackend};
use crate::checker::ViolationChecker;
use crate::config::AuditConfig;
use crate::error::{Error, RecordError, Result};
use crate::rate_limiter::RateLimiter;
use crate::record::ReportLayout;
use crate::report::ViolationWriter;
use crate::types::{KeySchema, TableDescription, primary_key_of};
use crate::writer::TableWriter;

/// What to do with the violating items a scan finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Only report violations.
    Keep,
    /// Report violations and delete the offending items.
    Delete,
}

/// Process-wide progress shared by all segment workers.
#[derive(Debug, Default)]
pub struct ScanCounters {
    items_scanned: AtomicU64,
    violations_found: AtomicU64,
    violations_deleted: AtomicU64,
}

impl ScanCounters {
    pub fn items_scanned(&self) -> u64 {
        self.items_scanned.load(Ordering::Relaxed)
    }

    pub fn violations_found(&self) -> u64 {
        self.violations_found.load(Ordering::Relaxed)
    }

    pub fn violations_deleted(&self) -> u64 {
        self.violations_deleted.load(Ordering::Relaxed)
    }
}

/// Totals of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub items_scanned: u64,
    pub violations_found: u64,
    pub violations_deleted: u64,
}

/// Item and violation ceilings, `None` meaning unlimited.
#[derive(Debug, Clone, Copy)]
struct Limits {
    items: Option<u64>,
    violations: Option<u64>,
}

impl Limits {
    fn reached(&self, counters: &ScanCounters) -> bool {
        self.items.is_some_and(|l| counters.items_scanned() >= l)
            || self.violations.is_some_and(|l| counters.violations_found() >= l)
    }
}

/// Drives a full-table violation scan.
pub struct TableReader<'a> {
    config: &'a AuditConfig,
    backend: &'a dyn TableBackend,
}

impl<'a> TableReader<'a> {
    pub fn new(config: &'a AuditConfig, backend: &'a dyn TableBackend) -> Self {
        Self { config, backend }
    }

    /// Describe the table and reject candidate keys that clash with its key.
    pub fn describe(&self) -> Result<TableDescription> {
        let description = self.backend.describe_table(&self.config.table_name)?;
        self.config.check_against_table(&description.key_schema)?;
        Ok(description)
    }

    /// Scan every segment and wait for all of them to finish.
    ///
    /// The detection report is (re)created when detail recording is on.
    /// Configuration problems surface before any worker starts; the first
    /// worker failure is returned once every worker has stopped.
    pub fn scan(&self, mode: DetectionMode) -> Result<ScanSummary> {
        let config = self.config;
        let description = self.describe()?;
        let table_key = &description.key_schema;
        let segments = config.num_segments;

        let layout = ReportLayout::new(table_key, &config.candidates, config.record_values);
        let report = if config.record_details {
            Some(ViolationWriter::for_layout(
                &config.detection_output_path,
                &layout,
            )?)
        } else {
            None
        };

        let mut projection: Vec<String> = table_key
            .attribute_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        projection.extend(config.candidates.roles().map(|(_, k)| k.name.clone()));

        let mut workers = Vec::with_capacity(segments as usize);
        for segment in 0..segments {
            let read_limiter = RateLimiter::new(
                description.effective_read_capacity(),
                config.read_write_percent,
                segments,
            )?;
            let delete_limiter = match mode {
                DetectionMode::Delete => Some(RateLimiter::new(
                    description.effective_write_capacity(),
                    config.read_write_percent,
                    segments,
                )?),
                DetectionMode::Keep => None,
            };
            workers.push((segment, read_limiter, delete_limiter));
        }

        info!(
            table = %config.table_name,
            segments,
            ?mode,
            read_permits_per_second = workers
                .first()
                .map(|(_, l, _)| l.permits_per_second())
                .unwrap_or_default(),
            "starting violation scan"
        );

        let counters = ScanCounters::default();
        let limits = Limits {
            items: config.record_limit,
            violations: config.violation_limit,
        };
        let checker = ViolationChecker::new(table_key, &config.candidates, config.record_values);

        let results: Vec<Result<()>> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers.len());
            for (segment, read_limiter, delete_limiter) in workers {
                let scanner = SegmentScanner {
                    segment,
                    total_segments: segments,
                    table_name: &config.table_name,
                    table_key,
                    backend: self.backend,
                    projection: &projection,
                    checker: &checker,
                    layout: &layout,
                    report: report.as_ref(),
                    read_limiter,
                    deleter: delete_limiter
                        .map(|l| TableWriter::new(self.backend, &config.table_name, l)),
                    counters: &counters,
                    limits,
                };
                handles.push(spawn_segment(
                    s,
                    thread::Builder::new(),
                    segment,
                    move || scanner.run(),
                ));
            }
            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(h) => h
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                    Err(e) => Err(e),
                })
                .collect()
        });

        if let Some(report) = &report {
            report.flush()?;
        }
        results.into_iter().collect::<Result<()>>()?;

        let summary = ScanSummary {
            items_scanned: counters.items_scanned(),
            violations_found: counters.violations_found(),
            violations_deleted: counters.violations_deleted(),
        };
        info!(
            items_scanned = summary.items_scanned,
            violations_found = summary.violations_found,
            violations_deleted = summary.violations_deleted,
            report = ?report.as_ref().map(|r| r.path()),
            "violation scan finished"
        );
        Ok(summary)
    }
}

/// Start the named worker thread of one segment.
fn spawn_segment<'scope, T, F>(
    scope: &'scope thread::Scope<'scope, '_>,
    builder: thread::Builder,
    segment: u32,
    work: F,
) -> Result<thread::ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    builder
        .name(format!("segment-{segment}"))
        .spawn_scoped(scope, work)
        .map_err(|source| Error::WorkerSpawn { segment, source })
}

/// Per-segment worker state, built before the thread starts.
struct SegmentScanner<'a> {
    segment: u32,
    total_segments: u32,
    table_name: &'a str,
    table_key: &'a KeySchema,
    backend: &'a dyn TableBackend,
    projection: &'a [String],
    checker: &'a ViolationChecker<'a>,
    layout: &'a ReportLayout,
    report: Option<&'a ViolationWriter>,
    read_limiter: RateLimiter,
    deleter: Option<TableWriter<'a>>,
    counters: &'a ScanCounters,
    limits: Limits,
}

impl SegmentScanner<'_> {
    fn run(mut self) -> Result<()> {
        let mut cursor = None;
        let mut scanned_here = 0u64;
        let mut found_here = 0u64;
        let mut deleted_here = 0u64;

        while !self.limits.reached(self.counters) {
            let page = self.backend.scan(&ScanRequest {
                table_name: self.table_name,
                segment: self.segment,
                total_segments: self.total_segments,
                projection: self.projection,
                exclusive_start_key: cursor.take(),
            })?;
            if let Some(units) = page.consumed_capacity {
                self.read_limiter.consume(units);
            }

            let mut limit_reached = false;
            for item in &page.items {
                let violations = self.checker.check_item(item);
                if !violations.is_empty() {
                    self.counters.violations_found.fetch_add(1, Ordering::Relaxed);
                    found_here += 1;
                    debug!(segment = self.segment, ?violations, "violation found");
                    if let Some(report) = self.report {
                        let record = self.checker.record(item, &violations)?;
                        report.write_record(self.layout, &record)?;
                    }
                    if let Some(deleter) = &mut self.deleter {
                        let key = primary_key_of(item, self.table_key).ok_or_else(|| {
                            RecordError::MissingTableKey(self.table_key.hash_key.name.clone())
                        })?;
                        let deleted = deleter.add_delete(key)?;
                        self.counters
                            .violations_deleted
                            .fetch_add(deleted, Ordering::Relaxed);
                        deleted_here += deleted;
                    }
                }
                self.counters.items_scanned.fetch_add(1, Ordering::Relaxed);
                scanned_here += 1;
                if self.limits.reached(self.counters) {
                    limit_reached = true;
                    break;
                }
            }

            if let Some(deleter) = &mut self.deleter {
                let deleted = deleter.flush()?;
                self.counters
                    .violations_deleted
                    .fetch_add(deleted, Ordering::Relaxed);
                deleted_here += deleted;
            }
            info!(
                segment = self.segment,
                items_scanned = self.counters.items_scanned(),
                segment_items_scanned = scanned_here,
                segment_violations_found = found_here,
                segment_violations_deleted = deleted_here,
                "scan progress"
            );

            match page.last_evaluated_key {
                Some(key) if !limit_reached => cursor = Some(key),
                _ => break,
            }
        }
        Ok(())
    }
}
