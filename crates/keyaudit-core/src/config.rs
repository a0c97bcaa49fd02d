//! Run configuration.
//!
//! A TOML file is deserialized into [`RawConfig`], then validated into an
//! immutable [`AuditConfig`] that every component borrows.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{CandidateKeys, KeyDefinition, KeySchema, KeyType};

pub const DEFAULT_READ_WRITE_PERCENT: u32 = 25;
pub const DEFAULT_DETECTION_OUTPUT: &str = "./violation_detection.csv";
pub const DEFAULT_CORRECTION_OUTPUT: &str = "./violation_update_errors.csv";
pub const MAX_SEGMENTS: u32 = 4096;

/// The configuration file as written, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub table_name: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    pub gsi_hash_key_name: Option<String>,
    pub gsi_hash_key_type: Option<String>,
    pub gsi_range_key_name: Option<String>,
    pub gsi_range_key_type: Option<String>,
    pub read_write_iops_percent: Option<i64>,
    pub record_details: Option<bool>,
    pub record_gsi_value_in_violation_record: Option<bool>,
    pub detection_output_path: Option<PathBuf>,
    pub num_of_segments: Option<i64>,
    pub num_of_violations: Option<i64>,
    pub num_of_records: Option<i64>,
    pub correction_input_path: Option<PathBuf>,
    pub correction_output_path: Option<PathBuf>,
}

/// Validated configuration for detection and correction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub table_name: String,
    pub region: Option<String>,
    /// Endpoint override; set for local stores that do not report capacity.
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    pub candidates: CandidateKeys,
    /// Share of provisioned capacity to use, 1..=100.
    pub read_write_percent: u32,
    pub record_details: bool,
    pub record_values: bool,
    pub detection_output_path: PathBuf,
    pub num_segments: u32,
    pub violation_limit: Option<u64>,
    pub record_limit: Option<u64>,
    pub correction_input_path: Option<PathBuf>,
    pub correction_output_path: PathBuf,
}

impl AuditConfig {
    /// A configuration with every optional setting at its default.
    pub fn new(table_name: impl Into<String>, candidates: CandidateKeys) -> Self {
        Self {
            table_name: table_name.into(),
            region: None,
            endpoint: None,
            profile: None,
            candidates,
            read_write_percent: DEFAULT_READ_WRITE_PERCENT,
            record_details: true,
            record_values: false,
            detection_output_path: PathBuf::from(DEFAULT_DETECTION_OUTPUT),
            num_segments: 1,
            violation_limit: None,
            record_limit: None,
            correction_input_path: None,
            correction_output_path: PathBuf::from(DEFAULT_CORRECTION_OUTPUT),
        }
    }

    /// Read and validate a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        raw.validate()
    }

    pub fn is_local(&self) -> bool {
        self.endpoint.is_some()
    }

    /// The correction input file, required for correction runs.
    pub fn correction_input(&self) -> Result<&Path, ConfigError> {
        self.correction_input_path
            .as_deref()
            .ok_or(ConfigError::Missing("correction_input_path"))
    }

    /// Reject candidate keys that reuse a table key attribute name.
    pub fn check_against_table(&self, table_key: &KeySchema) -> Result<(), ConfigError> {
        let table_names = table_key.attribute_names();
        for (_, key) in self.candidates.roles() {
            if table_names.contains(&key.name.as_str()) {
                return Err(ConfigError::KeyNameClash(key.name.clone()));
            }
        }
        Ok(())
    }
}

impl RawConfig {
    pub fn validate(self) -> Result<AuditConfig, ConfigError> {
        let table_name = non_empty(self.table_name)
            .ok_or(ConfigError::Missing("table_name"))?;

        let hash_key = candidate_key(
            "gsi_hash_key_name",
            self.gsi_hash_key_name,
            "gsi_hash_key_type",
            self.gsi_hash_key_type,
        )?;
        let range_key = candidate_key(
            "gsi_range_key_name",
            self.gsi_range_key_name,
            "gsi_range_key_type",
            self.gsi_range_key_type,
        )?;
        if hash_key.is_none() && range_key.is_none() {
            return Err(ConfigError::Missing(
                "gsi_hash_key_name or gsi_range_key_name",
            ));
        }
        if let (Some(h), Some(r)) = (&hash_key, &range_key)
            && h.name == r.name
        {
            return Err(ConfigError::Conflict(format!(
                "GSI hash and range keys are both named '{}'",
                h.name
            )));
        }

        let read_write_percent = bounded(
            "read_write_iops_percent",
            self.read_write_iops_percent,
            DEFAULT_READ_WRITE_PERCENT,
            1..=100,
        )?;
        let num_segments = bounded("num_of_segments", self.num_of_segments, 1, 1..=MAX_SEGMENTS)?;

        let record_details = self.record_details.unwrap_or(true);
        let record_values = self.record_gsi_value_in_violation_record.unwrap_or(false);
        if record_values && !record_details {
            return Err(ConfigError::Conflict(
                "record_gsi_value_in_violation_record requires record_details".to_string(),
            ));
        }

        let correction_output_path = self
            .correction_output_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CORRECTION_OUTPUT));
        if self.correction_input_path.as_ref() == Some(&correction_output_path) {
            return Err(ConfigError::Conflict(
                "correction_input_path and correction_output_path must differ".to_string(),
            ));
        }

        Ok(AuditConfig {
            table_name,
            region: non_empty(self.region),
            endpoint: non_empty(self.endpoint),
            profile: non_empty(self.profile),
            candidates: CandidateKeys {
                hash_key,
                range_key,
            },
            read_write_percent,
            record_details,
            record_values,
            detection_output_path: self
                .detection_output_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTION_OUTPUT)),
            num_segments,
            violation_limit: limit("num_of_violations", self.num_of_violations)?,
            record_limit: limit("num_of_records", self.num_of_records)?,
            correction_input_path: self.correction_input_path,
            correction_output_path,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn candidate_key(
    name_option: &'static str,
    name: Option<String>,
    type_option: &'static str,
    key_type: Option<String>,
) -> Result<Option<KeyDefinition>, ConfigError> {
    match (non_empty(name), non_empty(key_type)) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Missing(type_option)),
        (None, Some(_)) => Err(ConfigError::Missing(name_option)),
        (Some(name), Some(text)) => {
            let key_type = KeyType::parse(&text).ok_or_else(|| ConfigError::InvalidValue {
                option: type_option,
                reason: format!("'{text}' is not one of S, N, B"),
            })?;
            Ok(Some(KeyDefinition::new(name, key_type)))
        }
    }
}

fn bounded(
    option: &'static str,
    value: Option<i64>,
    default: u32,
    range: std::ops::RangeInclusive<u32>,
) -> Result<u32, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    u32::try_from(value)
        .ok()
        .filter(|v| range.contains(v))
        .ok_or_else(|| ConfigError::InvalidValue {
            option,
            reason: format!(
                "{value} is outside {}..={}",
                range.start(),
                range.end()
            ),
        })
}

/// `-1` and absence both mean unlimited; anything else must be positive.
fn limit(option: &'static str, value: Option<i64>) -> Result<Option<u64>, ConfigError> {
    match value {
        None | Some(-1) => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as u64)),
        Some(v) => Err(ConfigError::InvalidValue {
            option,
            reason: format!("{v} must be greater than 0, or -1 for no limit"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const MINIMAL: &str = r#"
        table_name = "orders"
        gsi_hash_key_name = "customer"
        gsi_hash_key_type = "S"
    "#;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.table_name, "orders");
        assert_eq!(config.read_write_percent, 25);
        assert_eq!(config.num_segments, 1);
        assert!(config.record_details);
        assert!(!config.record_values);
        assert_eq!(config.violation_limit, None);
        assert_eq!(config.record_limit, None);
        assert_eq!(
            config.detection_output_path,
            PathBuf::from("./violation_detection.csv")
        );
        assert_eq!(
            config.correction_output_path,
            PathBuf::from("./violation_update_errors.csv")
        );
        assert!(!config.is_local());
        let expected = AuditConfig::new(
            "orders",
            CandidateKeys {
                hash_key: Some(KeyDefinition::new("customer", KeyType::String)),
                range_key: None,
            },
        );
        assert_eq!(config, expected);
    }

    #[test]
    fn test_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.toml");
        fs::write(
            &path,
            r#"
            table_name = " orders "
            endpoint = "http://localhost:8000"
            gsi_hash_key_name = "customer"
            gsi_hash_key_type = "N"
            gsi_range_key_name = "placed_at"
            gsi_range_key_type = "B"
            read_write_iops_percent = 60
            record_gsi_value_in_violation_record = true
            num_of_segments = 8
            num_of_violations = 10
            num_of_records = -1
            correction_input_path = "in.csv"
            correction_output_path = "out.csv"
            "#,
        )
        .unwrap();

        let config = AuditConfig::from_file(&path).unwrap();
        assert_eq!(config.table_name, "orders");
        assert!(config.is_local());
        assert_eq!(
            config.candidates.range_key,
            Some(KeyDefinition::new("placed_at", KeyType::Binary))
        );
        assert_eq!(config.read_write_percent, 60);
        assert!(config.record_values);
        assert_eq!(config.num_segments, 8);
        assert_eq!(config.violation_limit, Some(10));
        assert_eq!(config.record_limit, None);
        assert_eq!(config.correction_input().unwrap(), Path::new("in.csv"));
    }

    #[test]
    fn test_missing_file() {
        match AuditConfig::from_file(Path::new("/nonexistent/audit.toml")) {
            Err(ConfigError::Read { .. }) => {}
            other => panic!("expected Read error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        match AuditConfig::from_toml_str("table_name = \"t\"\nsegments = 3\n") {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_required_options() {
        match AuditConfig::from_toml_str("gsi_hash_key_name = \"a\"\ngsi_hash_key_type = \"S\"") {
            Err(ConfigError::Missing("table_name")) => {}
            other => panic!("expected missing table_name, got {other:?}"),
        }
        match AuditConfig::from_toml_str("table_name = \"t\"") {
            Err(ConfigError::Missing(_)) => {}
            other => panic!("expected missing candidate key, got {other:?}"),
        }
        match AuditConfig::from_toml_str("table_name = \"t\"\ngsi_range_key_name = \"r\"") {
            Err(ConfigError::Missing("gsi_range_key_type")) => {}
            other => panic!("expected missing range type, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            "gsi_hash_key_type = \"SS\"",
            "read_write_iops_percent = 0",
            "read_write_iops_percent = 101",
            "num_of_segments = 0",
            "num_of_segments = 4097",
            "num_of_violations = 0",
            "num_of_records = -2",
        ];
        for case in cases {
            let content = format!("table_name = \"t\"\ngsi_hash_key_name = \"h\"\n{case}\n");
            let content = if case.starts_with("gsi_hash_key_type") {
                content
            } else {
                format!("{content}gsi_hash_key_type = \"S\"\n")
            };
            match AuditConfig::from_toml_str(&content) {
                Err(ConfigError::InvalidValue { .. }) => {}
                other => panic!("expected InvalidValue for {case}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_conflicts() {
        let record_values_without_details = format!(
            "{MINIMAL}record_details = false\nrecord_gsi_value_in_violation_record = true\n"
        );
        match AuditConfig::from_toml_str(&record_values_without_details) {
            Err(ConfigError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }

        let same_paths = format!(
            "{MINIMAL}correction_input_path = \"a.csv\"\ncorrection_output_path = \"a.csv\"\n"
        );
        match AuditConfig::from_toml_str(&same_paths) {
            Err(ConfigError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }

        let same_names = format!(
            "{MINIMAL}gsi_range_key_name = \"customer\"\ngsi_range_key_type = \"N\"\n"
        );
        match AuditConfig::from_toml_str(&same_names) {
            Err(ConfigError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_candidate_clashing_with_table_key() {
        let config = AuditConfig::from_toml_str(MINIMAL).unwrap();
        let table_key = KeySchema {
            hash_key: KeyDefinition::new("order_id", KeyType::String),
            range_key: Some(KeyDefinition::new("customer", KeyType::String)),
        };
        match config.check_against_table(&table_key) {
            Err(ConfigError::KeyNameClash(name)) => assert_eq!(name, "customer"),
            other => panic!("expected KeyNameClash, got {other:?}"),
        }

        let table_key = KeySchema {
            hash_key: KeyDefinition::new("order_id", KeyType::String),
            range_key: None,
        };
        assert!(config.check_against_table(&table_key).is_ok());
    }

    #[test]
    fn test_correction_input_required() {
        let config = AuditConfig::from_toml_str(MINIMAL).unwrap();
        match config.correction_input() {
            Err(ConfigError::Missing("correction_input_path")) => {}
            other => panic!("expected missing correction input, got {other:?}"),
        }
    }
}
