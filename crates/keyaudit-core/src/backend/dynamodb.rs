//! Amazon DynamoDB backend.
//!
//! The SDK is async; this backend owns a private multi-threaded tokio runtime
//! and blocks on it, so scan workers stay plain OS threads. `Runtime::block_on`
//! takes `&self`, which lets every worker share one client.

use std::collections::{BTreeMap, HashMap};

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeAction, AttributeValue as SdkValue, AttributeValueUpdate, DeleteRequest,
    ExpectedAttributeValue, KeyType as SdkKeyType, ReturnConsumedCapacity, ScalarAttributeType,
    WriteRequest,
};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{
    BatchDeleteOutcome, ScanPage, ScanRequest, TableBackend, UpdateAction, UpdateOutcome,
    UpdateRequest,
};
use crate::config::AuditConfig;
use crate::error::BackendError;
use crate::types::{
    AttributeValue, Item, KeyDefinition, KeySchema, KeyType, PrimaryKey, TableDescription,
};

type SdkItem = HashMap<String, SdkValue>;

pub struct DynamoDbBackend {
    client: Client,
    runtime: Runtime,
    return_capacity: ReturnConsumedCapacity,
}

impl DynamoDbBackend {
    /// Build a client from the standard credential chain, applying the
    /// region, profile and endpoint overrides of `config`.
    ///
    /// Against a local endpoint no consumed capacity is requested, which
    /// turns off pacing.
    pub fn connect(config: &AuditConfig) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| BackendError::Service(format!("cannot start async runtime: {e}")))?;

        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(Region::new(region.clone()));
            }
            if let Some(profile) = &config.profile {
                loader = loader.profile_name(profile);
            }
            if let Some(endpoint) = &config.endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            loader.load().await
        });

        let return_capacity = if config.is_local() {
            ReturnConsumedCapacity::None
        } else {
            ReturnConsumedCapacity::Total
        };
        Ok(Self {
            client: Client::new(&sdk_config),
            runtime,
            return_capacity,
        })
    }
}

impl TableBackend for DynamoDbBackend {
    fn describe_table(&self, table_name: &str) -> Result<TableDescription, BackendError> {
        let output = self
            .runtime
            .block_on(self.client.describe_table().table_name(table_name).send())
            .map_err(|err| {
                if is_table_not_found(&err) {
                    BackendError::TableNotFound(table_name.to_string())
                } else {
                    classify(err)
                }
            })?;
        let table = output
            .table
            .ok_or_else(|| BackendError::TableNotFound(table_name.to_string()))?;

        let key_type_of = |name: &str| -> Result<KeyType, BackendError> {
            let definition = table
                .attribute_definitions()
                .iter()
                .find(|d| d.attribute_name() == name)
                .ok_or_else(|| {
                    BackendError::Service(format!("no attribute definition for key '{name}'"))
                })?;
            match definition.attribute_type() {
                ScalarAttributeType::S => Ok(KeyType::String),
                ScalarAttributeType::N => Ok(KeyType::Number),
                ScalarAttributeType::B => Ok(KeyType::Binary),
                other => Err(BackendError::Service(format!(
                    "unsupported key attribute type {other:?} for '{name}'"
                ))),
            }
        };
        let key_of = |role: SdkKeyType| -> Result<Option<KeyDefinition>, BackendError> {
            match table.key_schema().iter().find(|k| *k.key_type() == role) {
                Some(element) => {
                    let name = element.attribute_name();
                    Ok(Some(KeyDefinition::new(name, key_type_of(name)?)))
                }
                None => Ok(None),
            }
        };
        let hash_key = key_of(SdkKeyType::Hash)?.ok_or_else(|| {
            BackendError::Service(format!("table {table_name} reports no hash key"))
        })?;
        let range_key = key_of(SdkKeyType::Range)?;

        let throughput = table.provisioned_throughput();
        let units = |v: Option<i64>| v.and_then(|n| u64::try_from(n).ok()).unwrap_or(0);
        let secondary_index_names = table
            .global_secondary_indexes()
            .iter()
            .filter_map(|i| i.index_name())
            .chain(
                table
                    .local_secondary_indexes()
                    .iter()
                    .filter_map(|i| i.index_name()),
            )
            .map(str::to_string)
            .collect();

        Ok(TableDescription {
            name: table_name.to_string(),
            key_schema: KeySchema {
                hash_key,
                range_key,
            },
            read_capacity_units: units(throughput.and_then(|t| t.read_capacity_units())),
            write_capacity_units: units(throughput.and_then(|t| t.write_capacity_units())),
            secondary_index_names,
        })
    }

    fn scan(&self, request: &ScanRequest<'_>) -> Result<ScanPage, BackendError> {
        let mut builder = self
            .client
            .scan()
            .table_name(request.table_name)
            .segment(to_i32(request.segment)?)
            .total_segments(to_i32(request.total_segments)?)
            .return_consumed_capacity(self.return_capacity.clone());
        if !request.projection.is_empty() {
            let placeholders: Vec<String> = (0..request.projection.len())
                .map(|i| format!("#p{i}"))
                .collect();
            builder = builder.projection_expression(placeholders.join(", "));
            for (placeholder, name) in placeholders.iter().zip(request.projection) {
                builder = builder.expression_attribute_names(placeholder, name);
            }
        }
        if let Some(start) = &request.exclusive_start_key {
            builder = builder.set_exclusive_start_key(Some(to_sdk_item(start)?));
        }

        let output = self.runtime.block_on(builder.send()).map_err(classify)?;
        let items = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(from_sdk_item)
            .collect();
        let last_evaluated_key = output
            .last_evaluated_key
            .filter(|k| !k.is_empty())
            .map(from_sdk_item);
        Ok(ScanPage {
            items,
            last_evaluated_key,
            consumed_capacity: output.consumed_capacity.and_then(|c| c.capacity_units),
        })
    }

    fn batch_delete(
        &self,
        table_name: &str,
        keys: &[PrimaryKey],
    ) -> Result<BatchDeleteOutcome, BackendError> {
        let mut requests = Vec::with_capacity(keys.len());
        for key in keys {
            let delete = DeleteRequest::builder()
                .set_key(Some(to_sdk_item(key)?))
                .build()
                .map_err(|e| BackendError::Validation(e.to_string()))?;
            requests.push(WriteRequest::builder().delete_request(delete).build());
        }

        let output = self
            .runtime
            .block_on(
                self.client
                    .batch_write_item()
                    .request_items(table_name, requests)
                    .return_consumed_capacity(self.return_capacity.clone())
                    .send(),
            )
            .map_err(classify)?;

        let unprocessed = output
            .unprocessed_items
            .unwrap_or_default()
            .into_values()
            .flatten()
            .filter_map(|w| w.delete_request)
            .map(|d| from_sdk_item(d.key))
            .collect();
        let consumed_capacity = output.consumed_capacity.map(|all| {
            all.iter()
                .filter_map(|c| c.capacity_units())
                .sum::<f64>()
        });
        Ok(BatchDeleteOutcome {
            unprocessed,
            consumed_capacity,
        })
    }

    fn update_item(&self, request: &UpdateRequest) -> Result<UpdateOutcome, BackendError> {
        let mut builder = self
            .client
            .update_item()
            .table_name(&request.table_name)
            .set_key(Some(to_sdk_item(&request.key)?))
            .return_consumed_capacity(self.return_capacity.clone());
        for action in &request.actions {
            let update = match action {
                UpdateAction::Put { value, .. } => AttributeValueUpdate::builder()
                    .action(AttributeAction::Put)
                    .value(to_sdk(value)?)
                    .build(),
                UpdateAction::Delete { .. } => AttributeValueUpdate::builder()
                    .action(AttributeAction::Delete)
                    .build(),
            };
            builder = builder.attribute_updates(action.name(), update);
        }
        for (name, value) in &request.expected {
            let expected = ExpectedAttributeValue::builder()
                .value(to_sdk(value)?)
                .exists(true)
                .build();
            builder = builder.expected(name, expected);
        }

        match self.runtime.block_on(builder.send()) {
            Ok(output) => Ok(UpdateOutcome::Applied {
                consumed_capacity: output.consumed_capacity.and_then(|c| c.capacity_units),
            }),
            Err(err) if is_conditional_check_failed(&err) => {
                debug!(table = %request.table_name, "conditional check failed");
                Ok(UpdateOutcome::ConditionalCheckFailed)
            }
            Err(err) => Err(classify(err)),
        }
    }
}

fn is_table_not_found(err: &SdkError<DescribeTableError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => matches!(
            service_err.err(),
            DescribeTableError::ResourceNotFoundException(_)
        ),
        _ => false,
    }
}

fn is_conditional_check_failed(err: &SdkError<UpdateItemError>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => matches!(
            service_err.err(),
            UpdateItemError::ConditionalCheckFailedException(_)
        ),
        _ => false,
    }
}

/// Sort an SDK failure into the backend error kinds by its service code.
fn classify<E, R>(err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();
    match code.as_deref() {
        Some("ResourceNotFoundException") => BackendError::TableNotFound(message),
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "ExpiredTokenException"
            | "MissingAuthenticationTokenException",
        ) => BackendError::AccessDenied(message),
        Some("ValidationException") => BackendError::Validation(message),
        _ => BackendError::Service(message),
    }
}

fn to_i32(n: u32) -> Result<i32, BackendError> {
    i32::try_from(n).map_err(|_| BackendError::Validation(format!("{n} is out of range")))
}

fn from_sdk(value: SdkValue) -> AttributeValue {
    let other = |tag: &str, text: String| AttributeValue::Other {
        tag: tag.to_string(),
        text,
    };
    match value {
        SdkValue::S(s) => AttributeValue::S(s),
        SdkValue::N(n) => AttributeValue::N(n),
        SdkValue::B(b) => AttributeValue::B(b.into_inner()),
        SdkValue::Ss(v) => AttributeValue::Ss(v),
        SdkValue::Ns(v) => AttributeValue::Ns(v),
        SdkValue::Bs(v) => AttributeValue::Bs(v.into_iter().map(Blob::into_inner).collect()),
        SdkValue::Bool(b) => other("BOOL", b.to_string()),
        SdkValue::Null(_) => other("NULL", "true".to_string()),
        SdkValue::L(l) => other("L", format!("{l:?}")),
        SdkValue::M(m) => other("M", format!("{m:?}")),
        unknown => other("UNKNOWN", format!("{unknown:?}")),
    }
}

fn to_sdk(value: &AttributeValue) -> Result<SdkValue, BackendError> {
    Ok(match value {
        AttributeValue::S(s) => SdkValue::S(s.clone()),
        AttributeValue::N(n) => SdkValue::N(n.clone()),
        AttributeValue::B(b) => SdkValue::B(Blob::new(b.clone())),
        AttributeValue::Ss(v) => SdkValue::Ss(v.clone()),
        AttributeValue::Ns(v) => SdkValue::Ns(v.clone()),
        AttributeValue::Bs(v) => SdkValue::Bs(v.iter().cloned().map(Blob::new).collect()),
        AttributeValue::Other { tag, .. } => {
            return Err(BackendError::Validation(format!(
                "values of kind {tag} cannot be written back"
            )));
        }
    })
}

fn from_sdk_item(item: SdkItem) -> Item {
    item.into_iter().map(|(k, v)| (k, from_sdk(v))).collect()
}

fn to_sdk_item(item: &BTreeMap<String, AttributeValue>) -> Result<SdkItem, BackendError> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), to_sdk(v)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion_round_trip() {
        let values = [
            AttributeValue::S("a".into()),
            AttributeValue::N("1.5".into()),
            AttributeValue::B(vec![0, 1]),
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
            AttributeValue::Ns(vec!["1".into()]),
            AttributeValue::Bs(vec![vec![9]]),
        ];
        for value in values {
            assert_eq!(from_sdk(to_sdk(&value).unwrap()), value);
        }
    }

    #[test]
    fn test_unkeyable_kinds_become_other() {
        assert_eq!(
            from_sdk(SdkValue::Bool(true)),
            AttributeValue::Other {
                tag: "BOOL".into(),
                text: "true".into()
            }
        );
        assert_eq!(from_sdk(SdkValue::Null(true)).type_tag(), "NULL");
        assert_eq!(from_sdk(SdkValue::L(vec![])).type_tag(), "L");
        assert_eq!(from_sdk(SdkValue::M(HashMap::new())).type_tag(), "M");

        let other = AttributeValue::Other {
            tag: "M".into(),
            text: "{}".into(),
        };
        match to_sdk(&other) {
            Err(BackendError::Validation(_)) => {}
            res => panic!("expected Validation, got {res:?}"),
        }
    }
}
