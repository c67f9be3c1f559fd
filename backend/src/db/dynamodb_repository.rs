use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Map, Number, Value};

use crate::retry::{AttemptTimedOut, Retryable};

/// Flat document keyed by field name. Nested values are stored as DynamoDB
/// lists and maps.
pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("DynamoDB temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
    #[error(transparent)]
    TimedOut(#[from] AttemptTimedOut),
}

impl Retryable for RepositoryError {
    fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_) | RepositoryError::TimedOut(_))
    }
}

/// Cloud document store used for result persistence and lookup.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Document>, RepositoryError>;
    async fn set(&self, id: &str, document: Document) -> Result<(), RepositoryError>;
    /// Merges `fields` into an existing document; `NotFound` if absent.
    async fn update(&self, id: &str, fields: Document) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    results_table: String,
}

impl DynamoDbRepository {
    pub fn new(client: Client, results_table: String) -> Self {
        Self {
            client,
            results_table,
        }
    }

    fn key(id: &str) -> HashMap<String, AttributeValue> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(id.to_string()));
        key
    }
}

#[async_trait]
impl DocumentStore for DynamoDbRepository {
    async fn get(&self, id: &str) -> Result<Option<Document>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.results_table)
            .set_key(Some(Self::key(id)))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        match result.item {
            Some(item) => Ok(Some(document_from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, id: &str, document: Document) -> Result<(), RepositoryError> {
        let mut item = item_from_document(&document);
        item.insert("id".to_string(), AttributeValue::S(id.to_string()));

        self.client
            .put_item()
            .table_name(&self.results_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB put_item failed for result {}: {:?}", id, e);
                classify_sdk_error(e)
            })?;

        log::info!("Stored result {} in '{}'", id, self.results_table);
        Ok(())
    }

    async fn update(&self, id: &str, fields: Document) -> Result<(), RepositoryError> {
        let fields: Vec<(String, Value)> = fields.into_iter().filter(|(name, _)| name != "id").collect();
        if fields.is_empty() {
            return Ok(());
        }

        let mut update_expression_parts = Vec::new();
        let mut expression_attribute_names = HashMap::new();
        let mut expression_attribute_values = HashMap::new();

        for (index, (name, value)) in fields.iter().enumerate() {
            let name_token = format!("#f{}", index);
            let value_token = format!(":v{}", index);
            update_expression_parts.push(format!("{} = {}", name_token, value_token));
            expression_attribute_names.insert(name_token, name.clone());
            expression_attribute_values.insert(value_token, attribute_from_value(value));
        }

        let update_expression = format!("SET {}", update_expression_parts.join(", "));
        log::debug!("Update expression for {}: {}", id, update_expression);

        let outcome = self
            .client
            .update_item()
            .table_name(&self.results_table)
            .set_key(Some(Self::key(id)))
            .update_expression(update_expression)
            .condition_expression("attribute_exists(id)")
            .set_expression_attribute_names(Some(expression_attribute_names))
            .set_expression_attribute_values(Some(expression_attribute_values))
            .send()
            .await;

        match outcome {
            Ok(_) => {
                log::info!("Updated result {}", id);
                Ok(())
            }
            Err(e) if e.code() == Some("ConditionalCheckFailedException") => {
                Err(RepositoryError::NotFound)
            }
            Err(e) => {
                log::error!("DynamoDB update_item failed for result {}: {:?}", id, e);
                Err(classify_sdk_error(e))
            }
        }
    }
}

fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>) -> RepositoryError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            return RepositoryError::Unavailable(message);
        }
        _ => {}
    }
    match err.code() {
        Some(
            "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "InternalServerError"
            | "ServiceUnavailable",
        ) => RepositoryError::Unavailable(message),
        Some("AccessDeniedException" | "UnrecognizedClientException") => {
            RepositoryError::PermissionDenied(message)
        }
        Some("ResourceNotFoundException") => RepositoryError::InvalidData(message),
        _ => RepositoryError::DynamoDb(message),
    }
}

pub fn item_from_document(document: &Document) -> HashMap<String, AttributeValue> {
    document
        .iter()
        .map(|(name, value)| (name.clone(), attribute_from_value(value)))
        .collect()
}

pub fn document_from_item(
    item: HashMap<String, AttributeValue>,
) -> Result<Document, RepositoryError> {
    item.into_iter()
        .map(|(name, attribute)| Ok((name, value_from_attribute(attribute)?)))
        .collect()
}

fn attribute_from_value(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(attribute_from_value).collect()),
        Value::Object(fields) => AttributeValue::M(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), attribute_from_value(value)))
                .collect(),
        ),
    }
}

fn value_from_attribute(attribute: AttributeValue) -> Result<Value, RepositoryError> {
    Ok(match attribute {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(b),
        AttributeValue::S(s) => Value::String(s),
        AttributeValue::N(n) => parse_number(&n)?,
        AttributeValue::L(items) => Value::Array(
            items
                .into_iter()
                .map(value_from_attribute)
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::M(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(name, value)| Ok((name, value_from_attribute(value)?)))
                .collect::<Result<_, RepositoryError>>()?,
        ),
        AttributeValue::Ss(items) => Value::Array(items.into_iter().map(Value::String).collect()),
        AttributeValue::Ns(items) => Value::Array(
            items
                .iter()
                .map(|n| parse_number(n))
                .collect::<Result<_, _>>()?,
        ),
        other => {
            return Err(RepositoryError::InvalidData(format!(
                "unsupported attribute type: {:?}",
                other
            )));
        }
    })
}

fn parse_number(raw: &str) -> Result<Value, RepositoryError> {
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::from(int));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| RepositoryError::InvalidData(format!("invalid number: {}", raw)))
}
