use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::RepositoryError;

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_json_object(
    column: &str,
    value: String,
) -> Result<Map<String, Value>, RepositoryError> {
    match serde_json::from_str::<Value>(&value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RepositoryError::Decode(format!(
            "expected JSON object in `{column}`, found `{other}`"
        ))),
        Err(error) => {
            Err(RepositoryError::Decode(format!("invalid JSON in `{column}`: {error}")))
        }
    }
}

pub(crate) fn parse_embedding(column: &str, value: &str) -> Result<Vec<f32>, RepositoryError> {
    serde_json::from_str::<Vec<f32>>(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid vector in `{column}`: {error}")))
}

pub(crate) fn encode_embedding(embedding: &[f32]) -> Result<String, RepositoryError> {
    serde_json::to_string(embedding)
        .map_err(|error| RepositoryError::Decode(format!("could not encode vector: {error}")))
}
