//! Task description loading and schema validation.
//!
//! A datapoint is one benchmark task instance. Loading is all-or-nothing:
//! every required field must be present and non-null before the record is
//! handed to the rest of the pipeline, and a rejection carries the complete
//! list of missing fields.
use crate::errors::ValidationError;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// The nine fields a task description must carry, in wire order.
pub const REQUIRED_FIELDS: [&str; 9] = [
    "instance_id",
    "repo",
    "base_commit",
    "problem_statement",
    "patch",
    "test_patch",
    "environment_setup_commit",
    "FAIL_TO_PASS",
    "PASS_TO_PASS",
];

/// One benchmark task instance. Immutable after load; extra wire fields are
/// tolerated and dropped.
#[derive(Clone, Debug, Deserialize)]
pub struct TaskRecord {
    pub instance_id: String,
    pub repo: String,
    pub base_commit: String,
    pub problem_statement: String,
    pub patch: String,
    pub test_patch: String,
    pub environment_setup_commit: String,
    #[serde(rename = "FAIL_TO_PASS", deserialize_with = "test_id_list")]
    pub fail_to_pass: Vec<String>,
    #[serde(rename = "PASS_TO_PASS", deserialize_with = "test_id_list")]
    pub pass_to_pass: Vec<String>,
}

/// Load and validate a task description from a filesystem path or http(s) URL.
pub fn load_datapoint(locator: &str) -> Result<TaskRecord> {
    let text = read_locator(locator)?;
    parse_datapoint(&text).with_context(|| format!("load task description {locator}"))
}

/// Validate raw JSON text against the required-field schema and decode it.
pub fn parse_datapoint(text: &str) -> Result<TaskRecord> {
    let value: Value = serde_json::from_str(text).context("parse task description JSON")?;
    let missing = missing_fields(&value);
    if !missing.is_empty() {
        return Err(ValidationError::schema(missing).into());
    }
    let record = serde_json::from_value(value).context("decode task description")?;
    Ok(record)
}

fn missing_fields(value: &Value) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|field| value.get(*field).is_none_or(Value::is_null))
        .map(|field| (*field).to_string())
        .collect()
}

fn read_locator(locator: &str) -> Result<String> {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        let mut response = ureq::get(locator)
            .call()
            .with_context(|| format!("fetch task description from {locator}"))?;
        let body = response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("read task description body from {locator}"))?;
        Ok(body)
    } else {
        std::fs::read_to_string(locator)
            .with_context(|| format!("read task description {locator}"))
    }
}

// Published datasets encode the test lists either as JSON arrays or as
// JSON-encoded array strings; accept both.
fn test_id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Encoded(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(list) => Ok(list),
        Raw::Encoded(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}
