//! Wire shapes shared across operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kecs_core::cache::JsonFieldCache;
use kecs_core::error::EcsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSetting {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityProviderStrategyItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider: Option<String>,
    #[serde(default)]
    pub weight: i64,
    #[serde(default)]
    pub base: i64,
}

/// Per-element failure in Describe responses; never an HTTP error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub arn: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    pub fn missing(arn: impl Into<String>) -> Self {
        Failure {
            arn: arn.into(),
            reason: "MISSING".to_string(),
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Stored millisecond timestamps surface as epoch seconds on the wire.
pub(crate) fn epoch_secs(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

pub(crate) fn opt_epoch_secs(ms: Option<i64>) -> Option<f64> {
    ms.map(epoch_secs)
}

/// Serialize a request field into its storage blob.
pub(crate) fn to_blob<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, EcsError> {
    value
        .as_ref()
        .map(|v| {
            serde_json::to_string(v).map_err(|err| {
                EcsError::Internal(anyhow::Error::new(err).context("serialize request field"))
            })
        })
        .transpose()
}

/// Decode a stored blob through the field cache. Undecodable blobs cannot
/// happen through this API (we wrote them); if one shows up it is logged and
/// omitted from the response.
pub(crate) fn blob_value(
    cache: &JsonFieldCache,
    kind: &str,
    id: &str,
    field: &str,
    raw: Option<&str>,
) -> Option<Value> {
    let raw = raw?;
    match cache.get_or_parse(kind, id, field, raw) {
        Ok(value) => Some(value.as_ref().clone()),
        Err(err) => {
            tracing::warn!(%err, kind, id, field, "stored blob is not valid JSON");
            None
        }
    }
}
