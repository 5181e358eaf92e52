use serde::{Deserialize, Serialize};

use super::types::Tag;
use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::store;
use kecs_core::validation;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagResourceRequest {
    pub resource_arn: Option<String>,
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Default, Serialize)]
pub struct TagResourceResponse {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UntagResourceRequest {
    pub resource_arn: Option<String>,
    pub tag_keys: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize)]
pub struct UntagResourceResponse {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTagsForResourceRequest {
    pub resource_arn: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTagsForResourceResponse {
    pub tags: Vec<Tag>,
}

pub async fn tag_resource(
    state: &AppState,
    req: TagResourceRequest,
) -> Result<TagResourceResponse, EcsError> {
    let resource_arn = req.resource_arn.unwrap_or_default();
    validation::validate_tag_resource_arn(&resource_arn)?;
    let tags = req
        .tags
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("tags cannot be empty".to_string()))?;

    let mut pairs = Vec::with_capacity(tags.len());
    for tag in tags {
        let key = tag
            .key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EcsError::InvalidParameter("Tag key is required".to_string()))?;
        pairs.push((key, tag.value.unwrap_or_default()));
    }
    store::tags::put(&state.db, &resource_arn, &pairs).await?;
    Ok(TagResourceResponse {})
}

pub async fn untag_resource(
    state: &AppState,
    req: UntagResourceRequest,
) -> Result<UntagResourceResponse, EcsError> {
    let resource_arn = req.resource_arn.unwrap_or_default();
    validation::validate_tag_resource_arn(&resource_arn)?;
    let keys = req
        .tag_keys
        .filter(|k| !k.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("tagKeys cannot be empty".to_string()))?;
    store::tags::remove(&state.db, &resource_arn, &keys).await?;
    Ok(UntagResourceResponse {})
}

pub async fn list_tags_for_resource(
    state: &AppState,
    req: ListTagsForResourceRequest,
) -> Result<ListTagsForResourceResponse, EcsError> {
    let resource_arn = req.resource_arn.unwrap_or_default();
    validation::validate_tag_resource_arn(&resource_arn)?;
    let tags = store::tags::list(&state.db, &resource_arn)
        .await?
        .into_iter()
        .map(|(key, value)| Tag {
            key: Some(key),
            value: Some(value),
        })
        .collect();
    Ok(ListTagsForResourceResponse { tags })
}
