//! ECS operation handlers, dispatched by operation name.
//!
//! Handlers take typed wire requests, work against the stores, enqueue
//! materialization jobs, and return typed wire responses. The wire shapes
//! here are the single canonical type family; storage records are adapted at
//! this boundary.

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::models::{Cluster, TaskDefinition};
use kecs_core::store;

pub mod clusters;
pub mod services;
pub mod tags;
pub mod task_definitions;
pub mod task_sets;
pub mod tasks;

pub(crate) mod types;

pub const AMZ_JSON: &str = "application/x-amz-json-1.1";

pub async fn handle(state: &AppState, op: &str, body: &Bytes) -> Response {
    match route(state, op, body).await {
        Ok(value) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, AMZ_JSON)],
            value.to_string(),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn route(state: &AppState, op: &str, body: &Bytes) -> Result<Value, EcsError> {
    match op {
        "CreateCluster" => to_value(clusters::create_cluster(state, parse(body)?).await?),
        "DescribeClusters" => to_value(clusters::describe_clusters(state, parse(body)?).await?),
        "ListClusters" => to_value(clusters::list_clusters(state, parse(body)?).await?),
        "UpdateCluster" => to_value(clusters::update_cluster(state, parse(body)?).await?),
        "UpdateClusterSettings" => {
            to_value(clusters::update_cluster_settings(state, parse(body)?).await?)
        }
        "PutClusterCapacityProviders" => {
            to_value(clusters::put_cluster_capacity_providers(state, parse(body)?).await?)
        }
        "DeleteCluster" => to_value(clusters::delete_cluster(state, parse(body)?).await?),

        "RegisterTaskDefinition" => {
            to_value(task_definitions::register_task_definition(state, parse(body)?).await?)
        }
        "DeregisterTaskDefinition" => {
            to_value(task_definitions::deregister_task_definition(state, parse(body)?).await?)
        }
        "DescribeTaskDefinition" => {
            to_value(task_definitions::describe_task_definition(state, parse(body)?).await?)
        }
        "ListTaskDefinitions" => {
            to_value(task_definitions::list_task_definitions(state, parse(body)?).await?)
        }
        "ListTaskDefinitionFamilies" => {
            to_value(task_definitions::list_task_definition_families(state, parse(body)?).await?)
        }

        "CreateService" => to_value(services::create_service(state, parse(body)?).await?),
        "UpdateService" => to_value(services::update_service(state, parse(body)?).await?),
        "DeleteService" => to_value(services::delete_service(state, parse(body)?).await?),
        "DescribeServices" => to_value(services::describe_services(state, parse(body)?).await?),
        "ListServices" => to_value(services::list_services(state, parse(body)?).await?),

        "RunTask" => to_value(tasks::run_task(state, parse(body)?).await?),
        "StopTask" => to_value(tasks::stop_task(state, parse(body)?).await?),
        "DescribeTasks" => to_value(tasks::describe_tasks(state, parse(body)?).await?),
        "ListTasks" => to_value(tasks::list_tasks(state, parse(body)?).await?),

        "CreateTaskSet" => to_value(task_sets::create_task_set(state, parse(body)?).await?),
        "UpdateTaskSet" => to_value(task_sets::update_task_set(state, parse(body)?).await?),
        "DeleteTaskSet" => to_value(task_sets::delete_task_set(state, parse(body)?).await?),
        "DescribeTaskSets" => to_value(task_sets::describe_task_sets(state, parse(body)?).await?),

        "TagResource" => to_value(tags::tag_resource(state, parse(body)?).await?),
        "UntagResource" => to_value(tags::untag_resource(state, parse(body)?).await?),
        "ListTagsForResource" => {
            to_value(tags::list_tags_for_resource(state, parse(body)?).await?)
        }

        _ => Err(EcsError::InvalidParameter(format!(
            "Unknown operation: {op}"
        ))),
    }
}

pub fn error_response(err: EcsError) -> Response {
    if let EcsError::Internal(source) = &err {
        tracing::error!(error = ?source, "internal error");
    }
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({
        "__type": err.type_name(),
        "message": err.to_string(),
    });
    (status, [(header::CONTENT_TYPE, AMZ_JSON)], body.to_string()).into_response()
}

/// An empty body is a request with all fields defaulted, matching the SDKs
/// that omit `{}` for no-argument calls.
fn parse<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, EcsError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| EcsError::InvalidParameter(format!("Invalid request payload: {err}")))
}

fn to_value<T: Serialize>(response: T) -> Result<Value, EcsError> {
    serde_json::to_value(response)
        .map_err(|err| EcsError::Internal(anyhow::Error::new(err).context("serialize response")))
}

/// Resolve a cluster identifier (short name or ARN, empty/absent meaning
/// `default`) to its stored record.
pub(crate) async fn resolve_cluster(
    state: &AppState,
    id: Option<&str>,
) -> Result<Cluster, EcsError> {
    let id = match id {
        Some(id) if !id.is_empty() => id,
        _ => "default",
    };
    let name = kecs_core::arn::extract_cluster_name(id);
    store::clusters::get(&state.db, name)
        .await?
        .ok_or_else(EcsError::cluster_not_found)
}

/// Resolve `family`, `family:revision`, or a full ARN to a stored task
/// definition; a bare family means its latest ACTIVE revision.
pub(crate) async fn resolve_task_definition(
    state: &AppState,
    id: &str,
) -> Result<TaskDefinition, EcsError> {
    let (family, revision) = kecs_core::arn::parse_task_definition(id);
    let task_def = match revision {
        Some(revision) => store::task_definitions::get(&state.db, &family, revision).await?,
        None => store::task_definitions::get_latest(&state.db, &family).await?,
    };
    task_def.ok_or_else(|| EcsError::ResourceNotFound(format!("Task definition not found: {id}")))
}
