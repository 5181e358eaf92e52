use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{CapacityProviderStrategyItem, ClusterSetting, Failure, Tag, blob_value, to_blob};
use super::resolve_cluster;
use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::models::{Cluster, now_ms, status};
use kecs_core::store;
use kecs_core::validation;
use kecs_orchestrator::Job;

const CACHE_KIND: &str = "cluster";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateClusterRequest {
    pub cluster_name: Option<String>,
    pub settings: Option<Vec<ClusterSetting>>,
    pub configuration: Option<Value>,
    pub tags: Option<Vec<Tag>>,
    pub capacity_providers: Option<Vec<String>>,
    pub default_capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterResponse {
    pub cluster: WireCluster,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeClustersRequest {
    pub clusters: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeClustersResponse {
    pub clusters: Vec<WireCluster>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListClustersRequest {
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListClustersResponse {
    pub cluster_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateClusterRequest {
    pub cluster: Option<String>,
    pub settings: Option<Vec<ClusterSetting>>,
    pub configuration: Option<Value>,
    pub service_connect_defaults: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterResponse {
    pub cluster: WireCluster,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateClusterSettingsRequest {
    pub cluster: Option<String>,
    pub settings: Option<Vec<ClusterSetting>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutClusterCapacityProvidersRequest {
    pub cluster: Option<String>,
    pub capacity_providers: Option<Vec<String>>,
    pub default_capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteClusterRequest {
    pub cluster: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClusterResponse {
    pub cluster: WireCluster,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCluster {
    pub cluster_arn: String,
    pub cluster_name: String,
    pub status: String,
    pub registered_container_instances_count: i64,
    pub running_tasks_count: i64,
    pub pending_tasks_count: i64,
    pub active_services_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_providers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_capacity_provider_strategy: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Include {
    settings: bool,
    configurations: bool,
    tags: bool,
}

impl Include {
    const ALL: Include = Include {
        settings: true,
        configurations: true,
        tags: true,
    };

    fn from_request(include: Option<&[String]>) -> Include {
        let mut out = Include::default();
        for item in include.unwrap_or_default() {
            match item.as_str() {
                "SETTINGS" => out.settings = true,
                "CONFIGURATIONS" => out.configurations = true,
                "TAGS" => out.tags = true,
                _ => {}
            }
        }
        out
    }
}

fn to_wire(state: &AppState, cluster: &Cluster, include: Include) -> WireCluster {
    let cache = &state.cache;
    let id = &cluster.name;
    WireCluster {
        cluster_arn: cluster.arn.clone(),
        cluster_name: cluster.name.clone(),
        status: cluster.status.clone(),
        registered_container_instances_count: cluster.registered_container_instances_count,
        running_tasks_count: cluster.running_tasks_count,
        pending_tasks_count: cluster.pending_tasks_count,
        active_services_count: cluster.active_services_count,
        settings: include
            .settings
            .then(|| blob_value(cache, CACHE_KIND, id, "settings", cluster.settings.as_deref()))
            .flatten(),
        configuration: include
            .configurations
            .then(|| {
                blob_value(
                    cache,
                    CACHE_KIND,
                    id,
                    "configuration",
                    cluster.configuration.as_deref(),
                )
            })
            .flatten(),
        tags: include
            .tags
            .then(|| blob_value(cache, CACHE_KIND, id, "tags", cluster.tags.as_deref()))
            .flatten(),
        capacity_providers: blob_value(
            cache,
            CACHE_KIND,
            id,
            "capacity_providers",
            cluster.capacity_providers.as_deref(),
        ),
        default_capacity_provider_strategy: blob_value(
            cache,
            CACHE_KIND,
            id,
            "default_capacity_provider_strategy",
            cluster.default_capacity_provider_strategy.as_deref(),
        ),
    }
}

fn validate_settings(settings: &[ClusterSetting]) -> Result<(), EcsError> {
    for setting in settings {
        let name = setting.name.as_deref().ok_or_else(|| {
            EcsError::InvalidParameter("Cluster setting name is required".to_string())
        })?;
        validation::validate_cluster_setting(name, setting.value.as_deref().unwrap_or(""))?;
    }
    Ok(())
}

fn validate_providers_and_strategy(
    capacity_providers: Option<&[String]>,
    strategy: Option<&[CapacityProviderStrategyItem]>,
) -> Result<(), EcsError> {
    let registered = capacity_providers.unwrap_or_default();
    for provider in registered {
        // There is no capacity-provider registry; only the managed providers
        // can be attached.
        validation::validate_capacity_provider(provider, &[])?;
    }
    for item in strategy.unwrap_or_default() {
        let provider = item.capacity_provider.as_deref().ok_or_else(|| {
            EcsError::InvalidParameter(
                "Capacity provider strategy item is missing a capacityProvider".to_string(),
            )
        })?;
        validation::validate_strategy_item(provider, item.weight, item.base, registered)?;
    }
    Ok(())
}

/// Idempotent: creating an existing name returns the persisted cluster
/// unchanged and re-ensures its substrate namespace.
pub async fn create_cluster(
    state: &AppState,
    req: CreateClusterRequest,
) -> Result<CreateClusterResponse, EcsError> {
    let name = req.cluster_name.unwrap_or_else(|| "default".to_string());
    validation::validate_cluster_name(&name)?;
    if let Some(settings) = &req.settings {
        validate_settings(settings)?;
    }
    validate_providers_and_strategy(
        req.capacity_providers.as_deref(),
        req.default_capacity_provider_strategy.as_deref(),
    )?;
    if let Some(logging) = req
        .configuration
        .as_ref()
        .and_then(|c| c.pointer("/executeCommandConfiguration/logging"))
        .and_then(|v| v.as_str())
    {
        validation::validate_execute_command_logging(logging)?;
    }

    if let Some(existing) = store::clusters::get(&state.db, &name).await? {
        state.orch.enqueue(Job::EnsureCluster {
            cluster_name: name.clone(),
        });
        return Ok(CreateClusterResponse {
            cluster: to_wire(state, &existing, Include::ALL),
        });
    }

    let now = now_ms();
    let cluster = Cluster {
        arn: state.arn.cluster(&name),
        name: name.clone(),
        status: status::ACTIVE.to_string(),
        region: state.arn.region.clone(),
        account_id: state.arn.account_id.clone(),
        k8s_cluster_name: kecs_common::resolve_k8s_cluster_name(),
        registered_container_instances_count: 0,
        running_tasks_count: 0,
        pending_tasks_count: 0,
        active_services_count: 0,
        settings: to_blob(&req.settings)?,
        configuration: to_blob(&req.configuration)?,
        tags: to_blob(&req.tags)?,
        capacity_providers: to_blob(&req.capacity_providers)?,
        default_capacity_provider_strategy: to_blob(&req.default_capacity_provider_strategy)?,
        localstack_state: None,
        created_at: now,
        updated_at: now,
    };
    store::clusters::create(&state.db, &cluster).await?;

    state.orch.enqueue(Job::EnsureCluster {
        cluster_name: name.clone(),
    });
    if state.localstack_enabled {
        state.orch.enqueue(Job::DeployLocalStack { cluster_name: name });
    }

    Ok(CreateClusterResponse {
        cluster: to_wire(state, &cluster, Include::ALL),
    })
}

/// With no identifiers, describe everything. Unresolvable identifiers become
/// `failures` entries, never an error.
pub async fn describe_clusters(
    state: &AppState,
    req: DescribeClustersRequest,
) -> Result<DescribeClustersResponse, EcsError> {
    let include = Include::from_request(req.include.as_deref());
    let mut clusters = Vec::new();
    let mut failures = Vec::new();

    let identifiers = req.clusters.unwrap_or_default();
    if identifiers.is_empty() {
        for cluster in store::clusters::list(&state.db).await? {
            clusters.push(to_wire(state, &cluster, include));
        }
        return Ok(DescribeClustersResponse { clusters, failures });
    }

    for id in identifiers {
        if id.is_empty() {
            failures.push(Failure::missing(""));
            continue;
        }
        let name = kecs_core::arn::extract_cluster_name(&id);
        match store::clusters::get(&state.db, name).await? {
            Some(cluster) => clusters.push(to_wire(state, &cluster, include)),
            None => failures.push(Failure::missing(id)),
        }
    }
    Ok(DescribeClustersResponse { clusters, failures })
}

pub async fn list_clusters(
    state: &AppState,
    req: ListClustersRequest,
) -> Result<ListClustersResponse, EcsError> {
    let (clusters, next_token) =
        store::clusters::list_page(&state.db, req.max_results, req.next_token.as_deref()).await?;
    Ok(ListClustersResponse {
        cluster_arns: clusters.into_iter().map(|c| c.arn).collect(),
        next_token,
    })
}

pub async fn update_cluster(
    state: &AppState,
    req: UpdateClusterRequest,
) -> Result<UpdateClusterResponse, EcsError> {
    let mut cluster = resolve_cluster(state, req.cluster.as_deref()).await?;

    if let Some(settings) = &req.settings {
        validate_settings(settings)?;
        cluster.settings = to_blob(&req.settings)?;
    }
    if req.configuration.is_some() {
        if let Some(logging) = req
            .configuration
            .as_ref()
            .and_then(|c| c.pointer("/executeCommandConfiguration/logging"))
            .and_then(|v| v.as_str())
        {
            validation::validate_execute_command_logging(logging)?;
        }
        cluster.configuration = to_blob(&req.configuration)?;
    }
    if req.service_connect_defaults.is_some() {
        // Accepted for client compatibility; not persisted.
        tracing::info!(cluster = %cluster.name, "ignoring serviceConnectDefaults");
    }

    cluster.updated_at = now_ms();
    store::clusters::update(&state.db, &cluster).await?;
    state.cache.invalidate(CACHE_KIND, &cluster.name);

    Ok(UpdateClusterResponse {
        cluster: to_wire(state, &cluster, Include::ALL),
    })
}

/// Merge by setting name: a matching name replaces the stored entry,
/// everything else is retained.
pub async fn update_cluster_settings(
    state: &AppState,
    req: UpdateClusterSettingsRequest,
) -> Result<UpdateClusterResponse, EcsError> {
    let mut cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let new_settings = req
        .settings
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("At least one cluster setting is required".to_string()))?;
    validate_settings(&new_settings)?;

    let mut merged: Vec<ClusterSetting> = cluster
        .settings
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    for setting in new_settings {
        match merged.iter_mut().find(|s| s.name == setting.name) {
            Some(existing) => existing.value = setting.value,
            None => merged.push(setting),
        }
    }

    cluster.settings = to_blob(&Some(merged))?;
    cluster.updated_at = now_ms();
    store::clusters::update(&state.db, &cluster).await?;
    state.cache.invalidate(CACHE_KIND, &cluster.name);

    Ok(UpdateClusterResponse {
        cluster: to_wire(state, &cluster, Include::ALL),
    })
}

pub async fn put_cluster_capacity_providers(
    state: &AppState,
    req: PutClusterCapacityProvidersRequest,
) -> Result<UpdateClusterResponse, EcsError> {
    let mut cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    validate_providers_and_strategy(
        req.capacity_providers.as_deref(),
        req.default_capacity_provider_strategy.as_deref(),
    )?;

    cluster.capacity_providers = to_blob(&req.capacity_providers)?;
    cluster.default_capacity_provider_strategy =
        to_blob(&req.default_capacity_provider_strategy)?;
    cluster.updated_at = now_ms();
    store::clusters::update(&state.db, &cluster).await?;
    state.cache.invalidate(CACHE_KIND, &cluster.name);

    Ok(UpdateClusterResponse {
        cluster: to_wire(state, &cluster, Include::ALL),
    })
}

/// Deletable only when nothing is active on it; transitions to INACTIVE
/// before the record is removed.
pub async fn delete_cluster(
    state: &AppState,
    req: DeleteClusterRequest,
) -> Result<DeleteClusterResponse, EcsError> {
    let mut cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    if cluster.active_services_count > 0 {
        return Err(EcsError::ClusterContainsServices);
    }
    if cluster.running_tasks_count > 0 {
        return Err(EcsError::ClusterContainsTasks);
    }

    cluster.status = status::INACTIVE.to_string();
    cluster.updated_at = now_ms();
    store::clusters::update(&state.db, &cluster).await?;
    let response = DeleteClusterResponse {
        cluster: to_wire(state, &cluster, Include::ALL),
    };

    store::clusters::delete(&state.db, &cluster.name).await?;
    store::tags::remove_all(&state.db, &cluster.arn).await?;
    state.cache.invalidate(CACHE_KIND, &cluster.name);
    state.orch.enqueue(Job::DeleteCluster {
        cluster_name: cluster.name.clone(),
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_state;

    fn create_req(name: &str) -> CreateClusterRequest {
        CreateClusterRequest {
            cluster_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_cluster_is_idempotent() {
        let state = test_state();
        let first = create_cluster(&state, create_req("idempotent-test")).await.unwrap();
        let second = create_cluster(&state, create_req("idempotent-test")).await.unwrap();

        for response in [&first, &second] {
            assert_eq!(
                response.cluster.cluster_arn,
                "arn:aws:ecs:us-east-1:123456789012:cluster/idempotent-test"
            );
            assert_eq!(response.cluster.status, "ACTIVE");
        }

        let listed = list_clusters(&state, ListClustersRequest::default()).await.unwrap();
        let matching: Vec<_> = listed
            .cluster_arns
            .iter()
            .filter(|arn| arn.ends_with("cluster/idempotent-test"))
            .collect();
        assert_eq!(matching.len(), 1);
    }

    #[tokio::test]
    async fn test_create_cluster_name_validation() {
        let state = test_state();

        let err = create_cluster(&state, create_req("cluster@name")).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("alphanumeric characters, dashes, and underscores")
        );

        let err = create_cluster(&state, create_req("")).await.unwrap_err();
        assert!(err.to_string().contains("between 1 and 255"));

        let err = create_cluster(&state, create_req(&"a".repeat(256))).await.unwrap_err();
        assert!(err.to_string().contains("between 1 and 255"));
    }

    #[tokio::test]
    async fn test_create_cluster_echoes_complex_fields() {
        let state = test_state();
        let req = CreateClusterRequest {
            cluster_name: Some("blobs".to_string()),
            settings: Some(vec![ClusterSetting {
                name: Some("containerInsights".to_string()),
                value: Some("enabled".to_string()),
            }]),
            configuration: Some(serde_json::json!({
                "executeCommandConfiguration": {"logging": "DEFAULT"}
            })),
            tags: Some(vec![Tag {
                key: Some("env".to_string()),
                value: Some("test".to_string()),
            }]),
            ..Default::default()
        };
        let created = create_cluster(&state, req).await.unwrap();
        assert_eq!(
            created.cluster.settings,
            Some(serde_json::json!([{"name": "containerInsights", "value": "enabled"}]))
        );
        assert_eq!(
            created.cluster.configuration,
            Some(serde_json::json!({"executeCommandConfiguration": {"logging": "DEFAULT"}}))
        );

        // And they survive a Describe round trip unchanged
        let described = describe_clusters(
            &state,
            DescribeClustersRequest {
                clusters: Some(vec!["blobs".to_string()]),
                include: Some(vec!["SETTINGS".into(), "CONFIGURATIONS".into(), "TAGS".into()]),
            },
        )
        .await
        .unwrap();
        assert_eq!(described.clusters[0].settings, created.cluster.settings);
        assert_eq!(described.clusters[0].configuration, created.cluster.configuration);
        assert_eq!(
            described.clusters[0].tags,
            Some(serde_json::json!([{"key": "env", "value": "test"}]))
        );
    }

    #[tokio::test]
    async fn test_pagination_walks_the_full_set() {
        let state = test_state();
        for i in 0..15 {
            create_cluster(&state, create_req(&format!("test-cluster-{i:02}")))
                .await
                .unwrap();
        }

        let mut arns = Vec::new();
        let first = list_clusters(
            &state,
            ListClustersRequest {
                max_results: Some(5),
                next_token: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(first.cluster_arns.len(), 5);
        assert!(first.next_token.is_some());
        arns.extend(first.cluster_arns);

        let second = list_clusters(
            &state,
            ListClustersRequest {
                max_results: Some(5),
                next_token: first.next_token,
            },
        )
        .await
        .unwrap();
        assert_eq!(second.cluster_arns.len(), 5);
        assert!(second.next_token.is_some());
        arns.extend(second.cluster_arns);

        let third = list_clusters(
            &state,
            ListClustersRequest {
                max_results: Some(5),
                next_token: second.next_token,
            },
        )
        .await
        .unwrap();
        assert_eq!(third.cluster_arns.len(), 5);
        assert!(third.next_token.is_none());
        arns.extend(third.cluster_arns);

        let unique: std::collections::HashSet<_> = arns.iter().collect();
        assert_eq!(unique.len(), 15);
    }

    #[tokio::test]
    async fn test_delete_cluster_with_active_services() {
        let state = test_state();
        create_cluster(&state, create_req("cluster-with-services")).await.unwrap();
        store::clusters::adjust_counters(&state.db, "cluster-with-services", 1, 0, 0)
            .await
            .unwrap();

        let err = delete_cluster(
            &state,
            DeleteClusterRequest {
                cluster: Some("cluster-with-services".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The cluster cannot be deleted while services are active"
        );
    }

    #[tokio::test]
    async fn test_delete_cluster_transitions_to_inactive() {
        let state = test_state();
        create_cluster(&state, create_req("doomed")).await.unwrap();
        let deleted = delete_cluster(
            &state,
            DeleteClusterRequest {
                cluster: Some("doomed".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(deleted.cluster.status, "INACTIVE");
        assert!(store::clusters::get(&state.db, "doomed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_describe_clusters_collects_failures() {
        let state = test_state();
        let response = describe_clusters(
            &state,
            DescribeClustersRequest {
                clusters: Some(vec!["".to_string(), "arn:invalid".to_string()]),
                include: None,
            },
        )
        .await
        .unwrap();
        assert!(response.clusters.is_empty());
        assert_eq!(response.failures.len(), 2);
        assert_eq!(response.failures[0].arn, "");
        assert_eq!(response.failures[0].reason, "MISSING");
        assert_eq!(response.failures[1].arn, "arn:invalid");
        assert_eq!(response.failures[1].reason, "MISSING");
    }

    #[tokio::test]
    async fn test_update_cluster_settings_merges_by_name() {
        let state = test_state();
        let req = CreateClusterRequest {
            cluster_name: Some("merge".to_string()),
            settings: Some(vec![ClusterSetting {
                name: Some("containerInsights".to_string()),
                value: Some("disabled".to_string()),
            }]),
            ..Default::default()
        };
        create_cluster(&state, req).await.unwrap();

        let updated = update_cluster_settings(
            &state,
            UpdateClusterSettingsRequest {
                cluster: Some("merge".to_string()),
                settings: Some(vec![ClusterSetting {
                    name: Some("containerInsights".to_string()),
                    value: Some("enabled".to_string()),
                }]),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            updated.cluster.settings,
            Some(serde_json::json!([{"name": "containerInsights", "value": "enabled"}]))
        );

        let err = update_cluster_settings(
            &state,
            UpdateClusterSettingsRequest {
                cluster: Some("merge".to_string()),
                settings: Some(vec![]),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EcsError::MissingParameter(_)));
    }

    #[tokio::test]
    async fn test_put_capacity_providers_validates_names() {
        let state = test_state();
        create_cluster(&state, create_req("capacity")).await.unwrap();

        let err = put_cluster_capacity_providers(
            &state,
            PutClusterCapacityProvidersRequest {
                cluster: Some("capacity".to_string()),
                capacity_providers: Some(vec!["FARGATE".to_string()]),
                default_capacity_provider_strategy: Some(vec![CapacityProviderStrategyItem {
                    capacity_provider: Some("FARGATE".to_string()),
                    weight: 2000,
                    base: 0,
                }]),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("between 0 and 1000"));

        let ok = put_cluster_capacity_providers(
            &state,
            PutClusterCapacityProvidersRequest {
                cluster: Some("capacity".to_string()),
                capacity_providers: Some(vec!["FARGATE".to_string(), "FARGATE_SPOT".to_string()]),
                default_capacity_provider_strategy: Some(vec![CapacityProviderStrategyItem {
                    capacity_provider: Some("FARGATE".to_string()),
                    weight: 1,
                    base: 0,
                }]),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            ok.cluster.capacity_providers,
            Some(serde_json::json!(["FARGATE", "FARGATE_SPOT"]))
        );
    }
}
