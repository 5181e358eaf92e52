use serde::{Deserialize, Serialize};

/// Unix epoch timestamp in milliseconds.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub mod status {
    pub const ACTIVE: &str = "ACTIVE";
    pub const INACTIVE: &str = "INACTIVE";
    pub const DRAINING: &str = "DRAINING";

    pub const PENDING: &str = "PENDING";
    pub const RUNNING: &str = "RUNNING";
    pub const STOPPED: &str = "STOPPED";

    pub const STEADY_STATE: &str = "STEADY_STATE";
    pub const STABILIZING: &str = "STABILIZING";

    pub const PRIMARY: &str = "PRIMARY";
    pub const IN_PROGRESS: &str = "IN_PROGRESS";
    pub const COMPLETED: &str = "COMPLETED";
}

pub mod localstack_status {
    pub const DEPLOYING: &str = "deploying";
    pub const RUNNING: &str = "running";
    pub const FAILED: &str = "failed";
}

/// A logical ECS cluster, projected onto a namespace of the shared substrate.
///
/// Complex nested fields (`settings`, `configuration`, …) are UTF-8 JSON
/// blobs, opaque to storage; they round-trip store→fetch→describe unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub arn: String,
    /// ACTIVE | INACTIVE
    pub status: String,
    pub region: String,
    pub account_id: String,
    /// Substrate this cluster shares with its peers.
    pub k8s_cluster_name: String,
    /// Advisory mirrors of actual service/task counts. Never negative.
    pub registered_container_instances_count: i64,
    pub running_tasks_count: i64,
    pub pending_tasks_count: i64,
    pub active_services_count: i64,
    pub settings: Option<String>,
    pub configuration: Option<String>,
    pub tags: Option<String>,
    pub capacity_providers: Option<String>,
    pub default_capacity_provider_strategy: Option<String>,
    /// Serialized [`LocalStackState`].
    pub localstack_state: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// LocalStack deployment state attached to a cluster record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStackState {
    pub deployed: bool,
    /// deploying | running | failed
    pub status: String,
    pub deployed_at: Option<i64>,
    pub namespace: String,
    pub health_status: Option<String>,
}

/// An immutable, versioned pod template. Identified by `family:revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub family: String,
    /// Monotonically increasing per family, starting at 1.
    pub revision: i64,
    pub arn: String,
    /// ACTIVE | INACTIVE
    pub status: String,
    /// JSON array of container definitions.
    pub container_definitions: String,
    pub volumes: Option<String>,
    pub placement_constraints: Option<String>,
    pub proxy_configuration: Option<String>,
    pub runtime_platform: Option<String>,
    pub inference_accelerators: Option<String>,
    /// Comma-list of EC2 | FARGATE | EXTERNAL.
    pub requires_compatibilities: Option<String>,
    pub network_mode: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub pid_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub tags: Option<String>,
    pub registered_at: i64,
    pub deregistered_at: Option<i64>,
}

/// A long-running declaration that N tasks of a task definition should run.
/// Unique per `(cluster_arn, service_name)`; projects to a Deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub arn: String,
    pub service_name: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub desired_count: i64,
    pub running_count: i64,
    pub pending_count: i64,
    pub launch_type: String,
    pub platform_version: Option<String>,
    /// ACTIVE | DRAINING | INACTIVE
    pub status: String,
    /// REPLICA | DAEMON
    pub scheduling_strategy: String,
    pub deployment_configuration: Option<String>,
    /// JSON array of [`ServiceDeployment`] sub-objects.
    pub deployments: Option<String>,
    pub network_configuration: Option<String>,
    pub placement_constraints: Option<String>,
    pub placement_strategy: Option<String>,
    pub capacity_provider_strategy: Option<String>,
    pub load_balancers: Option<String>,
    pub service_registries: Option<String>,
    pub service_connect_configuration: Option<String>,
    pub tags: Option<String>,
    pub role_arn: Option<String>,
    pub enable_ecs_managed_tags: bool,
    pub propagate_tags: Option<String>,
    pub enable_execute_command: bool,
    pub health_check_grace_period_seconds: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Deployment sub-object carried inside a service record. Stored in the
/// service's `deployments` blob in wire shape, so it is echoed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeployment {
    pub id: String,
    /// PRIMARY | ACTIVE | INACTIVE
    pub status: String,
    pub task_definition: String,
    pub desired_count: i64,
    pub pending_count: i64,
    pub running_count: i64,
    /// IN_PROGRESS | COMPLETED | FAILED
    pub rollout_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout_state_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,
    /// Epoch seconds.
    pub created_at: f64,
    pub updated_at: f64,
}

/// One execution of a task definition; projects to a Pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// UUID, also the tail of the ARN.
    pub id: String,
    pub arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub container_instance_arn: Option<String>,
    pub overrides: Option<String>,
    /// PROVISIONING → PENDING → ACTIVATING → RUNNING → DEACTIVATING →
    /// STOPPING → DEPROVISIONING → STOPPED
    pub last_status: String,
    pub desired_status: String,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub containers: Option<String>,
    pub started_by: Option<String>,
    /// Bumped on every externally observable write.
    pub version: i64,
    pub stop_code: Option<String>,
    pub stopped_reason: Option<String>,
    pub connectivity: Option<String>,
    pub connectivity_at: Option<i64>,
    pub pull_started_at: Option<i64>,
    pub pull_stopped_at: Option<i64>,
    pub started_at: Option<i64>,
    pub stopping_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub execution_stopped_at: Option<i64>,
    pub launch_type: String,
    pub platform_version: Option<String>,
    pub group: Option<String>,
    pub attachments: Option<String>,
    pub attributes: Option<String>,
    pub tags: Option<String>,
    pub health_status: Option<String>,
    pub enable_execute_command: bool,
    pub capacity_provider_name: Option<String>,
    /// Substrate linkage, set once the pod is materialized.
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub created_at: i64,
}

/// A weighted sub-group of tasks within a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSet {
    /// `ts-` followed by a random suffix.
    pub id: String,
    pub arn: String,
    pub service_arn: String,
    pub cluster_arn: String,
    pub external_id: Option<String>,
    pub task_definition: String,
    pub launch_type: Option<String>,
    pub platform_version: Option<String>,
    /// Always in [0, 100]; unit is always PERCENT.
    pub scale_value: f64,
    pub scale_unit: String,
    /// ACTIVE | DRAINING | INACTIVE
    pub status: String,
    /// STEADY_STATE | STABILIZING
    pub stability_status: String,
    pub computed_desired_count: i64,
    pub running_count: i64,
    pub pending_count: i64,
    pub network_configuration: Option<String>,
    pub load_balancers: Option<String>,
    pub service_registries: Option<String>,
    pub capacity_provider_strategy: Option<String>,
    pub tags: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub stability_status_at: i64,
}

impl Cluster {
    pub fn localstack(&self) -> Option<LocalStackState> {
        self.localstack_state
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

impl Service {
    pub fn deployment_list(&self) -> Vec<ServiceDeployment> {
        self.deployments
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}
