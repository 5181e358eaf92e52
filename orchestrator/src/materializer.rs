use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, Pod, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};

use crate::Error;
use crate::client::ClientProvider;
use kecs_core::models::{Cluster, Service, Task, TaskDefinition};

pub const MANAGED_BY: &str = "kecs";

const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
const LABEL_CLUSTER: &str = "kecs.dev/cluster";
const LABEL_REGION: &str = "kecs.dev/region";
const LABEL_SERVICE: &str = "kecs.dev/service";
const LABEL_TASK_ID: &str = "kecs.dev/task-id";

/// Projects control-plane records onto substrate objects: cluster →
/// namespace, service → Deployment, task → Pod.
pub struct Materializer {
    clients: Arc<ClientProvider>,
    region: String,
}

impl Materializer {
    pub fn new(clients: Arc<ClientProvider>, region: String) -> Self {
        Self { clients, region }
    }

    async fn client(&self) -> Option<Client> {
        let client = self.clients.get().await;
        if client.is_none() {
            tracing::warn!("skipping substrate operation, no client");
        }
        client
    }

    /// Idempotent create of the namespace backing an ECS cluster.
    pub async fn ensure_namespace(&self, cluster: &Cluster) -> Result<(), Error> {
        let Some(client) = self.client().await else {
            return Ok(());
        };
        let name = namespace_name(&cluster.name);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
                    (LABEL_CLUSTER.to_string(), cluster.name.clone()),
                    (LABEL_REGION.to_string(), self.region.clone()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<Namespace> = Api::all(client);
        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                tracing::info!(namespace = %name, cluster = %cluster.name, "namespace created");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort namespace removal; callers log the error and move on.
    pub async fn delete_namespace(&self, cluster_name: &str) -> Result<(), Error> {
        let Some(client) = self.client().await else {
            return Ok(());
        };
        let name = namespace_name(cluster_name);
        let api: Api<Namespace> = Api::all(client);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::info!(namespace = %name, "namespace deleted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Create or scale the Deployment projected from a service. Containers
    /// are derived from the referenced task definition.
    pub async fn project_service(
        &self,
        cluster_name: &str,
        service: &Service,
        task_def: &TaskDefinition,
    ) -> Result<(), Error> {
        let Some(client) = self.client().await else {
            return Ok(());
        };
        let namespace = namespace_name(cluster_name);
        let name = sanitize_name(&service.service_name);
        let selector_labels = BTreeMap::from([(LABEL_SERVICE.to_string(), name.clone())]);
        let mut labels = selector_labels.clone();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
        labels.insert(LABEL_CLUSTER.to_string(), cluster_name.to_string());

        let spec = DeploymentSpec {
            replicas: Some(service.desired_count.max(0) as i32),
            selector: LabelSelector {
                match_labels: Some(selector_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: containers_from_definitions(&task_def.container_definitions)?,
                    ..Default::default()
                }),
            },
            ..Default::default()
        };

        let api: Api<Deployment> = Api::namespaced(client, &namespace);
        match api.get_opt(&name).await? {
            Some(_) => {
                let patch = serde_json::json!({ "spec": spec });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                tracing::info!(%namespace, deployment = %name, replicas = service.desired_count, "deployment updated");
            }
            None => {
                let deployment = Deployment {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.clone()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    spec: Some(spec),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &deployment).await?;
                tracing::info!(%namespace, deployment = %name, replicas = service.desired_count, "deployment created");
            }
        }
        Ok(())
    }

    pub async fn remove_service(&self, cluster_name: &str, service_name: &str) -> Result<(), Error> {
        let Some(client) = self.client().await else {
            return Ok(());
        };
        let namespace = namespace_name(cluster_name);
        let name = sanitize_name(service_name);
        let api: Api<Deployment> = Api::namespaced(client, &namespace);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// One Pod per task. Returns the substrate linkage recorded on the task.
    pub async fn create_pod_for_task(
        &self,
        cluster_name: &str,
        task: &Task,
        task_def: &TaskDefinition,
    ) -> Result<Option<(String, String)>, Error> {
        let Some(client) = self.client().await else {
            return Ok(None);
        };
        let namespace = namespace_name(cluster_name);
        let name = pod_name_for_task(&task_def.family, &task.id);

        let mut containers = containers_from_definitions(&task_def.container_definitions)?;
        if let Some(overrides) = task.overrides.as_deref() {
            apply_task_overrides(&mut containers, overrides)?;
        }

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
                    (LABEL_CLUSTER.to_string(), cluster_name.to_string()),
                    (LABEL_TASK_ID.to_string(), task.id.clone()),
                ])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers,
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let api: Api<Pod> = Api::namespaced(client, &namespace);
        match api.create(&PostParams::default(), &pod).await {
            Ok(_) => {
                tracing::info!(%namespace, pod = %name, task = %task.id, "pod created");
                Ok(Some((name, namespace)))
            }
            // Recovery replays the same task; the existing pod wins.
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(Some((name, namespace))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete_pod_for_task(&self, task: &Task) -> Result<(), Error> {
        let Some(client) = self.client().await else {
            return Ok(());
        };
        let (Some(pod_name), Some(namespace)) = (task.pod_name.as_deref(), task.namespace.as_deref())
        else {
            return Ok(());
        };
        let api: Api<Pod> = Api::namespaced(client, namespace);
        match api.delete(pod_name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Namespace backing an ECS cluster. Cluster names are already restricted to
/// `[A-Za-z0-9_-]`; underscores are not valid in namespace names.
pub fn namespace_name(cluster_name: &str) -> String {
    sanitize_name(cluster_name)
}

pub(crate) fn pod_name_for_task(family: &str, task_id: &str) -> String {
    let short: String = task_id.chars().take(8).collect();
    sanitize_name(&format!("{family}-{short}"))
}

/// Fold an arbitrary identifier into a DNS-1123 label.
pub(crate) fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    out.truncate(63);
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Containers of a pod template, derived from the task definition's
/// container definitions blob: name, image, command, env, ports.
pub(crate) fn containers_from_definitions(raw: &str) -> Result<Vec<Container>, Error> {
    let defs: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let mut containers = Vec::with_capacity(defs.len());
    for def in &defs {
        let name = def
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Input("container definition is missing a name".to_string()))?;
        let image = def
            .get("image")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Input(format!("container '{name}' is missing an image")))?;

        let command = def.get("command").and_then(|v| v.as_array()).map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(String::from))
                .collect()
        });
        let env = def.get("environment").and_then(|v| v.as_array()).map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(EnvVar {
                        name: item.get("name")?.as_str()?.to_string(),
                        value: item.get("value").and_then(|v| v.as_str()).map(String::from),
                        ..Default::default()
                    })
                })
                .collect()
        });
        let ports = def.get("portMappings").and_then(|v| v.as_array()).map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(ContainerPort {
                        container_port: item.get("containerPort")?.as_i64()? as i32,
                        protocol: item
                            .get("protocol")
                            .and_then(|v| v.as_str())
                            .map(|p| p.to_uppercase()),
                        ..Default::default()
                    })
                })
                .collect()
        });

        containers.push(Container {
            name: sanitize_name(name),
            image: Some(image.to_string()),
            command,
            env,
            ports,
            ..Default::default()
        });
    }
    if containers.is_empty() {
        return Err(Error::Input("task definition has no containers".to_string()));
    }
    Ok(containers)
}

/// Merge a RunTask override blob into the derived containers: command is
/// replaced, environment entries are appended with override values winning.
pub(crate) fn apply_task_overrides(
    containers: &mut [Container],
    raw: &str,
) -> Result<(), Error> {
    let overrides: serde_json::Value = serde_json::from_str(raw)?;
    let Some(container_overrides) = overrides.get("containerOverrides").and_then(|v| v.as_array())
    else {
        return Ok(());
    };
    for entry in container_overrides {
        let Some(name) = entry.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let target_name = sanitize_name(name);
        let Some(container) = containers.iter_mut().find(|c| c.name == target_name) else {
            continue;
        };
        if let Some(command) = entry.get("command").and_then(|v| v.as_array()) {
            container.command = Some(
                command
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect(),
            );
        }
        if let Some(environment) = entry.get("environment").and_then(|v| v.as_array()) {
            let mut env = container.env.take().unwrap_or_default();
            for item in environment {
                let Some(var_name) = item.get("name").and_then(|v| v.as_str()) else {
                    continue;
                };
                let value = item.get("value").and_then(|v| v.as_str()).map(String::from);
                match env.iter_mut().find(|e| e.name == var_name) {
                    Some(existing) => existing.value = value,
                    None => env.push(EnvVar {
                        name: var_name.to_string(),
                        value,
                        ..Default::default()
                    }),
                }
            }
            container.env = Some(env);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Web_App"), "web-app");
        assert_eq!(sanitize_name("-edge-"), "edge");
        assert_eq!(sanitize_name("___"), "task");
        assert_eq!(sanitize_name(&"x".repeat(80)).len(), 63);
    }

    #[test]
    fn test_containers_from_definitions() {
        let raw = r#"[
            {
                "name": "App",
                "image": "nginx:1.27",
                "command": ["nginx", "-g", "daemon off;"],
                "environment": [{"name": "PORT", "value": "80"}],
                "portMappings": [{"containerPort": 80, "protocol": "tcp"}]
            },
            {"name": "sidecar", "image": "envoy:v1"}
        ]"#;
        let containers = containers_from_definitions(raw).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "app");
        assert_eq!(containers[0].image.as_deref(), Some("nginx:1.27"));
        assert_eq!(
            containers[0].ports.as_ref().unwrap()[0].container_port,
            80
        );
        assert_eq!(
            containers[0].ports.as_ref().unwrap()[0].protocol.as_deref(),
            Some("TCP")
        );
        assert!(containers[1].env.is_none());
    }

    #[test]
    fn test_containers_require_name_and_image() {
        assert!(containers_from_definitions(r#"[{"image":"nginx"}]"#).is_err());
        assert!(containers_from_definitions(r#"[{"name":"app"}]"#).is_err());
        assert!(containers_from_definitions("[]").is_err());
    }

    #[test]
    fn test_apply_task_overrides() {
        let mut containers = containers_from_definitions(
            r#"[{"name":"app","image":"nginx","environment":[{"name":"A","value":"1"}]}]"#,
        )
        .unwrap();
        let overrides = r#"{
            "containerOverrides": [{
                "name": "app",
                "command": ["sh", "-c", "echo hi"],
                "environment": [{"name": "A", "value": "2"}, {"name": "B", "value": "3"}]
            }]
        }"#;
        apply_task_overrides(&mut containers, overrides).unwrap();
        assert_eq!(
            containers[0].command.as_ref().unwrap(),
            &vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()]
        );
        let env = containers[0].env.as_ref().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].value.as_deref(), Some("2"));
        assert_eq!(env[1].name, "B");
    }

    #[test]
    fn test_pod_name_for_task() {
        let name = pod_name_for_task("web", "7f9c6a12-3456-7890-abcd-ef0123456789");
        assert_eq!(name, "web-7f9c6a12");
    }
}
