//! LocalStack lifecycle: one shared deployment in the substrate, state
//! tracked per cluster, endpoint pushed to the dispatcher when it changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, PodSpec, PodTemplateSpec, Service as KubeService,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tokio::sync::watch;

use crate::Error;
use crate::client::ClientProvider;
use crate::materializer::MANAGED_BY;
use kecs_core::models::{LocalStackState, localstack_status, now_ms};
use kecs_core::store::{Db, clusters};

pub const LOCALSTACK_NAMESPACE: &str = "kecs-system";
pub const LOCALSTACK_NAME: &str = "localstack";
/// NodePort pinned for container-mode resolution.
pub const CONTAINER_MODE_PORT: i32 = 30890;
const LOCALSTACK_PORT: i32 = 4566;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const READY_POLL_ATTEMPTS: u32 = 60;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LocalStackConfig {
    pub enabled: bool,
    pub image: String,
    /// Eagerly loaded AWS services; emptied in container mode.
    pub services: Vec<String>,
    pub container_mode: bool,
    pub traefik_enabled: bool,
    pub instance: Option<String>,
}

impl LocalStackConfig {
    pub fn new(
        enabled: bool,
        traefik_enabled: bool,
        container_mode: bool,
        instance: Option<String>,
    ) -> Self {
        Self {
            enabled,
            image: "localstack/localstack:3".to_string(),
            services: ["iam", "s3", "dynamodb", "logs", "ssm", "secretsmanager"]
                .map(String::from)
                .to_vec(),
            container_mode,
            traefik_enabled,
            instance,
        }
    }

    /// Per-cluster copy of the global config. Container mode disables eager
    /// service loading; LocalStack then starts services on first use.
    pub fn for_cluster(&self) -> LocalStackConfig {
        let mut config = self.clone();
        if config.container_mode {
            config.services.clear();
        }
        config
    }
}

/// LocalStack endpoint as the dispatcher should reach it, given the
/// discovered ingress port. None leaves the current binding untouched.
pub fn resolve_proxy_endpoint(
    config: &LocalStackConfig,
    ingress_port: Option<u16>,
) -> Option<String> {
    if config.container_mode {
        let instance = config.instance.as_deref().unwrap_or("kecs");
        return Some(format!(
            "http://{}:{CONTAINER_MODE_PORT}",
            kecs_common::k3d_node_name(instance)
        ));
    }
    if config.traefik_enabled {
        return ingress_port.map(|port| format!("http://localhost:{port}"));
    }
    None
}

pub struct LocalStackManager {
    config: LocalStackConfig,
    clients: Arc<ClientProvider>,
    endpoint_tx: watch::Sender<Option<String>>,
    probe: reqwest::Client,
}

impl LocalStackManager {
    /// The receiver side re-binds the reverse proxy whenever a deploy
    /// resolves a new endpoint.
    pub fn new(
        config: LocalStackConfig,
        clients: Arc<ClientProvider>,
    ) -> (Self, watch::Receiver<Option<String>>) {
        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("probe client");
        (
            Self {
                config,
                clients,
                endpoint_tx,
                probe,
            },
            endpoint_rx,
        )
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Deploy LocalStack for a cluster and track the outcome in its record.
    pub async fn deploy_for_cluster(&self, db: &Db, cluster_name: &str) -> Result<(), Error> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(client) = self.clients.get().await else {
            tracing::warn!("skipping LocalStack deploy, no substrate client");
            return Ok(());
        };
        let config = self.config.for_cluster();

        self.persist_state(db, cluster_name, localstack_status::DEPLOYING, None)
            .await?;

        if let Err(err) = self.apply_manifests(&client, &config).await {
            tracing::error!(%err, cluster = %cluster_name, "LocalStack deploy failed");
            self.persist_state(
                db,
                cluster_name,
                localstack_status::FAILED,
                Some(err.to_string()),
            )
            .await?;
            return Ok(());
        }

        let ready = self.wait_ready(&client).await;
        if !ready {
            self.persist_state(
                db,
                cluster_name,
                localstack_status::FAILED,
                Some("deployment did not become ready".to_string()),
            )
            .await?;
            return Ok(());
        }

        let ingress_port = if config.traefik_enabled {
            self.discover_ingress_port(&client).await
        } else {
            None
        };
        let endpoint = resolve_proxy_endpoint(&config, ingress_port);

        let health = match &endpoint {
            Some(endpoint) => match self.probe_health(endpoint).await {
                Ok(health) => Some(health),
                Err(err) => {
                    tracing::warn!(%err, "LocalStack is ready but its health endpoint is not answering");
                    Some("unknown".to_string())
                }
            },
            None => None,
        };

        self.persist_state(db, cluster_name, localstack_status::RUNNING, health)
            .await?;
        if let Some(endpoint) = endpoint {
            tracing::info!(%endpoint, cluster = %cluster_name, "LocalStack endpoint resolved");
            self.endpoint_tx.send_replace(Some(endpoint));
        }
        Ok(())
    }

    async fn apply_manifests(
        &self,
        client: &Client,
        config: &LocalStackConfig,
    ) -> Result<(), Error> {
        let labels = BTreeMap::from([
            ("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
            ("app".to_string(), LOCALSTACK_NAME.to_string()),
        ]);

        let namespaces: Api<Namespace> = Api::all(client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(LOCALSTACK_NAMESPACE.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {}
            Err(kube::Error::Api(ref status)) if status.code == 409 => {}
            Err(err) => return Err(err.into()),
        }

        let mut env = vec![EnvVar {
            name: "EAGER_SERVICE_LOADING".to_string(),
            value: Some(if config.services.is_empty() { "0" } else { "1" }.to_string()),
            ..Default::default()
        }];
        if !config.services.is_empty() {
            env.push(EnvVar {
                name: "SERVICES".to_string(),
                value: Some(config.services.join(",")),
                ..Default::default()
            });
        }

        let spec = DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    LOCALSTACK_NAME.to_string(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: LOCALSTACK_NAME.to_string(),
                        image: Some(config.image.clone()),
                        env: Some(env),
                        ports: Some(vec![ContainerPort {
                            container_port: LOCALSTACK_PORT,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        };

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), LOCALSTACK_NAMESPACE);
        match deployments.get_opt(LOCALSTACK_NAME).await? {
            Some(_) => {
                let patch = serde_json::json!({ "spec": spec });
                deployments
                    .patch(LOCALSTACK_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
            None => {
                let deployment = Deployment {
                    metadata: ObjectMeta {
                        name: Some(LOCALSTACK_NAME.to_string()),
                        namespace: Some(LOCALSTACK_NAMESPACE.to_string()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    },
                    spec: Some(spec),
                    ..Default::default()
                };
                deployments
                    .create(&PostParams::default(), &deployment)
                    .await?;
            }
        }

        let service = KubeService {
            metadata: ObjectMeta {
                name: Some(LOCALSTACK_NAME.to_string()),
                namespace: Some(LOCALSTACK_NAMESPACE.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                selector: Some(BTreeMap::from([(
                    "app".to_string(),
                    LOCALSTACK_NAME.to_string(),
                )])),
                ports: Some(vec![ServicePort {
                    port: LOCALSTACK_PORT,
                    target_port: Some(IntOrString::Int(LOCALSTACK_PORT)),
                    node_port: Some(CONTAINER_MODE_PORT),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let services: Api<KubeService> = Api::namespaced(client.clone(), LOCALSTACK_NAMESPACE);
        match services.create(&PostParams::default(), &service).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ref status)) if status.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn wait_ready(&self, client: &Client) -> bool {
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), LOCALSTACK_NAMESPACE);
        for _ in 0..READY_POLL_ATTEMPTS {
            match deployments.get_opt(LOCALSTACK_NAME).await {
                Ok(Some(deployment)) => {
                    let ready = deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0);
                    if ready >= 1 {
                        return true;
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::debug!(%err, "LocalStack readiness poll failed"),
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        false
    }

    /// Traefik's ingress port is dynamic per substrate instance; read it off
    /// the service's node port.
    async fn discover_ingress_port(&self, client: &Client) -> Option<u16> {
        let services: Api<KubeService> = Api::namespaced(client.clone(), "kube-system");
        let traefik = services.get_opt("traefik").await.ok().flatten()?;
        traefik
            .spec?
            .ports?
            .iter()
            .find(|p| p.port == 80)
            .and_then(|p| p.node_port)
            .and_then(|p| u16::try_from(p).ok())
    }

    async fn probe_health(&self, endpoint: &str) -> Result<String, reqwest::Error> {
        let response = self
            .probe
            .get(format!("{endpoint}/_localstack/health"))
            .send()
            .await?;
        Ok(if response.status().is_success() {
            "healthy".to_string()
        } else {
            format!("http {}", response.status().as_u16())
        })
    }

    async fn persist_state(
        &self,
        db: &Db,
        cluster_name: &str,
        state: &str,
        health_status: Option<String>,
    ) -> Result<(), Error> {
        let record = LocalStackState {
            deployed: state == localstack_status::RUNNING,
            status: state.to_string(),
            deployed_at: Some(now_ms()),
            namespace: LOCALSTACK_NAMESPACE.to_string(),
            health_status,
        };
        let raw = serde_json::to_string(&record)?;
        clusters::set_localstack_state(db, cluster_name, Some(&raw)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_mode_endpoint_uses_the_node_name() {
        let config = LocalStackConfig::new(true, false, true, Some("dev".to_string()));
        assert_eq!(
            resolve_proxy_endpoint(&config, None).as_deref(),
            Some("http://k3d-dev-server-0:30890")
        );
        // Ingress port is irrelevant in container mode
        assert_eq!(
            resolve_proxy_endpoint(&config, Some(18080)).as_deref(),
            Some("http://k3d-dev-server-0:30890")
        );
    }

    #[test]
    fn test_host_mode_endpoint_needs_the_ingress_port() {
        let config = LocalStackConfig::new(true, true, false, None);
        assert_eq!(
            resolve_proxy_endpoint(&config, Some(18080)).as_deref(),
            Some("http://localhost:18080")
        );
        assert_eq!(resolve_proxy_endpoint(&config, None), None);
    }

    #[test]
    fn test_no_traefik_leaves_binding_untouched() {
        let config = LocalStackConfig::new(true, false, false, None);
        assert_eq!(resolve_proxy_endpoint(&config, Some(18080)), None);
    }

    #[test]
    fn test_container_mode_disables_eager_loading() {
        let config = LocalStackConfig::new(true, false, true, None);
        assert!(config.for_cluster().services.is_empty());

        let host = LocalStackConfig::new(true, false, false, None);
        assert!(!host.for_cluster().services.is_empty());
    }
}
