use kube::Client;
use kube::config::KubeConfigOptions;
use tokio::sync::Mutex;

/// Lazily resolves a Kubernetes client for the shared substrate.
///
/// Resolution order: in-cluster config, then the kubeconfig context named
/// after the substrate, then whatever `Config::infer` can find. When nothing
/// resolves, substrate operations degrade to logged no-ops.
pub struct ClientProvider {
    /// Kubeconfig context of the externally managed substrate, e.g. `k3d-dev`.
    context: Option<String>,
    cached: Mutex<Option<Client>>,
}

impl ClientProvider {
    pub fn new(context: Option<String>) -> Self {
        Self {
            context,
            cached: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Option<Client> {
        {
            let cached = self.cached.lock().await;
            if let Some(client) = cached.as_ref() {
                return Some(client.clone());
            }
        }

        let config = self.resolve().await?;
        match Client::try_from(config) {
            Ok(client) => {
                *self.cached.lock().await = Some(client.clone());
                Some(client)
            }
            Err(err) => {
                tracing::warn!(%err, "failed to build Kubernetes client");
                None
            }
        }
    }

    async fn resolve(&self) -> Option<kube::Config> {
        if let Ok(config) = kube::Config::incluster() {
            return Some(config);
        }
        if let Some(context) = &self.context {
            match kube::Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            })
            .await
            {
                Ok(config) => return Some(config),
                Err(err) => {
                    tracing::debug!(%err, context, "kubeconfig context unavailable");
                }
            }
        }
        match kube::Config::infer().await {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!(%err, "no Kubernetes client available, substrate operations disabled");
                None
            }
        }
    }
}
