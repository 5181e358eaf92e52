pub mod args;
pub mod shutdown;

/// Region and account baked into every ARN when nothing else is configured.
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";

/// Fallback substrate name when no instance can be derived.
pub const DEFAULT_K8S_CLUSTER: &str = "kecs-default";

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// Name of the k3d server node for a given instance, as seen from inside the
/// substrate, e.g. `k3d-kecs-server-0`.
pub fn k3d_node_name(instance: &str) -> String {
    format!("k3d-{instance}-server-0")
}

/// Derive the substrate cluster name shared by all ECS clusters.
///
/// Order: `KECS_INSTANCE_NAME`, then the `k3d-{instance}-server-0` hostname
/// pattern, then [`DEFAULT_K8S_CLUSTER`] with a warning.
pub fn resolve_k8s_cluster_name() -> String {
    if let Ok(instance) = std::env::var("KECS_INSTANCE_NAME")
        && !instance.is_empty()
    {
        return format!("kecs-{instance}");
    }
    if let Ok(hostname) = std::env::var("HOSTNAME")
        && let Some(instance) = instance_from_node_name(&hostname)
    {
        return format!("kecs-{instance}");
    }
    tracing::warn!(
        "could not derive substrate name from KECS_INSTANCE_NAME or hostname, using {}",
        DEFAULT_K8S_CLUSTER
    );
    DEFAULT_K8S_CLUSTER.to_string()
}

/// Parse the instance name out of a `k3d-{instance}-server-0` node name.
pub fn instance_from_node_name(hostname: &str) -> Option<&str> {
    hostname
        .strip_prefix("k3d-")?
        .strip_suffix("-server-0")
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_from_node_name() {
        assert_eq!(instance_from_node_name("k3d-dev-server-0"), Some("dev"));
        assert_eq!(
            instance_from_node_name("k3d-my-stack-server-0"),
            Some("my-stack")
        );
        assert_eq!(instance_from_node_name("k3d--server-0"), None);
        assert_eq!(instance_from_node_name("node-1"), None);
        assert_eq!(instance_from_node_name("k3d-dev-agent-0"), None);
    }

    #[test]
    fn test_k3d_node_name() {
        assert_eq!(k3d_node_name("dev"), "k3d-dev-server-0");
    }
}
