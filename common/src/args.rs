use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct InstanceArgs {
    /// AWS region reported in ARNs and responses
    #[arg(long, env = "AWS_DEFAULT_REGION", default_value = crate::DEFAULT_REGION)]
    pub region: String,

    /// AWS account id reported in ARNs
    #[arg(long, env = "KECS_ACCOUNT_ID", default_value = crate::DEFAULT_ACCOUNT_ID)]
    pub account_id: String,

    /// Instance name used to derive substrate node names
    #[arg(long, env = "KECS_INSTANCE_NAME")]
    pub instance: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct StateArgs {
    /// Directory holding the embedded state database
    #[arg(long, env = "KECS_DATA_DIR", default_value = "/var/lib/kecs/data")]
    pub data_dir: PathBuf,

    /// Re-drive substrate materialization from persisted state on startup
    #[arg(
        long,
        env = "KECS_AUTO_RECOVER_STATE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub auto_recover_state: bool,

    /// Leave substrate namespaces in place when the process exits
    #[arg(
        long,
        env = "KECS_KEEP_CLUSTERS_ON_SHUTDOWN",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub keep_clusters_on_shutdown: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureArgs {
    /// Deploy LocalStack into the substrate and proxy non-ECS AWS APIs to it
    #[arg(
        long,
        env = "KECS_LOCALSTACK_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub localstack_enabled: bool,

    /// Resolve the LocalStack endpoint through the substrate's Traefik ingress
    #[arg(
        long,
        env = "KECS_TRAEFIK_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub traefik_enabled: bool,

    /// Resolve LocalStack via the k3d node instead of host loopback
    #[arg(
        long,
        env = "KECS_CONTAINER_MODE",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub container_mode: bool,
}
