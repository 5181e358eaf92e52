use clap::{Parser, Subcommand};
use kecs_common::args::{FeatureArgs, InstanceArgs, StateArgs};

#[derive(Parser, Debug)]
#[command(name = "kecs-server")]
#[command(about = "Local ECS control plane backed by a Kubernetes substrate")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control-plane server
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "KECS_PORT", default_value_t = 5373)]
    pub port: u16,

    #[clap(flatten)]
    pub instance: InstanceArgs,

    #[clap(flatten)]
    pub state: StateArgs,

    #[clap(flatten)]
    pub features: FeatureArgs,
}
