#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: kecs_core::error::EcsError,
    },

    #[error("Invalid input: {0}")]
    Input(String),
}
