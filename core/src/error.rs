/// Error taxonomy surfaced on the ECS wire as `{"__type": …, "message": …}`.
///
/// Substrate (Kubernetes / LocalStack) failures are deliberately absent: they
/// are logged and recorded into resource state, never returned to clients.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A request field failed syntactic or semantic validation.
    #[error("{0}")]
    InvalidParameter(String),

    /// A required request field was absent or empty.
    #[error("{0}")]
    MissingParameter(String),

    #[error("{0}")]
    ClusterNotFound(String),

    #[error("{0}")]
    ServiceNotFound(String),

    #[error("{0}")]
    TaskSetNotFound(String),

    /// Any other resource missing from storage on a non-Describe path.
    #[error("{0}")]
    ResourceNotFound(String),

    #[error("The cluster cannot be deleted while services are active")]
    ClusterContainsServices,

    #[error("The cluster cannot be deleted while tasks are active")]
    ClusterContainsTasks,

    /// Storage uniqueness violation.
    #[error("{0}")]
    AlreadyExists(String),

    /// Storage I/O or serialization failure. Clients get a generic message;
    /// the cause is logged where the error is rendered.
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EcsError>;

impl EcsError {
    /// Wire `__type` of the error.
    pub fn type_name(&self) -> &'static str {
        match self {
            EcsError::InvalidParameter(_) => "InvalidParameterException",
            EcsError::MissingParameter(_) => "MissingParameterException",
            EcsError::ClusterNotFound(_) => "ClusterNotFoundException",
            EcsError::ServiceNotFound(_) => "ServiceNotFoundException",
            EcsError::TaskSetNotFound(_) => "TaskSetNotFoundException",
            EcsError::ResourceNotFound(_) => "ResourceNotFoundException",
            EcsError::ClusterContainsServices => "ClusterContainsServicesException",
            EcsError::ClusterContainsTasks => "ClusterContainsTasksException",
            EcsError::AlreadyExists(_) => "ResourceAlreadyExistsException",
            EcsError::Internal(_) => "ServerException",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            EcsError::Internal(_) => 500,
            _ => 400,
        }
    }

    pub fn cluster_not_found() -> Self {
        EcsError::ClusterNotFound("Cluster not found.".to_string())
    }

    pub fn service_not_found() -> Self {
        EcsError::ServiceNotFound("Service not found.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let err = EcsError::ClusterContainsServices;
        assert_eq!(err.type_name(), "ClusterContainsServicesException");
        assert_eq!(
            err.to_string(),
            "The cluster cannot be deleted while services are active"
        );
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err = EcsError::Internal(anyhow::anyhow!("disk exploded at /var/lib"));
        assert_eq!(err.to_string(), "internal server error");
        assert_eq!(err.status_code(), 500);
    }
}
