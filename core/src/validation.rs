//! Syntactic and semantic request-field checks. Failures surface as
//! `InvalidParameter` / `MissingParameter` with the message the AWS SDKs and
//! Terraform match on.

use crate::error::{EcsError, Result};

pub const MANAGED_CAPACITY_PROVIDERS: [&str; 2] = ["FARGATE", "FARGATE_SPOT"];

const CLUSTER_SETTING_NAMES: [&str; 1] = ["containerInsights"];

pub fn validate_cluster_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(EcsError::InvalidParameter(
            "Cluster name must be between 1 and 255 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EcsError::InvalidParameter(
            "Cluster name can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }
    Ok(())
}

pub fn validate_cluster_setting(name: &str, value: &str) -> Result<()> {
    if !CLUSTER_SETTING_NAMES.contains(&name) {
        return Err(EcsError::InvalidParameter(format!(
            "Unknown cluster setting name: {name}"
        )));
    }
    if name == "containerInsights" && !["enabled", "disabled"].contains(&value) {
        return Err(EcsError::InvalidParameter(format!(
            "Cluster setting containerInsights must be enabled or disabled, got: {value}"
        )));
    }
    Ok(())
}

/// Capacity provider names must be one of the managed providers or a name the
/// caller has previously registered.
pub fn validate_capacity_provider(name: &str, registered: &[String]) -> Result<()> {
    if MANAGED_CAPACITY_PROVIDERS.contains(&name) || registered.iter().any(|r| r == name) {
        return Ok(());
    }
    Err(EcsError::InvalidParameter(format!(
        "The capacity provider '{name}' is not valid"
    )))
}

pub fn validate_strategy_item(provider: &str, weight: i64, base: i64, registered: &[String]) -> Result<()> {
    validate_capacity_provider(provider, registered)?;
    if !(0..=1000).contains(&weight) {
        return Err(EcsError::InvalidParameter(format!(
            "Capacity provider strategy weight must be between 0 and 1000, got: {weight}"
        )));
    }
    if base < 0 {
        return Err(EcsError::InvalidParameter(format!(
            "Capacity provider strategy base must be non-negative, got: {base}"
        )));
    }
    Ok(())
}

pub fn validate_execute_command_logging(logging: &str) -> Result<()> {
    if ["NONE", "DEFAULT", "OVERRIDE"].contains(&logging) {
        return Ok(());
    }
    Err(EcsError::InvalidParameter(format!(
        "ExecuteCommandConfiguration logging must be NONE, DEFAULT or OVERRIDE, got: {logging}"
    )))
}

/// Tagging operations only accept ECS ARNs.
pub fn validate_tag_resource_arn(resource_arn: &str) -> Result<()> {
    if resource_arn.is_empty() {
        return Err(EcsError::MissingParameter(
            "resourceArn is required".to_string(),
        ));
    }
    if !resource_arn.starts_with("arn:aws:ecs:") {
        return Err(EcsError::InvalidParameter(format!(
            "resourceArn must be an ECS resource ARN, got: {resource_arn}"
        )));
    }
    Ok(())
}
