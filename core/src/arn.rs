//! ARN construction and identifier normalization.
//!
//! Every operation accepts short names, `family:revision` forms, or full
//! ARNs interchangeably; these helpers fold them down to the canonical
//! storage keys. Malformed ARNs are returned verbatim rather than rejected,
//! so lookups fail with a not-found instead of a parse error.

const ARN_PREFIX: &str = "arn:aws:ecs:";

/// Builds ARNs for the configured region and account.
#[derive(Debug, Clone)]
pub struct ArnBuilder {
    pub region: String,
    pub account_id: String,
}

impl ArnBuilder {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    fn base(&self) -> String {
        format!("{ARN_PREFIX}{}:{}", self.region, self.account_id)
    }

    pub fn cluster(&self, name: &str) -> String {
        format!("{}:cluster/{name}", self.base())
    }

    pub fn service(&self, cluster: &str, name: &str) -> String {
        format!("{}:service/{cluster}/{name}", self.base())
    }

    pub fn task_definition(&self, family: &str, revision: i64) -> String {
        format!("{}:task-definition/{family}:{revision}", self.base())
    }

    pub fn task(&self, cluster: &str, id: &str) -> String {
        format!("{}:task/{cluster}/{id}", self.base())
    }

    pub fn task_set(&self, cluster: &str, service: &str, id: &str) -> String {
        format!("{}:task-set/{cluster}/{service}/{id}", self.base())
    }
}

/// Resource part of an ECS ARN, e.g. `cluster/default`. None if `id` is not
/// an ECS ARN at all.
fn resource_part(id: &str) -> Option<&str> {
    if !id.starts_with(ARN_PREFIX) {
        return None;
    }
    // arn:aws:ecs:{region}:{account}:{resource}
    id.splitn(6, ':').nth(5)
}

fn last_path_segment(id: &str) -> &str {
    match resource_part(id) {
        Some(resource) => match resource.rsplit_once('/') {
            Some((_, tail)) if !tail.is_empty() => tail,
            // Malformed resource part: hand the input back verbatim.
            _ => id,
        },
        None => id,
    }
}

/// `arn:aws:ecs:…:cluster/{name}` → `{name}`; anything else unchanged.
pub fn extract_cluster_name(id: &str) -> &str {
    last_path_segment(id)
}

/// `arn:aws:ecs:…:service/{cluster}/{name}` → `{name}`; anything else unchanged.
pub fn extract_service_name(id: &str) -> &str {
    last_path_segment(id)
}

/// `arn:aws:ecs:…:task/{cluster}/{id}` → `{id}`; anything else unchanged.
pub fn extract_task_id(id: &str) -> &str {
    last_path_segment(id)
}

/// Accepts `family`, `family:revision`, or a full task-definition ARN.
/// Revision is absent for a bare family; the caller resolves it against the
/// latest ACTIVE revision.
pub fn parse_task_definition(id: &str) -> (String, Option<i64>) {
    let spec = match resource_part(id) {
        Some(resource) => resource.strip_prefix("task-definition/").unwrap_or(id),
        None => id,
    };
    match spec.rsplit_once(':') {
        Some((family, rev)) if !family.is_empty() => match rev.parse::<i64>() {
            Ok(revision) if revision >= 1 => (family.to_string(), Some(revision)),
            _ => (spec.to_string(), None),
        },
        _ => (spec.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_formats() {
        let arn = ArnBuilder::new("us-east-1", "123456789012");
        assert_eq!(
            arn.cluster("default"),
            "arn:aws:ecs:us-east-1:123456789012:cluster/default"
        );
        assert_eq!(
            arn.service("default", "web"),
            "arn:aws:ecs:us-east-1:123456789012:service/default/web"
        );
        assert_eq!(
            arn.task_definition("nginx", 3),
            "arn:aws:ecs:us-east-1:123456789012:task-definition/nginx:3"
        );
        assert_eq!(
            arn.task("default", "abc-123"),
            "arn:aws:ecs:us-east-1:123456789012:task/default/abc-123"
        );
        assert_eq!(
            arn.task_set("default", "web", "ts-1"),
            "arn:aws:ecs:us-east-1:123456789012:task-set/default/web/ts-1"
        );
    }

    #[test]
    fn test_extract_cluster_name() {
        assert_eq!(
            extract_cluster_name("arn:aws:ecs:us-east-1:123456789012:cluster/prod"),
            "prod"
        );
        assert_eq!(extract_cluster_name("prod"), "prod");
        // Malformed ARNs come back verbatim
        assert_eq!(extract_cluster_name("arn:invalid"), "arn:invalid");
        assert_eq!(
            extract_cluster_name("arn:aws:ecs:us-east-1:123456789012:cluster/"),
            "arn:aws:ecs:us-east-1:123456789012:cluster/"
        );
    }

    #[test]
    fn test_extraction_is_idempotent() {
        for id in [
            "arn:aws:ecs:us-east-1:123456789012:cluster/prod",
            "arn:aws:ecs:us-east-1:123456789012:service/prod/web",
            "arn:aws:ecs:us-east-1:123456789012:task/prod/7f9c",
            "plain-name",
            "arn:invalid",
            "",
        ] {
            let once = extract_cluster_name(id);
            assert_eq!(extract_cluster_name(once), once);
        }
    }

    #[test]
    fn test_extract_service_and_task() {
        assert_eq!(
            extract_service_name("arn:aws:ecs:us-east-1:123456789012:service/prod/web"),
            "web"
        );
        assert_eq!(
            extract_task_id("arn:aws:ecs:us-east-1:123456789012:task/prod/7f9c6a"),
            "7f9c6a"
        );
        assert_eq!(extract_task_id("7f9c6a"), "7f9c6a");
    }

    #[test]
    fn test_parse_task_definition() {
        assert_eq!(parse_task_definition("nginx"), ("nginx".to_string(), None));
        assert_eq!(
            parse_task_definition("nginx:4"),
            ("nginx".to_string(), Some(4))
        );
        assert_eq!(
            parse_task_definition("arn:aws:ecs:us-east-1:123456789012:task-definition/nginx:4"),
            ("nginx".to_string(), Some(4))
        );
        // Revision must be a positive integer
        assert_eq!(
            parse_task_definition("nginx:0"),
            ("nginx:0".to_string(), None)
        );
        assert_eq!(
            parse_task_definition("nginx:latest"),
            ("nginx:latest".to_string(), None)
        );
    }
}
