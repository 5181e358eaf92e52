use anyhow::Context as _;
use rusqlite::{OptionalExtension, Row, params};

use super::{Db, insert_error, page};
use crate::error::Result;
use crate::models::Service;

const COLUMNS: &str = "arn, service_name, cluster_arn, task_definition_arn, desired_count, \
    running_count, pending_count, launch_type, platform_version, status, scheduling_strategy, \
    deployment_configuration, deployments, network_configuration, placement_constraints, \
    placement_strategy, capacity_provider_strategy, load_balancers, service_registries, \
    service_connect_configuration, tags, role_arn, enable_ecs_managed_tags, propagate_tags, \
    enable_execute_command, health_check_grace_period_seconds, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        arn: row.get("arn")?,
        service_name: row.get("service_name")?,
        cluster_arn: row.get("cluster_arn")?,
        task_definition_arn: row.get("task_definition_arn")?,
        desired_count: row.get("desired_count")?,
        running_count: row.get("running_count")?,
        pending_count: row.get("pending_count")?,
        launch_type: row.get("launch_type")?,
        platform_version: row.get("platform_version")?,
        status: row.get("status")?,
        scheduling_strategy: row.get("scheduling_strategy")?,
        deployment_configuration: row.get("deployment_configuration")?,
        deployments: row.get("deployments")?,
        network_configuration: row.get("network_configuration")?,
        placement_constraints: row.get("placement_constraints")?,
        placement_strategy: row.get("placement_strategy")?,
        capacity_provider_strategy: row.get("capacity_provider_strategy")?,
        load_balancers: row.get("load_balancers")?,
        service_registries: row.get("service_registries")?,
        service_connect_configuration: row.get("service_connect_configuration")?,
        tags: row.get("tags")?,
        role_arn: row.get("role_arn")?,
        enable_ecs_managed_tags: row.get("enable_ecs_managed_tags")?,
        propagate_tags: row.get("propagate_tags")?,
        enable_execute_command: row.get("enable_execute_command")?,
        health_check_grace_period_seconds: row.get("health_check_grace_period_seconds")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub async fn create(db: &Db, service: &Service) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        &format!(
            "INSERT INTO services ({COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
              ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)"
        ),
        params![
            service.arn,
            service.service_name,
            service.cluster_arn,
            service.task_definition_arn,
            service.desired_count,
            service.running_count,
            service.pending_count,
            service.launch_type,
            service.platform_version,
            service.status,
            service.scheduling_strategy,
            service.deployment_configuration,
            service.deployments,
            service.network_configuration,
            service.placement_constraints,
            service.placement_strategy,
            service.capacity_provider_strategy,
            service.load_balancers,
            service.service_registries,
            service.service_connect_configuration,
            service.tags,
            service.role_arn,
            service.enable_ecs_managed_tags,
            service.propagate_tags,
            service.enable_execute_command,
            service.health_check_grace_period_seconds,
            service.created_at,
            service.updated_at,
        ],
    )
    .map_err(|e| insert_error(e, "service", &service.service_name))?;
    Ok(())
}

/// Uniqueness scope is the cluster.
pub async fn get(db: &Db, cluster_arn: &str, service_name: &str) -> Result<Option<Service>> {
    let conn = db.conn().await;
    let service = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM services WHERE cluster_arn = ?1 AND service_name = ?2"
            ),
            params![cluster_arn, service_name],
            from_row,
        )
        .optional()
        .context("failed to query service")?;
    Ok(service)
}

pub async fn get_by_arn(db: &Db, arn: &str) -> Result<Option<Service>> {
    let conn = db.conn().await;
    let service = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM services WHERE arn = ?1"),
            params![arn],
            from_row,
        )
        .optional()
        .context("failed to query service by arn")?;
    Ok(service)
}

/// Whole-record replacement keyed by ARN.
pub async fn update(db: &Db, service: &Service) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute(
            "UPDATE services SET service_name = ?2, cluster_arn = ?3, task_definition_arn = ?4, \
             desired_count = ?5, running_count = ?6, pending_count = ?7, launch_type = ?8, \
             platform_version = ?9, status = ?10, scheduling_strategy = ?11, \
             deployment_configuration = ?12, deployments = ?13, network_configuration = ?14, \
             placement_constraints = ?15, placement_strategy = ?16, \
             capacity_provider_strategy = ?17, load_balancers = ?18, service_registries = ?19, \
             service_connect_configuration = ?20, tags = ?21, role_arn = ?22, \
             enable_ecs_managed_tags = ?23, propagate_tags = ?24, enable_execute_command = ?25, \
             health_check_grace_period_seconds = ?26, created_at = ?27, updated_at = ?28 \
             WHERE arn = ?1",
            params![
                service.arn,
                service.service_name,
                service.cluster_arn,
                service.task_definition_arn,
                service.desired_count,
                service.running_count,
                service.pending_count,
                service.launch_type,
                service.platform_version,
                service.status,
                service.scheduling_strategy,
                service.deployment_configuration,
                service.deployments,
                service.network_configuration,
                service.placement_constraints,
                service.placement_strategy,
                service.capacity_provider_strategy,
                service.load_balancers,
                service.service_registries,
                service.service_connect_configuration,
                service.tags,
                service.role_arn,
                service.enable_ecs_managed_tags,
                service.propagate_tags,
                service.enable_execute_command,
                service.health_check_grace_period_seconds,
                service.created_at,
                service.updated_at,
            ],
        )
        .context("failed to update service")?;
    Ok(affected > 0)
}

pub async fn delete(db: &Db, arn: &str) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute("DELETE FROM services WHERE arn = ?1", params![arn])
        .context("failed to delete service")?;
    Ok(affected > 0)
}

/// One page of a cluster's services, `service_name` ASC, optionally filtered
/// by launch type and scheduling strategy.
pub async fn list_page(
    db: &Db,
    cluster_arn: &str,
    launch_type: Option<&str>,
    scheduling_strategy: Option<&str>,
    max_results: Option<i64>,
    next_token: Option<&str>,
) -> Result<(Vec<Service>, Option<String>)> {
    let limit = page::clamp_max_results(max_results);
    let after = page::decode_token(next_token).unwrap_or_default();

    let conn = db.conn().await;

    let mut sql = format!(
        "SELECT {COLUMNS} FROM services WHERE cluster_arn = ?1 AND service_name > ?2"
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> =
        vec![Box::new(cluster_arn.to_string()), Box::new(after)];
    if let Some(launch_type) = launch_type {
        sql.push_str(&format!(" AND launch_type = ?{}", args.len() + 1));
        args.push(Box::new(launch_type.to_string()));
    }
    if let Some(strategy) = scheduling_strategy {
        sql.push_str(&format!(" AND scheduling_strategy = ?{}", args.len() + 1));
        args.push(Box::new(strategy.to_string()));
    }
    sql.push_str(&format!(" ORDER BY service_name LIMIT ?{}", args.len() + 1));
    args.push(Box::new(limit + 1));

    let mut stmt = conn.prepare(&sql).context("failed to prepare service listing")?;
    let mut services = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            from_row,
        )
        .context("failed to list services")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read service rows")?;

    let next = if services.len() as i64 > limit {
        services.truncate(limit as usize);
        services.last().map(|s| page::encode_token(&s.service_name))
    } else {
        None
    };
    Ok((services, next))
}

/// Every service across clusters; recovery walks this at startup.
pub async fn list_all(db: &Db) -> Result<Vec<Service>> {
    let conn = db.conn().await;
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM services ORDER BY rowid"))
        .context("failed to prepare service scan")?;
    let services = stmt
        .query_map([], from_row)
        .context("failed to scan services")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read service rows")?;
    Ok(services)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::EcsError;
    use crate::models::now_ms;

    pub(crate) fn make(cluster_arn: &str, name: &str) -> Service {
        let now = now_ms();
        Service {
            arn: format!(
                "arn:aws:ecs:us-east-1:123456789012:service/default/{name}"
            ),
            service_name: name.to_string(),
            cluster_arn: cluster_arn.to_string(),
            task_definition_arn: "arn:aws:ecs:us-east-1:123456789012:task-definition/web:1"
                .to_string(),
            desired_count: 1,
            running_count: 0,
            pending_count: 0,
            launch_type: "FARGATE".to_string(),
            platform_version: None,
            status: "ACTIVE".to_string(),
            scheduling_strategy: "REPLICA".to_string(),
            deployment_configuration: None,
            deployments: None,
            network_configuration: None,
            placement_constraints: None,
            placement_strategy: None,
            capacity_provider_strategy: None,
            load_balancers: None,
            service_registries: None,
            service_connect_configuration: None,
            tags: None,
            role_arn: None,
            enable_ecs_managed_tags: false,
            propagate_tags: None,
            enable_execute_command: false,
            health_check_grace_period_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }

    const CLUSTER: &str = "arn:aws:ecs:us-east-1:123456789012:cluster/default";

    #[tokio::test]
    async fn test_uniqueness_is_per_cluster() {
        let db = Db::open_in_memory().unwrap();
        create(&db, &make(CLUSTER, "web")).await.unwrap();

        let mut dup = make(CLUSTER, "web");
        dup.arn = format!("{}-copy", dup.arn);
        let err = create(&db, &dup).await.unwrap_err();
        assert!(matches!(err, EcsError::AlreadyExists(_)));

        // Same name in a different cluster is fine
        let mut other = make("arn:aws:ecs:us-east-1:123456789012:cluster/staging", "web");
        other.arn = "arn:aws:ecs:us-east-1:123456789012:service/staging/web".to_string();
        create(&db, &other).await.unwrap();
    }

    #[tokio::test]
    async fn test_complex_fields_round_trip() {
        let db = Db::open_in_memory().unwrap();
        let mut service = make(CLUSTER, "web");
        service.network_configuration = Some(
            r#"{"awsvpcConfiguration":{"subnets":["subnet-1"],"assignPublicIp":"ENABLED"}}"#
                .to_string(),
        );
        service.load_balancers =
            Some(r#"[{"targetGroupArn":"arn:aws:elasticloadbalancing:...","containerPort":80}]"#.to_string());
        create(&db, &service).await.unwrap();

        let fetched = get(&db, CLUSTER, "web").await.unwrap().unwrap();
        assert_eq!(fetched.network_configuration, service.network_configuration);
        assert_eq!(fetched.load_balancers, service.load_balancers);
    }

    #[tokio::test]
    async fn test_list_page_filters_and_orders() {
        let db = Db::open_in_memory().unwrap();
        for (name, launch_type) in [("charlie", "EC2"), ("alpha", "FARGATE"), ("bravo", "FARGATE")] {
            let mut service = make(CLUSTER, name);
            service.launch_type = launch_type.to_string();
            create(&db, &service).await.unwrap();
        }

        let (all, _) = list_page(&db, CLUSTER, None, None, None, None).await.unwrap();
        let names: Vec<_> = all.iter().map(|s| s.service_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);

        let (fargate, _) = list_page(&db, CLUSTER, Some("FARGATE"), None, None, None)
            .await
            .unwrap();
        assert_eq!(fargate.len(), 2);

        let (first, token) = list_page(&db, CLUSTER, None, None, Some(2), None).await.unwrap();
        assert_eq!(first.len(), 2);
        let (rest, end) = list_page(&db, CLUSTER, None, None, Some(2), token.as_deref())
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(end.is_none());
    }
}
