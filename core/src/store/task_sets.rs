use anyhow::Context as _;
use rusqlite::{OptionalExtension, Row, params};

use super::{Db, insert_error};
use crate::error::Result;
use crate::models::TaskSet;

const COLUMNS: &str = "id, service_arn, arn, cluster_arn, external_id, task_definition, \
    launch_type, platform_version, scale_value, scale_unit, status, stability_status, \
    computed_desired_count, running_count, pending_count, network_configuration, \
    load_balancers, service_registries, capacity_provider_strategy, tags, created_at, \
    updated_at, stability_status_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TaskSet> {
    Ok(TaskSet {
        id: row.get("id")?,
        service_arn: row.get("service_arn")?,
        arn: row.get("arn")?,
        cluster_arn: row.get("cluster_arn")?,
        external_id: row.get("external_id")?,
        task_definition: row.get("task_definition")?,
        launch_type: row.get("launch_type")?,
        platform_version: row.get("platform_version")?,
        scale_value: row.get("scale_value")?,
        scale_unit: row.get("scale_unit")?,
        status: row.get("status")?,
        stability_status: row.get("stability_status")?,
        computed_desired_count: row.get("computed_desired_count")?,
        running_count: row.get("running_count")?,
        pending_count: row.get("pending_count")?,
        network_configuration: row.get("network_configuration")?,
        load_balancers: row.get("load_balancers")?,
        service_registries: row.get("service_registries")?,
        capacity_provider_strategy: row.get("capacity_provider_strategy")?,
        tags: row.get("tags")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        stability_status_at: row.get("stability_status_at")?,
    })
}

pub async fn create(db: &Db, task_set: &TaskSet) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        &format!(
            "INSERT INTO task_sets ({COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
              ?19, ?20, ?21, ?22, ?23)"
        ),
        params![
            task_set.id,
            task_set.service_arn,
            task_set.arn,
            task_set.cluster_arn,
            task_set.external_id,
            task_set.task_definition,
            task_set.launch_type,
            task_set.platform_version,
            task_set.scale_value,
            task_set.scale_unit,
            task_set.status,
            task_set.stability_status,
            task_set.computed_desired_count,
            task_set.running_count,
            task_set.pending_count,
            task_set.network_configuration,
            task_set.load_balancers,
            task_set.service_registries,
            task_set.capacity_provider_strategy,
            task_set.tags,
            task_set.created_at,
            task_set.updated_at,
            task_set.stability_status_at,
        ],
    )
    .map_err(|e| insert_error(e, "task set", &task_set.id))?;
    Ok(())
}

pub async fn get(db: &Db, service_arn: &str, id: &str) -> Result<Option<TaskSet>> {
    let conn = db.conn().await;
    let task_set = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM task_sets WHERE service_arn = ?1 AND id = ?2"),
            params![service_arn, id],
            from_row,
        )
        .optional()
        .context("failed to query task set")?;
    Ok(task_set)
}

pub async fn update(db: &Db, task_set: &TaskSet) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute(
            "UPDATE task_sets SET arn = ?3, cluster_arn = ?4, external_id = ?5, \
             task_definition = ?6, launch_type = ?7, platform_version = ?8, scale_value = ?9, \
             scale_unit = ?10, status = ?11, stability_status = ?12, \
             computed_desired_count = ?13, running_count = ?14, pending_count = ?15, \
             network_configuration = ?16, load_balancers = ?17, service_registries = ?18, \
             capacity_provider_strategy = ?19, tags = ?20, created_at = ?21, updated_at = ?22, \
             stability_status_at = ?23 \
             WHERE service_arn = ?1 AND id = ?2",
            params![
                task_set.service_arn,
                task_set.id,
                task_set.arn,
                task_set.cluster_arn,
                task_set.external_id,
                task_set.task_definition,
                task_set.launch_type,
                task_set.platform_version,
                task_set.scale_value,
                task_set.scale_unit,
                task_set.status,
                task_set.stability_status,
                task_set.computed_desired_count,
                task_set.running_count,
                task_set.pending_count,
                task_set.network_configuration,
                task_set.load_balancers,
                task_set.service_registries,
                task_set.capacity_provider_strategy,
                task_set.tags,
                task_set.created_at,
                task_set.updated_at,
                task_set.stability_status_at,
            ],
        )
        .context("failed to update task set")?;
    Ok(affected > 0)
}

pub async fn delete(db: &Db, service_arn: &str, id: &str) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute(
            "DELETE FROM task_sets WHERE service_arn = ?1 AND id = ?2",
            params![service_arn, id],
        )
        .context("failed to delete task set")?;
    Ok(affected > 0)
}

pub async fn list_by_service(db: &Db, service_arn: &str) -> Result<Vec<TaskSet>> {
    let conn = db.conn().await;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM task_sets WHERE service_arn = ?1 ORDER BY rowid"
        ))
        .context("failed to prepare task set listing")?;
    let task_sets = stmt
        .query_map(params![service_arn], from_row)
        .context("failed to list task sets")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read task set rows")?;
    Ok(task_sets)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::now_ms;

    pub(crate) fn make(service_arn: &str, id: &str) -> TaskSet {
        let now = now_ms();
        TaskSet {
            id: id.to_string(),
            service_arn: service_arn.to_string(),
            arn: format!(
                "arn:aws:ecs:us-east-1:123456789012:task-set/default/web/{id}"
            ),
            cluster_arn: "arn:aws:ecs:us-east-1:123456789012:cluster/default".to_string(),
            external_id: None,
            task_definition: "arn:aws:ecs:us-east-1:123456789012:task-definition/web:1"
                .to_string(),
            launch_type: Some("FARGATE".to_string()),
            platform_version: None,
            scale_value: 100.0,
            scale_unit: "PERCENT".to_string(),
            status: "ACTIVE".to_string(),
            stability_status: "STEADY_STATE".to_string(),
            computed_desired_count: 1,
            running_count: 0,
            pending_count: 0,
            network_configuration: None,
            load_balancers: None,
            service_registries: None,
            capacity_provider_strategy: None,
            tags: None,
            created_at: now,
            updated_at: now,
            stability_status_at: now,
        }
    }

    const SERVICE: &str = "arn:aws:ecs:us-east-1:123456789012:service/default/web";

    #[tokio::test]
    async fn test_scoped_by_service() {
        let db = Db::open_in_memory().unwrap();
        create(&db, &make(SERVICE, "ts-1")).await.unwrap();
        let mut other = make("arn:aws:ecs:us-east-1:123456789012:service/default/api", "ts-1");
        other.arn = format!("{}-api", other.arn);
        create(&db, &other).await.unwrap();

        assert!(get(&db, SERVICE, "ts-1").await.unwrap().is_some());
        assert_eq!(list_by_service(&db, SERVICE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scale_update_round_trips() {
        let db = Db::open_in_memory().unwrap();
        create(&db, &make(SERVICE, "ts-1")).await.unwrap();
        let mut task_set = get(&db, SERVICE, "ts-1").await.unwrap().unwrap();
        task_set.scale_value = 50.0;
        task_set.stability_status = "STABILIZING".to_string();
        assert!(update(&db, &task_set).await.unwrap());
        let fetched = get(&db, SERVICE, "ts-1").await.unwrap().unwrap();
        assert_eq!(fetched.scale_value, 50.0);
        assert_eq!(fetched.stability_status, "STABILIZING");
    }
}
