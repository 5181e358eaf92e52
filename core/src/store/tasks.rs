use anyhow::Context as _;
use rusqlite::{OptionalExtension, Row, params};

use super::{Db, insert_error, page};
use crate::error::Result;
use crate::models::Task;

const COLUMNS: &str = "id, arn, cluster_arn, task_definition_arn, container_instance_arn, \
    overrides, last_status, desired_status, cpu, memory, containers, started_by, version, \
    stop_code, stopped_reason, connectivity, connectivity_at, pull_started_at, pull_stopped_at, \
    started_at, stopping_at, stopped_at, execution_stopped_at, launch_type, platform_version, \
    task_group, attachments, attributes, tags, health_status, enable_execute_command, \
    capacity_provider_name, pod_name, namespace, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        arn: row.get("arn")?,
        cluster_arn: row.get("cluster_arn")?,
        task_definition_arn: row.get("task_definition_arn")?,
        container_instance_arn: row.get("container_instance_arn")?,
        overrides: row.get("overrides")?,
        last_status: row.get("last_status")?,
        desired_status: row.get("desired_status")?,
        cpu: row.get("cpu")?,
        memory: row.get("memory")?,
        containers: row.get("containers")?,
        started_by: row.get("started_by")?,
        version: row.get("version")?,
        stop_code: row.get("stop_code")?,
        stopped_reason: row.get("stopped_reason")?,
        connectivity: row.get("connectivity")?,
        connectivity_at: row.get("connectivity_at")?,
        pull_started_at: row.get("pull_started_at")?,
        pull_stopped_at: row.get("pull_stopped_at")?,
        started_at: row.get("started_at")?,
        stopping_at: row.get("stopping_at")?,
        stopped_at: row.get("stopped_at")?,
        execution_stopped_at: row.get("execution_stopped_at")?,
        launch_type: row.get("launch_type")?,
        platform_version: row.get("platform_version")?,
        group: row.get("task_group")?,
        attachments: row.get("attachments")?,
        attributes: row.get("attributes")?,
        tags: row.get("tags")?,
        health_status: row.get("health_status")?,
        enable_execute_command: row.get("enable_execute_command")?,
        capacity_provider_name: row.get("capacity_provider_name")?,
        pod_name: row.get("pod_name")?,
        namespace: row.get("namespace")?,
        created_at: row.get("created_at")?,
    })
}

/// Listing filters; every field is optional and they compose with AND.
#[derive(Debug, Default, Clone)]
pub struct TaskFilters {
    pub cluster_arn: Option<String>,
    /// Matches the `service:{name}` task group.
    pub service_name: Option<String>,
    pub family: Option<String>,
    pub container_instance: Option<String>,
    pub launch_type: Option<String>,
    pub desired_status: Option<String>,
    pub started_by: Option<String>,
}

pub async fn create(db: &Db, task: &Task) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        &format!(
            "INSERT INTO tasks ({COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
              ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35)"
        ),
        params![
            task.id,
            task.arn,
            task.cluster_arn,
            task.task_definition_arn,
            task.container_instance_arn,
            task.overrides,
            task.last_status,
            task.desired_status,
            task.cpu,
            task.memory,
            task.containers,
            task.started_by,
            task.version,
            task.stop_code,
            task.stopped_reason,
            task.connectivity,
            task.connectivity_at,
            task.pull_started_at,
            task.pull_stopped_at,
            task.started_at,
            task.stopping_at,
            task.stopped_at,
            task.execution_stopped_at,
            task.launch_type,
            task.platform_version,
            task.group,
            task.attachments,
            task.attributes,
            task.tags,
            task.health_status,
            task.enable_execute_command,
            task.capacity_provider_name,
            task.pod_name,
            task.namespace,
            task.created_at,
        ],
    )
    .map_err(|e| insert_error(e, "task", &task.id))?;
    Ok(())
}

pub async fn get(db: &Db, id: &str) -> Result<Option<Task>> {
    let conn = db.conn().await;
    let task = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()
        .context("failed to query task")?;
    Ok(task)
}

pub async fn get_by_arn(db: &Db, arn: &str) -> Result<Option<Task>> {
    let conn = db.conn().await;
    let task = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tasks WHERE arn = ?1"),
            params![arn],
            from_row,
        )
        .optional()
        .context("failed to query task by arn")?;
    Ok(task)
}

/// Whole-record replacement; the caller bumps `version` on externally
/// observable writes.
pub async fn update(db: &Db, task: &Task) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute(
            "UPDATE tasks SET arn = ?2, cluster_arn = ?3, task_definition_arn = ?4, \
             container_instance_arn = ?5, overrides = ?6, last_status = ?7, desired_status = ?8, \
             cpu = ?9, memory = ?10, containers = ?11, started_by = ?12, version = ?13, \
             stop_code = ?14, stopped_reason = ?15, connectivity = ?16, connectivity_at = ?17, \
             pull_started_at = ?18, pull_stopped_at = ?19, started_at = ?20, stopping_at = ?21, \
             stopped_at = ?22, execution_stopped_at = ?23, launch_type = ?24, \
             platform_version = ?25, task_group = ?26, attachments = ?27, attributes = ?28, \
             tags = ?29, health_status = ?30, enable_execute_command = ?31, \
             capacity_provider_name = ?32, pod_name = ?33, namespace = ?34, created_at = ?35 \
             WHERE id = ?1",
            params![
                task.id,
                task.arn,
                task.cluster_arn,
                task.task_definition_arn,
                task.container_instance_arn,
                task.overrides,
                task.last_status,
                task.desired_status,
                task.cpu,
                task.memory,
                task.containers,
                task.started_by,
                task.version,
                task.stop_code,
                task.stopped_reason,
                task.connectivity,
                task.connectivity_at,
                task.pull_started_at,
                task.pull_stopped_at,
                task.started_at,
                task.stopping_at,
                task.stopped_at,
                task.execution_stopped_at,
                task.launch_type,
                task.platform_version,
                task.group,
                task.attachments,
                task.attributes,
                task.tags,
                task.health_status,
                task.enable_execute_command,
                task.capacity_provider_name,
                task.pod_name,
                task.namespace,
                task.created_at,
            ],
        )
        .context("failed to update task")?;
    Ok(affected > 0)
}

pub async fn delete(db: &Db, id: &str) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute("DELETE FROM tasks WHERE id = ?1", params![id])
        .context("failed to delete task")?;
    Ok(affected > 0)
}

/// One page of tasks, newest first.
pub async fn list_page(
    db: &Db,
    filters: &TaskFilters,
    max_results: Option<i64>,
    next_token: Option<&str>,
) -> Result<(Vec<Task>, Option<String>)> {
    let limit = page::clamp_max_results(max_results);
    let after = page::decode_token(next_token).and_then(|key| {
        let (created_at, id) = key.split_once(':')?;
        Some((created_at.parse::<i64>().ok()?, id.to_string()))
    });

    let conn = db.conn().await;

    let mut sql = format!("SELECT {COLUMNS} FROM tasks WHERE 1 = 1");
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some((created_at, id)) = after {
        sql.push_str(&format!(
            " AND (created_at < ?{0} OR (created_at = ?{0} AND id > ?{1}))",
            args.len() + 1,
            args.len() + 2,
        ));
        args.push(Box::new(created_at));
        args.push(Box::new(id));
    }
    if let Some(cluster_arn) = &filters.cluster_arn {
        sql.push_str(&format!(" AND cluster_arn = ?{}", args.len() + 1));
        args.push(Box::new(cluster_arn.clone()));
    }
    if let Some(service_name) = &filters.service_name {
        sql.push_str(&format!(" AND task_group = ?{}", args.len() + 1));
        args.push(Box::new(format!("service:{service_name}")));
    }
    if let Some(family) = &filters.family {
        sql.push_str(&format!(
            " AND task_definition_arn LIKE '%:task-definition/' || ?{} || ':%'",
            args.len() + 1
        ));
        args.push(Box::new(family.clone()));
    }
    if let Some(container_instance) = &filters.container_instance {
        sql.push_str(&format!(" AND container_instance_arn = ?{}", args.len() + 1));
        args.push(Box::new(container_instance.clone()));
    }
    if let Some(launch_type) = &filters.launch_type {
        sql.push_str(&format!(" AND launch_type = ?{}", args.len() + 1));
        args.push(Box::new(launch_type.clone()));
    }
    if let Some(desired_status) = &filters.desired_status {
        sql.push_str(&format!(" AND desired_status = ?{}", args.len() + 1));
        args.push(Box::new(desired_status.clone()));
    }
    if let Some(started_by) = &filters.started_by {
        sql.push_str(&format!(" AND started_by = ?{}", args.len() + 1));
        args.push(Box::new(started_by.clone()));
    }
    sql.push_str(&format!(
        " ORDER BY created_at DESC, id ASC LIMIT ?{}",
        args.len() + 1
    ));
    args.push(Box::new(limit + 1));

    let mut stmt = conn.prepare(&sql).context("failed to prepare task listing")?;
    let mut tasks = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            from_row,
        )
        .context("failed to list tasks")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read task rows")?;

    let next = if tasks.len() as i64 > limit {
        tasks.truncate(limit as usize);
        tasks
            .last()
            .map(|t| page::encode_token(&format!("{}:{}", t.created_at, t.id)))
    } else {
        None
    };
    Ok((tasks, next))
}
