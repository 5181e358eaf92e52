use anyhow::Context as _;
use rusqlite::{OptionalExtension, Row, params};

use super::{Db, insert_error, page};
use crate::arn::ArnBuilder;
use crate::error::Result;
use crate::models::{TaskDefinition, now_ms, status};

const COLUMNS: &str = "family, revision, arn, status, container_definitions, volumes, \
    placement_constraints, proxy_configuration, runtime_platform, inference_accelerators, \
    requires_compatibilities, network_mode, cpu, memory, task_role_arn, execution_role_arn, \
    pid_mode, ipc_mode, tags, registered_at, deregistered_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TaskDefinition> {
    Ok(TaskDefinition {
        family: row.get("family")?,
        revision: row.get("revision")?,
        arn: row.get("arn")?,
        status: row.get("status")?,
        container_definitions: row.get("container_definitions")?,
        volumes: row.get("volumes")?,
        placement_constraints: row.get("placement_constraints")?,
        proxy_configuration: row.get("proxy_configuration")?,
        runtime_platform: row.get("runtime_platform")?,
        inference_accelerators: row.get("inference_accelerators")?,
        requires_compatibilities: row.get("requires_compatibilities")?,
        network_mode: row.get("network_mode")?,
        cpu: row.get("cpu")?,
        memory: row.get("memory")?,
        task_role_arn: row.get("task_role_arn")?,
        execution_role_arn: row.get("execution_role_arn")?,
        pid_mode: row.get("pid_mode")?,
        ipc_mode: row.get("ipc_mode")?,
        tags: row.get("tags")?,
        registered_at: row.get("registered_at")?,
        deregistered_at: row.get("deregistered_at")?,
    })
}

/// Register a new revision for the family. Revision assignment and insertion
/// happen in one transaction, so concurrent registrations of the same family
/// never collide.
pub async fn register(
    db: &Db,
    arn: &ArnBuilder,
    mut task_def: TaskDefinition,
) -> Result<TaskDefinition> {
    let mut conn = db.conn().await;
    let tx = conn.transaction().context("failed to begin registration")?;

    let next_revision: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(revision), 0) + 1 FROM task_definitions WHERE family = ?1",
            params![task_def.family],
            |row| row.get(0),
        )
        .context("failed to determine next revision")?;

    task_def.revision = next_revision;
    task_def.arn = arn.task_definition(&task_def.family, next_revision);
    task_def.status = status::ACTIVE.to_string();
    task_def.registered_at = now_ms();
    task_def.deregistered_at = None;

    tx.execute(
        &format!(
            "INSERT INTO task_definitions ({COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
        ),
        params![
            task_def.family,
            task_def.revision,
            task_def.arn,
            task_def.status,
            task_def.container_definitions,
            task_def.volumes,
            task_def.placement_constraints,
            task_def.proxy_configuration,
            task_def.runtime_platform,
            task_def.inference_accelerators,
            task_def.requires_compatibilities,
            task_def.network_mode,
            task_def.cpu,
            task_def.memory,
            task_def.task_role_arn,
            task_def.execution_role_arn,
            task_def.pid_mode,
            task_def.ipc_mode,
            task_def.tags,
            task_def.registered_at,
            task_def.deregistered_at,
        ],
    )
    .map_err(|e| insert_error(e, "task definition", &task_def.arn))?;

    tx.commit().context("failed to commit registration")?;
    Ok(task_def)
}

pub async fn get(db: &Db, family: &str, revision: i64) -> Result<Option<TaskDefinition>> {
    let conn = db.conn().await;
    let task_def = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM task_definitions WHERE family = ?1 AND revision = ?2"),
            params![family, revision],
            from_row,
        )
        .optional()
        .context("failed to query task definition")?;
    Ok(task_def)
}

pub async fn get_by_arn(db: &Db, arn: &str) -> Result<Option<TaskDefinition>> {
    let conn = db.conn().await;
    let task_def = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM task_definitions WHERE arn = ?1"),
            params![arn],
            from_row,
        )
        .optional()
        .context("failed to query task definition by arn")?;
    Ok(task_def)
}

/// Highest-revision ACTIVE entry of the family, if any.
pub async fn get_latest(db: &Db, family: &str) -> Result<Option<TaskDefinition>> {
    let conn = db.conn().await;
    let task_def = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM task_definitions \
                 WHERE family = ?1 AND status = 'ACTIVE' \
                 ORDER BY revision DESC LIMIT 1"
            ),
            params![family],
            from_row,
        )
        .optional()
        .context("failed to query latest task definition")?;
    Ok(task_def)
}

pub async fn deregister(db: &Db, family: &str, revision: i64) -> Result<Option<TaskDefinition>> {
    {
        let conn = db.conn().await;
        let affected = conn
            .execute(
                "UPDATE task_definitions SET status = 'INACTIVE', deregistered_at = ?3 \
                 WHERE family = ?1 AND revision = ?2",
                params![family, revision, now_ms()],
            )
            .context("failed to deregister task definition")?;
        if affected == 0 {
            return Ok(None);
        }
    }
    get(db, family, revision).await
}

/// Distinct family names, `family` ASC, optionally filtered by prefix and
/// status.
pub async fn list_families(
    db: &Db,
    prefix: Option<&str>,
    family_status: Option<&str>,
    max_results: Option<i64>,
    next_token: Option<&str>,
) -> Result<(Vec<String>, Option<String>)> {
    let limit = page::clamp_max_results(max_results);
    let after = page::decode_token(next_token).unwrap_or_default();

    let conn = db.conn().await;

    let mut sql =
        "SELECT DISTINCT family FROM task_definitions WHERE family > ?1".to_string();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(after)];
    if let Some(prefix) = prefix {
        sql.push_str(&format!(" AND family LIKE ?{} || '%'", args.len() + 1));
        args.push(Box::new(prefix.to_string()));
    }
    if let Some(family_status) = family_status.filter(|s| *s != "ALL") {
        sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
        args.push(Box::new(family_status.to_string()));
    }
    sql.push_str(&format!(" ORDER BY family LIMIT ?{}", args.len() + 1));
    args.push(Box::new(limit + 1));

    let mut stmt = conn.prepare(&sql).context("failed to prepare family listing")?;
    let mut families = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get::<_, String>(0),
        )
        .context("failed to list families")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read family rows")?;

    let next = if families.len() as i64 > limit {
        families.truncate(limit as usize);
        families.last().map(|f| page::encode_token(f))
    } else {
        None
    };
    Ok((families, next))
}

/// Task definition ARNs ordered by `family` ASC, then `revision` ASC or DESC
/// per request.
pub async fn list_arns(
    db: &Db,
    family_prefix: Option<&str>,
    def_status: Option<&str>,
    revision_desc: bool,
    max_results: Option<i64>,
    next_token: Option<&str>,
) -> Result<(Vec<String>, Option<String>)> {
    let limit = page::clamp_max_results(max_results);
    let after = page::decode_token(next_token).and_then(|key| {
        let (family, revision) = crate::arn::parse_task_definition(&key);
        revision.map(|r| (family, r))
    });

    let conn = db.conn().await;

    let mut sql = "SELECT family, revision, arn FROM task_definitions WHERE 1 = 1".to_string();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some((family, revision)) = after {
        let cmp = if revision_desc { "<" } else { ">" };
        sql.push_str(&format!(
            " AND (family > ?{0} OR (family = ?{0} AND revision {cmp} ?{1}))",
            args.len() + 1,
            args.len() + 2,
        ));
        args.push(Box::new(family));
        args.push(Box::new(revision));
    }
    if let Some(prefix) = family_prefix {
        sql.push_str(&format!(" AND family LIKE ?{} || '%'", args.len() + 1));
        args.push(Box::new(prefix.to_string()));
    }
    if let Some(def_status) = def_status.filter(|s| *s != "ALL") {
        sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
        args.push(Box::new(def_status.to_string()));
    }
    let revision_order = if revision_desc { "DESC" } else { "ASC" };
    sql.push_str(&format!(
        " ORDER BY family ASC, revision {revision_order} LIMIT ?{}",
        args.len() + 1
    ));
    args.push(Box::new(limit + 1));

    let mut stmt = conn
        .prepare(&sql)
        .context("failed to prepare task definition listing")?;
    let mut rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| {
                Ok((
                    row.get::<_, String>("family")?,
                    row.get::<_, i64>("revision")?,
                    row.get::<_, String>("arn")?,
                ))
            },
        )
        .context("failed to list task definitions")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read task definition rows")?;

    let next = if rows.len() as i64 > limit {
        rows.truncate(limit as usize);
        rows.last()
            .map(|(family, revision, _)| page::encode_token(&format!("{family}:{revision}")))
    } else {
        None
    };
    Ok((rows.into_iter().map(|(_, _, arn)| arn).collect(), next))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make(family: &str) -> TaskDefinition {
        TaskDefinition {
            family: family.to_string(),
            revision: 0,
            arn: String::new(),
            status: String::new(),
            container_definitions: r#"[{"name":"app","image":"nginx:latest"}]"#.to_string(),
            volumes: None,
            placement_constraints: None,
            proxy_configuration: None,
            runtime_platform: None,
            inference_accelerators: None,
            requires_compatibilities: Some("EC2".to_string()),
            network_mode: None,
            cpu: None,
            memory: None,
            task_role_arn: None,
            execution_role_arn: None,
            pid_mode: None,
            ipc_mode: None,
            tags: None,
            registered_at: 0,
            deregistered_at: None,
        }
    }

    fn builder() -> ArnBuilder {
        ArnBuilder::new("us-east-1", "123456789012")
    }

    #[tokio::test]
    async fn test_revisions_are_monotonic_per_family() {
        let db = Db::open_in_memory().unwrap();
        let arn = builder();
        let first = register(&db, &arn, make("web")).await.unwrap();
        let second = register(&db, &arn, make("web")).await.unwrap();
        let other = register(&db, &arn, make("worker")).await.unwrap();
        assert_eq!(first.revision, 1);
        assert_eq!(second.revision, 2);
        assert_eq!(other.revision, 1);
        assert!(second.arn.ends_with("task-definition/web:2"));
    }

    #[tokio::test]
    async fn test_get_latest_skips_inactive() {
        let db = Db::open_in_memory().unwrap();
        let arn = builder();
        register(&db, &arn, make("web")).await.unwrap();
        register(&db, &arn, make("web")).await.unwrap();
        deregister(&db, "web", 2).await.unwrap();

        let latest = get_latest(&db, "web").await.unwrap().unwrap();
        assert_eq!(latest.revision, 1);

        deregister(&db, "web", 1).await.unwrap();
        assert!(get_latest(&db, "web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deregister_sets_inactive_and_timestamp() {
        let db = Db::open_in_memory().unwrap();
        let arn = builder();
        register(&db, &arn, make("web")).await.unwrap();
        let deregistered = deregister(&db, "web", 1).await.unwrap().unwrap();
        assert_eq!(deregistered.status, "INACTIVE");
        assert!(deregistered.deregistered_at.is_some());
        assert!(deregister(&db, "web", 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_families_prefix_and_pagination() {
        let db = Db::open_in_memory().unwrap();
        let arn = builder();
        for family in ["api-gateway", "api-worker", "web"] {
            register(&db, &arn, make(family)).await.unwrap();
        }
        // A second revision must not duplicate the family
        register(&db, &arn, make("api-worker")).await.unwrap();

        let (families, next) = list_families(&db, Some("api"), None, None, None).await.unwrap();
        assert_eq!(families, vec!["api-gateway", "api-worker"]);
        assert!(next.is_none());

        let (first, token) = list_families(&db, None, None, Some(2), None).await.unwrap();
        assert_eq!(first, vec!["api-gateway", "api-worker"]);
        let (rest, end) = list_families(&db, None, None, Some(2), token.as_deref())
            .await
            .unwrap();
        assert_eq!(rest, vec!["web"]);
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_list_arns_orders_by_family_then_revision() {
        let db = Db::open_in_memory().unwrap();
        let arn = builder();
        register(&db, &arn, make("b")).await.unwrap();
        register(&db, &arn, make("a")).await.unwrap();
        register(&db, &arn, make("a")).await.unwrap();

        let (asc, _) = list_arns(&db, None, None, false, None, None).await.unwrap();
        assert!(asc[0].ends_with("a:1"));
        assert!(asc[1].ends_with("a:2"));
        assert!(asc[2].ends_with("b:1"));

        let (desc, _) = list_arns(&db, None, None, true, None, None).await.unwrap();
        assert!(desc[0].ends_with("a:2"));
        assert!(desc[1].ends_with("a:1"));

        // Paging across the revision boundary does not skip or repeat
        let (page_one, token) = list_arns(&db, None, None, false, Some(1), None).await.unwrap();
        assert!(page_one[0].ends_with("a:1"));
        let (page_two, _) = list_arns(&db, None, None, false, Some(1), token.as_deref())
            .await
            .unwrap();
        assert!(page_two[0].ends_with("a:2"));
    }
}
