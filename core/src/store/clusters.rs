use anyhow::Context as _;
use rusqlite::{OptionalExtension, Row, params};

use super::{Db, insert_error, page};
use crate::error::Result;
use crate::models::Cluster;

const COLUMNS: &str = "name, arn, status, region, account_id, k8s_cluster_name, \
    registered_container_instances_count, running_tasks_count, pending_tasks_count, \
    active_services_count, settings, configuration, tags, capacity_providers, \
    default_capacity_provider_strategy, localstack_state, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Cluster> {
    Ok(Cluster {
        name: row.get("name")?,
        arn: row.get("arn")?,
        status: row.get("status")?,
        region: row.get("region")?,
        account_id: row.get("account_id")?,
        k8s_cluster_name: row.get("k8s_cluster_name")?,
        registered_container_instances_count: row.get("registered_container_instances_count")?,
        running_tasks_count: row.get("running_tasks_count")?,
        pending_tasks_count: row.get("pending_tasks_count")?,
        active_services_count: row.get("active_services_count")?,
        settings: row.get("settings")?,
        configuration: row.get("configuration")?,
        tags: row.get("tags")?,
        capacity_providers: row.get("capacity_providers")?,
        default_capacity_provider_strategy: row.get("default_capacity_provider_strategy")?,
        localstack_state: row.get("localstack_state")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub async fn create(db: &Db, cluster: &Cluster) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        &format!(
            "INSERT INTO clusters ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        ),
        params![
            cluster.name,
            cluster.arn,
            cluster.status,
            cluster.region,
            cluster.account_id,
            cluster.k8s_cluster_name,
            cluster.registered_container_instances_count,
            cluster.running_tasks_count,
            cluster.pending_tasks_count,
            cluster.active_services_count,
            cluster.settings,
            cluster.configuration,
            cluster.tags,
            cluster.capacity_providers,
            cluster.default_capacity_provider_strategy,
            cluster.localstack_state,
            cluster.created_at,
            cluster.updated_at,
        ],
    )
    .map_err(|e| insert_error(e, "cluster", &cluster.name))?;
    Ok(())
}

pub async fn get(db: &Db, name: &str) -> Result<Option<Cluster>> {
    let conn = db.conn().await;
    let cluster = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM clusters WHERE name = ?1"),
            params![name],
            from_row,
        )
        .optional()
        .context("failed to query cluster")?;
    Ok(cluster)
}

pub async fn get_by_arn(db: &Db, arn: &str) -> Result<Option<Cluster>> {
    let conn = db.conn().await;
    let cluster = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM clusters WHERE arn = ?1"),
            params![arn],
            from_row,
        )
        .optional()
        .context("failed to query cluster by arn")?;
    Ok(cluster)
}

/// Whole-record replacement keyed by name. Returns false when the cluster is
/// gone.
pub async fn update(db: &Db, cluster: &Cluster) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute(
            "UPDATE clusters SET arn = ?2, status = ?3, region = ?4, account_id = ?5, \
             k8s_cluster_name = ?6, registered_container_instances_count = ?7, \
             running_tasks_count = ?8, pending_tasks_count = ?9, active_services_count = ?10, \
             settings = ?11, configuration = ?12, tags = ?13, capacity_providers = ?14, \
             default_capacity_provider_strategy = ?15, localstack_state = ?16, \
             created_at = ?17, updated_at = ?18 \
             WHERE name = ?1",
            params![
                cluster.name,
                cluster.arn,
                cluster.status,
                cluster.region,
                cluster.account_id,
                cluster.k8s_cluster_name,
                cluster.registered_container_instances_count,
                cluster.running_tasks_count,
                cluster.pending_tasks_count,
                cluster.active_services_count,
                cluster.settings,
                cluster.configuration,
                cluster.tags,
                cluster.capacity_providers,
                cluster.default_capacity_provider_strategy,
                cluster.localstack_state,
                cluster.created_at,
                cluster.updated_at,
            ],
        )
        .context("failed to update cluster")?;
    Ok(affected > 0)
}

pub async fn delete(db: &Db, name: &str) -> Result<bool> {
    let conn = db.conn().await;
    let affected = conn
        .execute("DELETE FROM clusters WHERE name = ?1", params![name])
        .context("failed to delete cluster")?;
    Ok(affected > 0)
}

/// All clusters in insertion order.
pub async fn list(db: &Db) -> Result<Vec<Cluster>> {
    let conn = db.conn().await;
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM clusters ORDER BY rowid"))
        .context("failed to prepare cluster listing")?;
    let clusters = stmt
        .query_map([], from_row)
        .context("failed to list clusters")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read cluster rows")?;
    Ok(clusters)
}

/// One page of clusters in insertion order, with an opaque continuation
/// token when more remain.
pub async fn list_page(
    db: &Db,
    max_results: Option<i64>,
    next_token: Option<&str>,
) -> Result<(Vec<Cluster>, Option<String>)> {
    let limit = page::clamp_max_results(max_results);
    let after: i64 = page::decode_token(next_token)
        .and_then(|key| key.parse().ok())
        .unwrap_or(0);

    let conn = db.conn().await;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT rowid, {COLUMNS} FROM clusters WHERE rowid > ?1 ORDER BY rowid LIMIT ?2"
        ))
        .context("failed to prepare cluster page")?;
    let mut rows = stmt
        .query_map(params![after, limit + 1], |row| {
            Ok((row.get::<_, i64>("rowid")?, from_row(row)?))
        })
        .context("failed to page clusters")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read cluster page")?;

    let next = if rows.len() as i64 > limit {
        rows.truncate(limit as usize);
        rows.last().map(|(rid, _)| page::encode_token(&rid.to_string()))
    } else {
        None
    };
    Ok((rows.into_iter().map(|(_, c)| c).collect(), next))
}

/// Adjust the advisory counters, clamped at zero.
pub async fn adjust_counters(
    db: &Db,
    name: &str,
    services_delta: i64,
    running_delta: i64,
    pending_delta: i64,
) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        "UPDATE clusters SET \
         active_services_count = MAX(active_services_count + ?2, 0), \
         running_tasks_count = MAX(running_tasks_count + ?3, 0), \
         pending_tasks_count = MAX(pending_tasks_count + ?4, 0) \
         WHERE name = ?1",
        params![name, services_delta, running_delta, pending_delta],
    )
    .context("failed to adjust cluster counters")?;
    Ok(())
}

/// Replace only the LocalStack sub-record; used by the deploy loop so it
/// does not race whole-record API writes.
pub async fn set_localstack_state(db: &Db, name: &str, raw: Option<&str>) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        "UPDATE clusters SET localstack_state = ?2 WHERE name = ?1",
        params![name, raw],
    )
    .context("failed to update localstack state")?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::EcsError;
    use crate::models::now_ms;

    pub(crate) fn make(name: &str) -> Cluster {
        let now = now_ms();
        Cluster {
            name: name.to_string(),
            arn: format!("arn:aws:ecs:us-east-1:123456789012:cluster/{name}"),
            status: "ACTIVE".to_string(),
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
            k8s_cluster_name: "kecs-default".to_string(),
            registered_container_instances_count: 0,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            active_services_count: 0,
            settings: None,
            configuration: None,
            tags: None,
            capacity_providers: None,
            default_capacity_provider_strategy: None,
            localstack_state: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let db = Db::open_in_memory().unwrap();
        let mut cluster = make("prod");
        cluster.settings = Some(r#"[{"name":"containerInsights","value":"enabled"}]"#.to_string());
        create(&db, &cluster).await.unwrap();

        let fetched = get(&db, "prod").await.unwrap().unwrap();
        assert_eq!(fetched.arn, cluster.arn);
        assert_eq!(fetched.settings, cluster.settings);

        let by_arn = get_by_arn(&db, &cluster.arn).await.unwrap().unwrap();
        assert_eq!(by_arn.name, "prod");
    }

    #[tokio::test]
    async fn test_duplicate_create_is_already_exists() {
        let db = Db::open_in_memory().unwrap();
        create(&db, &make("prod")).await.unwrap();
        let err = create(&db, &make("prod")).await.unwrap_err();
        assert!(matches!(err, EcsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_pagination_covers_without_duplicates() {
        let db = Db::open_in_memory().unwrap();
        for i in 0..15 {
            create(&db, &make(&format!("test-cluster-{i:02}"))).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let (chunk, next) = list_page(&db, Some(5), token.as_deref()).await.unwrap();
            assert!(chunk.len() <= 5);
            seen.extend(chunk.into_iter().map(|c| c.arn));
            match next {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(seen.len(), 15);
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 15);
    }

    #[tokio::test]
    async fn test_invalid_token_restarts_from_the_beginning() {
        let db = Db::open_in_memory().unwrap();
        for i in 0..3 {
            create(&db, &make(&format!("c{i}"))).await.unwrap();
        }
        let (fresh, _) = list_page(&db, Some(10), Some("invalid-token")).await.unwrap();
        assert_eq!(fresh.len(), 3);
        assert_eq!(fresh[0].name, "c0");
    }

    #[tokio::test]
    async fn test_counters_never_go_negative() {
        let db = Db::open_in_memory().unwrap();
        create(&db, &make("prod")).await.unwrap();
        adjust_counters(&db, "prod", -5, -5, -5).await.unwrap();
        let cluster = get(&db, "prod").await.unwrap().unwrap();
        assert_eq!(cluster.active_services_count, 0);
        assert_eq!(cluster.running_tasks_count, 0);
        assert_eq!(cluster.pending_tasks_count, 0);

        adjust_counters(&db, "prod", 2, 1, 0).await.unwrap();
        adjust_counters(&db, "prod", -1, 0, 0).await.unwrap();
        let cluster = get(&db, "prod").await.unwrap().unwrap();
        assert_eq!(cluster.active_services_count, 1);
        assert_eq!(cluster.running_tasks_count, 1);
    }
}
