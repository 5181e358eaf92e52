//! Side table backing the tagging operations. Keys are unique per resource;
//! re-tagging a key overwrites its value.

use anyhow::Context as _;
use rusqlite::params;

use super::Db;
use crate::error::Result;

pub async fn put(db: &Db, resource_arn: &str, tags: &[(String, String)]) -> Result<()> {
    let mut conn = db.conn().await;
    let tx = conn.transaction().context("failed to begin tagging")?;
    for (key, value) in tags {
        tx.execute(
            "INSERT INTO resource_tags (resource_arn, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT (resource_arn, key) DO UPDATE SET value = excluded.value",
            params![resource_arn, key, value],
        )
        .context("failed to write tag")?;
    }
    tx.commit().context("failed to commit tags")?;
    Ok(())
}

pub async fn remove(db: &Db, resource_arn: &str, keys: &[String]) -> Result<()> {
    let mut conn = db.conn().await;
    let tx = conn.transaction().context("failed to begin untagging")?;
    for key in keys {
        tx.execute(
            "DELETE FROM resource_tags WHERE resource_arn = ?1 AND key = ?2",
            params![resource_arn, key],
        )
        .context("failed to delete tag")?;
    }
    tx.commit().context("failed to commit untagging")?;
    Ok(())
}

pub async fn list(db: &Db, resource_arn: &str) -> Result<Vec<(String, String)>> {
    let conn = db.conn().await;
    let mut stmt = conn
        .prepare("SELECT key, value FROM resource_tags WHERE resource_arn = ?1 ORDER BY key")
        .context("failed to prepare tag listing")?;
    let tags = stmt
        .query_map(params![resource_arn], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("failed to list tags")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to read tag rows")?;
    Ok(tags)
}

/// Drop every tag of a deleted resource.
pub async fn remove_all(db: &Db, resource_arn: &str) -> Result<()> {
    let conn = db.conn().await;
    conn.execute(
        "DELETE FROM resource_tags WHERE resource_arn = ?1",
        params![resource_arn],
    )
    .context("failed to clear tags")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:ecs:us-east-1:123456789012:cluster/prod";

    #[tokio::test]
    async fn test_put_overwrites_and_lists_sorted() {
        let db = Db::open_in_memory().unwrap();
        put(&db, ARN, &[("env".into(), "dev".into()), ("team".into(), "core".into())])
            .await
            .unwrap();
        put(&db, ARN, &[("env".into(), "prod".into())]).await.unwrap();

        let tags = list(&db, ARN).await.unwrap();
        assert_eq!(
            tags,
            vec![
                ("env".to_string(), "prod".to_string()),
                ("team".to_string(), "core".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() {
        let db = Db::open_in_memory().unwrap();
        put(&db, ARN, &[("a".into(), "1".into()), ("b".into(), "2".into())])
            .await
            .unwrap();
        remove(&db, ARN, &["a".to_string()]).await.unwrap();
        assert_eq!(list(&db, ARN).await.unwrap().len(), 1);
        remove_all(&db, ARN).await.unwrap();
        assert!(list(&db, ARN).await.unwrap().is_empty());
    }
}
