use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::{
    db::{helpers::format_datetime, Database},
    store::KeyValueStore,
};

impl Database {
    pub async fn kv_get(&self, key: String) -> Result<Option<String>> {
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn kv_set(&self, key: String, value: String) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value, format_datetime(&Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn kv_remove(&self, key: String) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    pub async fn kv_keys_with_prefix(&self, prefix: String) -> Result<Vec<String>> {
        self.execute(move |conn| {
            // substr instead of LIKE so '_' in the prefix matches literally
            let mut stmt = conn.prepare(
                "SELECT key FROM kv_entries
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.kv_get(key.to_string()).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.kv_set(key.to_string(), value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.kv_remove(key.to_string()).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.kv_keys_with_prefix(prefix.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn set_overwrites_and_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("kv.sqlite3")).unwrap();

        db.set("alpha", "1".into()).await.unwrap();
        db.set("alpha", "2".into()).await.unwrap();
        assert_eq!(db.get("alpha").await.unwrap().as_deref(), Some("2"));

        db.remove("alpha").await.unwrap();
        db.remove("alpha").await.unwrap();
        assert_eq!(db.get("alpha").await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_scan_treats_underscores_literally() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("kv.sqlite3")).unwrap();

        db.set("temp_a", "{}".into()).await.unwrap();
        db.set("temp_b", "{}".into()).await.unwrap();
        db.set("tempXc", "{}".into()).await.unwrap();

        assert_eq!(
            db.keys_with_prefix("temp_").await.unwrap(),
            vec!["temp_a".to_string(), "temp_b".to_string()]
        );
    }
}
