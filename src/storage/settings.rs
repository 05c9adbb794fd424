use std::collections::HashMap;

use sqlx::{Pool, Sqlite};

use crate::error::HarvestResult;

/// Category holding the listing API settings
pub const API_CATEGORY: &str = "api";

/// Persisted key/value settings, grouped by category
#[derive(Clone)]
pub struct SettingsStore {
    pool: Pool<Sqlite>,
}

impl SettingsStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn category(&self, category: &str) -> HarvestResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings WHERE category = ?")
                .bind(category)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    pub async fn set(&self, category: &str, key: &str, value: &str) -> HarvestResult<()> {
        sqlx::query(
            "INSERT INTO settings (category, key, value) VALUES (?, ?, ?)
             ON CONFLICT (category, key) DO UPDATE SET value = excluded.value",
        )
        .bind(category)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_set_overwrites_and_scopes_by_category() {
        let db = Database::in_memory().await;
        let store = db.settings();

        store.set(API_CATEGORY, "api_token", "one").await.unwrap();
        store.set(API_CATEGORY, "api_token", "two").await.unwrap();
        store.set("mail", "api_token", "other").await.unwrap();

        let api = store.category(API_CATEGORY).await.unwrap();
        assert_eq!(api.len(), 1);
        assert_eq!(api.get("api_token").map(String::as_str), Some("two"));
        assert!(store.category("empty").await.unwrap().is_empty());
    }
}
