//! Read-only catalog data served through the gated API.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::GateResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub icon: Option<String>,
}

#[derive(Clone)]
pub struct CatalogStore {
    db: Database,
}

impl CatalogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// One page of categories ordered by name, plus the total count.
    /// `page` is 1-based; a page whose offset does not fit in SQLite's
    /// integer range is empty.
    pub async fn list_categories(&self, page: u64, per_page: u64) -> GateResult<(Vec<Category>, u64)> {
        let limit = i64::try_from(per_page.max(1)).unwrap_or(i64::MAX);
        let offset = (page.max(1) - 1)
            .checked_mul(per_page.max(1))
            .and_then(|o| i64::try_from(o).ok());
        self.db
            .call(move |conn| {
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
                let Some(offset) = offset else {
                    return Ok((Vec::new(), total as u64));
                };
                let mut stmt = conn.prepare(
                    "SELECT id, name, slug, icon FROM categories
                     ORDER BY name ASC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt
                    .query_map(params![limit, offset], |row| {
                        Ok(Category {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            slug: row.get(2)?,
                            icon: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((rows, total as u64))
            })
            .await
    }

    /// Insert or update by slug.
    pub async fn upsert_category(&self, category: Category) -> GateResult<()> {
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO categories (id, name, slug, icon) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(slug) DO UPDATE SET name = excluded.name, icon = excluded.icon",
                    params![category.id, category.name, category.slug, category.icon],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str) -> Category {
        Category {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            icon: None,
        }
    }

    #[tokio::test]
    async fn pages_are_ordered_by_name() {
        let store = CatalogStore::new(Database::open_in_memory().unwrap());
        for name in ["Prompts", "Datasets", "Agents"] {
            store.upsert_category(category(name)).await.unwrap();
        }

        let (first, total) = store.list_categories(1, 2).await.unwrap();
        assert_eq!(total, 3);
        let names: Vec<_> = first.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Agents", "Datasets"]);

        let (second, _) = store.list_categories(2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "Prompts");

        let (beyond, total) = store.list_categories(9, 2).await.unwrap();
        assert!(beyond.is_empty());
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn out_of_range_pages_are_empty() {
        let store = CatalogStore::new(Database::open_in_memory().unwrap());
        store.upsert_category(category("Agents")).await.unwrap();

        for page in [1u64 << 63, (1u64 << 63) + 1, u64::MAX] {
            let (rows, total) = store.list_categories(page, 1).await.unwrap();
            assert!(rows.is_empty(), "page {}", page);
            assert_eq!(total, 1);
        }
        let (rows, _) = store.list_categories(u64::MAX / 2, 100).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn upsert_by_slug_updates_in_place() {
        let store = CatalogStore::new(Database::open_in_memory().unwrap());
        store.upsert_category(category("Tools")).await.unwrap();
        let mut renamed = category("Tools");
        renamed.icon = Some("wrench".into());
        store.upsert_category(renamed).await.unwrap();

        let (rows, total) = store.list_categories(1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].icon.as_deref(), Some("wrench"));
    }
}
