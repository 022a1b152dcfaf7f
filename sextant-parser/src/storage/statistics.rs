//! Aggregate statistics, discovered repositories and key/value metadata.

use anyhow::{Context, Result};
use duckdb::params;
use serde::{Deserialize, Serialize};

use super::database::Tx;

/// One aggregate counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRow {
    pub category: String,
    pub key: String,
    pub value: i64,
}

impl StatRow {
    pub fn new(category: impl Into<String>, key: impl Into<String>, value: i64) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            value,
        }
    }
}

impl Tx<'_> {
    /// Drop every row of `category` (and its `category.*` sub-categories).
    pub fn clear_statistics(&self, category: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM statistics WHERE category = ? OR category LIKE ?",
                params![category, format!("{}.%", category)],
            )
            .with_context(|| format!("Failed to clear statistics for {}", category))?;
        Ok(())
    }

    pub fn put_statistic(&self, row: &StatRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO statistics (category, key, value) VALUES (?, ?, ?)",
                params![row.category, row.key, row.value],
            )
            .context("Failed to write statistic")?;
        Ok(())
    }

    /// All statistic rows, ordered by category then key.
    pub fn statistics(&self) -> Result<Vec<StatRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT category, key, value FROM statistics ORDER BY category, key")?;
        let mut rows = stmt.query([])?;

        let mut stats = Vec::new();
        while let Some(row) = rows.next()? {
            stats.push(StatRow {
                category: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
            });
        }
        Ok(stats)
    }

    pub fn statistic(&self, category: &str, key: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM statistics WHERE category = ? AND key = ?")?;
        let mut rows = stmt.query(params![category, key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn add_repository(&self, path: &str, kind: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO repositories (path, kind) VALUES (?, ?)",
                params![path, kind],
            )
            .with_context(|| format!("Failed to record repository {}", path))?;
        Ok(())
    }

    /// Known repositories as `(path, kind)`, ordered by path.
    pub fn repositories(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, kind FROM repositories ORDER BY path")?;
        let mut rows = stmt.query([])?;

        let mut repos = Vec::new();
        while let Some(row) = rows.next()? {
            repos.push((row.get(0)?, row.get(1)?));
        }
        Ok(repos)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .with_context(|| format!("Failed to set metadata {}", key))?;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_statistics_replace_by_key() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.put_statistic(&StatRow::new("parse", "succeeded", 1))?;
            tx.put_statistic(&StatRow::new("parse", "succeeded", 4))?;
            tx.put_statistic(&StatRow::new("parse.fail", "cpp", 2))?;
            tx.put_statistic(&StatRow::new("language", "cpp", 7))?;

            assert_eq!(tx.statistic("parse", "succeeded")?, Some(4));
            assert_eq!(tx.statistics()?.len(), 3);

            tx.clear_statistics("parse")?;
            let left = tx.statistics()?;
            assert_eq!(left, vec![StatRow::new("language", "cpp", 7)]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_repositories_and_metadata() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.add_repository("/work/b", "git")?;
            tx.add_repository("/work/a", "git")?;
            tx.add_repository("/work/a", "git")?;
            assert_eq!(
                tx.repositories()?,
                vec![
                    ("/work/a".to_string(), "git".to_string()),
                    ("/work/b".to_string(), "git".to_string())
                ]
            );

            assert_eq!(tx.metadata("last_run")?, None);
            tx.set_metadata("last_run", "2026-01-01T00:00:00Z")?;
            assert_eq!(tx.metadata("last_run")?.as_deref(), Some("2026-01-01T00:00:00Z"));
            Ok(())
        })
        .unwrap();
    }
}
