//! Persisted cluster map.

use anyhow::{Context, Result};
use duckdb::params;
use std::collections::{BTreeMap, BTreeSet};

use sextant_core::{ActionId, FileId};

use super::database::Tx;

impl Tx<'_> {
    /// Replace the whole cluster map. Returns the number of rows written.
    pub fn replace_clusters(
        &self,
        clusters: &BTreeMap<FileId, BTreeSet<ActionId>>,
    ) -> Result<usize> {
        self.conn
            .execute("DELETE FROM clusters", [])
            .context("Failed to clear clusters")?;

        let mut stmt = self
            .conn
            .prepare("INSERT INTO clusters (file_id, action_id) VALUES (?, ?)")?;
        let mut written = 0;
        for (file, actions) in clusters {
            for action in actions {
                stmt.execute(params![file, action])?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// The persisted cluster of `file`; empty if the file was never clustered.
    pub fn cluster_of(&self, file: FileId) -> Result<BTreeSet<ActionId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT action_id FROM clusters WHERE file_id = ? ORDER BY action_id")?;
        let mut rows = stmt.query(params![file])?;

        let mut actions = BTreeSet::new();
        while let Some(row) = rows.next()? {
            actions.insert(row.get(0)?);
        }
        Ok(actions)
    }

    pub fn clustered_file_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT file_id) FROM clusters",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_replace_clusters_overwrites_previous_run() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let mut first = BTreeMap::new();
            first.insert(1, BTreeSet::from([10, 11]));
            first.insert(2, BTreeSet::from([10]));
            assert_eq!(tx.replace_clusters(&first)?, 3);

            let mut second = BTreeMap::new();
            second.insert(2, BTreeSet::from([12]));
            assert_eq!(tx.replace_clusters(&second)?, 1);

            assert!(tx.cluster_of(1)?.is_empty());
            assert_eq!(tx.cluster_of(2)?, BTreeSet::from([12]));
            assert_eq!(tx.clustered_file_count()?, 1);
            Ok(())
        })
        .unwrap();
    }
}
