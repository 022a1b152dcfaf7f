//! File records.

use anyhow::{Context, Result};
use duckdb::params;
use std::path::Path;

use sextant_core::lang::detect_language;
use sextant_core::{File, FileId};

use super::database::Tx;

impl Tx<'_> {
    /// Look up a file by path, creating the record (with its detected
    /// language) when it does not exist yet.
    pub fn get_or_create_file(&self, path: &str) -> Result<File> {
        if let Some(file) = self.file_by_path(path)? {
            return Ok(file);
        }

        let language = detect_language(Path::new(path)).map(str::to_string);
        let id: FileId = self
            .conn
            .query_row(
                "INSERT INTO files (path, language) VALUES (?, ?) RETURNING id",
                params![path, language],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to insert file {}", path))?;

        Ok(File {
            id,
            path: path.to_string(),
            language,
        })
    }

    pub fn file_by_path(&self, path: &str) -> Result<Option<File>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, path, language FROM files WHERE path = ?")?;
        let mut rows = stmt.query(params![path])?;

        match rows.next()? {
            Some(row) => Ok(Some(File {
                id: row.get(0)?,
                path: row.get(1)?,
                language: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    pub fn get_file(&self, id: FileId) -> Result<Option<File>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, path, language FROM files WHERE id = ?")?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(File {
                id: row.get(0)?,
                path: row.get(1)?,
                language: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    pub fn file_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let first = tx.get_or_create_file("/src/widget.cpp")?;
            let again = tx.get_or_create_file("/src/widget.cpp")?;
            assert_eq!(first, again);
            assert_eq!(first.language.as_deref(), Some("cpp"));
            assert_eq!(tx.file_count()?, 1);
            assert_eq!(tx.get_file(first.id)?, Some(first));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unknown_extension_has_no_language() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let file = tx.get_or_create_file("/build/app")?;
            assert_eq!(file.language, None);
            assert!(tx.file_by_path("/build/other")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
