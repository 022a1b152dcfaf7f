//! Symbol table and include edges written by parsers.

use anyhow::{anyhow, Context, Result};
use duckdb::{params, params_from_iter};
use std::collections::BTreeSet;

use sextant_core::{FileId, Symbol, SymbolKind, SymbolRole};

use super::database::{placeholders, Tx};

impl Tx<'_> {
    /// Replace every symbol recorded for `file`.
    pub fn replace_symbols(&self, file: FileId, symbols: &[Symbol]) -> Result<()> {
        self.conn
            .execute("DELETE FROM symbols WHERE file_id = ?", params![file])
            .with_context(|| format!("Failed to clear symbols of file {}", file))?;

        let mut stmt = self.conn.prepare(
            "INSERT INTO symbols (mangled_hash, name, kind, role, file_id) VALUES (?, ?, ?, ?, ?)",
        )?;
        for symbol in symbols {
            stmt.execute(params![
                symbol.mangled_hash,
                symbol.name,
                symbol.kind.as_str(),
                symbol.role.as_str(),
                file,
            ])?;
        }
        Ok(())
    }

    /// Add a single symbol row.
    pub fn add_symbol(&self, symbol: &Symbol) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO symbols (mangled_hash, name, kind, role, file_id)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    symbol.mangled_hash,
                    symbol.name,
                    symbol.kind.as_str(),
                    symbol.role.as_str(),
                    symbol.file_id,
                ],
            )
            .context("Failed to insert symbol")?;
        Ok(())
    }

    pub fn symbols_in_file(&self, file: FileId) -> Result<Vec<Symbol>> {
        let mut stmt = self.conn.prepare(
            "SELECT mangled_hash, name, kind, role, file_id FROM symbols
             WHERE file_id = ? ORDER BY name, kind, role",
        )?;
        let mut rows = stmt.query(params![file])?;

        let mut symbols = Vec::new();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(2)?;
            let role: String = row.get(3)?;
            symbols.push(Symbol {
                mangled_hash: row.get(0)?,
                name: row.get(1)?,
                kind: SymbolKind::parse(&kind)
                    .ok_or_else(|| anyhow!("Unknown symbol kind '{}'", kind))?,
                role: SymbolRole::parse(&role)
                    .ok_or_else(|| anyhow!("Unknown symbol role '{}'", role))?,
                file_id: row.get(4)?,
            });
        }
        Ok(symbols)
    }

    /// Replace the outgoing include edges of `includer`.
    pub fn replace_includes(&self, includer: FileId, included: &[FileId]) -> Result<()> {
        self.conn
            .execute("DELETE FROM includes WHERE includer_id = ?", params![includer])
            .with_context(|| format!("Failed to clear includes of file {}", includer))?;

        let unique: BTreeSet<FileId> = included.iter().copied().collect();
        let mut stmt = self
            .conn
            .prepare("INSERT INTO includes (includer_id, included_id) VALUES (?, ?)")?;
        for target in unique {
            stmt.execute(params![includer, target])?;
        }
        Ok(())
    }

    pub fn add_include(&self, includer: FileId, included: FileId) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO includes (includer_id, included_id) VALUES (?, ?)",
                params![includer, included],
            )
            .context("Failed to insert include")?;
        Ok(())
    }

    /// Whether any file includes `file`.
    pub fn is_included(&self, file: FileId) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM includes WHERE included_id = ?",
            params![file],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// One hop of header propagation: the includers of every frontier file.
    pub fn includers(&self, frontier: &[FileId]) -> Result<Vec<(FileId, Option<FileId>)>> {
        if frontier.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT included_id, includer_id FROM includes
             WHERE included_id IN ({}) AND includer_id <> included_id",
            placeholders(frontier.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(frontier.iter()))?;

        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            let included: FileId = row.get(0)?;
            let includer: FileId = row.get(1)?;
            edges.push((included, Some(includer)));
        }
        Ok(edges)
    }

    /// Hashes returned by a marker query (a `SELECT mangled_hash ...`).
    pub fn marker_hashes(&self, marker_sql: &str) -> Result<BTreeSet<i64>> {
        let mut stmt = self.conn.prepare(marker_sql)?;
        let mut rows = stmt.query([])?;

        let mut hashes = BTreeSet::new();
        while let Some(row) = rows.next()? {
            hashes.insert(row.get(0)?);
        }
        Ok(hashes)
    }

    /// Files holding at least one symbol whose hash the marker query returns.
    pub fn files_for_marker(&self, marker_sql: &str) -> Result<BTreeSet<FileId>> {
        let sql = format!(
            "SELECT DISTINCT file_id FROM symbols WHERE mangled_hash IN ({})",
            marker_sql
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Invalid marker query: {}", marker_sql))?;
        let mut rows = stmt.query([])?;

        let mut files = BTreeSet::new();
        while let Some(row) = rows.next()? {
            files.insert(row.get(0)?);
        }
        Ok(files)
    }

    pub fn symbol_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use sextant_core::{Symbol, SymbolKind, SymbolRole};

    fn symbol(hash: i64, name: &str, file: i64) -> Symbol {
        Symbol {
            mangled_hash: hash,
            name: name.to_string(),
            kind: SymbolKind::Function,
            role: SymbolRole::Definition,
            file_id: file,
        }
    }

    #[test]
    fn test_replace_symbols_drops_previous_rows() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.replace_symbols(1, &[symbol(10, "a", 1), symbol(11, "b", 1)])?;
            tx.replace_symbols(2, &[symbol(10, "a", 2)])?;
            tx.replace_symbols(1, &[symbol(12, "c", 1)])?;

            let names: Vec<String> = tx
                .symbols_in_file(1)?
                .into_iter()
                .map(|s| s.name)
                .collect();
            assert_eq!(names, vec!["c"]);
            assert_eq!(tx.symbol_count()?, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_includers_skip_self_edges() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.replace_includes(1, &[3, 3])?;
            tx.replace_includes(2, &[3])?;
            tx.add_include(3, 3)?;

            let mut edges = tx.includers(&[3, 4])?;
            edges.sort();
            assert_eq!(edges, vec![(3, Some(1)), (3, Some(2))]);
            assert!(tx.is_included(3)?);
            assert!(!tx.is_included(1)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_files_for_marker() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.replace_symbols(1, &[symbol(10, "dup", 1)])?;
            tx.replace_symbols(2, &[symbol(10, "dup", 2), symbol(20, "solo", 2)])?;
            tx.replace_symbols(3, &[symbol(20, "solo", 3)])?;

            let marker = "SELECT mangled_hash FROM symbols WHERE name = 'dup'";
            assert_eq!(tx.marker_hashes(marker)?.into_iter().collect::<Vec<_>>(), vec![10]);
            assert_eq!(
                tx.files_for_marker(marker)?.into_iter().collect::<Vec<_>>(),
                vec![1, 2]
            );
            Ok(())
        })
        .unwrap();
    }
}
