//! Build-graph queries: actions and their source/target links.

use anyhow::{anyhow, bail, Context, Result};
use duckdb::{params, params_from_iter};
use std::collections::HashMap;

use sextant_core::{ActionId, BuildAction, BuildActionState, BuildActionType, File, FileId};

use super::database::{placeholders, Tx};

fn action_from_parts(
    id: ActionId,
    action_type: &str,
    state: &str,
    label: String,
    project: String,
) -> Result<BuildAction> {
    Ok(BuildAction {
        id,
        action_type: BuildActionType::parse(action_type).ok_or_else(|| {
            anyhow!("Unknown build action type '{}' on action {}", action_type, id)
        })?,
        state: BuildActionState::parse(state)
            .ok_or_else(|| anyhow!("Unknown build action state '{}' on action {}", state, id))?,
        label,
        project,
    })
}

impl Tx<'_> {
    /// Record a new build action in the `Created` state.
    pub fn insert_action(
        &self,
        action_type: BuildActionType,
        label: &str,
        project: &str,
    ) -> Result<BuildAction> {
        let id: ActionId = self
            .conn
            .query_row(
                "INSERT INTO build_actions (type, state, label, project)
                 VALUES (?, 'created', ?, ?) RETURNING id",
                params![action_type.as_str(), label, project],
                |row| row.get(0),
            )
            .context("Failed to insert build action")?;

        Ok(BuildAction {
            id,
            action_type,
            state: BuildActionState::Created,
            label: label.to_string(),
            project: project.to_string(),
        })
    }

    /// An action with the same type, command line and project, if recorded.
    pub fn find_action(
        &self,
        action_type: BuildActionType,
        label: &str,
        project: &str,
    ) -> Result<Option<ActionId>> {
        Ok(self
            .actions_with_label(action_type, label, project)?
            .into_iter()
            .next())
    }

    /// Like [`find_action`](Self::find_action), but the recorded action must
    /// also link the same source and target paths in the same order.
    pub fn find_identical_action(
        &self,
        action_type: BuildActionType,
        label: &str,
        project: &str,
        sources: &[String],
        targets: &[String],
    ) -> Result<Option<ActionId>> {
        for id in self.actions_with_label(action_type, label, project)? {
            if same_paths(&self.action_sources(id)?, sources)
                && same_paths(&self.action_targets(id)?, targets)
            {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn actions_with_label(
        &self,
        action_type: BuildActionType,
        label: &str,
        project: &str,
    ) -> Result<Vec<ActionId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM build_actions WHERE type = ? AND label = ? AND project = ?
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![action_type.as_str(), label, project], |row| row.get(0))?
            .collect::<duckdb::Result<Vec<ActionId>>>()
            .context("Failed to look up build actions")?;
        Ok(ids)
    }

    pub fn action_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM build_actions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Link `file` as the `ordinal`-th source of `action`.
    pub fn add_action_source(&self, action: ActionId, file: FileId, ordinal: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO build_sources (action_id, file_id, ordinal) VALUES (?, ?, ?)",
                params![action, file, ordinal as i64],
            )
            .with_context(|| format!("Failed to add source to action {}", action))?;
        Ok(())
    }

    /// Link `file` as the `ordinal`-th target of `action`.
    pub fn add_action_target(&self, action: ActionId, file: FileId, ordinal: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO build_targets (action_id, file_id, ordinal) VALUES (?, ?, ?)",
                params![action, file, ordinal as i64],
            )
            .with_context(|| format!("Failed to add target to action {}", action))?;
        Ok(())
    }

    /// Get a build action by ID.
    pub fn get_action(&self, id: ActionId) -> Result<Option<BuildAction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, state, label, project FROM build_actions WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;

        if let Some(row) = rows.next()? {
            let action_type: String = row.get(1)?;
            let state: String = row.get(2)?;
            Ok(Some(action_from_parts(
                row.get(0)?,
                &action_type,
                &state,
                row.get(3)?,
                row.get(4)?,
            )?))
        } else {
            Ok(None)
        }
    }

    /// The lowest-id `Created` action whose id is greater than `after`.
    pub fn next_outstanding_action(&self, after: Option<ActionId>) -> Result<Option<BuildAction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, state, label, project FROM build_actions
             WHERE id > ? AND state = 'created'
             ORDER BY id LIMIT 1",
        )?;
        let mut rows = stmt.query(params![after.unwrap_or(ActionId::MIN)])?;

        if let Some(row) = rows.next()? {
            let action_type: String = row.get(1)?;
            let state: String = row.get(2)?;
            Ok(Some(action_from_parts(
                row.get(0)?,
                &action_type,
                &state,
                row.get(3)?,
                row.get(4)?,
            )?))
        } else {
            Ok(None)
        }
    }

    /// Source files of an action in ordinal order. A link to a missing file
    /// row yields `None`.
    pub fn action_sources(&self, action: ActionId) -> Result<Vec<Option<File>>> {
        self.linked_files("build_sources", action)
    }

    /// Target files of an action in ordinal order.
    pub fn action_targets(&self, action: ActionId) -> Result<Vec<Option<File>>> {
        self.linked_files("build_targets", action)
    }

    fn linked_files(&self, table: &str, action: ActionId) -> Result<Vec<Option<File>>> {
        let sql = format!(
            "SELECT f.id, f.path, f.language FROM {} l
             LEFT JOIN files f ON f.id = l.file_id
             WHERE l.action_id = ?
             ORDER BY l.ordinal",
            table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![action])?;

        let mut files = Vec::new();
        while let Some(row) = rows.next()? {
            let id: Option<FileId> = row.get(0)?;
            files.push(match id {
                Some(id) => Some(File {
                    id,
                    path: row.get(1)?,
                    language: row.get(2)?,
                }),
                None => None,
            });
        }
        Ok(files)
    }

    /// Move an action to `state`.
    ///
    /// Only transitions out of `Created` are applied; returns `false` when the
    /// action was already in a terminal state (or does not exist).
    pub fn set_action_state(&self, action: ActionId, state: BuildActionState) -> Result<bool> {
        if !BuildActionState::Created.can_transition_to(state) {
            bail!("Refusing to move action {} to {}", action, state);
        }
        let changed = self
            .conn
            .execute(
                "UPDATE build_actions SET state = ? WHERE id = ? AND state = 'created'",
                params![state.as_str(), action],
            )
            .with_context(|| format!("Failed to update state of action {}", action))?;
        Ok(changed > 0)
    }

    /// Number of source links belonging to `Created` actions.
    pub fn count_outstanding_sources(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM build_sources s
             JOIN build_actions a ON a.id = s.action_id
             WHERE a.state = 'created'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of actions per state.
    pub fn count_actions_by_state(&self) -> Result<HashMap<BuildActionState, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM build_actions GROUP BY state")?;
        let mut rows = stmt.query([])?;

        let mut counts = HashMap::new();
        while let Some(row) = rows.next()? {
            let state: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            if let Some(state) = BuildActionState::parse(&state) {
                counts.insert(state, count as usize);
            }
        }
        Ok(counts)
    }

    /// Actions that take `file` as a direct source.
    pub fn actions_with_source(&self, file: FileId) -> Result<Vec<ActionId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT action_id FROM build_sources WHERE file_id = ? ORDER BY action_id",
        )?;
        let mut rows = stmt.query(params![file])?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next()? {
            actions.push(row.get(0)?);
        }
        Ok(actions)
    }

    /// One hop of build-action propagation: for each action of the frontier,
    /// the actions consuming one of its targets as a source.
    pub fn action_successors(
        &self,
        frontier: &[ActionId],
    ) -> Result<Vec<(ActionId, Option<ActionId>)>> {
        if frontier.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT t.action_id, s.action_id
             FROM build_targets t
             LEFT JOIN build_sources s
               ON s.file_id = t.file_id AND s.action_id <> t.action_id
             WHERE t.action_id IN ({})",
            placeholders(frontier.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(frontier.iter()))?;

        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push((row.get(0)?, row.get(1)?));
        }
        Ok(edges)
    }
}

fn same_paths(linked: &[Option<File>], paths: &[String]) -> bool {
    linked.len() == paths.len()
        && linked
            .iter()
            .zip(paths)
            .all(|(file, path)| file.as_ref().is_some_and(|f| &f.path == path))
}
