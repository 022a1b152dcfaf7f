//! Build-log import.
//!
//! A build log is a JSON array. Each entry is either a compilation-database
//! record (`directory`, `file`, `command` or `arguments`, optional `output`)
//! or a native action record (`kind`, `command`, `sources`, `targets`,
//! optional `directory`). Both are turned into build actions with ordered
//! source and target files.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use sextant_core::BuildActionType;

use crate::parser::normalize_path;
use crate::storage::Database;

/// Errors raised while reading a build log. All of them abort the run.
#[derive(Error, Debug)]
pub enum BuildLogError {
    #[error("Failed to read build log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed build log: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid build log entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogEntry {
    Native(NativeEntry),
    Compilation(CompilationEntry),
}

#[derive(Debug, Deserialize)]
struct NativeEntry {
    kind: String,
    command: String,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    directory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompilationEntry {
    directory: String,
    file: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    output: Option<String>,
}

/// One action read from a build log, with absolute normalized paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAction {
    pub action_type: BuildActionType,
    pub label: String,
    pub sources: Vec<PathBuf>,
    pub targets: Vec<PathBuf>,
}

/// Read and parse a build log file. Relative paths are resolved against the
/// log's directory.
pub fn load_build_log(path: &Path) -> Result<Vec<LogAction>, BuildLogError> {
    let content = std::fs::read_to_string(path).map_err(|source| BuildLogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_build_log(&content, base)
}

/// Parse build-log JSON.
pub fn parse_build_log(content: &str, base: &Path) -> Result<Vec<LogAction>, BuildLogError> {
    let entries: Vec<LogEntry> = serde_json::from_str(content)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            LogEntry::Native(native) => native_action(index, native, base),
            LogEntry::Compilation(compilation) => compilation_action(index, compilation, base),
        })
        .collect()
}

fn resolve(dir: &Path, path: &str) -> PathBuf {
    normalize_path(&dir.join(path))
}

fn native_action(
    index: usize,
    entry: NativeEntry,
    base: &Path,
) -> Result<LogAction, BuildLogError> {
    let action_type =
        BuildActionType::parse(&entry.kind).ok_or_else(|| BuildLogError::InvalidEntry {
            index,
            reason: format!("unknown kind '{}'", entry.kind),
        })?;
    let dir = match &entry.directory {
        Some(dir) => resolve(base, dir),
        None => base.to_path_buf(),
    };
    Ok(LogAction {
        action_type,
        label: entry.command,
        sources: entry.sources.iter().map(|s| resolve(&dir, s)).collect(),
        targets: entry.targets.iter().map(|t| resolve(&dir, t)).collect(),
    })
}

fn compilation_action(
    index: usize,
    entry: CompilationEntry,
    base: &Path,
) -> Result<LogAction, BuildLogError> {
    let words = match (&entry.arguments, &entry.command) {
        (Some(arguments), _) => arguments.clone(),
        (None, Some(command)) => split_command(command),
        (None, None) => {
            return Err(BuildLogError::InvalidEntry {
                index,
                reason: "neither 'command' nor 'arguments' given".into(),
            })
        }
    };
    let label = entry.command.clone().unwrap_or_else(|| words.join(" "));
    let dir = resolve(base, &entry.directory);

    let output = entry.output.clone().or_else(|| output_argument(&words));
    Ok(LogAction {
        action_type: BuildActionType::Compile,
        label,
        sources: vec![resolve(&dir, &entry.file)],
        targets: output.iter().map(|o| resolve(&dir, o)).collect(),
    })
}

/// The argument of `-o` (either `-o out` or `-oout`).
fn output_argument(words: &[String]) -> Option<String> {
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        if word == "-o" {
            return iter.next().cloned();
        }
        if let Some(rest) = word.strip_prefix("-o") {
            if !rest.is_empty() && !rest.starts_with('-') {
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Split a shell command line into words, honouring quotes and backslashes.
pub fn split_command(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Entries already present from an earlier import
    pub existing: usize,
}

/// Write actions into the build graph, skipping ones already recorded for
/// the same project with the same command, sources and targets.
pub fn import_actions(
    db: &Database,
    actions: &[LogAction],
    project: &str,
) -> anyhow::Result<ImportSummary> {
    db.transaction(|tx| {
        let mut summary = ImportSummary::default();
        for action in actions {
            let sources = path_strings(&action.sources);
            let targets = path_strings(&action.targets);
            if tx
                .find_identical_action(
                    action.action_type,
                    &action.label,
                    project,
                    &sources,
                    &targets,
                )?
                .is_some()
            {
                summary.existing += 1;
                continue;
            }
            let record = tx.insert_action(action.action_type, &action.label, project)?;
            for (ordinal, source) in sources.iter().enumerate() {
                let file = tx.get_or_create_file(source)?;
                tx.add_action_source(record.id, file.id, ordinal)?;
            }
            for (ordinal, target) in targets.iter().enumerate() {
                let file = tx.get_or_create_file(target)?;
                tx.add_action_target(record.id, file.id, ordinal)?;
            }
            summary.imported += 1;
        }
        tracing::info!(
            "Imported {} build actions ({} already known)",
            summary.imported,
            summary.existing
        );
        Ok(summary)
    })
}

fn path_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command(r#"g++ -DNAME="a b" 'x y' c\ d  -c"#),
            vec!["g++", "-DNAME=a b", "x y", "c d", "-c"]
        );
        assert!(split_command("   ").is_empty());
        assert_eq!(split_command(r#"cc """#), vec!["cc", ""]);
    }

    #[test]
    fn test_compilation_database_entries() {
        let log = r#"[
            {"directory": "/work/build", "file": "../src/a.cpp",
             "command": "g++ -c ../src/a.cpp -o a.o"},
            {"directory": "/work/build", "file": "/work/src/b.cpp",
             "arguments": ["g++", "-c", "/work/src/b.cpp"], "output": "b.o"},
            {"directory": "/work/build", "file": "c.cpp", "command": "g++ -c c.cpp"}
        ]"#;
        let actions = parse_build_log(log, Path::new("/")).unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].action_type, BuildActionType::Compile);
        assert_eq!(actions[0].sources, vec![PathBuf::from("/work/src/a.cpp")]);
        assert_eq!(actions[0].targets, vec![PathBuf::from("/work/build/a.o")]);
        assert_eq!(actions[1].label, "g++ -c /work/src/b.cpp");
        assert_eq!(actions[1].targets, vec![PathBuf::from("/work/build/b.o")]);
        assert!(actions[2].targets.is_empty());
    }

    #[test]
    fn test_native_entries() {
        let log = r#"[
            {"kind": "link", "command": "ld a.o b.o -o app",
             "sources": ["a.o", "b.o"], "targets": ["app"], "directory": "build"},
            {"kind": "interpret", "command": "python gen.py", "sources": ["gen.py"]}
        ]"#;
        let actions = parse_build_log(log, Path::new("/work")).unwrap();
        assert_eq!(actions[0].action_type, BuildActionType::Link);
        assert_eq!(
            actions[0].sources,
            vec![PathBuf::from("/work/build/a.o"), PathBuf::from("/work/build/b.o")]
        );
        assert_eq!(actions[1].action_type, BuildActionType::Interpret);
        assert_eq!(actions[1].sources, vec![PathBuf::from("/work/gen.py")]);
        assert!(actions[1].targets.is_empty());
    }

    #[test]
    fn test_invalid_logs() {
        assert!(matches!(
            parse_build_log("{not json", Path::new("/")),
            Err(BuildLogError::Parse(_))
        ));
        assert!(matches!(
            parse_build_log(r#"[{"kind": "archive", "command": "ar"}]"#, Path::new("/")),
            Err(BuildLogError::InvalidEntry { index: 0, .. })
        ));
        assert!(matches!(
            parse_build_log(r#"[{"directory": "/", "file": "a.c"}]"#, Path::new("/")),
            Err(BuildLogError::InvalidEntry { .. })
        ));
        assert!(matches!(
            load_build_log(Path::new("/nonexistent/build.json")),
            Err(BuildLogError::Read { .. })
        ));
    }

    #[test]
    fn test_import_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let actions = parse_build_log(
            r#"[{"kind": "compile", "command": "cc -c a.c -o a.o",
                 "sources": ["a.c"], "targets": ["a.o"]}]"#,
            Path::new("/p"),
        )
        .unwrap();

        let first = import_actions(&db, &actions, "demo").unwrap();
        let second = import_actions(&db, &actions, "demo").unwrap();
        assert_eq!(first.imported, 1);
        assert_eq!(second, ImportSummary { imported: 0, existing: 1 });

        db.transaction(|tx| {
            assert_eq!(tx.action_count()?, 1);
            let action = tx.next_outstanding_action(None)?.unwrap();
            let sources = tx.action_sources(action.id)?;
            assert_eq!(sources[0].as_ref().unwrap().path, "/p/a.c");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_same_command_in_different_directories_imports_both() {
        let db = Database::open_in_memory().unwrap();
        let actions = parse_build_log(
            r#"[{"directory": "liba", "file": "main.c", "command": "cc -c main.c -o main.o"},
                {"directory": "libb", "file": "main.c", "command": "cc -c main.c -o main.o"}]"#,
            Path::new("/w"),
        )
        .unwrap();
        assert_eq!(actions[0].label, actions[1].label);

        let first = import_actions(&db, &actions, "demo").unwrap();
        assert_eq!(first, ImportSummary { imported: 2, existing: 0 });
        let again = import_actions(&db, &actions, "demo").unwrap();
        assert_eq!(again, ImportSummary { imported: 0, existing: 2 });

        db.transaction(|tx| {
            assert_eq!(tx.action_count()?, 2);
            let first = tx.next_outstanding_action(None)?.unwrap();
            let second = tx.next_outstanding_action(Some(first.id))?.unwrap();
            let path = |id: i64| -> anyhow::Result<String> {
                Ok(tx.action_sources(id)?[0].as_ref().unwrap().path.clone())
            };
            assert_eq!(path(first.id)?, "/w/liba/main.c");
            assert_eq!(path(second.id)?, "/w/libb/main.c");
            Ok(())
        })
        .unwrap();
    }
}
