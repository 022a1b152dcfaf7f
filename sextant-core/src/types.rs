//! Data model shared by the scheduler, the collector and the cluster engine.
//!
//! These types mirror the persisted build graph (actions, their source and
//! target files) and the symbol table rows parsers produce. They carry no
//! storage logic of their own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a persisted build action.
pub type ActionId = i64;

/// Identity of a persisted file record.
pub type FileId = i64;

/// Kind of a recorded tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildActionType {
    /// Compiler invocation turning sources into objects
    Compile,
    /// Linker invocation combining objects into a binary
    Link,
    /// Interpreter invocation (scripts)
    Interpret,
}

impl BuildActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildActionType::Compile => "compile",
            BuildActionType::Link => "link",
            BuildActionType::Interpret => "interpret",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compile" => Some(BuildActionType::Compile),
            "link" => Some(BuildActionType::Link),
            "interpret" => Some(BuildActionType::Interpret),
            _ => None,
        }
    }
}

impl fmt::Display for BuildActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing state of a build action.
///
/// States only ever move forward: `Created` to either `Parsed` or `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildActionState {
    Created,
    Parsed,
    Skipped,
}

impl BuildActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildActionState::Created => "created",
            BuildActionState::Parsed => "parsed",
            BuildActionState::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(BuildActionState::Created),
            "parsed" => Some(BuildActionState::Parsed),
            "skipped" => Some(BuildActionState::Skipped),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: BuildActionState) -> bool {
        matches!(
            (self, next),
            (BuildActionState::Created, BuildActionState::Parsed)
                | (BuildActionState::Created, BuildActionState::Skipped)
        )
    }

    /// Terminal states are never revisited by a scheduling pass.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildActionState::Created)
    }
}

impl fmt::Display for BuildActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded compiler, linker or interpreter invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAction {
    pub id: ActionId,
    pub action_type: BuildActionType,
    pub state: BuildActionState,
    /// The command line, as recorded in the build log
    pub label: String,
    /// Owning project name
    pub project: String,
}

/// A file known to the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub path: String,
    pub language: Option<String>,
}

/// One `(source, target)` pair of a task.
///
/// Either side may be missing when the build graph links to a file record
/// that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceTarget {
    pub source: Option<File>,
    pub target: Option<File>,
}

/// Outcome reported by a parser for one source file (or one whole command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseResult {
    Success,
    Deferred,
    Fail,
}

impl ParseResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseResult::Success => "success",
            ParseResult::Deferred => "deferred",
            ParseResult::Fail => "fail",
        }
    }

    /// Combine two outcomes; `Fail` dominates `Deferred` dominates `Success`.
    pub fn worst(self, other: ParseResult) -> ParseResult {
        self.max(other)
    }
}

impl fmt::Display for ParseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of entity a symbol row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Type,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "function" => Some(SymbolKind::Function),
            "type" => Some(SymbolKind::Type),
            "variable" => Some(SymbolKind::Variable),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a symbol row is a definition or only a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolRole {
    Definition,
    Declaration,
}

impl SymbolRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolRole::Definition => "definition",
            SymbolRole::Declaration => "declaration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "definition" => Some(SymbolRole::Definition),
            "declaration" => Some(SymbolRole::Declaration),
            _ => None,
        }
    }
}

/// A symbol occurrence recorded by a parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// Stable identity shared by every occurrence of the same entity
    pub mangled_hash: i64,
    /// Qualified name, e.g. `ns::Widget::draw`
    pub name: String,
    pub kind: SymbolKind,
    pub role: SymbolRole,
    pub file_id: FileId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_roundtrip() {
        for t in [
            BuildActionType::Compile,
            BuildActionType::Link,
            BuildActionType::Interpret,
        ] {
            assert_eq!(BuildActionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(BuildActionType::parse("archive"), None);
    }

    #[test]
    fn test_state_transitions_are_monotone() {
        use BuildActionState::*;
        assert!(Created.can_transition_to(Parsed));
        assert!(Created.can_transition_to(Skipped));
        assert!(!Parsed.can_transition_to(Created));
        assert!(!Skipped.can_transition_to(Created));
        assert!(!Parsed.can_transition_to(Skipped));
        assert!(!Created.can_transition_to(Created));
        assert!(Parsed.is_terminal());
        assert!(!Created.is_terminal());
    }

    #[test]
    fn test_parse_result_worst() {
        assert_eq!(ParseResult::Success.worst(ParseResult::Success), ParseResult::Success);
        assert_eq!(ParseResult::Success.worst(ParseResult::Deferred), ParseResult::Deferred);
        assert_eq!(ParseResult::Deferred.worst(ParseResult::Fail), ParseResult::Fail);
        assert_eq!(ParseResult::Fail.worst(ParseResult::Success), ParseResult::Fail);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&BuildActionState::Parsed).unwrap();
        assert_eq!(json, "\"parsed\"");
        let kind: SymbolKind = serde_json::from_str("\"type\"").unwrap();
        assert_eq!(kind, SymbolKind::Type);
    }
}
