//! Ambiguity markers.
//!
//! A marker is one aggregate query over the symbol table returning the
//! `mangled_hash` values that fail a uniqueness test for one symbol kind.
//! Occurrences are counted per distinct file, so a header declaring the same
//! function twice still counts once.

use sextant_core::SymbolKind;

/// A named uniqueness test over one symbol kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub name: &'static str,
    pub kind: SymbolKind,
    /// SQL condition over `defs` and `decls` that holds for unique hashes.
    unique_when: &'static str,
}

const DEFS: &str = "COUNT(DISTINCT CASE WHEN role = 'definition' THEN file_id END)";
const DECLS: &str = "COUNT(DISTINCT CASE WHEN role = 'declaration' THEN file_id END)";

impl Marker {
    /// Functions: one definition, or none and at most one declaration.
    pub fn functions() -> Self {
        Self {
            name: "functions",
            kind: SymbolKind::Function,
            unique_when: "defs = 1 OR (defs = 0 AND decls <= 1)",
        }
    }

    /// Types: at most one definition.
    pub fn types() -> Self {
        Self {
            name: "types",
            kind: SymbolKind::Type,
            unique_when: "defs <= 1",
        }
    }

    /// Variables: same rule as functions.
    pub fn variables() -> Self {
        Self {
            name: "variables",
            kind: SymbolKind::Variable,
            unique_when: "defs = 1 OR (defs = 0 AND decls <= 1)",
        }
    }

    pub fn all() -> Vec<Marker> {
        vec![Self::functions(), Self::types(), Self::variables()]
    }

    /// Query returning the failing hashes.
    pub fn sql(&self) -> String {
        let condition = self
            .unique_when
            .replace("defs", DEFS)
            .replace("decls", DECLS);
        format!(
            "SELECT mangled_hash FROM symbols WHERE kind = '{}' \
             GROUP BY mangled_hash HAVING NOT ({})",
            self.kind.as_str(),
            condition
        )
    }
}
