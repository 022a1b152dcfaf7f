//! Parser capability.
//!
//! A parser turns one source file of a build action into symbol-table and
//! include rows. Parsers are pluggable: the scheduler resolves one per source
//! path through an explicit [`ParserRegistry`] and never blocks on the
//! returned [`ParseHandle`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sextant_core::{BuildAction, File, ParseHandle, ParseResult, SourceTarget};

use crate::parse::ParseStats;
use crate::storage::{Database, Tx};

pub mod cpp;
mod helpers;
mod registry;

pub use cpp::CppParser;
pub use helpers::normalize_path;
pub use registry::ParserRegistry;

/// Per-task options handed to parsers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Directories searched for included headers, in order.
    pub include_paths: Vec<PathBuf>,
    /// Remaining command-line words of the build action.
    pub extra_args: Vec<String>,
}

impl ParserOptions {
    /// Options for a build action: configured include paths followed by the
    /// `-I`, `-iquote` and `-isystem` directories named on its command line.
    pub fn for_label(label: &str, base_include_paths: &[PathBuf]) -> Self {
        let mut include_paths = base_include_paths.to_vec();
        let mut extra_args = Vec::new();

        let mut words = label.split_whitespace().skip(1);
        while let Some(word) = words.next() {
            let dir = match word {
                "-I" | "-iquote" | "-isystem" => words.next().map(str::to_string),
                _ => ["-I", "-iquote", "-isystem"]
                    .iter()
                    .find_map(|flag| word.strip_prefix(flag))
                    .filter(|rest| !rest.is_empty())
                    .map(str::to_string),
            };
            match dir {
                Some(dir) => include_paths.push(PathBuf::from(dir)),
                None => extra_args.push(word.to_string()),
            }
        }

        Self {
            include_paths,
            extra_args,
        }
    }
}

/// What a parser sees while the scheduler's transaction is open.
pub struct ParseContext<'a> {
    pub tx: &'a Tx<'a>,
    pub options: &'a ParserOptions,
    /// Shared handle for work that outlives the current transaction.
    pub db: &'a Arc<Database>,
}

/// A pluggable language parser.
pub trait Parser: Send + Sync {
    /// Stable name, used for configuration and statistics.
    fn name(&self) -> &str;

    /// Whether this parser handles `path`.
    fn accept(&self, path: &Path) -> bool;

    /// Parse one source file of `action`.
    fn parse(
        &self,
        ctx: &ParseContext<'_>,
        action: &BuildAction,
        source: &File,
        target: Option<&File>,
    ) -> ParseHandle;

    /// Parse every pair of `action` as one unit.
    ///
    /// The default joins one `parse` per pair; a pair without a source fails.
    fn parse_command(
        &self,
        ctx: &ParseContext<'_>,
        action: &BuildAction,
        pairs: &[SourceTarget],
    ) -> ParseHandle {
        let handles = pairs
            .iter()
            .map(|pair| match &pair.source {
                Some(source) => self.parse(ctx, action, source, pair.target.as_ref()),
                None => ParseHandle::ready(ParseResult::Fail),
            })
            .collect();
        ParseHandle::join(handles)
    }

    /// Called once after every dispatched result has been collected.
    fn post_parse(&self, _ctx: &ParseContext<'_>, _stats: &ParseStats) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_pick_up_include_flags() {
        let base = vec![PathBuf::from("/usr/include")];
        let options = ParserOptions::for_label(
            "g++ -c -Iinclude -I /opt/lib -isystem /sys -O2 src/a.cpp -o a.o",
            &base,
        );
        assert_eq!(
            options.include_paths,
            vec![
                PathBuf::from("/usr/include"),
                PathBuf::from("include"),
                PathBuf::from("/opt/lib"),
                PathBuf::from("/sys"),
            ]
        );
        assert_eq!(options.extra_args, vec!["-c", "-O2", "src/a.cpp", "-o", "a.o"]);
    }

    #[test]
    fn test_options_for_empty_label() {
        let options = ParserOptions::for_label("", &[]);
        assert_eq!(options, ParserOptions::default());
    }
}
