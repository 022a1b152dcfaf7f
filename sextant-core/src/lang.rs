//! Language detection from file extensions.

use std::path::Path;

/// Map a path's extension to a language identifier.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    match ext.to_lowercase().as_str() {
        "c" => Some("c"),
        "h" => Some("c-header"),
        "cc" | "cpp" | "cxx" | "c++" | "ino" => Some("cpp"),
        "hh" | "hpp" | "hxx" | "h++" | "inl" | "ipp" | "tcc" => Some("cpp-header"),
        "py" | "pyw" | "pyi" => Some("python"),
        "js" | "mjs" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "java" => Some("java"),
        "go" => Some("go"),
        "rs" => Some("rust"),
        "cs" => Some("csharp"),
        "sh" | "bash" | "zsh" => Some("shell"),
        "cmake" => Some("cmake"),
        _ => None,
    }
}

/// Whether a language identifier names a C-family header.
pub fn is_header(language: &str) -> bool {
    matches!(language, "c-header" | "cpp-header")
}
