//! Import extraction from unified-diff patch text.
//!
//! Scoped to Java sources: the pull requests under study belong to Java
//! projects. The file filter and the line pattern both live here, so
//! widening the pipeline to another language means adding a pattern in
//! exactly one place.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// An added import line: the diff `+` marker, optional whitespace, the
/// `import` keyword, a fully-qualified identifier, `;`. The identifier is
/// captured verbatim, so `com.acme.*` and `com.acme.Foo` stay distinct.
static ADDED_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+\s*import\s+([A-Za-z0-9_.*]+);").expect("added-import pattern is valid")
});

/// Whether a changed file's patch should be scanned for imports.
pub fn is_java_source(filename: &str) -> bool {
    filename.ends_with(".java")
}

/// Extract the distinct imports added by one patch.
///
/// Only `+` lines count; removed and context imports are ignored.
/// Duplicates within the patch collapse to a single entry.
pub fn extract_added_imports(patch: &str) -> BTreeSet<String> {
    patch
        .lines()
        .filter_map(|line| ADDED_IMPORT.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}
