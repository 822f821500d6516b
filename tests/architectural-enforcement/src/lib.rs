//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production sources of the bridge crates:
//! - No sleep() calls (wait on I/O or channels instead)
//! - No unwrap()/expect() (errors are propagated)
//! - No stdout printing from the core library (stdout belongs to the daemon's
//!   event stream)
//!
//! The helpers here walk the source trees and hand each test the lines that
//! belong to production code: comments are stripped and everything from the
//! first `#[cfg(test)]` onwards is ignored.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source trees that ship in the binaries
pub const PRODUCTION_DIRS: &[&str] = &["bridge/core/src", "bridge/daemon/src"];

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the pattern
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// Offending line, trimmed
    pub line: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line_number, self.line)
    }
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Production lines of a source text as `(line_number, code)` pairs
///
/// Comment text is removed and scanning stops at the first `#[cfg(test)]`.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        if !code.trim().is_empty() {
            lines.push((idx + 1, code.to_string()));
        }
    }
    lines
}

/// Scan the given trees for production lines matching `is_violation`
pub fn scan(dirs: &[&str], is_violation: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for dir in dirs {
        for path in rust_files(dir) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            for (line_number, code) in production_lines(&content) {
                if is_violation(&code) {
                    violations.push(Violation {
                        path: path.clone(),
                        line_number,
                        line: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Panic with a readable report if any violations were found
pub fn assert_clean(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!(
        "\nFound {} {rule} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_strip_comments_and_tests() {
        let source = "fn a() {\n    // x.unwrap()\n    let y = 1; // trailing\n}\n#[cfg(test)]\nmod tests { fn b() { c.unwrap(); } }\n";
        let lines = production_lines(source);
        assert_eq!(
            lines,
            vec![
                (1, "fn a() {".to_string()),
                (3, "    let y = 1; ".to_string()),
                (4, "}".to_string()),
            ]
        );
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            assert!(
                !rust_files(dir).is_empty(),
                "expected Rust sources under {dir}"
            );
        }
    }
}
