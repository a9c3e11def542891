//! Architectural Enforcement
//!
//! Line-oriented scanners used by the integration tests in `tests/` to keep
//! production code on async I/O:
//! - no thread sleeps, and async sleeps only between reconnect attempts
//! - no blocking file, network or HTTP calls inside `async fn`
//! - no terminal I/O from the library crate
//!
//! The scanners are heuristics over source text, not a parser. They are
//! tuned for rustfmt-formatted code.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Production source directories checked by every rule
pub const PRODUCTION_DIRS: [&str; 2] = ["deck/core/src", "deck/cli/src"];

/// One rule hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the hit is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What the rule found
    pub reason: &'static str,
    /// Offending source line, trimmed
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.source
        )
    }
}

/// Run `check` over every `.rs` file below `dir` (relative to the workspace root)
pub fn scan_dir(
    dir: &str,
    mut check: impl FnMut(&Path, &[&str]) -> Vec<(usize, &'static str)>,
) -> Vec<Violation> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
    {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        for (idx, reason) in check(entry.path(), &lines) {
            violations.push(Violation {
                path: entry.path().to_path_buf(),
                line: idx + 1,
                reason,
                source: lines[idx].trim().to_string(),
            });
        }
    }
    violations
}

/// Code part of a line, without a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// The `fn` signature line enclosing `idx`, if any
#[must_use]
pub fn enclosing_fn<'a>(lines: &[&'a str], idx: usize) -> Option<(usize, &'a str)> {
    for i in (0..=idx).rev() {
        let line = strip_visibility(lines[i].trim());
        if line.starts_with("fn ") || line.starts_with("async fn ") {
            return Some((i, line));
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.ends_with('{')) {
            return None;
        }
    }
    None
}

/// Whether `idx` is inside a test function or a `#[cfg(test)]` module
#[must_use]
pub fn is_test_code(lines: &[&str], idx: usize) -> bool {
    if lines[..=idx]
        .iter()
        .any(|line| line.trim().starts_with("#[cfg(test)]"))
    {
        return true;
    }
    let Some((fn_idx, _)) = enclosing_fn(lines, idx) else {
        return false;
    };
    lines[..fn_idx]
        .iter()
        .rev()
        .map(|line| line.trim())
        .take_while(|line| line.starts_with("#[") || line.starts_with("///"))
        .any(|line| line.starts_with("#[test]") || line.starts_with("#[tokio::test"))
}

/// Whether `idx` is inside an `async fn`
#[must_use]
pub fn is_in_async_fn(lines: &[&str], idx: usize) -> bool {
    enclosing_fn(lines, idx).is_some_and(|(_, signature)| signature.starts_with("async fn "))
}

/// Whether a sleep at `idx` paces reconnect attempts
#[must_use]
pub fn is_reconnect_pacing(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(15);
    lines[start..idx].iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("reconnect") || line.contains("attempt")
    })
}

fn strip_visibility(line: &str) -> &str {
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest;
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_fn_sees_visibility_and_async() {
        let code = [
            "impl Worker {",
            "    pub async fn run(&self) {",
            "        let data = std::fs::read(\"x\");",
            "    }",
            "    pub(crate) fn load(&self) {",
            "        let data = std::fs::read(\"x\");",
            "    }",
            "}",
        ];
        assert!(is_in_async_fn(&code, 2));
        assert!(!is_in_async_fn(&code, 5));
        assert_eq!(enclosing_fn(&code, 5).map(|(i, _)| i), Some(4));
    }

    #[test]
    fn test_test_code_detection() {
        let code = [
            "fn helper() {}",
            "#[tokio::test]",
            "async fn test_thing() {",
            "    tokio::time::sleep(d).await;",
            "}",
        ];
        assert!(!is_test_code(&code, 0));
        assert!(is_test_code(&code, 3));

        let module = ["fn real() {}", "#[cfg(test)]", "mod tests {", "    fn x() {}", "}"];
        assert!(!is_test_code(&module, 0));
        assert!(is_test_code(&module, 3));
    }

    #[test]
    fn test_reconnect_pacing_detection() {
        let code = [
            "while attempt < max_attempts {",
            "    attempt += 1;",
            "    tokio::time::sleep(interval).await;",
            "}",
        ];
        assert!(is_reconnect_pacing(&code, 2));

        let polling = ["loop {", "    if ready() { break; }", "    tokio::time::sleep(d).await;", "}"];
        assert!(!is_reconnect_pacing(&polling, 2));
    }

    #[test]
    fn test_code_part_drops_comments() {
        assert_eq!(code_part("let x = 1; // std::fs::read"), "let x = 1; ");
    }
}
