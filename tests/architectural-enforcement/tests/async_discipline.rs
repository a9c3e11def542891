//! Integration Test: Async Discipline
//!
//! Production code waits on I/O, never on the clock, and never blocks the
//! runtime:
//! - `std::thread::sleep` is forbidden everywhere
//! - `tokio::time::sleep` is only allowed to pace reconnect attempts;
//!   periodic work uses `tokio::time::interval`
//! - blocking file, network and HTTP calls are forbidden inside `async fn`
//! - the library crate never touches the terminal

use architectural_enforcement::{
    code_part, is_in_async_fn, is_reconnect_pacing, is_test_code, scan_dir, Violation,
    PRODUCTION_DIRS,
};

fn report(kind: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{kind} found in production code:");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("Found {} {kind} violation(s)", violations.len());
}

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        violations.extend(scan_dir(dir, |_, lines| {
            let mut hits = Vec::new();
            for (idx, line) in lines.iter().enumerate() {
                let code = code_part(line);
                if is_test_code(lines, idx) {
                    continue;
                }
                if code.contains("thread::sleep(") {
                    hits.push((idx, "thread sleep"));
                } else if code.contains("::sleep(") && !is_reconnect_pacing(lines, idx) {
                    hits.push((idx, "sleep outside reconnect pacing"));
                }
            }
            hits
        }));
    }
    report("sleep", &violations);
}

#[test]
fn test_no_blocking_io_in_async_code() {
    const BLOCKING: [(&str, &str); 3] = [
        ("std::fs::", "blocking file I/O"),
        ("std::net::", "blocking network I/O"),
        ("std::process::Command", "blocking process I/O"),
    ];

    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        violations.extend(scan_dir(dir, |_, lines| {
            let mut hits = Vec::new();
            for (idx, line) in lines.iter().enumerate() {
                let code = code_part(line);
                if is_test_code(lines, idx) {
                    continue;
                }
                if code.contains("reqwest::blocking") {
                    hits.push((idx, "blocking HTTP client"));
                    continue;
                }
                if !is_in_async_fn(lines, idx) {
                    continue;
                }
                if let Some((_, reason)) = BLOCKING.iter().find(|(pat, _)| code.contains(pat)) {
                    hits.push((idx, *reason));
                }
            }
            hits
        }));
    }
    report("blocking I/O", &violations);
}

#[test]
fn test_library_never_touches_terminal() {
    const TERMINAL: [&str; 6] = [
        "println!(",
        "print!(",
        "eprintln!(",
        "eprint!(",
        "std::io::stdin()",
        "std::io::stdout()",
    ];

    let violations = scan_dir("deck/core/src", |_, lines| {
        let mut hits = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if is_test_code(lines, idx) {
                continue;
            }
            if TERMINAL.iter().any(|pat| code.contains(pat)) {
                hits.push((idx, "terminal I/O in library"));
            }
        }
        hits
    });
    report("terminal I/O", &violations);
}
