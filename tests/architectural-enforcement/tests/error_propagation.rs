//! Integration Test: Error Propagation
//!
//! **Policy**: Production code propagates errors with `?` or maps them into
//! typed errors. `unwrap()` and `expect()` are only allowed in tests.

use architectural_enforcement::{assert_clean, scan, PRODUCTION_DIRS};

#[test]
fn test_no_unwrap_or_expect_in_production_code() {
    let violations = scan(PRODUCTION_DIRS, |code| {
        code.contains(".unwrap()") || code.contains(".expect(")
    });
    assert_clean("unwrap/expect", &violations);
}

/// The daemon's stdout carries the JSON event stream, so the library must
/// never print to it.
#[test]
fn test_core_does_not_print_to_stdout() {
    let violations = scan(&["bridge/core/src"], |code| {
        code.contains("println!(") || code.contains("print!(") || code.contains("dbg!(")
    });
    assert_clean("stdout printing", &violations);
}
