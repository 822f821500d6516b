//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Reviews progress
//! when the provider delivers bytes; surfaces progress when events arrive.
//! Waiting is done on I/O, channels or `Notify`, never on a timer.
//!
//! **Exceptions**: test code (after `#[cfg(test)]` or under `tests/`).

use architectural_enforcement::{assert_clean, scan, PRODUCTION_DIRS};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(PRODUCTION_DIRS, |code| {
        code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
    });

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:");
        eprintln!("  - Use channel receives, Notify or stream polling instead");
        eprintln!("  - Timeouts belong in the HTTP client configuration\n");
    }
    assert_clean("sleep", &violations);
}
