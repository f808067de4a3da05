//! Helper to set the backtrace env var.

use std::sync::Once;

static INIT: Once = Once::new();

/// Sets `RUST_BACKTRACE=1` unless a value was provided explicitly.
///
/// Must be called at the start of `main`, before any other thread is spawned.
pub fn enable() {
    INIT.call_once(|| {
        if std::env::var_os("RUST_BACKTRACE").is_none() {
            // SAFETY: called once from the main thread before the runtime starts.
            unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_keeps_explicit_value() {
        // SAFETY: no other test in this crate reads or writes the variable.
        unsafe { std::env::set_var("RUST_BACKTRACE", "full") };
        enable();
        enable();
        assert_eq!(std::env::var("RUST_BACKTRACE").unwrap(), "full");
    }
}
