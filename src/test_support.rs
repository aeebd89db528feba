//! Test-only logging bootstrap, the `tracing` analogue of the teacher's
//! `env_logger::Builder` setup in `main.rs`'s `setup_diagnostics`.
//!
//! Tests that assert on warn/debug-level behavior (hard-limit rejection,
//! persistence load/save outcomes) call [`init`] first so those events are
//! actually emitted to the test harness's captured output instead of being
//! silently dropped by the absence of a subscriber.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing-subscriber` `fmt` subscriber for the current test
/// binary. Idempotent and safe to call from every test that cares about log
/// output; only the first call takes effect.
pub(crate) fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}
