//! Stable process exit codes for the `orch` binary.

/// Mode completed; tests (if any ran) pass.
pub const OK: i32 = 0;
/// Configuration, provider, artifact or other fatal error.
pub const FATAL: i32 = 1;
/// A model response could not be parsed or applied. Reported to the PR.
pub const STAGE_FAILED: i32 = 2;
/// Changes were applied but tests still fail.
pub const TESTS_FAILING: i32 = 3;
