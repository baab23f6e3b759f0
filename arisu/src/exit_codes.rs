//! Stable exit codes for the `arisu` binary.

/// Command succeeded, or the interactive session ended normally.
pub const OK: i32 = 0;
/// Any error reported by `main`: bad config, backend failure, broken step file.
pub const FAILURE: i32 = 1;
