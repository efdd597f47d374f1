//! Exit code constants for the lockscope CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid configuration)
//! - 2: Search failure (no escalation observed, exhausted, impossible lock state)
//! - 3: Database or lock observer failure
//! - 4: A probe or barrier exceeded its time budget
//! - 5: Interrupted

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// The threshold search could not produce a result.
pub const SEARCH_FAILURE: i32 = 2;

/// Database operation or lock inspection failed.
pub const DATABASE_FAILURE: i32 = 3;

/// A probe or a barrier wait exceeded its timeout.
pub const TIMEOUT: i32 = 4;

/// The experiment was cancelled while waiting.
pub const INTERRUPTED: i32 = 5;
