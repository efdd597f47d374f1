//! Error types for lockscope.
//!
//! Uses thiserror for derive macros. Every variant maps onto an exit code so
//! that `main` can report the failing experiment and terminate accordingly.

use crate::exit_codes;
use std::time::Duration;
use thiserror::Error;

/// Main error type for lockscope operations.
#[derive(Error, Debug)]
pub enum LockscopeError {
    /// User provided invalid arguments or the system is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// Configuration could not be read, parsed or validated.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The database rejected or failed an operation.
    #[error("database error: {0}")]
    Database(String),

    /// A transaction was begun twice, or committed without being begun.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// The lock observer did not answer within its time budget.
    #[error("lock observer timed out after {0:?}")]
    ObserverTimeout(Duration),

    /// The lock observer's own query failed.
    #[error("lock observer failed: {0}")]
    ObserverExecution(String),

    /// A probe or barrier wait exceeded its time budget.
    #[error("timeout exceeded while waiting for {what} (budget {timeout:?})")]
    TimeoutExceeded { what: String, timeout: Duration },

    /// Observed lock state contradicts the monotonic escalation model.
    #[error("impossible lock state: {0}")]
    InvariantViolated(String),

    /// The bisection did not converge within its iteration budget.
    #[error("threshold search did not converge: {0}")]
    SearchExhausted(String),

    /// Both probe points only ever held row locks.
    #[error("no lock escalation observed: {0}")]
    NoEscalationObserved(String),

    /// A wait was cancelled.
    #[error("interrupted while {0}")]
    Interrupted(String),
}

impl LockscopeError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockscopeError::UserError(_) | LockscopeError::Config(_) => exit_codes::USER_ERROR,
            LockscopeError::InvariantViolated(_)
            | LockscopeError::SearchExhausted(_)
            | LockscopeError::NoEscalationObserved(_) => exit_codes::SEARCH_FAILURE,
            LockscopeError::Database(_)
            | LockscopeError::TransactionState(_)
            | LockscopeError::ObserverExecution(_) => exit_codes::DATABASE_FAILURE,
            LockscopeError::ObserverTimeout(_) | LockscopeError::TimeoutExceeded { .. } => {
                exit_codes::TIMEOUT
            }
            LockscopeError::Interrupted(_) => exit_codes::INTERRUPTED,
        }
    }

    /// Whether this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LockscopeError::ObserverTimeout(_) | LockscopeError::TimeoutExceeded { .. }
        )
    }
}

/// Result type alias for lockscope operations.
pub type Result<T> = std::result::Result<T, LockscopeError>;
