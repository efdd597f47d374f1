//! Count-down latches and cooperative cancellation.
//!
//! Waits are bounded and sliced so that a cancelled run stops waiting
//! promptly instead of sitting out its full timeout.

use crate::error::{LockscopeError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Longest a single wait blocks before re-checking cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Shared flag asking in-flight work to stop. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`LockscopeError::Interrupted`] if cancellation was requested.
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(LockscopeError::Interrupted(during.to_string()));
        }
        Ok(())
    }

    /// Sleep for `duration` unless cancelled first.
    pub fn sleep(&self, duration: Duration, during: &str) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check(during)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}

/// A count-down latch: waiters are released once the count reaches zero.
#[derive(Debug)]
pub struct Latch {
    name: String,
    count: Mutex<usize>,
    released: Condvar,
}

impl Latch {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Decrement the count, saturating at zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(|p| p.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.released.notify_all();
        }
    }

    /// Wait until the count reaches zero.
    ///
    /// Returns `Ok(false)` when `timeout` elapses first and
    /// [`LockscopeError::Interrupted`] when `cancel` fires.
    pub fn wait_timeout(&self, timeout: Duration, cancel: &Cancellation) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(|p| p.into_inner());
        while *count > 0 {
            if cancel.is_cancelled() {
                return Err(LockscopeError::Interrupted(format!(
                    "waiting on latch '{}'",
                    self.name
                )));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            count = match self
                .released
                .wait_timeout(count, (deadline - now).min(WAIT_SLICE))
            {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(true)
    }
}
