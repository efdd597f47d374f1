//! The experiment transcript: thread-tagged lines on stdout.
//!
//! Every line is also kept in memory so a run can be inspected afterwards.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Transcript {
    lines: Arc<Mutex<Vec<String>>>,
    echo: bool,
}

impl Transcript {
    /// A transcript that prints each line to stdout.
    pub fn stdout() -> Self {
        Self {
            lines: Arc::default(),
            echo: true,
        }
    }

    /// A transcript that only records.
    pub fn captured() -> Self {
        Self {
            lines: Arc::default(),
            echo: false,
        }
    }

    /// Record a line tagged with the current thread's name.
    pub fn say(&self, message: impl AsRef<str>) {
        let thread = std::thread::current();
        let line = format!("[{}] {}", thread.name().unwrap_or("main"), message.as_ref());
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if self.echo {
            println!("{}", line);
        }
        lines.push(line);
    }

    /// Record a line verbatim.
    pub fn raw(&self, line: impl Into<String>) {
        let line = line.into();
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if self.echo {
            println!("{}", line);
        }
        lines.push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Index of the first line containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .position(|line| line.contains(needle))
    }
}
