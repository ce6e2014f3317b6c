use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::error::Result;

const SUBHEADER_WIDTH: usize = 80;

#[derive(Default)]
struct Inner {
    lines: Vec<String>,
    suppressed: u32,
}

/// Per-attempt log sink. One collector is created for each matrix entry and
/// handed down through the backend, the remote session and the command
/// executor; after the attempt it is saved as that target's log file.
///
/// Cloning yields another handle onto the same buffer (execution is
/// single-threaded, so a shared `Rc` handle is all that's needed).
#[derive(Clone, Default)]
pub struct LogCollector {
    inner: Rc<RefCell<Inner>>,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message. Dropped while a suppression guard is alive.
    pub fn log(&self, msg: impl Into<String>) {
        let mut inner = self.inner.borrow_mut();
        if inner.suppressed > 0 {
            return;
        }
        inner.lines.push(msg.into());
    }

    /// Record the command half of a command/response pair.
    pub fn log_command(&self, command: &str) {
        let lines: Vec<&str> = command.lines().filter(|l| !l.is_empty()).collect();
        match lines.as_slice() {
            [] => {}
            [single] => self.log(subheader(&format!("COMMAND: {single}"))),
            many => {
                self.log(subheader("COMMAND"));
                for line in many {
                    self.log(format!("COMMAND{line}"));
                }
            }
        }
    }

    /// Record the response half: captured output plus a trailing blank line.
    pub fn log_output(&self, output: &str) {
        let mut wrote = false;
        for line in output.lines() {
            if !line.is_empty() {
                self.log(line);
                wrote = true;
            }
        }
        if wrote {
            self.log("");
        }
    }

    /// Suppress logging until the returned guard is dropped. Guards nest;
    /// the previous state is restored on every exit path.
    pub fn suppress(&self) -> SuppressGuard {
        self.inner.borrow_mut().suppressed += 1;
        SuppressGuard {
            collector: self.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().lines.is_empty()
    }

    pub fn contents(&self) -> String {
        self.inner.borrow().lines.join("\n")
    }

    /// Case-insensitive search over everything collected so far.
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.inner
            .borrow()
            .lines
            .iter()
            .any(|line| line.to_lowercase().contains(&needle))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.contents())?;
        Ok(())
    }
}

pub struct SuppressGuard {
    collector: LogCollector,
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        let mut inner = self.collector.inner.borrow_mut();
        inner.suppressed = inner.suppressed.saturating_sub(1);
    }
}

fn subheader(title: &str) -> String {
    let rule = "-".repeat(SUBHEADER_WIDTH);
    format!("{rule}\n{title}\n{rule}")
}
