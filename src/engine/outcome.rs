// src/engine/outcome.rs

//! First-wins resolution of a job's terminal outcome.
//!
//! A running job can be decided by a terminal protocol event, by its
//! deadline, by a stop request, or by the process exiting on its own. Those
//! signals race; [`OutcomeLatch`] records the first one and reports every
//! later one as [`Resolution::AlreadyResolved`].

use crate::errors::StopReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// `run_completed` was observed.
    Completed,
    /// `run_failed` was observed.
    Failed(String),
    /// The deadline elapsed first.
    TimedOut,
    /// A stop request arrived first.
    Cancelled(StopReason),
    /// The process exited before any of the above.
    Exited { success: bool, detail: String },
}

impl Terminal {
    /// Outcomes that leave a still-running process behind.
    pub fn requires_termination(&self) -> bool {
        matches!(self, Terminal::TimedOut | Terminal::Cancelled(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Resolution {
    /// This signal decided the outcome.
    Resolved,
    /// An earlier signal already did; this one is ignored.
    AlreadyResolved,
}

#[derive(Debug, Default)]
pub struct OutcomeLatch {
    terminal: Option<Terminal>,
}

impl OutcomeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, terminal: Terminal) -> Resolution {
        if self.terminal.is_some() {
            return Resolution::AlreadyResolved;
        }
        self.terminal = Some(terminal);
        Resolution::Resolved
    }

    pub fn is_pending(&self) -> bool {
        self.terminal.is_none()
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    pub fn into_terminal(self) -> Option<Terminal> {
        self.terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_wins() {
        let mut latch = OutcomeLatch::new();
        assert!(latch.is_pending());

        assert_eq!(latch.resolve(Terminal::TimedOut), Resolution::Resolved);
        assert_eq!(latch.resolve(Terminal::Completed), Resolution::AlreadyResolved);
        assert_eq!(
            latch.resolve(Terminal::Cancelled(StopReason::Cancelled)),
            Resolution::AlreadyResolved
        );

        assert_eq!(latch.into_terminal(), Some(Terminal::TimedOut));
    }

    #[test]
    fn completion_before_cancel_is_kept() {
        let mut latch = OutcomeLatch::new();
        let _ = latch.resolve(Terminal::Completed);
        let late = latch.resolve(Terminal::Cancelled(StopReason::Cancelled));
        assert_eq!(late, Resolution::AlreadyResolved);
        assert_eq!(latch.terminal(), Some(&Terminal::Completed));
        assert!(!Terminal::Completed.requires_termination());
        assert!(Terminal::TimedOut.requires_termination());
    }
}
