//! Forward-progress tracking for stuck detection.

use crate::error::{EngineError, EngineResult};

/// Remembers the last cycle anything moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMonitor {
    last_progress: u64,
    max_wait: u64,
}

impl ProgressMonitor {
    pub fn new(max_wait: u64) -> Self {
        Self { last_progress: 0, max_wait }
    }

    #[inline]
    pub fn bump(&mut self, cycle: u64) {
        self.last_progress = self.last_progress.max(cycle);
    }

    #[inline]
    pub fn last_progress(&self) -> u64 {
        self.last_progress
    }

    pub fn max_wait(&self) -> u64 {
        self.max_wait
    }

    /// Cycles since the last progress.
    pub fn waited(&self, cycle: u64) -> u64 {
        cycle.saturating_sub(self.last_progress)
    }

    /// Error when `busy` and nothing moved for more than `max_wait` cycles.
    pub fn check(&self, cycle: u64, busy: bool) -> EngineResult<()> {
        let waited = self.waited(cycle);
        if busy && waited > self.max_wait {
            return Err(EngineError::Stuck {
                waited,
                last_progress: self.last_progress,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stuck_after_threshold() {
        let mut monitor = ProgressMonitor::new(10);
        monitor.bump(5);
        assert!(monitor.check(15, true).is_ok());
        assert_eq!(
            monitor.check(16, true),
            Err(EngineError::Stuck { waited: 11, last_progress: 5 })
        );
        // Idle engines are never stuck.
        assert!(monitor.check(1000, false).is_ok());
    }

    #[test]
    fn test_bump_is_monotonic() {
        let mut monitor = ProgressMonitor::new(1);
        monitor.bump(8);
        monitor.bump(3);
        assert_eq!(monitor.last_progress(), 8);
    }
}
