//! Cooperative pause signal
//!
//! Workers check the token at file and line boundaries; nothing is ever killed
//! mid-write.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const NO_BUDGET: u64 = u64::MAX;

#[derive(Debug)]
struct Inner {
    requested: AtomicBool,
    line_budget: AtomicU64,
}

/// Shared pause request flag
#[derive(Debug, Clone)]
pub struct PauseToken {
    inner: Arc<Inner>,
}

impl PauseToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: AtomicBool::new(false),
                line_budget: AtomicU64::new(NO_BUDGET),
            }),
        }
    }

    /// Token that requests a pause by itself once `lines` source lines were read
    pub fn with_line_budget(lines: u64) -> Self {
        let token = Self::new();
        token.inner.line_budget.store(lines, Ordering::SeqCst);
        if lines == 0 {
            token.request();
        }
        token
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Account for one line read; trips the pause when the budget runs out
    pub fn note_line(&self) {
        let budget = &self.inner.line_budget;
        if budget.load(Ordering::Relaxed) == NO_BUDGET {
            return;
        }

        let previous = budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                NO_BUDGET | 0 => None,
                left => Some(left - 1),
            })
            .unwrap_or(0);
        if previous <= 1 {
            self.request();
        }
    }
}

impl Default for PauseToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_shared_between_clones() {
        let token = PauseToken::new();
        let clone = token.clone();
        assert!(!clone.is_requested());

        token.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn test_line_budget() {
        let token = PauseToken::with_line_budget(3);
        token.note_line();
        token.note_line();
        assert!(!token.is_requested());
        token.note_line();
        assert!(token.is_requested());
    }

    #[test]
    fn test_no_budget_never_trips() {
        let token = PauseToken::new();
        for _ in 0..10_000 {
            token.note_line();
        }
        assert!(!token.is_requested());
    }

    #[test]
    fn test_zero_budget_is_immediate() {
        assert!(PauseToken::with_line_budget(0).is_requested());
    }
}
