//! Cooperative, hierarchical cancellation (`spec.md §5`, §9 design note
//! "Replace exception-based cancellation").
//!
//! A [`CancellationToken`] is cheap to clone and check; cancelling a parent
//! cancels every token derived from it via [`CancellationToken::child_token`].
//! There is no exception-based cancellation anywhere in this workspace —
//! every suspension point calls [`CancellationToken::check`] and propagates
//! [`crate::error::CaseGraphError::Canceled`] explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::CaseGraphError;

struct Shared {
    cancelled: AtomicBool,
    children: Mutex<Vec<Weak<Shared>>>,
}

/// A cooperative cancellation signal, cloneable and safe to hold across
/// `.await` points.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// Create a new, unlinked, not-yet-cancelled token.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a child token. Cancelling `self` (now or later) also cancels
    /// every child; cancelling a child has no effect on `self` or siblings.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        if self.is_cancelled() {
            child.cancel();
        } else {
            self.shared
                .children
                .lock()
                .expect("cancellation token mutex poisoned")
                .push(Arc::downgrade(&child.shared));
        }
        child
    }

    /// Request cancellation of this token and every descendant.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        let children = std::mem::take(
            &mut *self
                .shared
                .children
                .lock()
                .expect("cancellation token mutex poisoned"),
        );
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    /// `true` if [`CancellationToken::cancel`] has been called on this
    /// token or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Convenience for a suspension point: returns
    /// [`CaseGraphError::Canceled`] if cancellation has been requested.
    pub fn check(&self) -> Result<(), CaseGraphError> {
        if self.is_cancelled() {
            Err(CaseGraphError::Canceled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelling_parent_cancels_existing_child() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn child_token_of_already_cancelled_parent_is_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        let child = parent.child_token();
        assert!(child.is_cancelled());
    }
}
