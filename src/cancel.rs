//! Cooperative cancellation scopes
//!
//! A [`CancelScope`] forms a tree: the engine owns the root and each
//! partition worker gets a child. Cancelling a parent cancels every
//! descendant; cancelling a child affects only that subtree. Cancellation is
//! cooperative, not instantaneous: tasks observe it at their next suspension
//! point and may perform a bounded drain before terminating.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// A node in the cancellation tree.
///
/// Clones share the same node; use [`CancelScope::child`] for a new subtree.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

impl CancelScope {
    /// Create a root scope
    pub fn root() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a child scope.
    ///
    /// The child starts cancelled if this scope already is.
    pub fn child(&self) -> Self {
        let child = Self::root();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        let mut children = self.inner.children.lock();
        // drop children that have already been released
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        drop(children);
        // the parent may have been cancelled between the check and the insert
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Cancel this scope and every descendant. Idempotent.
    pub fn cancel(&self) {
        ScopeInner::cancel(&self.inner);
    }

    /// Whether this scope (or an ancestor) has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Complete once this scope is cancelled
    pub async fn cancelled(&self) {
        loop {
            // register interest before checking the flag to avoid a lost wakeup
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl ScopeInner {
    fn cancel(this: &Arc<ScopeInner>) {
        if this.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        this.notify.notify_waiters();
        let children = std::mem::take(&mut *this.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                Self::cancel(&child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_root_starts_live() {
        let scope = CancelScope::root();
        assert!(!scope.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let scope = CancelScope::root();
        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_parent_cancel_cascades() {
        let root = CancelScope::root();
        let a = root.child();
        let b = root.child();
        let grandchild = a.child();

        root.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_cancel_is_isolated() {
        let root = CancelScope::root();
        let a = root.child();
        let b = root.child();

        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let root = CancelScope::root();
        root.cancel();
        let child = root.child();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let scope = CancelScope::root();
        let waiter = scope.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_if_already_cancelled() {
        let scope = CancelScope::root();
        scope.cancel();
        tokio::time::timeout(Duration::from_millis(100), scope.cancelled())
            .await
            .unwrap();
    }
}
