//! Counting join for in-flight handler work

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Counting join: incremented once per unit of work, awaited until zero.
///
/// Each increment is represented by a [`Completion`] token. The group reaches
/// zero once every issued token has been signaled or dropped.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    /// Create an empty wait group
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one slot and return the token that releases it
    pub fn completion(&self) -> Completion {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        Completion {
            group: Some(self.inner.clone()),
        }
    }

    /// Reserve `n` slots at once
    pub fn add(&self, n: usize) -> Vec<Completion> {
        (0..n).map(|_| self.completion()).collect()
    }

    /// Number of tokens not yet signaled
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until every issued token has been signaled.
    ///
    /// Returns immediately when nothing is pending. There is no timeout: a
    /// token held forever blocks this call forever.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before reading the counter so a release that
            // lands in between still wakes us.
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Wait with an upper bound. Returns `false` if the bound elapsed first.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Completion signal for one unit of work in a [`WaitGroup`].
///
/// Signaling happens exactly once: either through [`Completion::done`] or
/// when the token is dropped.
#[derive(Debug)]
#[must_use = "dropping a completion token signals completion immediately"]
pub struct Completion {
    group: Option<Arc<Inner>>,
}

impl Completion {
    /// A token that belongs to no group.
    ///
    /// Useful for invoking a handler directly, outside a dispatcher.
    pub fn detached() -> Self {
        Self { group: None }
    }

    /// Signal completion
    pub fn done(mut self) {
        self.release();
    }

    /// Whether this token still holds a slot in a group
    pub fn is_pending(&self) -> bool {
        self.group.is_some()
    }

    fn release(&mut self) {
        if let Some(inner) = self.group.take() {
            if inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.notify.notify_waiters();
            }
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_wait_on_empty_group_returns() {
        let group = WaitGroup::new();
        group.wait().await;
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_done_and_drop_release_once() {
        let group = WaitGroup::new();
        let mut tokens = group.add(3);
        assert_eq!(group.pending(), 3);

        tokens.pop().unwrap().done();
        assert_eq!(group.pending(), 2);

        drop(tokens);
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_wait_after_tokens_settled_outside_runtime() {
        let group = WaitGroup::new();
        let first = group.completion();
        let second = group.completion();

        first.done();
        drop(second);

        tokio_test::block_on(group.wait());
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_detached_token() {
        let token = Completion::detached();
        assert!(!token.is_pending());
        token.done();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wait_blocks_until_all_signaled() {
        let group = WaitGroup::new();
        let finished = Arc::new(AtomicU32::new(0));

        for (i, token) in group.add(8).into_iter().enumerate() {
            let finished = finished.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5 * (8 - i as u64))).await;
                finished.fetch_add(1, Ordering::SeqCst);
                token.done();
            });
        }

        group.wait().await;
        assert_eq!(finished.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_wait_timeout_reports_hung_token() {
        let group = WaitGroup::new();
        let token = group.completion();

        assert!(!group.wait_timeout(Duration::from_millis(20)).await);

        drop(token);
        assert!(group.wait_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_token() {
        let group = WaitGroup::new();
        let token = group.completion();

        let task = tokio::spawn(async move {
            let _token = token;
            panic!("handler blew up");
        });

        assert!(task.await.unwrap_err().is_panic());
        group.wait().await;
    }
}
