use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One-shot signal raised once the database is migrated and usable
#[derive(Debug, Clone, Default)]
pub(crate) struct StorageReady {
    ready: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StorageReady {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Wait until [`Self::mark_ready`] has been called. Returns at once if it already was.
    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_waiters_released_when_marked_ready() {
        let ready = StorageReady::new();
        let waiter = tokio::spawn({
            let ready = ready.clone();
            async move { ready.wait().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ready.mark_ready();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();

        // late waiters do not block
        timeout(Duration::from_millis(50), ready.wait()).await.unwrap();
    }
}
