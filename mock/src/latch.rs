use std::time::Duration;
use tokio::sync::watch;

/// Single-use countdown. Waiters are released once the count reaches zero.
#[derive(Debug)]
pub struct CountDownLatch {
    count: watch::Sender<usize>,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: watch::Sender::new(count),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn count_down(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }

    /// Releases every waiter regardless of the remaining count.
    pub fn drain(&self) {
        self.count.send_replace(0);
    }

    pub fn is_released(&self) -> bool {
        self.count() == 0
    }

    /// Waits up to `timeout` for the count to reach zero; `true` when it did.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut receiver = self.count.subscribe();
        matches!(
            tokio::time::timeout(timeout, receiver.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        )
    }
}
