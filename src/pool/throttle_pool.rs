use crate::error::ScraperError;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Token bucket of fixed size. A token is held for as long as its permit lives.
pub struct ThrottlePool {
    available: Arc<Semaphore>,
    size: u32,
    drain_active: Mutex<()>,
}

impl ThrottlePool {
    pub fn new(size: usize) -> Result<Self, ScraperError> {
        if size == 0 {
            return Err(ScraperError::InvalidConfig(
                "client pool size cannot be smaller than 1".into(),
            ));
        }
        let size = u32::try_from(size)
            .map_err(|_| ScraperError::InvalidConfig(format!("client pool size {} too big", size)))?;
        Ok(Self {
            available: Arc::new(Semaphore::new(size as usize)),
            size,
            drain_active: Mutex::new(()),
        })
    }

    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, ScraperError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScraperError::Cancelled),
            permit = self.available.clone().acquire_owned() => {
                permit.map_err(|_| ScraperError::PoolClosed)
            }
        }
    }

    /// Wait until the entire pool is held by the caller.
    pub async fn drain(&self) -> Result<OwnedSemaphorePermit, ScraperError> {
        let _guard = self.drain_active.lock().await;
        self.available
            .clone()
            .acquire_many_owned(self.size)
            .await
            .map_err(|_| ScraperError::PoolClosed)
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn available(&self) -> usize {
        self.available.available_permits()
    }

    pub fn close(&self) {
        self.available.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            ThrottlePool::new(0),
            Err(ScraperError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_drain_waits_for_outstanding_tokens() {
        let pool = Arc::new(ThrottlePool::new(2).unwrap());
        let cancel = CancellationToken::new();
        let held = pool.acquire(&cancel).await.unwrap();

        let drainer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.drain().await.map(|p| p.num_permits()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!drainer.is_finished());

        drop(held);
        let drained = tokio::time::timeout(Duration::from_secs(1), drainer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(drained, 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_cancelled() {
        let pool = ThrottlePool::new(1).unwrap();
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();

        let waiter = CancellationToken::new();
        waiter.cancel();
        assert!(matches!(
            pool.acquire(&waiter).await,
            Err(ScraperError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_closed_pool() {
        let pool = ThrottlePool::new(1).unwrap();
        pool.close();
        assert!(matches!(
            pool.acquire(&CancellationToken::new()).await,
            Err(ScraperError::PoolClosed)
        ));
    }
}
