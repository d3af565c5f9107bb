//! 资源池 - 基础设施层
//!
//! 固定容量的"可再生"资源池（每个资源是一个浏览器实例）：
//! - 每个资源记录成功使用次数，达到上限后销毁重建
//! - 致命错误后立即销毁重建
//! - 重建失败时槽位留空，下次借出时再创建，容量不会缩水
//! - 借出的资源在任何退出路径上都会归还槽位

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::error::PoolError;

/// 资源的创建与销毁
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource, PoolError>;

    async fn destroy(&self, resource: Self::Resource);
}

/// 归还资源时说明这次使用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 成功使用一次，计数 +1
    Success,
    /// 普通失败，资源可继续使用，不计数
    Failure,
    /// 资源已损坏，立即销毁重建
    Fatal,
}

struct Slot<R> {
    resource: Option<R>,
    uses: u32,
}

impl<R> Slot<R> {
    fn empty() -> Self {
        Self {
            resource: None,
            uses: 0,
        }
    }
}

struct PoolInner<F: ResourceFactory> {
    factory: F,
    idle: Mutex<Vec<Slot<F::Resource>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    max_uses: u32,
    closed: AtomicBool,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl<F: ResourceFactory> PoolInner<F> {
    fn idle(&self) -> MutexGuard<'_, Vec<Slot<F::Resource>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn create(&self) -> Result<F::Resource, PoolError> {
        let resource = self.factory.create().await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }

    async fn destroy(&self, resource: F::Resource) {
        self.factory.destroy(resource).await;
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 资源池
pub struct ResourcePool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// 创建资源池，所有槽位都是空的，首次借出时才创建资源
    pub fn new(factory: F, capacity: usize, max_uses: u32) -> Self {
        let capacity = capacity.max(1);
        let idle = (0..capacity).map(|_| Slot::empty()).collect();
        Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                max_uses: max_uses.max(1),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
            }),
        }
    }

    /// 预先创建所有资源，失败的槽位保持为空
    pub async fn warm_up(&self) -> usize {
        let mut ready = 0;
        let mut leases = Vec::with_capacity(self.inner.capacity);
        for _ in 0..self.inner.capacity {
            match self.acquire(Duration::from_secs(0)).await {
                Ok(lease) => {
                    ready += 1;
                    leases.push(lease);
                }
                Err(e) => warn!("预热资源失败: {}", e),
            }
        }
        for lease in leases {
            self.release(lease, ReleaseOutcome::Failure).await;
        }
        info!("✓ 资源池已就绪: {}/{}", ready, self.inner.capacity);
        ready
    }

    /// 借出一个资源，最多等待 `wait`
    pub async fn acquire(&self, wait: Duration) -> Result<Lease<F>, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let permit = if wait.is_zero() {
            self.inner
                .permits
                .clone()
                .try_acquire_owned()
                .map_err(|e| match e {
                    tokio::sync::TryAcquireError::Closed => PoolError::Closed,
                    tokio::sync::TryAcquireError::NoPermits => {
                        PoolError::AcquireTimeout { waited_secs: 0 }
                    }
                })?
        } else {
            match tokio::time::timeout(wait, self.inner.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    return Err(PoolError::AcquireTimeout {
                        waited_secs: wait.as_secs(),
                    })
                }
            }
        };

        // 许可数与空闲槽位数一致，拿到许可就一定有槽位
        let mut slot = self.inner.idle().pop().unwrap_or_else(Slot::empty);

        if slot.resource.is_none() {
            match self.inner.create().await {
                Ok(resource) => {
                    slot.resource = Some(resource);
                    slot.uses = 0;
                }
                Err(e) => {
                    self.inner.idle().push(Slot::empty());
                    drop(permit);
                    return Err(e);
                }
            }
        }

        Ok(Lease {
            slot: Some(slot),
            permit: Some(permit),
            inner: self.inner.clone(),
        })
    }

    /// 归还资源
    ///
    /// 达到使用上限或遇到致命错误时，先销毁再尝试重建；重建失败则留空槽位。
    pub async fn release(&self, mut lease: Lease<F>, outcome: ReleaseOutcome) {
        let Some(mut slot) = lease.slot.take() else {
            return;
        };
        let permit = lease.permit.take();

        if outcome == ReleaseOutcome::Success {
            slot.uses += 1;
        }

        let worn_out = slot.uses >= self.inner.max_uses;
        if outcome == ReleaseOutcome::Fatal || worn_out {
            if let Some(resource) = slot.resource.take() {
                debug!(
                    "♻️ 销毁资源 (已使用 {} 次, 致命错误: {})",
                    slot.uses,
                    outcome == ReleaseOutcome::Fatal
                );
                self.inner.destroy(resource).await;
            }
            slot.uses = 0;

            if !self.inner.closed.load(Ordering::SeqCst) {
                match self.inner.create().await {
                    Ok(resource) => slot.resource = Some(resource),
                    Err(e) => warn!("重建资源失败，下次借出时再试: {}", e),
                }
            }
        }

        self.inner.idle().push(slot);
        drop(permit);
    }

    /// 关闭资源池：等待所有借出的资源归还，然后全部销毁
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let all = u32::try_from(self.inner.capacity).unwrap_or(u32::MAX);
        let permits = self.inner.permits.clone().acquire_many_owned(all).await;

        let slots: Vec<_> = self.inner.idle().drain(..).collect();
        let mut destroyed = 0;
        for slot in slots {
            if let Some(resource) = slot.resource {
                self.inner.destroy(resource).await;
                destroyed += 1;
            }
        }
        self.inner.permits.close();
        drop(permits);
        info!("🔒 资源池已关闭，销毁 {} 个资源", destroyed);
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// 当前空闲槽位数（含空槽位）
    pub fn idle_slots(&self) -> usize {
        self.inner.idle().len()
    }

    /// 累计创建的资源数
    pub fn created(&self) -> u64 {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// 累计销毁的资源数
    pub fn destroyed(&self) -> u64 {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// 借出的资源
///
/// 应该通过 `ResourcePool::release` 归还；直接 drop 时资源被丢弃，槽位照常归还。
pub struct Lease<F: ResourceFactory> {
    slot: Option<Slot<F::Resource>>,
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Lease<F> {
    pub fn resource(&self) -> &F::Resource {
        match self.slot.as_ref().and_then(|s| s.resource.as_ref()) {
            Some(resource) => resource,
            // 借出时一定已经填充，release 后 Lease 被消耗
            None => unreachable!("lease without resource"),
        }
    }

    /// 该资源已成功使用的次数
    pub fn uses(&self) -> u32 {
        self.slot.as_ref().map(|s| s.uses).unwrap_or(0)
    }
}

impl<F: ResourceFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };

        if let Some(resource) = slot.resource.take() {
            warn!("资源未正常归还，已丢弃");
            let inner = self.inner.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        inner.destroy(resource).await;
                    });
                }
                Err(_) => drop(resource),
            }
        }

        slot.uses = 0;
        self.inner.idle().push(slot);
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingFactory {
        next_id: AtomicU32,
        fail_creates: AtomicU32,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                next_id: AtomicU32::new(1),
                fail_creates: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ResourceFactory for CountingFactory {
        type Resource = u32;

        async fn create(&self) -> Result<u32, PoolError> {
            if self.fail_creates.load(Ordering::SeqCst) > 0 {
                self.fail_creates.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolError::CreateFailed("模拟失败".into()));
            }
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn destroy(&self, _resource: u32) {}
    }

    const WAIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_resource_is_reused_until_max_uses() {
        let pool = ResourcePool::new(CountingFactory::new(), 1, 3);

        for _ in 0..3 {
            let lease = pool.acquire(WAIT).await.unwrap();
            assert_eq!(*lease.resource(), 1);
            pool.release(lease, ReleaseOutcome::Success).await;
        }

        // 第 3 次成功后已被重建
        let lease = pool.acquire(WAIT).await.unwrap();
        assert_eq!(*lease.resource(), 2);
        assert_eq!(lease.uses(), 0);
        pool.release(lease, ReleaseOutcome::Success).await;

        assert_eq!(pool.destroyed(), 1);
        assert_eq!(pool.idle_slots(), 1);
    }

    #[tokio::test]
    async fn test_fatal_release_regenerates() {
        let pool = ResourcePool::new(CountingFactory::new(), 2, 50);

        let lease = pool.acquire(WAIT).await.unwrap();
        let first = *lease.resource();
        pool.release(lease, ReleaseOutcome::Fatal).await;

        let lease = pool.acquire(WAIT).await.unwrap();
        assert_ne!(*lease.resource(), first);
        pool.release(lease, ReleaseOutcome::Failure).await;
        assert_eq!(pool.idle_slots(), 2);
    }

    #[tokio::test]
    async fn test_failed_creation_keeps_capacity() {
        let factory = CountingFactory::new();
        factory.fail_creates.store(1, Ordering::SeqCst);
        let pool = ResourcePool::new(factory, 1, 50);

        assert!(matches!(
            pool.acquire(WAIT).await,
            Err(PoolError::CreateFailed(_))
        ));
        assert_eq!(pool.idle_slots(), 1);

        // 下一次借出时重新创建
        let lease = pool.acquire(WAIT).await.unwrap();
        pool.release(lease, ReleaseOutcome::Success).await;
        assert_eq!(pool.capacity(), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = ResourcePool::new(CountingFactory::new(), 1, 50);
        let held = pool.acquire(WAIT).await.unwrap();

        assert!(matches!(
            pool.acquire(Duration::from_millis(20)).await,
            Err(PoolError::AcquireTimeout { .. })
        ));
        pool.release(held, ReleaseOutcome::Success).await;
        assert!(pool.acquire(WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_lease_returns_slot() {
        let pool = ResourcePool::new(CountingFactory::new(), 1, 50);
        {
            let _lease = pool.acquire(WAIT).await.unwrap();
            assert_eq!(pool.idle_slots(), 0);
        }
        assert_eq!(pool.idle_slots(), 1);
        let lease = pool.acquire(WAIT).await.unwrap();
        assert_eq!(*lease.resource(), 2);
        pool.release(lease, ReleaseOutcome::Success).await;
    }

    #[tokio::test]
    async fn test_close_waits_for_leases_and_rejects_new_acquires() {
        let pool = ResourcePool::new(CountingFactory::new(), 2, 50);
        let lease = pool.acquire(WAIT).await.unwrap();

        let closer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closer.is_finished());

        pool.release(lease, ReleaseOutcome::Success).await;
        closer.await.unwrap();

        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(WAIT).await, Err(PoolError::Closed)));
        assert_eq!(pool.created(), pool.destroyed());
    }
}
