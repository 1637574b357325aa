//! 分群同步锁管理器
//!
//! 进程内按分群 ID 加锁，保证同一分群的同步串行执行。
//! 没有持有者也没有等待者的条目在释放时移除，锁表大小只取决于正在同步的分群数。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use segment_shared::config::SyncConfig;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SegmentError};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 等待获取锁的最长时间
    pub acquire_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&SyncConfig> for LockConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            acquire_timeout: Duration::from_millis(config.lock_timeout_ms),
        }
    }
}

type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

/// 只剩锁表自己引用时移除条目
///
/// `entry` 与 `remove_if` 持有同一分片的写锁，新的获取者要么已经拿到克隆，要么会新建条目。
fn prune(locks: &LockTable, segment_id: Uuid) {
    locks.remove_if(&segment_id, |_, lock| Arc::strong_count(lock) == 1);
}

/// 分群同步锁管理器
#[derive(Debug, Default)]
pub struct SegmentLockManager {
    locks: Arc<LockTable>,
    config: LockConfig,
}

impl SegmentLockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            config,
        }
    }

    fn lock_for(&self, segment_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(segment_id).or_default().clone()
    }

    fn guard(&self, segment_id: Uuid, guard: OwnedMutexGuard<()>) -> SegmentLockGuard {
        SegmentLockGuard {
            segment_id,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// 获取锁
    ///
    /// 在 `acquire_timeout` 内拿不到锁时返回 `SyncInProgress`。
    #[instrument(skip(self))]
    pub async fn acquire(&self, segment_id: Uuid) -> Result<SegmentLockGuard> {
        let lock = self.lock_for(segment_id);
        // 先落地结果，超时后等待中的 future 连同它持有的 Arc 一起释放
        let acquired = tokio::time::timeout(self.config.acquire_timeout, lock.lock_owned()).await;

        match acquired {
            Ok(guard) => {
                debug!(%segment_id, "Segment lock acquired");
                Ok(self.guard(segment_id, guard))
            }
            Err(_) => {
                prune(&self.locks, segment_id);
                warn!(
                    %segment_id,
                    timeout_ms = self.config.acquire_timeout.as_millis() as u64,
                    "Segment lock not acquired, sync in progress"
                );
                Err(SegmentError::SyncInProgress(segment_id))
            }
        }
    }

    /// 尝试获取锁，不等待
    pub fn try_acquire(&self, segment_id: Uuid) -> Option<SegmentLockGuard> {
        match self.lock_for(segment_id).try_lock_owned() {
            Ok(guard) => Some(self.guard(segment_id, guard)),
            Err(_) => {
                prune(&self.locks, segment_id);
                None
            }
        }
    }

    /// 分群当前是否被锁定
    pub fn is_locked(&self, segment_id: Uuid) -> bool {
        self.locks
            .get(&segment_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// 锁表中的条目数（持有中或有人等待的分群）
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}

/// 锁守卫，drop 时释放
#[derive(Debug)]
pub struct SegmentLockGuard {
    segment_id: Uuid,
    locks: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SegmentLockGuard {
    pub fn segment_id(&self) -> Uuid {
        self.segment_id
    }
}

impl Drop for SegmentLockGuard {
    fn drop(&mut self) {
        // 先释放互斥锁，守卫持有的 Arc 随之减少
        drop(self.guard.take());
        prune(&self.locks, self.segment_id);
        debug!(segment_id = %self.segment_id, "Segment lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(timeout_ms: u64) -> SegmentLockManager {
        SegmentLockManager::new(LockConfig {
            acquire_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let locks = manager(50);
        let segment_id = Uuid::now_v7();

        let guard = locks.acquire(segment_id).await.unwrap();
        assert_eq!(guard.segment_id(), segment_id);
        assert!(locks.is_locked(segment_id));

        drop(guard);
        assert!(!locks.is_locked(segment_id));
        assert!(locks.acquire(segment_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_returns_sync_in_progress() {
        let locks = manager(20);
        let segment_id = Uuid::now_v7();

        let _held = locks.acquire(segment_id).await.unwrap();
        let err = locks.acquire(segment_id).await.unwrap_err();

        assert!(matches!(err, SegmentError::SyncInProgress(id) if id == segment_id));
        assert!(locks.try_acquire(segment_id).is_none());
    }

    #[tokio::test]
    async fn test_locks_are_per_segment() {
        let locks = manager(20);

        let _a = locks.acquire(Uuid::now_v7()).await.unwrap();
        assert!(locks.acquire(Uuid::now_v7()).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(manager(1000));
        let segment_id = Uuid::now_v7();

        let held = locks.acquire(segment_id).await.unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(segment_id).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = manager(20);
        let segments: Vec<Uuid> = (0..5).map(|_| Uuid::now_v7()).collect();

        for segment_id in &segments {
            let guard = locks.acquire(*segment_id).await.unwrap();
            assert_eq!(locks.active_locks(), 1);
            drop(guard);
        }
        assert_eq!(locks.active_locks(), 0);

        let held = locks.acquire(segments[0]).await.unwrap();
        assert!(locks.try_acquire(segments[0]).is_none());
        assert!(locks.acquire(segments[0]).await.is_err());
        assert_eq!(locks.active_locks(), 1);

        drop(held);
        assert_eq!(locks.active_locks(), 0);
        assert!(!locks.is_locked(segments[0]));
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_pending() {
        let locks = Arc::new(manager(1000));
        let segment_id = Uuid::now_v7();

        let held = locks.acquire(segment_id).await.unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let guard = locks.acquire(segment_id).await?;
                let active = locks.active_locks();
                drop(guard);
                Ok::<_, SegmentError>(active)
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        // 等待者拿到的是同一把锁，条目在交接期间没有被移除
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        assert_eq!(locks.active_locks(), 0);
    }

    #[test]
    fn test_config_from_sync_config() {
        let sync = SyncConfig {
            lock_timeout_ms: 1500,
            ..SyncConfig::default()
        };

        assert_eq!(
            LockConfig::from(&sync).acquire_timeout,
            Duration::from_millis(1500)
        );
    }
}
