//! 同步锁模块
//!
//! 同一分群的同步任务通过进程内的按键互斥锁串行执行。
//!
//! ## 使用示例
//!
//! ```ignore
//! let locks = SegmentLockManager::new(LockConfig::default());
//!
//! // 获取锁，超时返回 SyncInProgress
//! let _guard = locks.acquire(segment_id).await?;
//!
//! // 执行同步，guard drop 时释放
//! run_sync().await?;
//! ```

mod lock_manager;

pub use lock_manager::{LockConfig, SegmentLockGuard, SegmentLockManager};
