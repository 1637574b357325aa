//! Worker 分群服务
//!
//! 把规则引擎的评估结果落地为分群成员关系。
//!
//! ## 核心功能
//!
//! - **分群定义**：静态分群与规则分群，规则写入前做语义校验
//! - **成员同步**：按批评估规则，增删规则成员，手动成员不受影响
//! - **增量调和**：worker 数据变化后只重新评估受影响的分群
//! - **规则试算**：对样本 worker 试算规则并解释命中原因
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储抽象与内存实现
//! - `service`: 业务服务层
//! - `lock`: 分群同步锁

pub mod error;
pub mod lock;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{Result, SegmentError};
pub use lock::{LockConfig, SegmentLockGuard, SegmentLockManager};
pub use models::*;
pub use repository::{InMemorySegmentStore, InMemoryWorkerReader, SegmentStore, WorkerReader};
pub use service::{
    RuleTestingService, SegmentDefinitionService, SegmentMembershipService, dto,
};
