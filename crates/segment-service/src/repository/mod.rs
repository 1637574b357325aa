//! 仓储层
//!
//! 定义 worker 数据源和分群存储的抽象接口，并提供内存实现。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据存取，不包含业务逻辑
//! - 成员关系 (segment_id, worker_id) 唯一，重复插入返回 `MembershipExists`
//! - 定义 trait 接口以支持 mock 测试

mod memory;
mod traits;

pub use memory::{InMemorySegmentStore, InMemoryWorkerReader};
pub use traits::*;
