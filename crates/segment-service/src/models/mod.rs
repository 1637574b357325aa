//! 分群服务领域模型
//!
//! 包含 worker 记录、分群、成员关系和同步任务

pub mod segment;
pub mod sync_job;
pub mod worker;

// 重新导出常用类型
pub use segment::{Segment, SegmentMembership, SegmentType};
pub use sync_job::{SyncJob, SyncJobStatus};
pub use worker::{Worker, WorkerPage};
