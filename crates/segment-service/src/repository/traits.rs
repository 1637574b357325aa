//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Segment, SegmentMembership, SyncJob, Worker, WorkerPage};

/// worker 只读数据源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerReader: Send + Sync {
    async fn get_by_id(&self, worker_id: &str) -> Result<Option<Worker>>;

    /// 批量按 ID 查询，不存在的 ID 被忽略
    async fn get_by_ids(&self, worker_ids: &[String]) -> Result<Vec<Worker>>;

    /// 分页查询，`page` 从 1 开始
    async fn get_by_organization(
        &self,
        organization_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<WorkerPage>;

    async fn get_all(&self, organization_id: &str) -> Result<Vec<Worker>>;
}

/// 分群、成员关系和同步任务存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentStore: Send + Sync {
    // 分群
    async fn get_segment(&self, segment_id: Uuid) -> Result<Option<Segment>>;
    async fn list_segments(&self, organization_id: &str) -> Result<Vec<Segment>>;
    async fn save_segment(&self, segment: &Segment) -> Result<()>;
    async fn delete_segment(&self, segment_id: Uuid) -> Result<bool>;
    async fn update_last_sync_at(&self, segment_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // 成员关系
    async fn find_membership(
        &self,
        segment_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<SegmentMembership>>;
    /// 新增成员关系，(segment_id, worker_id) 已存在时返回 `MembershipExists`
    async fn add_membership(&self, membership: &SegmentMembership) -> Result<()>;
    async fn update_membership(&self, membership: &SegmentMembership) -> Result<()>;
    async fn remove_membership(&self, segment_id: Uuid, worker_id: &str) -> Result<bool>;
    async fn list_membership_worker_ids(&self, segment_id: Uuid) -> Result<HashSet<String>>;
    async fn list_memberships(&self, segment_id: Uuid) -> Result<Vec<SegmentMembership>>;
    async fn list_worker_memberships(&self, worker_id: &str) -> Result<Vec<SegmentMembership>>;

    // 同步任务
    async fn create_sync_job(&self, job: &SyncJob) -> Result<()>;
    async fn update_sync_job(&self, job: &SyncJob) -> Result<()>;
    async fn get_sync_job(&self, job_id: Uuid) -> Result<Option<SyncJob>>;
    /// 按创建时间倒序
    async fn list_recent_sync_jobs(&self, segment_id: Uuid, limit: usize) -> Result<Vec<SyncJob>>;
}
