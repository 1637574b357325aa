//! 内存仓储实现
//!
//! 使用 DashMap 实现的高并发内存存储，供 `segment-sync` 和测试使用。
//! 成员关系以 (segment_id, worker_id) 为键，重复插入被拒绝，
//! 与持久化存储的唯一约束保持一致。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::{Result, SegmentError};
use crate::models::{Segment, SegmentMembership, SyncJob, Worker, WorkerPage};
use crate::repository::traits::{SegmentStore, WorkerReader};

/// 内存 worker 数据源
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkerReader {
    workers: Arc<DashMap<String, Worker>>,
}

impl InMemoryWorkerReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(workers: impl IntoIterator<Item = Worker>) -> Self {
        let reader = Self::new();
        for worker in workers {
            reader.insert(worker);
        }
        reader
    }

    /// 插入或覆盖
    pub fn insert(&self, worker: Worker) {
        self.workers.insert(worker.id.clone(), worker);
    }

    pub fn remove(&self, worker_id: &str) -> Option<Worker> {
        self.workers.remove(worker_id).map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// 组织内的 worker，按 ID 排序保证分页稳定
    fn organization_workers(&self, organization_id: &str) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self
            .workers
            .iter()
            .filter(|entry| entry.value().organization_id == organization_id)
            .map(|entry| entry.value().clone())
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }
}

#[async_trait]
impl WorkerReader for InMemoryWorkerReader {
    async fn get_by_id(&self, worker_id: &str) -> Result<Option<Worker>> {
        Ok(self.workers.get(worker_id).map(|w| w.clone()))
    }

    async fn get_by_ids(&self, worker_ids: &[String]) -> Result<Vec<Worker>> {
        Ok(worker_ids
            .iter()
            .filter_map(|id| self.workers.get(id).map(|w| w.clone()))
            .collect())
    }

    async fn get_by_organization(
        &self,
        organization_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<WorkerPage> {
        let workers = self.organization_workers(organization_id);
        let total = workers.len();
        let page_size = page_size.max(1);
        let offset = page.saturating_sub(1) * page_size;

        let records = workers.into_iter().skip(offset).take(page_size).collect();
        Ok(WorkerPage { records, total })
    }

    async fn get_all(&self, organization_id: &str) -> Result<Vec<Worker>> {
        Ok(self.organization_workers(organization_id))
    }
}

/// 内存分群存储
#[derive(Debug, Clone, Default)]
pub struct InMemorySegmentStore {
    segments: Arc<DashMap<Uuid, Segment>>,
    memberships: Arc<DashMap<(Uuid, String), SegmentMembership>>,
    jobs: Arc<DashMap<Uuid, SyncJob>>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 成员关系总数
    pub fn membership_count(&self) -> usize {
        self.memberships.len()
    }
}

#[async_trait]
impl SegmentStore for InMemorySegmentStore {
    async fn get_segment(&self, segment_id: Uuid) -> Result<Option<Segment>> {
        Ok(self.segments.get(&segment_id).map(|s| s.clone()))
    }

    async fn list_segments(&self, organization_id: &str) -> Result<Vec<Segment>> {
        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .filter(|entry| entry.value().organization_id == organization_id)
            .map(|entry| entry.value().clone())
            .collect();
        segments.sort_by_key(|s| s.id);
        Ok(segments)
    }

    async fn save_segment(&self, segment: &Segment) -> Result<()> {
        self.segments.insert(segment.id, segment.clone());
        Ok(())
    }

    async fn delete_segment(&self, segment_id: Uuid) -> Result<bool> {
        let removed = self.segments.remove(&segment_id).is_some();
        if removed {
            self.memberships.retain(|(id, _), _| *id != segment_id);
        }
        Ok(removed)
    }

    async fn update_last_sync_at(&self, segment_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut segment = self
            .segments
            .get_mut(&segment_id)
            .ok_or(SegmentError::SegmentNotFound(segment_id))?;
        segment.last_sync_at = Some(at);
        segment.updated_at = at;
        Ok(())
    }

    async fn find_membership(
        &self,
        segment_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<SegmentMembership>> {
        Ok(self
            .memberships
            .get(&(segment_id, worker_id.to_string()))
            .map(|m| m.clone()))
    }

    async fn add_membership(&self, membership: &SegmentMembership) -> Result<()> {
        match self
            .memberships
            .entry((membership.segment_id, membership.worker_id.clone()))
        {
            Entry::Occupied(_) => Err(SegmentError::MembershipExists {
                segment_id: membership.segment_id,
                worker_id: membership.worker_id.clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(membership.clone());
                Ok(())
            }
        }
    }

    async fn update_membership(&self, membership: &SegmentMembership) -> Result<()> {
        self.memberships.insert(
            (membership.segment_id, membership.worker_id.clone()),
            membership.clone(),
        );
        Ok(())
    }

    async fn remove_membership(&self, segment_id: Uuid, worker_id: &str) -> Result<bool> {
        Ok(self
            .memberships
            .remove(&(segment_id, worker_id.to_string()))
            .is_some())
    }

    async fn list_membership_worker_ids(&self, segment_id: Uuid) -> Result<HashSet<String>> {
        Ok(self
            .memberships
            .iter()
            .filter(|entry| entry.key().0 == segment_id)
            .map(|entry| entry.key().1.clone())
            .collect())
    }

    async fn list_memberships(&self, segment_id: Uuid) -> Result<Vec<SegmentMembership>> {
        let mut memberships: Vec<SegmentMembership> = self
            .memberships
            .iter()
            .filter(|entry| entry.key().0 == segment_id)
            .map(|entry| entry.value().clone())
            .collect();
        memberships.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(memberships)
    }

    async fn list_worker_memberships(&self, worker_id: &str) -> Result<Vec<SegmentMembership>> {
        Ok(self
            .memberships
            .iter()
            .filter(|entry| entry.key().1 == worker_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create_sync_job(&self, job: &SyncJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_sync_job(&self, job: &SyncJob) -> Result<()> {
        let mut stored = self
            .jobs
            .get_mut(&job.id)
            .ok_or(SegmentError::SyncJobNotFound(job.id))?;
        *stored = job.clone();
        Ok(())
    }

    async fn get_sync_job(&self, job_id: Uuid) -> Result<Option<SyncJob>> {
        Ok(self.jobs.get(&job_id).map(|j| j.clone()))
    }

    async fn list_recent_sync_jobs(&self, segment_id: Uuid, limit: usize) -> Result<Vec<SyncJob>> {
        let mut jobs: Vec<SyncJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().segment_id == segment_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }
}
