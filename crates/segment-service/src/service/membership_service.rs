//! 分群成员同步服务
//!
//! 负责把规则评估结果调和到持久化的成员关系上，包括：
//! - 整个分群的批量同步（同步任务状态机、按批持久化进度）
//! - 单个 worker 数据变化后的成员关系调和
//! - 手动成员管理
//!
//! ## 同步流程
//!
//! 1. 获取分群锁 -> 2. 校验规则分群 -> 3. 创建任务并进入 processing
//!    -> 4. 解析候选 worker、加载现有成员 -> 5. 逐批评估并写入增删
//!    -> 6. 每批后持久化进度 -> 7. completed（更新 last_sync_at）或 failed
//!
//! 手动成员（`rule_match = false`）永远不会被同步移除。
//! 失败不回滚：已完成批次的写入保留。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rule_engine::{RuleEngine, SegmentRule};
use segment_shared::config::SyncConfig;
use segment_shared::observability::metrics::{record_membership_changes, record_sync_job};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SegmentError};
use crate::lock::{LockConfig, SegmentLockManager};
use crate::models::{Segment, SegmentMembership, SyncJob, Worker};
use crate::repository::{SegmentStore, WorkerReader};
use crate::service::dto::{ReconcileResult, SyncOptions, SyncResult};

/// 同步过程中的累计计数
#[derive(Debug, Default)]
struct SyncTally {
    processed: u64,
    matched: u64,
    added: u64,
    removed: u64,
}

/// 分群成员同步服务
pub struct SegmentMembershipService<W, S>
where
    W: WorkerReader,
    S: SegmentStore,
{
    workers: Arc<W>,
    store: Arc<S>,
    engine: Arc<RuleEngine>,
    locks: SegmentLockManager,
    config: SyncConfig,
}

impl<W, S> SegmentMembershipService<W, S>
where
    W: WorkerReader,
    S: SegmentStore,
{
    pub fn new(workers: Arc<W>, store: Arc<S>, engine: Arc<RuleEngine>, config: SyncConfig) -> Self {
        Self {
            workers,
            store,
            engine,
            locks: SegmentLockManager::new(LockConfig::from(&config)),
            config,
        }
    }

    // ==================== 分群同步 ====================

    /// 同步分群成员
    ///
    /// 同一分群的并发同步串行执行，等待超过 `lock_timeout_ms` 返回 `SyncInProgress`。
    #[instrument(skip(self, options), fields(full_sync = options.full_sync))]
    pub async fn synchronize_segment(&self, segment_id: Uuid, options: SyncOptions) -> Result<SyncResult> {
        let _guard = self.locks.acquire(segment_id).await?;

        let segment = self
            .store
            .get_segment(segment_id)
            .await?
            .ok_or(SegmentError::SegmentNotFound(segment_id))?;
        let rule = segment.active_rule().cloned().ok_or_else(|| {
            SegmentError::InvalidSegmentType(format!("分群 {} 不是带规则的规则分群", segment_id))
        })?;

        let started = Instant::now();
        let mut job = SyncJob::new(segment_id);
        self.store.create_sync_job(&job).await?;
        job.start()?;
        self.store.update_sync_job(&job).await?;

        info!(%segment_id, job_id = %job.id, "开始同步分群成员");

        let mut tally = SyncTally::default();
        let outcome = self
            .run_sync(&segment, &rule, &mut job, &options, &mut tally)
            .await;
        let elapsed = started.elapsed().as_secs_f64();
        record_membership_changes("sync", tally.added, tally.removed);

        match outcome {
            Ok(()) => {
                job.complete()?;
                self.store.update_sync_job(&job).await?;
                self.store
                    .update_last_sync_at(segment_id, job.completed_at.unwrap_or_else(Utc::now))
                    .await?;
                record_sync_job("completed", elapsed);

                info!(
                    %segment_id,
                    job_id = %job.id,
                    processed = tally.processed,
                    matched = tally.matched,
                    added = tally.added,
                    removed = tally.removed,
                    "分群同步完成"
                );

                Ok(SyncResult {
                    sync_job_id: job.id,
                    processed: tally.processed,
                    matched: tally.matched,
                    added: tally.added,
                    removed: tally.removed,
                })
            }
            Err(e) => {
                let cancelled = matches!(e, SegmentError::SyncCancelled(_));
                let message = if cancelled {
                    "cancelled".to_string()
                } else {
                    e.to_string()
                };

                job.fail(message.clone())?;
                if let Err(update_err) = self.store.update_sync_job(&job).await {
                    error!(job_id = %job.id, error = %update_err, "同步任务失败状态写入失败");
                }
                record_sync_job("failed", elapsed);

                warn!(
                    %segment_id,
                    job_id = %job.id,
                    processed = tally.processed,
                    error = %message,
                    "分群同步失败"
                );

                Err(if cancelled {
                    SegmentError::SyncCancelled(job.id)
                } else {
                    SegmentError::SyncFailed {
                        job_id: job.id,
                        message,
                    }
                })
            }
        }
    }

    async fn run_sync(
        &self,
        segment: &Segment,
        rule: &SegmentRule,
        job: &mut SyncJob,
        options: &SyncOptions,
        tally: &mut SyncTally,
    ) -> Result<()> {
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);
        let candidates = self.resolve_candidates(segment, options).await?;

        // worker_id -> 是否规则成员
        let mut current: HashMap<String, bool> = self
            .store
            .list_memberships(segment.id)
            .await?
            .into_iter()
            .map(|m| (m.worker_id, m.rule_match))
            .collect();

        debug!(
            candidates = candidates.len(),
            current_members = current.len(),
            batch_size,
            "同步候选已解析"
        );

        for batch in candidates.chunks(batch_size) {
            if options.is_cancelled() {
                return Err(SegmentError::SyncCancelled(job.id));
            }

            let evaluation = self.engine.evaluate_rule_for_worker_batch(rule, batch);

            for worker in batch {
                let Some(detail) = evaluation.match_details.get(&worker.id) else {
                    continue;
                };

                if detail.matched {
                    tally.matched += 1;
                    if !current.contains_key(&worker.id) {
                        let membership = SegmentMembership::rule_matched(
                            segment.id,
                            worker.id.clone(),
                            detail.reason.clone(),
                        );
                        if self.insert_membership(&membership).await? {
                            tally.added += 1;
                        }
                        current.insert(worker.id.clone(), true);
                    }
                } else if current.get(&worker.id) == Some(&true) {
                    if self.store.remove_membership(segment.id, &worker.id).await? {
                        tally.removed += 1;
                    }
                    current.remove(&worker.id);
                }
            }

            tally.processed += batch.len() as u64;
            job.record_progress(tally.processed, tally.matched)?;
            self.store.update_sync_job(job).await?;

            debug!(
                job_id = %job.id,
                processed = tally.processed,
                matched = tally.matched,
                "同步批次完成"
            );
        }

        Ok(())
    }

    /// 候选 worker：显式 ID > 整个组织 > 默认第一页，按 ID 去重
    async fn resolve_candidates(&self, segment: &Segment, options: &SyncOptions) -> Result<Vec<Worker>> {
        let workers = if let Some(ids) = &options.specific_worker_ids {
            self.workers
                .get_by_ids(ids)
                .await?
                .into_iter()
                .filter(|w| w.organization_id == segment.organization_id)
                .collect()
        } else if options.full_sync {
            self.workers.get_all(&segment.organization_id).await?
        } else {
            self.workers
                .get_by_organization(&segment.organization_id, 1, self.config.default_page_size)
                .await?
                .records
        };

        let mut seen = HashSet::new();
        Ok(workers
            .into_iter()
            .filter(|w| seen.insert(w.id.clone()))
            .collect())
    }

    /// 新增成员关系；并发写入导致的重复视为已存在
    async fn insert_membership(&self, membership: &SegmentMembership) -> Result<bool> {
        match self.store.add_membership(membership).await {
            Ok(()) => Ok(true),
            Err(SegmentError::MembershipExists { .. }) => {
                debug!(
                    segment_id = %membership.segment_id,
                    worker_id = %membership.worker_id,
                    "成员关系已存在，跳过"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ==================== 单个 worker 调和 ====================

    /// 对组织内所有规则分群重新评估单个 worker
    ///
    /// worker 已不存在时，移除其全部规则成员关系，手动成员关系保留。
    #[instrument(skip(self))]
    pub async fn reconcile_worker_segment_memberships(
        &self,
        worker_id: &str,
        organization_id: &str,
    ) -> Result<ReconcileResult> {
        let segments = self.rule_segments(organization_id).await?;
        self.reconcile(worker_id, organization_id, segments).await
    }

    /// 只重新评估规则文本引用了变更字段的分群
    ///
    /// 基于规则文本的子串匹配，可能多评估但不会替代完整同步。
    #[instrument(skip(self, changed_fields), fields(changed = changed_fields.len()))]
    pub async fn reconcile_for_changed_fields(
        &self,
        worker_id: &str,
        organization_id: &str,
        changed_fields: &[String],
    ) -> Result<ReconcileResult> {
        let mut segments = Vec::new();
        for (segment, rule) in self.rule_segments(organization_id).await? {
            let text = self.engine.serialize_rule(&rule)?;
            if changed_fields.iter().any(|field| text.contains(field.as_str())) {
                segments.push((segment, rule));
            }
        }

        debug!(affected_segments = segments.len(), "按变更字段筛选分群");
        self.reconcile(worker_id, organization_id, segments).await
    }

    async fn rule_segments(&self, organization_id: &str) -> Result<Vec<(Segment, SegmentRule)>> {
        Ok(self
            .store
            .list_segments(organization_id)
            .await?
            .into_iter()
            .filter_map(|segment| {
                let rule = segment.active_rule().cloned()?;
                Some((segment, rule))
            })
            .collect())
    }

    async fn reconcile(
        &self,
        worker_id: &str,
        organization_id: &str,
        segments: Vec<(Segment, SegmentRule)>,
    ) -> Result<ReconcileResult> {
        let mut result = ReconcileResult {
            worker_id: worker_id.to_string(),
            ..Default::default()
        };

        let Some(worker) = self.workers.get_by_id(worker_id).await? else {
            // worker 已删除：移除全部规则成员关系
            for membership in self.store.list_worker_memberships(worker_id).await? {
                if membership.rule_match
                    && self
                        .store
                        .remove_membership(membership.segment_id, worker_id)
                        .await?
                {
                    result.removed.push(membership.segment_id);
                }
            }

            record_membership_changes("reconcile", 0, result.removed.len() as u64);
            info!(worker_id, removed = result.removed.len(), "已删除 worker 的规则成员关系已清理");
            return Ok(result);
        };

        // 其他组织的 worker 对本组织不可见
        if worker.organization_id != organization_id {
            warn!(
                worker_id,
                organization_id,
                worker_organization = %worker.organization_id,
                "worker 不属于该组织，拒绝调和"
            );
            return Err(SegmentError::WorkerNotFound(worker_id.to_string()));
        }

        for (segment, rule) in segments {
            result.segments_evaluated += 1;

            let outcome = self.engine.evaluate_rule_for_worker(&rule, &worker);
            let existing = self.store.find_membership(segment.id, worker_id).await?;

            match (outcome.matched, existing) {
                (true, None) => {
                    let membership =
                        SegmentMembership::rule_matched(segment.id, worker_id, outcome.reason);
                    if self.insert_membership(&membership).await? {
                        result.added.push(segment.id);
                    }
                }
                (false, Some(membership)) if membership.rule_match => {
                    if self.store.remove_membership(segment.id, worker_id).await? {
                        result.removed.push(segment.id);
                    }
                }
                _ => {}
            }
        }

        record_membership_changes(
            "reconcile",
            result.added.len() as u64,
            result.removed.len() as u64,
        );
        info!(
            worker_id,
            evaluated = result.segments_evaluated,
            added = result.added.len(),
            removed = result.removed.len(),
            "worker 成员关系调和完成"
        );

        Ok(result)
    }

    // ==================== 手动成员 ====================

    /// 添加手动成员
    ///
    /// 已是规则成员时转为手动成员，此后同步不会再移除它。
    #[instrument(skip(self))]
    pub async fn add_manual_member(&self, segment_id: Uuid, worker_id: &str) -> Result<SegmentMembership> {
        self.require_segment(segment_id).await?;
        if self.workers.get_by_id(worker_id).await?.is_none() {
            return Err(SegmentError::WorkerNotFound(worker_id.to_string()));
        }

        match self.store.find_membership(segment_id, worker_id).await? {
            Some(existing) if existing.is_manual() => Err(SegmentError::MembershipExists {
                segment_id,
                worker_id: worker_id.to_string(),
            }),
            Some(mut existing) => {
                existing.rule_match = false;
                existing.rule_match_reason = None;
                self.store.update_membership(&existing).await?;
                info!(%segment_id, worker_id, "规则成员已转为手动成员");
                Ok(existing)
            }
            None => {
                let membership = SegmentMembership::manual(segment_id, worker_id);
                self.store.add_membership(&membership).await?;
                record_membership_changes("manual", 1, 0);
                info!(%segment_id, worker_id, "已添加手动成员");
                Ok(membership)
            }
        }
    }

    /// 移除成员（手动或规则成员）
    #[instrument(skip(self))]
    pub async fn remove_member(&self, segment_id: Uuid, worker_id: &str) -> Result<bool> {
        self.require_segment(segment_id).await?;

        let removed = self.store.remove_membership(segment_id, worker_id).await?;
        if removed {
            record_membership_changes("manual", 0, 1);
            info!(%segment_id, worker_id, "已移除成员");
        }
        Ok(removed)
    }

    pub async fn list_members(&self, segment_id: Uuid) -> Result<Vec<SegmentMembership>> {
        self.require_segment(segment_id).await?;
        self.store.list_memberships(segment_id).await
    }

    pub async fn member_ids(&self, segment_id: Uuid) -> Result<HashSet<String>> {
        self.require_segment(segment_id).await?;
        self.store.list_membership_worker_ids(segment_id).await
    }

    async fn require_segment(&self, segment_id: Uuid) -> Result<Segment> {
        self.store
            .get_segment(segment_id)
            .await?
            .ok_or(SegmentError::SegmentNotFound(segment_id))
    }

    // ==================== 同步任务查询 ====================

    pub async fn get_sync_job(&self, job_id: Uuid) -> Result<SyncJob> {
        self.store
            .get_sync_job(job_id)
            .await?
            .ok_or(SegmentError::SyncJobNotFound(job_id))
    }

    pub async fn list_recent_sync_jobs(&self, segment_id: Uuid, limit: usize) -> Result<Vec<SyncJob>> {
        self.store.list_recent_sync_jobs(segment_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncJobStatus, WorkerPage};
    use crate::repository::{MockSegmentStore, MockWorkerReader};
    use rule_engine::{Condition, Operator, RuleGroup};
    use serde_json::json;

    fn sales_segment() -> Segment {
        Segment::new_rule_based(
            "Sales",
            "org-1",
            SegmentRule::new(RuleGroup::and(vec![Condition::new(
                "employment.department",
                Operator::Equals,
                "Sales",
            )])),
        )
    }

    fn worker(id: &str, department: &str) -> Worker {
        Worker::new(id, "org-1", json!({"employment": {"department": department}}))
    }

    fn service(
        workers: MockWorkerReader,
        store: MockSegmentStore,
    ) -> SegmentMembershipService<MockWorkerReader, MockSegmentStore> {
        SegmentMembershipService::new(
            Arc::new(workers),
            Arc::new(store),
            Arc::new(RuleEngine::default()),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_static_segment_rejected() {
        let segment = Segment::new_static("Hand picked", "org-1");
        let id = segment.id;

        let mut store = MockSegmentStore::new();
        store
            .expect_get_segment()
            .returning(move |_| Ok(Some(segment.clone())));
        store.expect_create_sync_job().never();

        let err = service(MockWorkerReader::new(), store)
            .synchronize_segment(id, SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SegmentError::InvalidSegmentType(_)));
    }

    #[tokio::test]
    async fn test_unknown_segment() {
        let mut store = MockSegmentStore::new();
        store.expect_get_segment().returning(|_| Ok(None));

        let err = service(MockWorkerReader::new(), store)
            .synchronize_segment(Uuid::now_v7(), SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SegmentError::SegmentNotFound(_)));
    }

    #[tokio::test]
    async fn test_default_candidates_use_first_page() {
        let segment = sales_segment();
        let id = segment.id;

        let mut workers = MockWorkerReader::new();
        workers
            .expect_get_by_organization()
            .withf(|org, page, size| org == "org-1" && *page == 1 && *size == 1000)
            .times(1)
            .returning(|_, _, _| {
                Ok(WorkerPage {
                    records: vec![worker("w-1", "Sales"), worker("w-2", "IT")],
                    total: 2,
                })
            });
        workers.expect_get_all().never();

        let mut store = MockSegmentStore::new();
        store
            .expect_get_segment()
            .returning(move |_| Ok(Some(segment.clone())));
        store.expect_create_sync_job().returning(|_| Ok(()));
        store.expect_update_sync_job().returning(|_| Ok(()));
        store.expect_list_memberships().returning(|_| Ok(vec![]));
        store
            .expect_add_membership()
            .withf(|m| m.worker_id == "w-1" && m.rule_match)
            .times(1)
            .returning(|_| Ok(()));
        store.expect_update_last_sync_at().times(1).returning(|_, _| Ok(()));

        let result = service(workers, store)
            .synchronize_segment(id, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!((result.processed, result.matched, result.added, result.removed), (2, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_storage_failure_marks_job_failed() {
        let segment = sales_segment();
        let id = segment.id;

        let mut workers = MockWorkerReader::new();
        workers
            .expect_get_all()
            .returning(|_| Ok(vec![worker("w-1", "Sales")]));

        let mut store = MockSegmentStore::new();
        store
            .expect_get_segment()
            .returning(move |_| Ok(Some(segment.clone())));
        store.expect_create_sync_job().returning(|_| Ok(()));
        store
            .expect_update_sync_job()
            .withf(|job| job.status == SyncJobStatus::Failed)
            .times(1)
            .returning(|job| {
                assert!(job.error_message.as_deref().unwrap().contains("disk full"));
                Ok(())
            });
        store
            .expect_update_sync_job()
            .withf(|job| job.status != SyncJobStatus::Failed)
            .returning(|_| Ok(()));
        store.expect_list_memberships().returning(|_| Ok(vec![]));
        store
            .expect_add_membership()
            .returning(|_| Err(SegmentError::Storage("disk full".into())));
        store.expect_update_last_sync_at().never();

        let err = service(workers, store)
            .synchronize_segment(id, SyncOptions::full())
            .await
            .unwrap_err();

        assert!(matches!(err, SegmentError::SyncFailed { .. }));
    }

    #[tokio::test]
    async fn test_deleted_worker_keeps_manual_memberships() {
        let manual_segment = Uuid::now_v7();
        let rule_segment = Uuid::now_v7();

        let mut workers = MockWorkerReader::new();
        workers.expect_get_by_id().returning(|_| Ok(None));

        let mut store = MockSegmentStore::new();
        store.expect_list_segments().returning(|_| Ok(vec![]));
        store.expect_list_worker_memberships().returning(move |_| {
            Ok(vec![
                SegmentMembership::manual(manual_segment, "w-1"),
                SegmentMembership::rule_matched(rule_segment, "w-1", None),
            ])
        });
        store
            .expect_remove_membership()
            .withf(move |segment_id, worker_id| *segment_id == rule_segment && worker_id == "w-1")
            .times(1)
            .returning(|_, _| Ok(true));

        let result = service(workers, store)
            .reconcile_worker_segment_memberships("w-1", "org-1")
            .await
            .unwrap();

        assert_eq!(result.removed, vec![rule_segment]);
        assert!(result.added.is_empty());
    }

    #[tokio::test]
    async fn test_manual_member_requires_existing_worker() {
        let segment = Segment::new_static("Hand picked", "org-1");
        let id = segment.id;

        let mut workers = MockWorkerReader::new();
        workers.expect_get_by_id().returning(|_| Ok(None));

        let mut store = MockSegmentStore::new();
        store
            .expect_get_segment()
            .returning(move |_| Ok(Some(segment.clone())));
        store.expect_add_membership().never();

        let err = service(workers, store)
            .add_manual_member(id, "ghost")
            .await
            .unwrap_err();

        assert!(matches!(err, SegmentError::WorkerNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_missing_sync_job() {
        let mut store = MockSegmentStore::new();
        store.expect_get_sync_job().returning(|_| Ok(None));

        let err = service(MockWorkerReader::new(), store)
            .get_sync_job(Uuid::now_v7())
            .await
            .unwrap_err();

        assert!(matches!(err, SegmentError::SyncJobNotFound(_)));
    }
}
