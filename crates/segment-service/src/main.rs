//! 分群同步命令行工具
//!
//! 从 JSON 种子文件加载分群、worker 和已有成员关系到内存仓储，
//! 然后同步所有规则分群并输出每次同步的结果。
//!
//! 用法：`segment-sync [seed.json]`，未指定时读取 `SEGMENT_SEED_FILE`，
//! 再回退到 `demos/seed.json`。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{info, warn};

use rule_engine::RuleEngine;
use segment_service::{
    InMemorySegmentStore, InMemoryWorkerReader, Segment, SegmentMembership,
    SegmentMembershipService, SegmentStore, Worker, dto::SyncOptions,
};
use segment_shared::{
    config::AppConfig,
    observability::{self, metrics::render_metrics},
};

const DEFAULT_SEED_FILE: &str = "demos/seed.json";

/// 种子数据
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedData {
    segments: Vec<Segment>,
    workers: Vec<Worker>,
    memberships: Vec<SegmentMembership>,
}

fn seed_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SEGMENT_SEED_FILE").ok())
        .unwrap_or_else(|| DEFAULT_SEED_FILE.to_string())
        .into()
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/default.toml + 环境变量
    let config = AppConfig::load("segment-sync").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化可观测性
    let _guard = observability::init(&config.service_name, &config.observability)?;

    info!(
        environment = %config.environment,
        batch_size = config.sync.batch_size,
        "Starting segment-sync..."
    );

    // 3. 读取种子数据
    let path = seed_path();
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("读取种子文件失败: {}", path.display()))?;
    let seed: SeedData = serde_json::from_str(&raw)
        .with_context(|| format!("种子文件格式错误: {}", path.display()))?;

    info!(
        segments = seed.segments.len(),
        workers = seed.workers.len(),
        memberships = seed.memberships.len(),
        "种子数据已加载"
    );

    // 4. 初始化内存仓储和规则引擎
    let engine = Arc::new(RuleEngine::with_batch_size(config.sync.batch_size));
    let workers = Arc::new(InMemoryWorkerReader::with_workers(seed.workers));
    let store = Arc::new(InMemorySegmentStore::new());

    let mut rule_segments = Vec::new();
    for segment in seed.segments {
        if let Some(rule) = segment.active_rule() {
            let report = engine.validate_segment_rule(rule, Some(&segment.organization_id));
            if !report.valid {
                warn!(segment_id = %segment.id, errors = %report.summary(), "分群规则无效，跳过");
                continue;
            }
            rule_segments.push(segment.id);
        }
        store.save_segment(&segment).await?;
    }

    for membership in &seed.memberships {
        if let Err(e) = store.add_membership(membership).await {
            warn!(
                segment_id = %membership.segment_id,
                worker_id = %membership.worker_id,
                error = %e,
                "跳过种子成员关系"
            );
        }
    }

    // 5. 同步所有规则分群（不同分群之间并发）
    let service = Arc::new(SegmentMembershipService::new(
        workers,
        store,
        engine,
        config.sync.clone(),
    ));

    let results = join_all(rule_segments.into_iter().map(|segment_id| {
        let service = Arc::clone(&service);
        async move {
            (
                segment_id,
                service
                    .synchronize_segment(segment_id, SyncOptions::full())
                    .await,
            )
        }
    }))
    .await;

    let mut failed = 0usize;
    for (segment_id, result) in results {
        match result {
            Ok(result) => info!(
                %segment_id,
                job_id = %result.sync_job_id,
                processed = result.processed,
                matched = result.matched,
                added = result.added,
                removed = result.removed,
                "Segment synchronized"
            ),
            Err(e) => {
                failed += 1;
                warn!(%segment_id, error = %e, code = e.error_code(), "Segment sync failed");
            }
        }
    }

    // 6. 批处理没有 /metrics 端点，退出前输出一次指标快照
    if let Some(snapshot) = render_metrics() {
        info!(metrics = %snapshot, "指标快照");
    }

    if failed > 0 {
        anyhow::bail!("{} 个分群同步失败", failed);
    }

    info!("segment-sync finished");
    Ok(())
}
