//! 服务层数据传输对象
//!
//! 定义服务接口的请求和响应结构

use std::collections::BTreeMap;

use rule_engine::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::SegmentType;

// ==================== 分群定义 ====================

/// 创建分群请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSegmentRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    pub organization_id: String,
    #[serde(default)]
    pub rule_definition: Option<Value>,
}

// ==================== 同步 ====================

/// 同步选项
///
/// 候选 worker 的优先级：`specific_worker_ids` > `full_sync` > 默认第一页。
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub full_sync: bool,
    /// 覆盖配置中的批次大小
    pub batch_size: Option<usize>,
    pub specific_worker_ids: Option<Vec<String>>,
    /// 只在批次之间检查
    pub cancellation: Option<CancellationToken>,
}

impl SyncOptions {
    pub fn full() -> Self {
        Self {
            full_sync: true,
            ..Default::default()
        }
    }

    pub fn for_workers(worker_ids: Vec<String>) -> Self {
        Self {
            specific_worker_ids: Some(worker_ids),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// 同步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub sync_job_id: Uuid,
    pub processed: u64,
    pub matched: u64,
    pub added: u64,
    pub removed: u64,
}

/// 单个 worker 的成员关系调和结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub worker_id: String,
    pub segments_evaluated: usize,
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

// ==================== 规则试算 ====================

/// 规则试算选项
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestOptions {
    pub organization_id: String,
    #[serde(default)]
    pub sample_size: Option<usize>,
    #[serde(default)]
    pub include_non_matches: bool,
    #[serde(default)]
    pub specific_worker_ids: Option<Vec<String>>,
    /// 对整个组织试算，数据量大时慎用
    #[serde(default)]
    pub test_against_all_workers: bool,
}

impl RuleTestOptions {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            ..Default::default()
        }
    }
}

/// 试算样本
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSample {
    pub worker_id: String,
    pub display_name: String,
    pub reason: Option<String>,
}

/// 试算统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestStats {
    pub total_evaluated: usize,
    pub matched: usize,
    pub not_matched: usize,
    /// 保留两位小数
    pub match_percentage: f64,
    pub elapsed_ms: u64,
}

impl RuleTestStats {
    pub fn new(total_evaluated: usize, matched: usize, elapsed_ms: u64) -> Self {
        let match_percentage = if total_evaluated == 0 {
            0.0
        } else {
            (matched as f64 / total_evaluated as f64 * 10_000.0).round() / 100.0
        };

        Self {
            total_evaluated,
            matched,
            not_matched: total_evaluated - matched,
            match_percentage,
            elapsed_ms,
        }
    }
}

/// 规则试算结果
///
/// 校验失败时只有 `validation_errors`；读取 worker 失败时写入 `error`。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestResult {
    pub valid: bool,
    pub validation_errors: Vec<ValidationError>,
    pub rule_description: Option<String>,
    pub matches: Vec<WorkerSample>,
    pub non_matches: Vec<WorkerSample>,
    pub stats: RuleTestStats,
    pub error: Option<String>,
}

/// 单个 worker 的规则命中解释
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchExplanation {
    pub worker_id: String,
    pub matches: bool,
    pub explanation: String,
    pub rule_description: String,
    /// 规则引用字段在该 worker 上的取值，缺失字段为 null
    pub relevant_fields: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_percentage() {
        assert_eq!(RuleTestStats::new(0, 0, 0).match_percentage, 0.0);
        assert_eq!(RuleTestStats::new(10, 3, 0).match_percentage, 30.0);
        assert_eq!(RuleTestStats::new(3, 1, 0).match_percentage, 33.33);
        assert_eq!(RuleTestStats::new(3, 1, 0).not_matched, 2);
    }

    #[test]
    fn test_sync_options_cancellation() {
        let token = CancellationToken::new();
        let options = SyncOptions::full().with_cancellation(token.clone());

        assert!(!options.is_cancelled());
        token.cancel();
        assert!(options.is_cancelled());
        assert!(!SyncOptions::default().is_cancelled());
    }

    #[test]
    fn test_rule_test_options_deserialize() {
        let options: RuleTestOptions = serde_json::from_str(
            r#"{"organizationId": "org-1", "sampleSize": 20, "includeNonMatches": true}"#,
        )
        .unwrap();

        assert_eq!(options.organization_id, "org-1");
        assert_eq!(options.sample_size, Some(20));
        assert!(options.include_non_matches);
        assert!(!options.test_against_all_workers);
    }
}
