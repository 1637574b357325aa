//! 分群服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use rule_engine::{RuleError, ValidationReport};
use thiserror::Error;
use uuid::Uuid;

use crate::models::SyncJobStatus;

/// 分群服务错误类型
#[derive(Debug, Error)]
pub enum SegmentError {
    // === 资源不存在 ===
    #[error("分群不存在: {0}")]
    SegmentNotFound(Uuid),

    #[error("worker 不存在: {0}")]
    WorkerNotFound(String),

    #[error("同步任务不存在: {0}")]
    SyncJobNotFound(Uuid),

    // === 分群定义 ===
    #[error("分群类型不匹配: {0}")]
    InvalidSegmentType(String),

    #[error("规则校验失败: {}", .0.summary())]
    InvalidRule(ValidationReport),

    // === 成员关系 ===
    #[error("成员关系已存在: segment_id={segment_id}, worker_id={worker_id}")]
    MembershipExists { segment_id: Uuid, worker_id: String },

    // === 同步任务 ===
    #[error("同步任务状态不允许此操作: job_id={job_id}, {from} -> {to}")]
    InvalidJobTransition {
        job_id: Uuid,
        from: SyncJobStatus,
        to: SyncJobStatus,
    },

    #[error("分群正在同步中: {0}")]
    SyncInProgress(Uuid),

    #[error("同步任务已取消: job_id={0}")]
    SyncCancelled(Uuid),

    #[error("同步任务失败: job_id={job_id}, {message}")]
    SyncFailed { job_id: Uuid, message: String },

    // === 系统错误 ===
    #[error("存储错误: {0}")]
    Storage(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// 分群服务 Result 类型别名
pub type Result<T> = std::result::Result<T, SegmentError>;

impl SegmentError {
    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SegmentNotFound(_) | Self::WorkerNotFound(_) | Self::SyncJobNotFound(_) => 404,
            Self::InvalidSegmentType(_) | Self::Rule(_) => 400,
            Self::MembershipExists { .. }
            | Self::InvalidJobTransition { .. }
            | Self::SyncInProgress(_)
            | Self::SyncCancelled(_) => 409,
            Self::InvalidRule(_) => 422,
            Self::SyncFailed { .. } | Self::Storage(_) => 500,
        }
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SegmentNotFound(_) => "SEGMENT_NOT_FOUND",
            Self::WorkerNotFound(_) => "WORKER_NOT_FOUND",
            Self::SyncJobNotFound(_) => "SYNC_JOB_NOT_FOUND",
            Self::InvalidSegmentType(_) => "INVALID_SEGMENT_TYPE",
            Self::InvalidRule(_) => "INVALID_RULE",
            Self::MembershipExists { .. } => "MEMBERSHIP_EXISTS",
            Self::InvalidJobTransition { .. } => "INVALID_JOB_TRANSITION",
            Self::SyncInProgress(_) => "SYNC_IN_PROGRESS",
            Self::SyncCancelled(_) => "SYNC_CANCELLED",
            Self::SyncFailed { .. } => "SYNC_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Rule(_) => "RULE_ERROR",
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::SyncInProgress(_) | Self::SyncFailed { .. }
        )
    }
}
