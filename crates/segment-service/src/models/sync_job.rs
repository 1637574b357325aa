//! 同步任务及其状态机
//!
//! `pending -> processing -> completed | failed`，终态之后不允许任何修改。
//! 每次同步都创建新任务，历史任务只读。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, SegmentError};

/// 同步任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SyncJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// 是否允许迁移到目标状态
    fn can_transition_to(&self, to: SyncJobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 同步任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub status: SyncJobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processed_count: u64,
    pub match_count: u64,
    pub error_message: Option<String>,
}

impl SyncJob {
    pub fn new(segment_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            segment_id,
            status: SyncJobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processed_count: 0,
            match_count: 0,
            error_message: None,
        }
    }

    fn transition(&mut self, to: SyncJobStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(SegmentError::InvalidJobTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// pending -> processing
    pub fn start(&mut self) -> Result<()> {
        self.transition(SyncJobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// 记录累计进度，只在 processing 状态下允许
    pub fn record_progress(&mut self, processed_count: u64, match_count: u64) -> Result<()> {
        if self.status != SyncJobStatus::Processing {
            return Err(SegmentError::InvalidJobTransition {
                job_id: self.id,
                from: self.status,
                to: SyncJobStatus::Processing,
            });
        }
        self.processed_count = processed_count;
        self.match_count = match_count;
        Ok(())
    }

    /// processing -> completed
    pub fn complete(&mut self) -> Result<()> {
        self.transition(SyncJobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// pending | processing -> failed
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(SyncJobStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
        Ok(())
    }

    /// 任务耗时（秒），未结束时为 None
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds().max(0) as f64 / 1000.0)
    }
}
