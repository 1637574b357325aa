//! 分群与成员关系

use chrono::{DateTime, Utc};
use rule_engine::SegmentRule;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 分群类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    /// 静态分群 - 只有手动成员
    #[default]
    Static,
    /// 规则分群 - 成员由规则计算
    RuleBased,
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::RuleBased => write!(f, "rule_based"),
        }
    }
}

/// 分群
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    pub organization_id: String,
    #[serde(default)]
    pub rule_definition: Option<SegmentRule>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new_static(name: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self::build(name.into(), SegmentType::Static, organization_id.into(), None)
    }

    pub fn new_rule_based(
        name: impl Into<String>,
        organization_id: impl Into<String>,
        rule: SegmentRule,
    ) -> Self {
        Self::build(
            name.into(),
            SegmentType::RuleBased,
            organization_id.into(),
            Some(rule),
        )
    }

    fn build(
        name: String,
        segment_type: SegmentType,
        organization_id: String,
        rule_definition: Option<SegmentRule>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name,
            segment_type,
            organization_id,
            rule_definition,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_rule_based(&self) -> bool {
        self.segment_type == SegmentType::RuleBased
    }

    /// 规则分群的规则；静态分群或缺少规则时为 None
    pub fn active_rule(&self) -> Option<&SegmentRule> {
        if self.is_rule_based() {
            self.rule_definition.as_ref()
        } else {
            None
        }
    }
}

/// 分群成员关系
///
/// `rule_match = true` 的成员由同步维护，可能在后续同步中移除；
/// `rule_match = false` 是手动成员，同步永远不会移除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMembership {
    pub worker_id: String,
    pub segment_id: Uuid,
    pub rule_match: bool,
    #[serde(default)]
    pub rule_match_reason: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl SegmentMembership {
    pub fn rule_matched(
        segment_id: Uuid,
        worker_id: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            segment_id,
            rule_match: true,
            rule_match_reason: reason,
            added_at: Utc::now(),
        }
    }

    pub fn manual(segment_id: Uuid, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            segment_id,
            rule_match: false,
            rule_match_reason: None,
            added_at: Utc::now(),
        }
    }

    pub fn is_manual(&self) -> bool {
        !self.rule_match
    }
}
