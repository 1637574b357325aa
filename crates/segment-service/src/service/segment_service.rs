//! 分群定义服务
//!
//! 负责分群的创建、规则更新和查询。规则在写入前统一经过语义校验，
//! 校验失败时一次性返回所有错误。

use std::sync::Arc;

use chrono::Utc;
use rule_engine::{RuleEngine, SegmentRule};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SegmentError};
use crate::models::{Segment, SegmentType};
use crate::repository::SegmentStore;
use crate::service::dto::CreateSegmentRequest;

/// 分群定义服务
pub struct SegmentDefinitionService<S>
where
    S: SegmentStore,
{
    store: Arc<S>,
    engine: Arc<RuleEngine>,
}

impl<S> SegmentDefinitionService<S>
where
    S: SegmentStore,
{
    pub fn new(store: Arc<S>, engine: Arc<RuleEngine>) -> Self {
        Self { store, engine }
    }

    /// 创建分群
    ///
    /// 规则分群必须带规则，静态分群不能带规则。
    #[instrument(skip(self, request), fields(name = %request.name, organization_id = %request.organization_id))]
    pub async fn create_segment(&self, request: CreateSegmentRequest) -> Result<Segment> {
        let segment = match (request.segment_type, request.rule_definition) {
            (SegmentType::RuleBased, Some(definition)) => {
                let rule = self.validate_and_parse(&definition, &request.organization_id)?;
                Segment::new_rule_based(request.name, request.organization_id, rule)
            }
            (SegmentType::RuleBased, None) => {
                return Err(SegmentError::InvalidSegmentType(
                    "规则分群必须提供规则定义".to_string(),
                ));
            }
            (SegmentType::Static, Some(_)) => {
                return Err(SegmentError::InvalidSegmentType(
                    "静态分群不能设置规则定义".to_string(),
                ));
            }
            (SegmentType::Static, None) => {
                Segment::new_static(request.name, request.organization_id)
            }
        };

        self.store.save_segment(&segment).await?;

        info!(segment_id = %segment.id, segment_type = %segment.segment_type, "分群已创建");
        Ok(segment)
    }

    /// 更新规则分群的规则
    #[instrument(skip(self, definition))]
    pub async fn update_segment_rule(&self, segment_id: Uuid, definition: &Value) -> Result<Segment> {
        let mut segment = self.get_segment(segment_id).await?;

        if !segment.is_rule_based() {
            return Err(SegmentError::InvalidSegmentType(format!(
                "分群 {} 不是规则分群",
                segment_id
            )));
        }

        let rule = self.validate_and_parse(definition, &segment.organization_id)?;
        segment.rule_definition = Some(rule);
        segment.updated_at = Utc::now();

        self.store.save_segment(&segment).await?;

        info!(%segment_id, "分群规则已更新");
        Ok(segment)
    }

    pub async fn get_segment(&self, segment_id: Uuid) -> Result<Segment> {
        self.store
            .get_segment(segment_id)
            .await?
            .ok_or(SegmentError::SegmentNotFound(segment_id))
    }

    pub async fn list_segments(&self, organization_id: &str) -> Result<Vec<Segment>> {
        self.store.list_segments(organization_id).await
    }

    /// 删除分群及其全部成员关系
    #[instrument(skip(self))]
    pub async fn delete_segment(&self, segment_id: Uuid) -> Result<()> {
        if !self.store.delete_segment(segment_id).await? {
            return Err(SegmentError::SegmentNotFound(segment_id));
        }
        info!(%segment_id, "分群已删除");
        Ok(())
    }

    /// 按组织自定义字段做语义校验，再解析为规则树
    fn validate_and_parse(&self, definition: &Value, organization_id: &str) -> Result<SegmentRule> {
        let report = self.engine.validate_rule(definition, Some(organization_id));
        if !report.valid {
            warn!(
                organization_id,
                error_count = report.errors.len(),
                errors = %report.summary(),
                "规则校验失败"
            );
            return Err(SegmentError::InvalidRule(report));
        }

        Ok(self.engine.parse_rule_value(definition.clone())?)
    }
}
