//! 分群规则引擎
//!
//! 提供基于 worker 属性的动态分群规则能力：
//! - JSON 规则定义、解析与规范化序列化
//! - 字段白名单与语义校验（带路径的错误报告）
//! - 条件评估与 AND/OR 嵌套逻辑组
//! - 批量评估优化（按规则引用字段预取）

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fields;
pub mod models;
pub mod operators;
pub mod optimizer;
pub mod validator;

pub use engine::{BatchEvaluation, BatchStats, RuleEngine};
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use fields::{CUSTOM_FIELD_PREFIX, FieldAccessor, FieldDefinition, FieldRegistry, FieldType};
pub use models::{
    Condition, EvaluationContext, FieldLookup, Record, RuleGroup, RuleMatch, SegmentRule,
};
pub use operators::{LogicalOperator, Operator, ValueShape};
pub use optimizer::{RecordEvaluation, RuleEvaluationOptimizer};
pub use validator::{RuleValidator, ValidationError, ValidationErrorType, ValidationReport};
