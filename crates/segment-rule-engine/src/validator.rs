//! 规则语义校验器
//!
//! 直接在原始 JSON 上校验规则定义，收集所有问题而不是遇到第一个就返回，
//! 每个错误都带有指向规则树具体节点的路径（如 `rootGroup.groups[1].conditions[0].operator`）。

use crate::evaluator::parse_datetime;
use crate::fields::{CUSTOM_FIELD_PREFIX, FieldDefinition, FieldRegistry};
use crate::models::SegmentRule;
use crate::operators::{LogicalOperator, Operator, ValueShape};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// 校验错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    MissingField,
    MissingOperator,
    UnknownField,
    InvalidOperator,
    InvalidValue,
    EmptyGroup,
    Structural,
}

/// 单个校验错误
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    #[serde(rename = "type")]
    pub error_type: ValidationErrorType,
    pub message: String,
    pub path: String,
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// 所有错误拼接成一行，便于日志和错误消息
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn has_error(&self, error_type: ValidationErrorType) -> bool {
        self.errors.iter().any(|e| e.error_type == error_type)
    }
}

/// 错误收集器
struct Collector {
    errors: Vec<ValidationError>,
}

impl Collector {
    fn push(&mut self, error_type: ValidationErrorType, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            error_type,
            message: message.into(),
            path: path.into(),
        });
    }
}

/// 规则校验器
///
/// 内置字段白名单之外，每个组织可以注册自己的自定义字段（`customFields.` 前缀）。
pub struct RuleValidator {
    registry: FieldRegistry,
    custom_fields: DashMap<String, FieldRegistry>,
}

impl RuleValidator {
    pub fn new(registry: FieldRegistry) -> Self {
        Self {
            registry,
            custom_fields: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// 为组织注册自定义字段，路径缺少前缀时自动补上
    pub fn register_custom_field(&self, organization_id: &str, mut definition: FieldDefinition) {
        if !definition.path.starts_with(CUSTOM_FIELD_PREFIX) {
            definition.path = format!("{}{}", CUSTOM_FIELD_PREFIX, definition.path);
        }

        debug!(organization_id, path = %definition.path, "注册自定义字段");
        self.custom_fields
            .entry(organization_id.to_string())
            .or_default()
            .register(definition);
    }

    /// 组织已注册的自定义字段
    pub fn custom_fields(&self, organization_id: &str) -> Vec<FieldDefinition> {
        self.custom_fields
            .get(organization_id)
            .map(|r| r.definitions().cloned().collect())
            .unwrap_or_default()
    }

    /// 查找字段定义：先查内置白名单，再查组织自定义字段
    pub fn resolve_field(&self, path: &str, organization_id: Option<&str>) -> Option<FieldDefinition> {
        if let Some(definition) = self.registry.get(path) {
            return Some(definition.clone());
        }

        organization_id.and_then(|org| {
            self.custom_fields
                .get(org)
                .and_then(|r| r.get(path).cloned())
        })
    }

    /// 校验 JSON 形式的规则定义
    pub fn validate_rule(&self, definition: &Value, organization_id: Option<&str>) -> ValidationReport {
        let mut collector = Collector { errors: Vec::new() };

        match definition {
            Value::Object(obj) => match obj.get(SegmentRule::ROOT_PATH) {
                None | Some(Value::Null) => collector.push(
                    ValidationErrorType::Structural,
                    SegmentRule::ROOT_PATH,
                    "规则定义缺少 rootGroup",
                ),
                Some(root) => {
                    self.validate_group(root, SegmentRule::ROOT_PATH, organization_id, &mut collector)
                }
            },
            _ => collector.push(ValidationErrorType::Structural, "", "规则定义必须是对象"),
        }

        let report = ValidationReport::from_errors(collector.errors);
        debug!(valid = report.valid, error_count = report.errors.len(), "规则校验完成");
        report
    }

    /// 校验已解析的规则（与 JSON 校验走同一条路径）
    pub fn validate_segment_rule(&self, rule: &SegmentRule, organization_id: Option<&str>) -> ValidationReport {
        match serde_json::to_value(rule) {
            Ok(value) => self.validate_rule(&value, organization_id),
            Err(e) => ValidationReport::from_errors(vec![ValidationError {
                error_type: ValidationErrorType::Structural,
                message: format!("规则序列化失败: {}", e),
                path: String::new(),
            }]),
        }
    }

    fn validate_group(
        &self,
        value: &Value,
        path: &str,
        organization_id: Option<&str>,
        collector: &mut Collector,
    ) {
        let Some(obj) = value.as_object() else {
            collector.push(ValidationErrorType::Structural, path, "逻辑组必须是对象");
            return;
        };

        let operator_path = format!("{}.operator", path);
        match obj.get("operator") {
            None | Some(Value::Null) => {
                collector.push(ValidationErrorType::MissingOperator, operator_path, "逻辑组缺少操作符")
            }
            Some(Value::String(s)) => {
                if s.parse::<LogicalOperator>().is_err() {
                    collector.push(
                        ValidationErrorType::InvalidOperator,
                        operator_path,
                        format!("逻辑操作符必须是 AND 或 OR，当前为 '{}'", s),
                    );
                }
            }
            Some(_) => collector.push(
                ValidationErrorType::InvalidOperator,
                operator_path,
                "逻辑操作符必须是字符串",
            ),
        }

        let conditions = Self::array_member(obj, "conditions", path, collector);
        let groups = Self::array_member(obj, "groups", path, collector);

        if let (Some(conditions), Some(groups)) = (conditions, groups) {
            if conditions.is_empty() && groups.is_empty() {
                collector.push(
                    ValidationErrorType::EmptyGroup,
                    path,
                    "逻辑组至少需要一个条件或子组",
                );
            }
        }

        for (i, condition) in conditions.unwrap_or_default().iter().enumerate() {
            self.validate_condition(
                condition,
                &format!("{}.conditions[{}]", path, i),
                organization_id,
                collector,
            );
        }

        for (i, group) in groups.unwrap_or_default().iter().enumerate() {
            self.validate_group(group, &format!("{}.groups[{}]", path, i), organization_id, collector);
        }
    }

    /// 读取数组成员：缺失视为空数组，类型错误记录结构错误并返回 None
    fn array_member<'a>(
        obj: &'a Map<String, Value>,
        key: &str,
        path: &str,
        collector: &mut Collector,
    ) -> Option<&'a [Value]> {
        match obj.get(key) {
            None | Some(Value::Null) => Some(&[]),
            Some(Value::Array(items)) => Some(items.as_slice()),
            Some(_) => {
                collector.push(
                    ValidationErrorType::Structural,
                    format!("{}.{}", path, key),
                    format!("{} 必须是数组", key),
                );
                None
            }
        }
    }

    fn validate_condition(
        &self,
        value: &Value,
        path: &str,
        organization_id: Option<&str>,
        collector: &mut Collector,
    ) {
        let Some(obj) = value.as_object() else {
            collector.push(ValidationErrorType::Structural, path, "条件必须是对象");
            return;
        };

        let field_path = format!("{}.field", path);
        let field = match obj.get("field") {
            None | Some(Value::Null) => {
                collector.push(ValidationErrorType::MissingField, &field_path, "条件缺少字段");
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                collector.push(ValidationErrorType::MissingField, &field_path, "字段不能为空");
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                collector.push(ValidationErrorType::Structural, &field_path, "字段必须是字符串");
                None
            }
        };

        let operator_path = format!("{}.operator", path);
        let operator = match obj.get("operator") {
            None | Some(Value::Null) => {
                collector.push(ValidationErrorType::MissingOperator, &operator_path, "条件缺少操作符");
                None
            }
            Some(Value::String(s)) => match s.parse::<Operator>() {
                Ok(op) => Some(op),
                Err(message) => {
                    collector.push(ValidationErrorType::InvalidOperator, &operator_path, message);
                    None
                }
            },
            Some(_) => {
                collector.push(ValidationErrorType::InvalidOperator, &operator_path, "操作符必须是字符串");
                None
            }
        };

        if let Some(negate) = obj.get("negate") {
            if !negate.is_boolean() && !negate.is_null() {
                collector.push(
                    ValidationErrorType::Structural,
                    format!("{}.negate", path),
                    "negate 必须是布尔值",
                );
            }
        }

        let definition = field.and_then(|f| {
            let definition = self.resolve_field(f, organization_id);
            if definition.is_none() {
                collector.push(
                    ValidationErrorType::UnknownField,
                    &field_path,
                    format!("未知字段: {}", f),
                );
            }
            definition
        });

        if let (Some(definition), Some(operator)) = (&definition, operator) {
            if !definition.field_type.supports(operator) {
                collector.push(
                    ValidationErrorType::InvalidOperator,
                    &operator_path,
                    format!(
                        "{} 操作符不适用于 {} 类型字段 {}",
                        operator,
                        definition.field_type.as_str(),
                        definition.path
                    ),
                );
            }
        }

        if let Some(operator) = operator {
            Self::validate_value(operator, obj.get("value"), &format!("{}.value", path), collector);
        }
    }

    /// 校验值的形状是否满足操作符约定
    fn validate_value(operator: Operator, value: Option<&Value>, path: &str, collector: &mut Collector) {
        let shape = operator.value_shape();
        if shape == ValueShape::None {
            return;
        }

        let value = match value {
            None | Some(Value::Null) => {
                collector.push(
                    ValidationErrorType::InvalidValue,
                    path,
                    format!("{} 操作符需要条件值", operator),
                );
                return;
            }
            Some(v) => v,
        };

        match shape {
            ValueShape::Array => match value.as_array() {
                None => collector.push(
                    ValidationErrorType::InvalidValue,
                    path,
                    format!("{} 操作符需要数组值", operator),
                ),
                Some(items) if items.is_empty() => collector.push(
                    ValidationErrorType::InvalidValue,
                    path,
                    format!("{} 操作符的数组不能为空", operator),
                ),
                Some(_) => {}
            },
            ValueShape::Range => {
                if value.as_array().map(Vec::len) != Some(2) {
                    collector.push(
                        ValidationErrorType::InvalidValue,
                        path,
                        "between 操作符需要 [min, max] 数组",
                    );
                }
            }
            ValueShape::Scalar => {
                if value.is_array() || value.is_object() {
                    collector.push(
                        ValidationErrorType::InvalidValue,
                        path,
                        format!("{} 操作符需要标量值", operator),
                    );
                } else {
                    Self::validate_scalar(operator, value, path, collector);
                }
            }
            ValueShape::None => {}
        }
    }

    fn validate_scalar(operator: Operator, value: &Value, path: &str, collector: &mut Collector) {
        match operator {
            Operator::StartsWith | Operator::EndsWith if !value.is_string() => collector.push(
                ValidationErrorType::InvalidValue,
                path,
                format!("{} 操作符需要字符串值", operator),
            ),
            Operator::Matches => match value.as_str() {
                Some(pattern) => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        collector.push(
                            ValidationErrorType::InvalidValue,
                            path,
                            format!("正则表达式无效: {}", e),
                        );
                    }
                }
                None => collector.push(
                    ValidationErrorType::InvalidValue,
                    path,
                    "matches 操作符需要字符串正则",
                ),
            },
            Operator::Before | Operator::After => {
                if value.as_str().and_then(parse_datetime).is_none() {
                    collector.push(
                        ValidationErrorType::InvalidValue,
                        path,
                        format!("{} 操作符需要日期字符串", operator),
                    );
                }
            }
            _ => {}
        }
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new(FieldRegistry::worker_defaults())
    }
}
