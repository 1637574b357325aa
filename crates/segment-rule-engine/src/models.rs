//! 规则引擎领域模型
//!
//! 规则树是不可变的：节点只能通过构造函数创建，"修改"规则意味着构造一棵新树。

use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::fields::walk;
use crate::operators::{LogicalOperator, Operator, ValueShape};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// 按点号路径取字段值的能力
pub trait FieldLookup {
    fn field(&self, path: &str) -> Option<&Value>;
}

/// 可被规则评估的记录（带唯一 ID）
pub trait Record: FieldLookup {
    fn record_id(&self) -> &str;

    /// 记录的完整 JSON 文档，供优化器批量预取字段
    fn document(&self) -> &Value;
}

/// 沿点号路径在 JSON 中取值，不做任何分配
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    walk(data, path.split('.'))
}

/// 显式的 null 按缺省值处理，与校验器的判定保持一致
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 条件节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    field: String,
    operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    negate: bool,
}

/// 单个条件的评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub matched: bool,
    pub reason: Option<String>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            negate: false,
        }
    }

    /// 无值操作符（exists、is_empty 等）使用的构造函数
    pub fn without_value(field: impl Into<String>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
            negate: false,
        }
    }

    /// 返回取反后的新条件
    pub fn negated(self) -> Self {
        Self {
            negate: !self.negate,
            ..self
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// 结构校验：字段非空，值的形状满足操作符约定
    pub fn validate(&self, path: &str) -> Result<()> {
        let invalid = |message: String| RuleError::InvalidCondition {
            path: path.to_string(),
            message,
        };

        if self.field.trim().is_empty() {
            return Err(invalid("字段不能为空".to_string()));
        }

        let value = match (self.operator.value_shape(), &self.value) {
            (ValueShape::None, _) => return Ok(()),
            (_, None) | (_, Some(Value::Null)) => {
                return Err(invalid(format!("{} 操作符需要条件值", self.operator)));
            }
            (_, Some(v)) => v,
        };

        match self.operator.value_shape() {
            ValueShape::Array if !value.is_array() => {
                Err(invalid(format!("{} 操作符需要数组值", self.operator)))
            }
            ValueShape::Range if value.as_array().map(Vec::len) != Some(2) => Err(invalid(
                "between 操作符需要 [min, max] 数组".to_string(),
            )),
            ValueShape::Scalar if value.is_array() || value.is_object() => {
                Err(invalid(format!("{} 操作符需要标量值", self.operator)))
            }
            _ => Ok(()),
        }
    }

    /// 对单条记录评估条件
    ///
    /// 取反在操作符求值之后应用；规则侧非法值导致的评估错误一律视为不匹配。
    pub fn evaluate<L: FieldLookup + ?Sized>(&self, record: &L) -> ConditionOutcome {
        let raw = ConditionEvaluator::evaluate(
            record.field(&self.field),
            self.operator,
            self.value.as_ref(),
        );

        let matched = match raw {
            Ok(result) => result != self.negate,
            Err(e) => {
                debug!(field = %self.field, operator = %self.operator, error = %e, "条件评估失败，按不匹配处理");
                false
            }
        };

        ConditionOutcome {
            matched,
            reason: matched.then(|| self.describe()),
        }
    }

    /// 自然语言描述，如 `employment.department equals "Sales"`
    pub fn describe(&self) -> String {
        let base = match (&self.value, self.operator) {
            (_, op) if op.is_no_value() => format!("{} {}", self.field, op.phrase()),
            (Some(Value::Array(bounds)), Operator::Between) if bounds.len() == 2 => format!(
                "{} {} {} and {}",
                self.field,
                self.operator.phrase(),
                bounds[0],
                bounds[1]
            ),
            (Some(value), op) => format!("{} {} {}", self.field, op.phrase(), value),
            (None, op) => format!("{} {}", self.field, op.phrase()),
        };

        if self.negate {
            format!("NOT ({})", base)
        } else {
            base
        }
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    operator: LogicalOperator,
    #[serde(default, deserialize_with = "null_as_default")]
    conditions: Vec<Condition>,
    #[serde(default, deserialize_with = "null_as_default")]
    groups: Vec<RuleGroup>,
}

/// 逻辑组的评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOutcome {
    pub matched: bool,
    /// 命中条件的描述，只有组本身命中时才向上冒泡
    pub matched_conditions: Vec<String>,
}

impl RuleGroup {
    pub fn new(
        operator: LogicalOperator,
        conditions: Vec<Condition>,
        groups: Vec<RuleGroup>,
    ) -> Self {
        Self {
            operator,
            conditions,
            groups,
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::And, conditions, Vec::new())
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::new(LogicalOperator::Or, conditions, Vec::new())
    }

    /// 返回追加了子组的新组
    pub fn with_group(mut self, group: RuleGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn operator(&self) -> LogicalOperator {
        self.operator
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn groups(&self) -> &[RuleGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.groups.is_empty()
    }

    /// 递归结构校验，遇到第一个问题即返回
    pub fn validate(&self, path: &str) -> Result<()> {
        if self.is_empty() {
            return Err(RuleError::EmptyGroup {
                path: path.to_string(),
            });
        }

        for (i, condition) in self.conditions.iter().enumerate() {
            condition.validate(&format!("{}.conditions[{}]", path, i))?;
        }

        for (i, group) in self.groups.iter().enumerate() {
            group.validate(&format!("{}.groups[{}]", path, i))?;
        }

        Ok(())
    }

    /// 评估全部直接条件和子组后再按逻辑操作符合并
    ///
    /// 不做短路，以便收集所有命中条件用于解释。
    pub fn evaluate<L: FieldLookup + ?Sized>(&self, record: &L) -> GroupOutcome {
        let mut descriptions = Vec::new();
        let mut matched_children = 0usize;

        for condition in &self.conditions {
            let outcome = condition.evaluate(record);
            if outcome.matched {
                matched_children += 1;
                descriptions.extend(outcome.reason);
            }
        }

        for group in &self.groups {
            let outcome = group.evaluate(record);
            if outcome.matched {
                matched_children += 1;
                descriptions.extend(outcome.matched_conditions);
            }
        }

        let total = self.conditions.len() + self.groups.len();
        let matched = match self.operator {
            LogicalOperator::And => total > 0 && matched_children == total,
            LogicalOperator::Or => matched_children > 0,
        };

        GroupOutcome {
            matched,
            matched_conditions: if matched { descriptions } else { Vec::new() },
        }
    }

    /// 自然语言描述，子组加括号
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(Condition::describe)
            .chain(self.groups.iter().map(|g| format!("({})", g.describe())))
            .collect();

        parts.join(&format!(" {} ", self.operator))
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        for condition in &self.conditions {
            fields.insert(condition.field.clone());
        }
        for group in &self.groups {
            group.collect_fields(fields);
        }
    }
}

/// 规则评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub matched: bool,
    /// 命中条件描述以 "; " 连接，未命中时为 None
    pub reason: Option<String>,
}

/// 分群规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    root_group: RuleGroup,
}

impl SegmentRule {
    pub const ROOT_PATH: &'static str = "rootGroup";

    pub fn new(root_group: RuleGroup) -> Self {
        Self { root_group }
    }

    pub fn root_group(&self) -> &RuleGroup {
        &self.root_group
    }

    pub fn validate(&self) -> Result<()> {
        self.root_group.validate(Self::ROOT_PATH)
    }

    pub fn evaluate<L: FieldLookup + ?Sized>(&self, record: &L) -> RuleMatch {
        let outcome = self.root_group.evaluate(record);

        RuleMatch {
            matched: outcome.matched,
            reason: outcome.matched.then(|| outcome.matched_conditions.join("; ")),
        }
    }

    pub fn describe(&self) -> String {
        self.root_group.describe()
    }

    /// 规则引用的全部字段路径（去重、排序）
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.root_group.collect_fields(&mut fields);
        fields
    }
}

/// 评估上下文 - 以 JSON 形式提供给规则引擎的记录
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    id: String,
    data: Value,
}

impl EvaluationContext {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl FieldLookup for EvaluationContext {
    fn field(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.data, path)
    }
}

impl Record for EvaluationContext {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn document(&self) -> &Value {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales_vip_rule() -> SegmentRule {
        SegmentRule::new(RuleGroup::and(vec![
            Condition::new("employment.department", Operator::Equals, "Sales"),
            Condition::new("tags", Operator::HasAny, json!(["vip"])),
        ]))
    }

    #[test]
    fn test_rule_deserialization() {
        let json = r#"
        {
            "rootGroup": {
                "operator": "AND",
                "conditions": [
                    {"field": "employment.department", "operator": "equals", "value": "Sales"},
                    {"field": "tags", "operator": "has_any", "value": ["vip"]}
                ],
                "groups": []
            }
        }
        "#;

        let rule: SegmentRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule, sales_vip_rule());
    }

    #[test]
    fn test_missing_collections_default_to_empty() {
        let json = r#"{"rootGroup": {"operator": "OR", "groups": [
            {"operator": "AND", "conditions": [{"field": "email", "operator": "exists"}]}
        ]}}"#;

        let rule: SegmentRule = serde_json::from_str(json).unwrap();
        assert!(rule.root_group().conditions().is_empty());
        assert_eq!(rule.root_group().groups().len(), 1);
        assert_eq!(rule.root_group().groups()[0].conditions()[0].value(), None);
    }

    #[test]
    fn test_example_rule_matches() {
        let rule = sales_vip_rule();
        let worker = EvaluationContext::new(
            "w-1",
            json!({"employment": {"department": "Sales"}, "tags": ["vip", "new"]}),
        );

        let result = rule.evaluate(&worker);
        assert!(result.matched);
        let reason = result.reason.unwrap();
        assert!(reason.contains("employment.department equals \"Sales\""));
        assert!(reason.contains("tags has any of [\"vip\"]"));
        assert!(reason.contains("; "));
    }

    #[test]
    fn test_example_rule_does_not_match() {
        let rule = sales_vip_rule();
        let worker = EvaluationContext::new(
            "w-2",
            json!({"employment": {"department": "Sales"}, "tags": ["new"]}),
        );

        let result = rule.evaluate(&worker);
        assert!(!result.matched);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn test_is_empty_on_missing_nested_field() {
        let rule = SegmentRule::new(RuleGroup::and(vec![Condition::without_value(
            "contact.secondaryPhoneNumber",
            Operator::IsEmpty,
        )]));
        let worker = EvaluationContext::new("w-1", json!({"contact": {"phoneNumber": "123"}}));

        assert!(rule.evaluate(&worker).matched);

        let no_contact = EvaluationContext::new("w-2", json!({}));
        assert!(rule.evaluate(&no_contact).matched);
    }

    #[test]
    fn test_negation_applies_after_operator() {
        let worker = EvaluationContext::new("w-1", json!({"employment": {"department": "HR"}}));
        let condition = Condition::new("employment.department", Operator::Equals, "Sales");

        assert!(!condition.evaluate(&worker).matched);
        let negated = condition.negated();
        let outcome = negated.evaluate(&worker);
        assert!(outcome.matched);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("NOT (employment.department equals \"Sales\")")
        );
    }

    #[test]
    fn test_evaluation_failure_is_non_match() {
        // 非法正则在评估期失败，无论是否取反都按不匹配处理
        let worker = EvaluationContext::new("w-1", json!({"email": "a@b.c"}));
        let condition = Condition::new("email", Operator::Matches, "[invalid");

        assert!(!condition.evaluate(&worker).matched);
        assert!(!condition.negated().evaluate(&worker).matched);
    }

    #[test]
    fn test_or_group_and_nested_descriptions() {
        let rule = SegmentRule::new(
            RuleGroup::or(vec![Condition::new("engagement.score", Operator::GreaterThan, 80)])
                .with_group(RuleGroup::and(vec![
                    Condition::new("employment.department", Operator::Equals, "IT"),
                    Condition::without_value("email", Operator::Exists),
                ])),
        );

        let worker = EvaluationContext::new(
            "w-1",
            json!({"engagement": {"score": 10}, "employment": {"department": "IT"}, "email": "x@y.z"}),
        );
        let result = rule.evaluate(&worker);
        assert!(result.matched);
        assert_eq!(
            result.reason.as_deref(),
            Some("employment.department equals \"IT\"; email exists")
        );

        // 子组未命中时其中单独命中的条件不会冒泡
        let partial = EvaluationContext::new(
            "w-2",
            json!({"engagement": {"score": 90}, "employment": {"department": "IT"}}),
        );
        assert_eq!(
            rule.evaluate(&partial).reason.as_deref(),
            Some("engagement.score is greater than 80")
        );
    }

    #[test]
    fn test_empty_group_never_matches() {
        let group = RuleGroup::and(Vec::new());
        let worker = EvaluationContext::new("w-1", json!({}));

        assert!(!group.evaluate(&worker).matched);
        assert!(!RuleGroup::or(Vec::new()).evaluate(&worker).matched);
        assert!(matches!(
            group.validate("rootGroup"),
            Err(RuleError::EmptyGroup { .. })
        ));
    }

    #[test]
    fn test_condition_validation() {
        assert!(Condition::without_value("email", Operator::Exists).validate("c").is_ok());
        assert!(Condition::new("email", Operator::IsEmpty, "ignored").validate("c").is_ok());
        assert!(Condition::without_value("email", Operator::Equals).validate("c").is_err());
        assert!(Condition::new("tags", Operator::In, "vip").validate("c").is_err());
        assert!(Condition::new("score", Operator::Between, json!([1])).validate("c").is_err());
        assert!(Condition::new("email", Operator::Equals, json!(["a"])).validate("c").is_err());
        assert!(Condition::new("", Operator::Equals, "a").validate("c").is_err());
    }

    #[test]
    fn test_nested_validation_path() {
        let rule = SegmentRule::new(
            RuleGroup::and(vec![Condition::new("email", Operator::Exists, json!(null))])
                .with_group(RuleGroup::or(vec![Condition::without_value(
                    "tags",
                    Operator::HasAny,
                )])),
        );

        match rule.validate() {
            Err(RuleError::InvalidCondition { path, .. }) => {
                assert_eq!(path, "rootGroup.groups[0].conditions[0]");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_referenced_fields() {
        let rule = SegmentRule::new(
            RuleGroup::and(vec![
                Condition::new("tags", Operator::HasAny, json!(["a"])),
                Condition::without_value("email", Operator::Exists),
            ])
            .with_group(RuleGroup::or(vec![Condition::new("tags", Operator::HasAll, json!(["b"]))])),
        );

        let fields: Vec<String> = rule.referenced_fields().into_iter().collect();
        assert_eq!(fields, vec!["email".to_string(), "tags".to_string()]);
    }

    #[test]
    fn test_null_optional_members_deserialize_as_defaults() {
        let rule: SegmentRule = serde_json::from_value(json!({"rootGroup": {
            "operator": "OR",
            "conditions": [{"field": "email", "operator": "exists", "negate": null}],
            "groups": null
        }}))
        .unwrap();

        let root = rule.root_group();
        assert!(!root.conditions()[0].is_negated());
        assert!(root.groups().is_empty());

        let group: RuleGroup =
            serde_json::from_value(json!({"operator": "AND", "conditions": null, "groups": []}))
                .unwrap();
        assert!(group.conditions().is_empty());
    }
}
