//! 字段注册表与字段访问器
//!
//! 注册表是"允许使用哪些字段"的唯一来源：校验器用它判断字段和操作符是否合法，
//! 评估器和优化器用同一个 `FieldAccessor` 从记录中取值，避免两边漂移。

use crate::operators::Operator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 组织自定义字段的路径前缀
pub const CUSTOM_FIELD_PREFIX: &str = "customFields.";

/// 预编译的点号路径访问器
///
/// 路径在构造时切分一次，之后每条记录只做逐段查找。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAccessor {
    path: String,
    segments: Vec<String>,
}

impl FieldAccessor {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let segments = path.split('.').map(str::to_string).collect();
        Self { path, segments }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 沿路径取值，任一中间节点缺失时返回 None
    pub fn resolve<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        walk(data, self.segments.iter().map(String::as_str))
    }
}

/// 逐段下钻 JSON，访问器和按路径查找共用这一个实现
///
/// 数组节点支持数字下标，如 "contact.phones.0"。
pub(crate) fn walk<'a, 'p>(
    data: &'a Value,
    segments: impl IntoIterator<Item = &'p str>,
) -> Option<&'a Value> {
    let mut current = data;

    for segment in segments {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            Value::Array(arr) => {
                let index: usize = segment.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// 字段数据类型，决定允许的操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Array,
}

impl FieldType {
    /// 该类型字段是否支持指定操作符
    pub fn supports(&self, operator: Operator) -> bool {
        use Operator::*;

        // 存在性检查对所有类型开放
        if matches!(operator, IsEmpty | IsNotEmpty | Exists | NotExists) {
            return true;
        }

        match self {
            Self::String => matches!(
                operator,
                Equals
                    | NotEquals
                    | Contains
                    | NotContains
                    | StartsWith
                    | EndsWith
                    | Matches
                    | In
                    | NotIn
            ),
            Self::Number => matches!(
                operator,
                Equals
                    | NotEquals
                    | GreaterThan
                    | GreaterThanOrEqual
                    | LessThan
                    | LessThanOrEqual
                    | Between
                    | In
                    | NotIn
            ),
            Self::Boolean => matches!(operator, Equals | NotEquals),
            Self::Date => matches!(
                operator,
                Equals
                    | NotEquals
                    | Before
                    | After
                    | GreaterThan
                    | GreaterThanOrEqual
                    | LessThan
                    | LessThanOrEqual
                    | Between
            ),
            Self::Array => matches!(
                operator,
                Contains | NotContains | HasAny | HasAll | In | NotIn
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Array => "array",
        }
    }
}

/// 字段定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub path: String,
    pub field_type: FieldType,
    pub label: String,
}

impl FieldDefinition {
    pub fn new(path: impl Into<String>, field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            field_type,
            label: label.into(),
        }
    }
}

/// 字段注册表（白名单）
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: BTreeMap<String, FieldDefinition>,
}

impl FieldRegistry {
    /// 创建空注册表
    pub fn empty() -> Self {
        Self::default()
    }

    /// 内置的 worker 字段白名单
    pub fn worker_defaults() -> Self {
        use FieldType::*;

        let defaults = [
            // 个人信息
            ("firstName", String, "First name"),
            ("lastName", String, "Last name"),
            ("email", String, "Email"),
            ("dateOfBirth", Date, "Date of birth"),
            ("gender", String, "Gender"),
            ("language", String, "Language"),
            ("tags", Array, "Tags"),
            // 联系方式
            ("contact.phoneNumber", String, "Phone number"),
            ("contact.secondaryPhoneNumber", String, "Secondary phone number"),
            ("contact.address.city", String, "City"),
            ("contact.address.country", String, "Country"),
            ("contact.address.postalCode", String, "Postal code"),
            // 雇佣信息
            ("employment.department", String, "Department"),
            ("employment.jobTitle", String, "Job title"),
            ("employment.location", String, "Work location"),
            ("employment.employmentType", String, "Employment type"),
            ("employment.status", String, "Employment status"),
            ("employment.managerId", String, "Manager"),
            ("employment.startDate", Date, "Start date"),
            ("employment.seniorityYears", Number, "Seniority (years)"),
            // 参与度
            ("engagement.score", Number, "Engagement score"),
            ("engagement.lastActiveAt", Date, "Last active"),
            ("engagement.sessionsCount", Number, "Sessions"),
            ("engagement.channels", Array, "Engagement channels"),
            // 身心健康
            ("wellbeing.score", Number, "Wellbeing score"),
            ("wellbeing.riskLevel", String, "Wellbeing risk level"),
            ("wellbeing.lastCheckInAt", Date, "Last wellbeing check-in"),
            // 游戏化
            ("gamification.points", Number, "Points"),
            ("gamification.level", Number, "Level"),
            ("gamification.badges", Array, "Badges"),
            ("gamification.optedIn", Boolean, "Gamification opt-in"),
        ];

        let mut registry = Self::empty();
        for (path, field_type, label) in defaults {
            registry.register(FieldDefinition::new(path, field_type, label));
        }
        registry
    }

    /// 注册（或覆盖）字段
    pub fn register(&mut self, definition: FieldDefinition) {
        self.fields.insert(definition.path.clone(), definition);
    }

    pub fn get(&self, path: &str) -> Option<&FieldDefinition> {
        self.fields.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 所有字段定义（按路径排序）
    pub fn definitions(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }
}
