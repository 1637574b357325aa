//! 规则操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 通用比较
    Equals,
    NotEquals,

    // 字符串/数组包含
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,

    // 数值/日期比较
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    Before,
    After,

    // 集合操作
    In,
    NotIn,
    HasAny,
    HasAll,

    // 空值检查
    IsEmpty,
    IsNotEmpty,
    Exists,
    NotExists,
}

/// 操作符对条件值形状的要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// 不需要值
    None,
    /// 单个标量值（字符串、数字、布尔）
    Scalar,
    /// 数组值
    Array,
    /// 恰好两个元素的数组 [min, max]
    Range,
}

impl Operator {
    pub const ALL: [Operator; 22] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Matches,
        Self::GreaterThan,
        Self::GreaterThanOrEqual,
        Self::LessThan,
        Self::LessThanOrEqual,
        Self::Between,
        Self::Before,
        Self::After,
        Self::In,
        Self::NotIn,
        Self::HasAny,
        Self::HasAll,
        Self::IsEmpty,
        Self::IsNotEmpty,
        Self::Exists,
        Self::NotExists,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Matches => "matches",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::Between => "between",
            Self::Before => "before",
            Self::After => "after",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::HasAny => "has_any",
            Self::HasAll => "has_all",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }

    /// 该操作符要求的值形状
    pub fn value_shape(&self) -> ValueShape {
        match self {
            Self::IsEmpty | Self::IsNotEmpty | Self::Exists | Self::NotExists => ValueShape::None,
            Self::In | Self::NotIn | Self::HasAny | Self::HasAll => ValueShape::Array,
            Self::Between => ValueShape::Range,
            Self::Equals
            | Self::NotEquals
            | Self::Contains
            | Self::NotContains
            | Self::StartsWith
            | Self::EndsWith
            | Self::Matches
            | Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::LessThan
            | Self::LessThanOrEqual
            | Self::Before
            | Self::After => ValueShape::Scalar,
        }
    }

    /// 是否为无值操作符
    pub fn is_no_value(&self) -> bool {
        self.value_shape() == ValueShape::None
    }

    /// 自然语言短语，用于审计和 UI 展示
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "does not equal",
            Self::Contains => "contains",
            Self::NotContains => "does not contain",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::Matches => "matches pattern",
            Self::GreaterThan => "is greater than",
            Self::GreaterThanOrEqual => "is greater than or equal to",
            Self::LessThan => "is less than",
            Self::LessThanOrEqual => "is less than or equal to",
            Self::Between => "is between",
            Self::Before => "is before",
            Self::After => "is after",
            Self::In => "is one of",
            Self::NotIn => "is not one of",
            Self::HasAny => "has any of",
            Self::HasAll => "has all of",
            Self::IsEmpty => "is empty",
            Self::IsNotEmpty => "is not empty",
            Self::Exists => "exists",
            Self::NotExists => "does not exist",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("未知操作符: {}", s))
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

impl FromStr for LogicalOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            other => Err(format!("未知逻辑操作符: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_string_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.as_str()));
        }
    }

    #[test]
    fn test_value_shapes() {
        assert_eq!(Operator::Exists.value_shape(), ValueShape::None);
        assert_eq!(Operator::HasAll.value_shape(), ValueShape::Array);
        assert_eq!(Operator::Between.value_shape(), ValueShape::Range);
        assert_eq!(Operator::StartsWith.value_shape(), ValueShape::Scalar);
        assert!(Operator::IsEmpty.is_no_value());
        assert!(!Operator::In.is_no_value());
    }

    #[test]
    fn test_unknown_operator() {
        assert!("like".parse::<Operator>().is_err());
        assert!("and".parse::<LogicalOperator>().is_err());
        assert_eq!("OR".parse::<LogicalOperator>().unwrap(), LogicalOperator::Or);
    }
}
