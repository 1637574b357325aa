//! 条件评估器
//!
//! 实现各种操作符的评估逻辑，支持多种数据类型的比较。
//!
//! 记录一侧的类型不匹配（例如对非数字字符串做大小比较）只会得到 `false`，
//! 只有规则一侧的非法值（无效正则、错误的 between 区间等）才返回错误。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;

/// 正则缓存上限，超过后整体清空重建
const REGEX_CACHE_CAPACITY: usize = 256;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件（不含取反）
    ///
    /// # Arguments
    /// * `field_value` - 从记录中获取的字段值，字段不存在时为 None
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的期望值，无值操作符为 None
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: Option<&Value>,
    ) -> Result<bool> {
        match operator {
            Operator::IsEmpty => Ok(Self::is_empty(field_value)),
            Operator::IsNotEmpty => Ok(!Self::is_empty(field_value)),
            Operator::Exists => Ok(Self::exists(field_value)),
            Operator::NotExists => Ok(!Self::exists(field_value)),

            // 否定型操作符是对应肯定型的补集
            Operator::NotEquals => {
                Self::evaluate(field_value, Operator::Equals, expected_value).map(|r| !r)
            }
            Operator::NotContains => {
                Self::evaluate(field_value, Operator::Contains, expected_value).map(|r| !r)
            }
            Operator::NotIn => Self::evaluate(field_value, Operator::In, expected_value).map(|r| !r),

            _ => {
                let expected = Self::require_value(operator, expected_value)?;

                // 字段不存在时，肯定型操作都不成立，但仍需先校验规则侧的值
                let field = match field_value {
                    Some(Value::Null) | None => {
                        Self::check_expected(operator, expected)?;
                        return Ok(false);
                    }
                    Some(v) => v,
                };

                match operator {
                    Operator::Equals => Ok(Self::values_equal(field, expected)),
                    Operator::Contains => Ok(Self::contains(field, expected)),
                    Operator::StartsWith => Ok(Self::string_pair(field, expected)
                        .map(|(s, p)| s.starts_with(p))
                        .unwrap_or(false)),
                    Operator::EndsWith => Ok(Self::string_pair(field, expected)
                        .map(|(s, p)| s.ends_with(p))
                        .unwrap_or(false)),
                    Operator::Matches => Self::regex_match(field, expected),
                    Operator::GreaterThan => Ok(Self::ordering_is(field, expected, |o| {
                        o == Ordering::Greater
                    })),
                    Operator::GreaterThanOrEqual => Ok(Self::ordering_is(field, expected, |o| {
                        o != Ordering::Less
                    })),
                    Operator::LessThan => {
                        Ok(Self::ordering_is(field, expected, |o| o == Ordering::Less))
                    }
                    Operator::LessThanOrEqual => Ok(Self::ordering_is(field, expected, |o| {
                        o != Ordering::Greater
                    })),
                    Operator::Between => Self::between(field, expected),
                    Operator::Before => Self::time_compare(field, expected, |a, b| a < b),
                    Operator::After => Self::time_compare(field, expected, |a, b| a > b),
                    Operator::In => Self::in_list(field, expected),
                    Operator::HasAny => Self::has_any(field, expected),
                    Operator::HasAll => Self::has_all(field, expected),
                    Operator::IsEmpty
                    | Operator::IsNotEmpty
                    | Operator::Exists
                    | Operator::NotExists
                    | Operator::NotEquals
                    | Operator::NotContains
                    | Operator::NotIn => unreachable!("handled above"),
                }
            }
        }
    }

    fn require_value(operator: Operator, expected: Option<&Value>) -> Result<&Value> {
        match expected {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(RuleError::EvaluationError(format!(
                "{} 操作符需要条件值",
                operator
            ))),
        }
    }

    /// 字段缺失时仍需保证规则侧的值合法，保持失败关闭语义一致
    fn check_expected(operator: Operator, expected: &Value) -> Result<()> {
        match operator {
            Operator::Between => Self::range_bounds(expected).map(|_| ()),
            Operator::In | Operator::HasAny | Operator::HasAll => {
                Self::expected_array(operator, expected).map(|_| ())
            }
            Operator::Matches => Self::cached_regex(expected).map(|_| ()),
            Operator::Before | Operator::After => Self::expected_datetime(expected).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// 判断值是否为空
    fn is_empty(value: Option<&Value>) -> bool {
        match value {
            None => true,
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            _ => false,
        }
    }

    fn exists(value: Option<&Value>) -> bool {
        !matches!(value, None | Some(Value::Null))
    }

    /// 相等比较
    ///
    /// 数值统一转为浮点数，避免整数和浮点数比较失败（如 100 == 100.0）
    pub(crate) fn values_equal(field: &Value, expected: &Value) -> bool {
        if let (Value::Number(a), Value::Number(b)) = (field, expected) {
            if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
                return (a - b).abs() < f64::EPSILON;
            }
        }

        field == expected
    }

    /// 字符串子串或数组元素包含
    fn contains(field: &Value, expected: &Value) -> bool {
        match field {
            Value::String(s) => expected.as_str().is_some_and(|sub| s.contains(sub)),
            Value::Array(arr) => arr.iter().any(|item| Self::values_equal(item, expected)),
            _ => false,
        }
    }

    fn string_pair<'a>(field: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
        Some((field.as_str()?, expected.as_str()?))
    }

    /// 正则表达式匹配
    fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let regex = Self::cached_regex(expected)?;
        Ok(field.as_str().is_some_and(|s| regex.is_match(s)))
    }

    /// 从缓存获取已编译的正则，未命中时编译并写入
    fn cached_regex(expected: &Value) -> Result<Regex> {
        let pattern = expected.as_str().ok_or_else(|| {
            RuleError::EvaluationError("matches 操作符需要字符串正则".to_string())
        })?;

        let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

        if let Some(regex) = cache.read().get(pattern) {
            return Ok(regex.clone());
        }

        let regex = Regex::new(pattern).map_err(|e| {
            RuleError::EvaluationError(format!("无效的正则表达式 '{}': {}", pattern, e))
        })?;

        let mut guard = cache.write();
        if guard.len() >= REGEX_CACHE_CAPACITY {
            guard.clear();
        }
        guard.insert(pattern.to_string(), regex.clone());

        Ok(regex)
    }

    /// 比较两个值的顺序
    ///
    /// 数字按数值比较；字符串若两侧都能解析为日期则按时间比较，
    /// 都能解析为数字则按数值比较，否则按字典序；其他组合不可比较。
    pub(crate) fn compare(field: &Value, expected: &Value) -> Option<Ordering> {
        match (field, expected) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => {
                if let (Some(x), Some(y)) = (parse_datetime(a), parse_datetime(b)) {
                    return Some(x.cmp(&y));
                }
                if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
                    return x.partial_cmp(&y);
                }
                Some(a.cmp(b))
            }
            (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse().ok()?),
            (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
            _ => None,
        }
    }

    fn ordering_is<F>(field: &Value, expected: &Value, accept: F) -> bool
    where
        F: Fn(Ordering) -> bool,
    {
        Self::compare(field, expected).is_some_and(accept)
    }

    fn range_bounds(expected: &Value) -> Result<(&Value, &Value)> {
        match expected.as_array().map(Vec::as_slice) {
            Some([min, max]) => Ok((min, max)),
            _ => Err(RuleError::EvaluationError(
                "between 操作符需要 [min, max] 数组".to_string(),
            )),
        }
    }

    /// 闭区间范围比较
    fn between(field: &Value, expected: &Value) -> Result<bool> {
        let (min, max) = Self::range_bounds(expected)?;

        let above_min = Self::ordering_is(field, min, |o| o != Ordering::Less);
        let below_max = Self::ordering_is(field, max, |o| o != Ordering::Greater);

        Ok(above_min && below_max)
    }

    fn expected_array(operator: Operator, expected: &Value) -> Result<&Vec<Value>> {
        expected.as_array().ok_or_else(|| {
            RuleError::EvaluationError(format!("{} 操作符需要数组值", operator))
        })
    }

    /// 标量字段属于列表；数组字段是列表的非空子集
    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let list = Self::expected_array(Operator::In, expected)?;

        let contained = |item: &Value| list.iter().any(|v| Self::values_equal(item, v));

        Ok(match field {
            Value::Array(items) => !items.is_empty() && items.iter().all(contained),
            scalar => contained(scalar),
        })
    }

    /// 数组字段与列表有交集（标量字段视为单元素数组）
    fn has_any(field: &Value, expected: &Value) -> Result<bool> {
        let list = Self::expected_array(Operator::HasAny, expected)?;
        let items = Self::as_items(field);

        Ok(list
            .iter()
            .any(|wanted| items.iter().any(|item| Self::values_equal(item, wanted))))
    }

    /// 数组字段包含列表中的全部元素
    fn has_all(field: &Value, expected: &Value) -> Result<bool> {
        let list = Self::expected_array(Operator::HasAll, expected)?;
        let items = Self::as_items(field);

        Ok(list
            .iter()
            .all(|wanted| items.iter().any(|item| Self::values_equal(item, wanted))))
    }

    fn as_items(field: &Value) -> &[Value] {
        match field {
            Value::Array(items) => items.as_slice(),
            scalar => std::slice::from_ref(scalar),
        }
    }

    fn expected_datetime(expected: &Value) -> Result<DateTime<Utc>> {
        expected
            .as_str()
            .and_then(parse_datetime)
            .ok_or_else(|| RuleError::EvaluationError(format!("无法解析日期时间: {}", expected)))
    }

    /// 时间比较
    fn time_compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        let expected_time = Self::expected_datetime(expected)?;

        Ok(field
            .as_str()
            .and_then(parse_datetime)
            .is_some_and(|field_time| cmp(field_time, expected_time)))
    }
}

/// 解析日期时间
///
/// 支持 RFC 3339、不带时区的 `YYYY-MM-DDTHH:MM:SS`（按 UTC）和纯日期 `YYYY-MM-DD`。
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
