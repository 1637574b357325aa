//! worker 记录
//!
//! 外部只读数据：属性以嵌套 JSON 存放，通过点号路径访问，分群系统从不修改它。

use rule_engine::models::resolve_path;
use rule_engine::{FieldLookup, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub attributes: Value,
}

impl Worker {
    pub fn new(id: impl Into<String>, organization_id: impl Into<String>, attributes: Value) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            attributes,
        }
    }

    /// 展示名：姓名优先，其次邮箱，最后回退到 ID
    pub fn display_name(&self) -> String {
        let part = |path: &str| {
            resolve_path(&self.attributes, path)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        match (part("firstName"), part("lastName")) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.to_string(),
            (None, None) => part("email")
                .map(str::to_string)
                .unwrap_or_else(|| self.id.clone()),
        }
    }
}

impl FieldLookup for Worker {
    fn field(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.attributes, path)
    }
}

impl Record for Worker {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn document(&self) -> &Value {
        &self.attributes
    }
}

/// 分页查询结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerPage {
    pub records: Vec<Worker>,
    pub total: usize,
}
