//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("规则结构错误: {0}")]
    Structural(String),

    #[error("无效的条件 '{path}': {message}")]
    InvalidCondition { path: String, message: String },

    #[error("逻辑组 '{path}' 不能为空")]
    EmptyGroup { path: String },

    #[error("规则执行失败: {0}")]
    EvaluationError(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
