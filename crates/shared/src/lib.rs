//! 共享库
//!
//! 包含分群服务与规则引擎共用的配置加载和可观测性基础设施代码。

pub mod config;
pub mod observability;
