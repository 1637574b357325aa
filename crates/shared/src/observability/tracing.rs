//! 日志初始化模块
//!
//! 基于 tracing-subscriber 构建环境过滤器和格式化输出层，
//! 支持 json（结构化）与 pretty（人类可读）两种格式。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// Tracing 资源守卫
///
/// 目前只标记订阅者已安装，保留与指标守卫一致的生命周期管理方式。
pub struct TracingGuard {
    _installed: (),
}

/// 初始化 tracing（日志）
///
/// RUST_LOG 优先于配置文件中的 log_level。
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let env_filter = build_filter(&config.log_level);

    let fmt_layer = if is_json(&config.log_format) {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(TracingGuard { _installed: () })
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn is_json(log_format: &str) -> bool {
    log_format.eq_ignore_ascii_case("json")
}
