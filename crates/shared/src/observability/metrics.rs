//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 同步任务是批处理进程，不常驻 HTTP 端口。开启 `metrics_enabled` 时，
//! `segment-sync` 退出前通过 `render_metrics` 把快照写进日志。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _handle: PrometheusHandle,
}

/// 安装 Prometheus recorder 并注册指标描述
pub fn init(service_name: &str) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    Ok(MetricsHandle { _handle: handle })
}

/// 注册通用指标（预定义的业务指标）
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("segment_sync_jobs_total", "Total number of segment sync jobs");
    metrics::describe_histogram!(
        "segment_sync_duration_seconds",
        "Segment sync duration in seconds"
    );

    metrics::describe_counter!(
        "segment_memberships_added_total",
        "Memberships added by rule evaluation"
    );
    metrics::describe_counter!(
        "segment_memberships_removed_total",
        "Rule-matched memberships removed by rule evaluation"
    );

    metrics::describe_counter!("rule_evaluations_total", "Total number of rule evaluations");
    metrics::describe_histogram!(
        "rule_batch_evaluation_duration_seconds",
        "Batch rule evaluation duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 渲染当前指标快照（recorder 未安装时返回 None）
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// 记录同步任务结束
#[inline]
pub fn record_sync_job(status: &str, duration_secs: f64) {
    metrics::counter!(
        "segment_sync_jobs_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "segment_sync_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录成员变更
#[inline]
pub fn record_membership_changes(source: &str, added: u64, removed: u64) {
    metrics::counter!(
        "segment_memberships_added_total",
        "source" => source.to_string()
    )
    .increment(added);

    metrics::counter!(
        "segment_memberships_removed_total",
        "source" => source.to_string()
    )
    .increment(removed);
}

/// 记录一批规则评估
#[inline]
pub fn record_rule_batch(total: u64, matched: u64, duration_secs: f64) {
    metrics::counter!("rule_evaluations_total", "matched" => "true").increment(matched);
    metrics::counter!("rule_evaluations_total", "matched" => "false")
        .increment(total.saturating_sub(matched));

    metrics::histogram!("rule_batch_evaluation_duration_seconds").record(duration_secs);
}
