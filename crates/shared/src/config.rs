//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 同步任务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 每批评估的 worker 数量，同时决定字段缓存的最大生命周期
    pub batch_size: usize,
    /// 未指定 full_sync 时默认拉取的候选 worker 数量（第一页）
    pub default_page_size: usize,
    /// 等待同一分群上一次同步结束的最长时间
    pub lock_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            default_page_size: 1000,
            lock_timeout_ms: 30_000,
        }
    }
}

/// 规则试算配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleTestingConfig {
    pub default_sample_size: usize,
    pub max_sample_size: usize,
    /// 结果中命中/未命中样本各自的上限
    pub sample_cap: usize,
}

impl Default for RuleTestingConfig {
    fn default() -> Self {
        Self {
            default_sample_size: 100,
            max_sample_size: 1000,
            sample_cap: 5,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub sync: SyncConfig,
    pub testing: RuleTestingConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "segment-service".to_string(),
            environment: "development".to_string(),
            sync: SyncConfig::default(),
            testing: RuleTestingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（SEGMENT_ 前缀，段之间用双下划线，如 SEGMENT_SYNC__BATCH_SIZE -> sync.batch_size）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("SEGMENT_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("SEGMENT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
