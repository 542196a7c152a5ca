use crate::error::MatchError;
use crate::models::{PolicyRegistry, TolerancePolicy};
use crate::service::MatchOptions;
use bigdecimal::BigDecimal;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// 内存存储的数据库 URL 前缀
pub const MEMORY_URL_PREFIX: &str = "memory://";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// 单条存储操作的超时，同时作为慢查询日志阈值
    pub statement_timeout_secs: u64,
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with(MEMORY_URL_PREFIX)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub lookback_days: i64,
    pub batch_concurrency: usize,
    pub default_policy: PolicyConfig,
    /// 租户 id -> 策略
    #[serde(default)]
    pub tenant_policies: HashMap<String, PolicyConfig>,
}

impl MatchingConfig {
    /// 编排参数，越界直接报错
    pub fn options(&self) -> Result<MatchOptions, MatchError> {
        let options = MatchOptions {
            lookback_days: self.lookback_days,
            batch_concurrency: self.batch_concurrency,
        };
        options.validate()?;
        Ok(options)
    }
}

/// 配置文件中的容差 (比例用字符串书写，避免浮点误差)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub amount_tolerance_pct: String,
    pub quantity_tolerance_pct: String,
    pub date_tolerance_days: i64,
}

fn parse_pct(field: &str, raw: &str) -> Result<BigDecimal, MatchError> {
    BigDecimal::from_str(raw.trim())
        .map_err(|e| MatchError::InvalidPolicy(format!("{} `{}` is not a decimal: {}", field, raw, e)))
}

impl PolicyConfig {
    pub fn to_policy(&self) -> Result<TolerancePolicy, MatchError> {
        TolerancePolicy::new(
            parse_pct("amount_tolerance_pct", &self.amount_tolerance_pct)?,
            parse_pct("quantity_tolerance_pct", &self.quantity_tolerance_pct)?,
            self.date_tolerance_days,
        )
    }
}

impl AppConfig {
    /// 默认值 → config/matching.toml (可选) → MATCHING__* 环境变量 → 兼容旧变量
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/matching")
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "postgres://localhost/txn_match")?
            .set_default("database.max_connections", 20)?
            .set_default("database.statement_timeout_secs", 5)?
            .set_default("database.run_migrations", true)?
            .set_default("matching.lookback_days", 180)?
            .set_default("matching.batch_concurrency", 8)?
            .set_default("matching.default_policy.amount_tolerance_pct", "0.05")?
            .set_default("matching.default_policy.quantity_tolerance_pct", "0.05")?
            .set_default("matching.default_policy.date_tolerance_days", 7)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("MATCHING").separator("__"))
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .build()?
            .try_deserialize::<Self>()?;

        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }

    /// 加载时校验编排参数与全部容差策略
    pub fn validate(&self) -> Result<(), MatchError> {
        self.matching.options()?;
        self.policy_registry()?;
        Ok(())
    }

    /// 构建并校验租户策略表；负数容差或无法解析的租户 id 直接报错
    pub fn policy_registry(&self) -> Result<PolicyRegistry, MatchError> {
        let mut registry = PolicyRegistry::new(self.matching.default_policy.to_policy()?);
        for (tenant, policy) in &self.matching.tenant_policies {
            let tenant_id = Uuid::parse_str(tenant)
                .map_err(|e| MatchError::InvalidPolicy(format!("tenant id `{}`: {}", tenant, e)))?;
            registry = registry.with_tenant(tenant_id, policy.to_policy()?);
        }
        Ok(registry)
    }
}
