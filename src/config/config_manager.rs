// ==========================================
// 关税归类与税费计算引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::tariff_config_trait::{ConfigResult, TariffConfigReader};
use crate::db::open_sqlite_connection;
use crate::domain::types::FreightAllocationMethod;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self
            .get_config_value(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    /// 读取数值配置，格式错误时回退默认值并告警
    fn get_number_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + ToString + Copy,
    {
        let value = self.get_config_or_default(key, &default.to_string())?;
        Ok(value.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(
                config_key = key,
                raw_value = %value,
                "配置格式错误，使用默认值"
            );
            default
        }))
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> ConfigResult<HashMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(config_map)
    }
}

// ==========================================
// TariffConfigReader Trait 实现
// ==========================================
#[async_trait]
impl TariffConfigReader for ConfigManager {
    // ===== 缓存 TTL =====

    async fn get_hierarchy_cache_ttl_minutes(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::HIERARCHY_CACHE_TTL_MINUTES, 30)
    }

    async fn get_exact_lookup_ttl_hours(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::EXACT_LOOKUP_TTL_HOURS, 24)
    }

    async fn get_approximate_lookup_ttl_hours(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::APPROXIMATE_LOOKUP_TTL_HOURS, 6)
    }

    async fn get_reference_list_ttl_days(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::REFERENCE_LIST_TTL_DAYS, 7)
    }

    async fn get_translation_cache_ttl_hours(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::TRANSLATION_CACHE_TTL_HOURS, 168)
    }

    // ===== 并发控制 =====

    async fn get_child_rate_fanout_limit(&self) -> ConfigResult<usize> {
        let value = self.get_number_or_default(config_keys::CHILD_RATE_FANOUT_LIMIT, 25usize)?;
        Ok(value.clamp(20, 30))
    }

    async fn get_bulk_lookup_window_size(&self) -> ConfigResult<usize> {
        let value = self.get_number_or_default(config_keys::BULK_LOOKUP_WINDOW_SIZE, 5usize)?;
        Ok(value.max(1))
    }

    async fn get_bulk_lookup_window_delay_ms(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::BULK_LOOKUP_WINDOW_DELAY_MS, 200)
    }

    // ===== 税费计算 =====

    async fn get_default_vat_rate(&self) -> ConfigResult<Decimal> {
        let value = self.get_config_or_default(config_keys::DEFAULT_VAT_RATE, "20")?;
        Ok(Decimal::from_str(&value).unwrap_or_else(|_| {
            tracing::warn!(config_key = config_keys::DEFAULT_VAT_RATE, raw_value = %value, "配置格式错误，使用默认值");
            Decimal::from(20)
        }))
    }

    async fn get_freight_allocation_method(&self) -> ConfigResult<FreightAllocationMethod> {
        let value = self.get_config_or_default(config_keys::FREIGHT_ALLOCATION_METHOD, "BY_VALUE")?;
        Ok(FreightAllocationMethod::parse(&value))
    }

    // ===== 外部协作方 =====

    async fn get_translation_languages(&self) -> ConfigResult<(String, String)> {
        let source = self.get_config_or_default(config_keys::TRANSLATION_SOURCE_LANG, "en")?;
        let target = self.get_config_or_default(config_keys::TRANSLATION_TARGET_LANG, "zh")?;
        Ok((source, target))
    }

    async fn get_translation_timeout_ms(&self) -> ConfigResult<u64> {
        self.get_number_or_default(config_keys::TRANSLATION_TIMEOUT_MS, 3000)
    }

    async fn get_sibling_priority_policy(&self) -> ConfigResult<Vec<String>> {
        let value = self.get_config_or_default(
            config_keys::SIBLING_PRIORITY_POLICY,
            DEFAULT_SIBLING_PRIORITY_POLICY,
        )?;

        let rules: Vec<String> = value
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        if rules.is_empty() {
            Ok(DEFAULT_SIBLING_PRIORITY_POLICY
                .split(',')
                .map(str::to_string)
                .collect())
        } else {
            Ok(rules)
        }
    }

    async fn get_classification_base_url(&self) -> ConfigResult<String> {
        self.get_config_or_default(
            config_keys::CLASSIFICATION_BASE_URL,
            DEFAULT_CLASSIFICATION_BASE_URL,
        )
    }

    async fn get_translation_endpoint(&self) -> ConfigResult<Option<String>> {
        Ok(self
            .get_config_value(config_keys::TRANSLATION_ENDPOINT)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }
}

pub const DEFAULT_SIBLING_PRIORITY_POLICY: &str =
    "OTHER_CODE_SUFFIX,OTHER_DESCRIPTION,SHARED_PREFIX,LEXICAL";

pub const DEFAULT_CLASSIFICATION_BASE_URL: &str =
    "https://www.trade-tariff.service.gov.uk/api/v2/";

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 缓存 TTL
    pub const HIERARCHY_CACHE_TTL_MINUTES: &str = "hierarchy_cache_ttl_minutes";
    pub const EXACT_LOOKUP_TTL_HOURS: &str = "exact_lookup_ttl_hours";
    pub const APPROXIMATE_LOOKUP_TTL_HOURS: &str = "approximate_lookup_ttl_hours";
    pub const REFERENCE_LIST_TTL_DAYS: &str = "reference_list_ttl_days";
    pub const TRANSLATION_CACHE_TTL_HOURS: &str = "translation_cache_ttl_hours";

    // 并发
    pub const CHILD_RATE_FANOUT_LIMIT: &str = "child_rate_fanout_limit";
    pub const BULK_LOOKUP_WINDOW_SIZE: &str = "bulk_lookup_window_size";
    pub const BULK_LOOKUP_WINDOW_DELAY_MS: &str = "bulk_lookup_window_delay_ms";

    // 税费
    pub const DEFAULT_VAT_RATE: &str = "default_vat_rate";
    pub const FREIGHT_ALLOCATION_METHOD: &str = "freight_allocation_method";

    // 外部协作方
    pub const TRANSLATION_SOURCE_LANG: &str = "translation_source_lang";
    pub const TRANSLATION_TARGET_LANG: &str = "translation_target_lang";
    pub const TRANSLATION_TIMEOUT_MS: &str = "translation_timeout_ms";
    pub const SIBLING_PRIORITY_POLICY: &str = "sibling_priority_policy";
    pub const CLASSIFICATION_BASE_URL: &str = "classification_base_url";
    pub const TRANSLATION_ENDPOINT: &str = "translation_endpoint";
}
