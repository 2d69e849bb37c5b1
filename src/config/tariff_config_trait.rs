// ==========================================
// 关税归类与税费计算引擎 - 配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::FreightAllocationMethod;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::error::Error;

/// 配置读取结果
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// TariffConfigReader Trait
// ==========================================
// 用途: 查询 / 层级 / 翻译 / 计算所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait TariffConfigReader: Send + Sync {
    // ===== 缓存 TTL =====

    /// 层级查询结果 TTL（分钟）
    ///
    /// # 默认值
    /// - 30
    async fn get_hierarchy_cache_ttl_minutes(&self) -> ConfigResult<u64>;

    /// 精确税率查询 TTL（小时）
    ///
    /// # 默认值
    /// - 24
    async fn get_exact_lookup_ttl_hours(&self) -> ConfigResult<u64>;

    /// 近似税率查询 TTL（小时），应短于精确查询
    ///
    /// # 默认值
    /// - 6
    async fn get_approximate_lookup_ttl_hours(&self) -> ConfigResult<u64>;

    /// 静态参考列表 TTL（天）
    ///
    /// # 默认值
    /// - 7
    async fn get_reference_list_ttl_days(&self) -> ConfigResult<u64>;

    /// 翻译缓存 TTL（小时）
    ///
    /// # 默认值
    /// - 168
    async fn get_translation_cache_ttl_hours(&self) -> ConfigResult<u64>;

    // ===== 并发控制 =====

    /// 层级请求子商品税率并发上限（限定在 20~30）
    ///
    /// # 默认值
    /// - 25
    async fn get_child_rate_fanout_limit(&self) -> ConfigResult<usize>;

    /// 批量查询窗口大小
    ///
    /// # 默认值
    /// - 5
    async fn get_bulk_lookup_window_size(&self) -> ConfigResult<usize>;

    /// 批量查询窗口间隔（毫秒）
    ///
    /// # 默认值
    /// - 200
    async fn get_bulk_lookup_window_delay_ms(&self) -> ConfigResult<u64>;

    // ===== 税费计算 =====

    /// 税率记录缺失增值税率时的默认值（百分比）
    ///
    /// # 默认值
    /// - 20
    async fn get_default_vat_rate(&self) -> ConfigResult<Decimal>;

    /// 批次未指定时的运费分摊方式
    ///
    /// # 默认值
    /// - BY_VALUE
    async fn get_freight_allocation_method(&self) -> ConfigResult<FreightAllocationMethod>;

    // ===== 外部协作方 =====

    /// 翻译语言对 (source, target)
    ///
    /// # 默认值
    /// - ("en", "zh")
    async fn get_translation_languages(&self) -> ConfigResult<(String, String)>;

    /// 单次翻译超时（毫秒）
    ///
    /// # 默认值
    /// - 3000
    async fn get_translation_timeout_ms(&self) -> ConfigResult<u64>;

    /// 近似兄弟编码选择规则（按优先级排列的规则名）
    ///
    /// # 默认值
    /// - OTHER_CODE_SUFFIX,OTHER_DESCRIPTION,SHARED_PREFIX,LEXICAL
    async fn get_sibling_priority_policy(&self) -> ConfigResult<Vec<String>>;

    /// 远程归类服务根地址
    async fn get_classification_base_url(&self) -> ConfigResult<String>;

    /// 翻译服务地址（未配置时不翻译）
    async fn get_translation_endpoint(&self) -> ConfigResult<Option<String>>;
}
