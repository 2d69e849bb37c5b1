// ==========================================
// 关税归类与税费计算引擎 - 配置层
// ==========================================
// 职责: 系统配置管理（缓存 TTL / 并发窗口 / 默认税率 / 外部服务）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod tariff_config_trait;

// 重导出核心配置管理器
pub use config_manager::{
    config_keys, ConfigManager, DEFAULT_CLASSIFICATION_BASE_URL, DEFAULT_SIBLING_PRIORITY_POLICY,
};
pub use tariff_config_trait::{ConfigResult, TariffConfigReader};
