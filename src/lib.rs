// ==========================================
// 关税归类与税费计算引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + 远程归类服务
// 系统定位: 进口业务平台的税率目录、归类浏览与税费计算子系统
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 税率文件
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 外部协作方 - 归类服务 / 翻译服务 / TTL 缓存
pub mod infra;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 实例组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    FreightAllocationMethod, HsLevel, Incoterm, MatchKind, MeasureKind, ValuationBasis,
};

// 领域实体
pub use domain::{
    BatchCalculationResult, BatchTotals, CalculationOptions, CanonicalTariffRecord, CargoItem,
    HierarchyView, HsCode, HsNode, ImportBatch, RateRecord, TariffCatalog, TaxBreakdown,
};

// 引擎
pub use engine::{
    CustomsValuationEngine, DutyCalculationService, HierarchyResolver, TariffLookup,
    TariffMerger, TaxCalculator,
};

// API
pub use api::{ApiError, ApiResult, DutyApi, TariffApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "关税归类与税费计算引擎";
