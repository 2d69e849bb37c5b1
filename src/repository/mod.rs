// ==========================================
// 关税归类与税费计算引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod columns;
pub mod error;
pub mod shipment_repo;
pub mod tariff_repo;
pub mod tariff_repo_impl;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use shipment_repo::{ShipmentRepository, ShipmentRepositoryImpl};
pub use tariff_repo::{CatalogRefreshSummary, TariffRepository};
pub use tariff_repo_impl::TariffRepositoryImpl;
