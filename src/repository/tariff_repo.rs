// ==========================================
// 关税归类与税费计算引擎 - 税率目录 Repository Trait
// ==========================================
// 职责: 定义税率目录数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::tariff::{CanonicalTariffRecord, RateImportReport, TariffRateChange};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

/// 目录刷新结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogRefreshSummary {
    pub records_written: usize,
    pub history_entries: usize,
}

// ==========================================
// TariffRepository Trait
// ==========================================
// 用途: 税率目录读（查询）/ 写（整体刷新）
// 实现者: TariffRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait TariffRepository: Send + Sync {
    // ===== 整体刷新（事务化）=====

    /// 用新快照整体替换税率目录
    ///
    /// # 参数
    /// - records: 合并后的规范化税率记录
    /// - import_batch_id: 导入批次号（写入历史表）
    ///
    /// # 返回
    /// - Ok(CatalogRefreshSummary): 写入记录数 + 历史条数
    /// - Err: 数据库错误（整个事务回滚）
    ///
    /// # 说明
    /// - 基准记录（ThirdCountry + 无原产地）税率变化时追加 tariff_rate_history
    async fn replace_catalog(
        &self,
        records: &[CanonicalTariffRecord],
        import_batch_id: &str,
    ) -> RepositoryResult<CatalogRefreshSummary>;

    // ===== 查询 =====

    /// 精确查询 10 位编码的全部记录
    async fn find_exact(&self, hs_code10: &str) -> RepositoryResult<Vec<CanonicalTariffRecord>>;

    /// 8 位前缀查询（按 hs_code10 升序）
    async fn find_by_prefix(&self, hs_code8: &str) -> RepositoryResult<Vec<CanonicalTariffRecord>>;

    /// 目录记录总数
    async fn count(&self) -> RepositoryResult<usize>;

    // ===== 历史与日志 =====

    /// 指定编码的税率变更历史（按时间升序）
    async fn list_history(&self, hs_code10: &str) -> RepositoryResult<Vec<TariffRateChange>>;

    /// 记录一次导入
    async fn insert_import_log(&self, report: &RateImportReport) -> RepositoryResult<()>;
}
