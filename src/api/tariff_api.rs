// ==========================================
// 关税归类与税费计算引擎 - 税率与归类 API
// ==========================================
// 职责: 税率导入 / 单编码与批量税率查询 / 归类层级浏览
// ==========================================

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::hierarchy::{ChapterEntry, HierarchyView};
use crate::domain::hs_code::digits_only;
use crate::domain::tariff::{RateImportReport, RateRecord, TariffRateChange};
use crate::engine::{BulkLookupReport, HierarchyResolver, TariffLookup};
use crate::importer::RateImporter;
use crate::repository::TariffRepository;

/// 税率与归类 API
pub struct TariffApi {
    importer: Arc<dyn RateImporter>,
    tariff_repo: Arc<dyn TariffRepository>,
    lookup: Arc<TariffLookup>,
    resolver: Arc<HierarchyResolver>,
}

impl TariffApi {
    pub fn new(
        importer: Arc<dyn RateImporter>,
        tariff_repo: Arc<dyn TariffRepository>,
        lookup: Arc<TariffLookup>,
        resolver: Arc<HierarchyResolver>,
    ) -> Self {
        Self {
            importer,
            tariff_repo,
            lookup,
            resolver,
        }
    }

    /// 导入归类文件 + 税则文件并整体替换税率目录
    pub async fn import_rates(
        &self,
        classification_path: &str,
        duty_path: &str,
    ) -> ApiResult<RateImportReport> {
        if classification_path.trim().is_empty() || duty_path.trim().is_empty() {
            return Err(ApiError::InvalidInput("文件路径不能为空".to_string()));
        }

        let report = self
            .importer
            .import_files(Path::new(classification_path), Path::new(duty_path))
            .await?;
        info!(
            batch_id = %report.batch_id,
            records_written = report.records_written,
            history_entries = report.history_entries,
            "税率目录已刷新"
        );
        Ok(report)
    }

    /// 查询单个编码的税率
    pub async fn lookup_rate(&self, hs_code: &str, origin: Option<&str>) -> ApiResult<RateRecord> {
        Ok(self.lookup.lookup(hs_code, origin).await?)
    }

    /// 批量查询（逐条记录成功 / 失败）
    pub async fn lookup_rates(&self, hs_codes: &[String], origin: Option<&str>) -> ApiResult<BulkLookupReport> {
        if hs_codes.is_empty() {
            return Err(ApiError::InvalidInput("编码列表不能为空".to_string()));
        }
        Ok(self.lookup.lookup_many(hs_codes, origin).await)
    }

    /// 归类层级视图
    pub async fn resolve_hierarchy(&self, hs_code: &str, origin: Option<&str>) -> ApiResult<HierarchyView> {
        Ok(self.resolver.resolve(hs_code, origin).await?)
    }

    /// 章索引
    pub async fn list_chapters(&self) -> ApiResult<Vec<ChapterEntry>> {
        Ok(self.resolver.chapter_index().await?)
    }

    /// 税率变更历史
    pub async fn rate_history(&self, hs_code: &str) -> ApiResult<Vec<TariffRateChange>> {
        let digits = digits_only(hs_code);
        if digits.is_empty() {
            return Err(ApiError::InvalidInput(format!("编码格式无效: {}", hs_code)));
        }
        let hs10 = crate::domain::hs_code::pad_right(&digits, 10);
        Ok(self.tariff_repo.list_history(&hs10).await?)
    }
}
