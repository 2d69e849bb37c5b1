// ==========================================
// 关税归类与税费计算引擎 - 税率导入器实现
// ==========================================
// 职责: 整合导入流程，从文件到税率目录
// 流程: 解析 → 列识别 → 映射/清洗 → 合并 → 目录整体替换 → 导入日志
// ==========================================

use crate::domain::tariff::{ClassificationRecord, RateImportReport, TariffMeasure};
use crate::engine::tariff_merger::TariffMerger;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{ColumnMap, RateFieldMapper};
use crate::importer::file_parser::{RawSheet, UniversalFileParser};
use crate::importer::rate_importer_trait::{FieldMapper, FileParser, RateImporter};
use crate::repository::TariffRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 单类工作表的映射结果
struct MappedSheets<T> {
    records: Vec<T>,
    discarded: usize,
    skipped: Vec<String>,
}

// ==========================================
// RateImporterImpl - 税率导入器实现
// ==========================================
pub struct RateImporterImpl<R>
where
    R: TariffRepository,
{
    // 数据访问层
    tariff_repo: R,

    // 导入组件
    file_parser: Box<dyn FileParser>,
    field_mapper: Box<dyn FieldMapper>,
    merger: TariffMerger,
}

impl<R> RateImporterImpl<R>
where
    R: TariffRepository,
{
    /// 使用默认组件创建导入器
    pub fn new(tariff_repo: R) -> Self {
        Self::with_components(
            tariff_repo,
            Box::new(UniversalFileParser),
            Box::new(RateFieldMapper::new()),
        )
    }

    /// 注入自定义解析器 / 映射器
    pub fn with_components(
        tariff_repo: R,
        file_parser: Box<dyn FileParser>,
        field_mapper: Box<dyn FieldMapper>,
    ) -> Self {
        Self {
            tariff_repo,
            file_parser,
            field_mapper,
            merger: TariffMerger::new(),
        }
    }

    /// 映射一组工作表
    ///
    /// # 说明
    /// - 未识别出商品编码列的工作表整表跳过（warn，不中断）
    /// - 编码非法的行逐行丢弃（debug，最后汇总计数）
    fn map_sheets<T, F>(&self, sheets: &[RawSheet], map_row: F) -> MappedSheets<T>
    where
        F: Fn(&HashMap<String, String>, &ColumnMap, usize) -> Option<T>,
    {
        let mut out = MappedSheets {
            records: Vec::new(),
            discarded: 0,
            skipped: Vec::new(),
        };

        for sheet in sheets {
            let Some(columns) = self.field_mapper.resolve_columns(&sheet.headers) else {
                warn!(sheet = %sheet.name, headers = ?sheet.headers, "工作表缺少商品编码列，跳过");
                out.skipped.push(sheet.name.clone());
                continue;
            };

            for (idx, row) in sheet.rows.iter().enumerate() {
                // 表头占第 1 行
                let row_number = idx + 2;
                match map_row(row, &columns, row_number) {
                    Some(record) => out.records.push(record),
                    None => {
                        debug!(sheet = %sheet.name, row_number, "商品编码非法，丢弃");
                        out.discarded += 1;
                    }
                }
            }
        }

        out
    }
}

#[async_trait]
impl<R> RateImporter for RateImporterImpl<R>
where
    R: TariffRepository + Send + Sync,
{
    #[instrument(skip(self, classification_path, duty_path))]
    async fn import_files(
        &self,
        classification_path: &Path,
        duty_path: &Path,
    ) -> ImportResult<RateImportReport> {
        info!(
            classification = %classification_path.display(),
            duty = %duty_path.display(),
            "开始导入税率文件"
        );

        // === 步骤 0: 解析文件 ===
        let classification_sheets = self.file_parser.parse_sheets(classification_path)?;
        let duty_sheets = self.file_parser.parse_sheets(duty_path)?;
        debug!(
            classification_sheets = classification_sheets.len(),
            duty_sheets = duty_sheets.len(),
            "文件解析完成"
        );

        self.import_sheets(classification_sheets, duty_sheets).await
    }

    #[instrument(skip(self, classification_sheets, duty_sheets), fields(batch_id))]
    async fn import_sheets(
        &self,
        classification_sheets: Vec<RawSheet>,
        duty_sheets: Vec<RawSheet>,
    ) -> ImportResult<RateImportReport> {
        let start_time = Instant::now();
        let batch_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("batch_id", batch_id.as_str());

        // === 步骤 1: 列识别 + 行映射 ===
        let classifications: MappedSheets<ClassificationRecord> =
            self.map_sheets(&classification_sheets, |row, columns, row_number| {
                self.field_mapper.map_classification(row, columns, row_number)
            });
        let measures: MappedSheets<TariffMeasure> =
            self.map_sheets(&duty_sheets, |row, columns, row_number| {
                self.field_mapper.map_measure(row, columns, row_number)
            });

        let discarded_rows = classifications.discarded + measures.discarded;
        info!(
            classification_rows = classifications.records.len(),
            duty_rows = measures.records.len(),
            discarded_rows,
            "字段映射完成"
        );

        // 两份数据都为空时不刷新目录（避免清空现有目录）
        if classifications.records.is_empty() && measures.records.is_empty() {
            warn!(batch_id = %batch_id, "没有可导入的归类或税则数据");
            return Err(ImportError::NoClassificationData);
        }

        // === 步骤 2: 合并 ===
        let catalog = self
            .merger
            .merge(&classifications.records, &measures.records);

        // === 步骤 3: 目录整体替换 ===
        let summary = self
            .tariff_repo
            .replace_catalog(catalog.records(), &batch_id)
            .await
            .map_err(|e| ImportError::CatalogWriteError(e.to_string()))?;

        let mut skipped_sheets = classifications.skipped;
        skipped_sheets.extend(measures.skipped);

        let report = RateImportReport {
            batch_id: batch_id.clone(),
            classification_rows: classifications.records.len(),
            duty_rows: measures.records.len(),
            discarded_rows,
            skipped_sheets,
            records_written: summary.records_written,
            history_entries: summary.history_entries,
            elapsed_ms: start_time.elapsed().as_millis(),
        };

        // === 步骤 4: 导入日志 ===
        self.tariff_repo.insert_import_log(&report).await?;

        info!(
            batch_id = %batch_id,
            records_written = report.records_written,
            history_entries = report.history_entries,
            skipped_sheets = report.skipped_sheets.len(),
            elapsed_ms = report.elapsed_ms as u64,
            "税率导入完成"
        );

        Ok(report)
    }
}
