// ==========================================
// 关税归类与税费计算引擎 - 税率导入 Trait
// ==========================================
// 职责: 定义税率导入接口（不包含实现）
// 管道: 解析 → 列识别 → 映射 → 清洗 → 合并 → 目录刷新
// ==========================================

use crate::domain::tariff::{ClassificationRecord, RateImportReport, TariffMeasure};
use crate::domain::types::MeasureKind;
use crate::importer::error::ImportResult;
use crate::importer::field_mapper::ColumnMap;
use crate::importer::file_parser::RawSheet;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

// ==========================================
// RateImporter Trait
// ==========================================
// 用途: 税率导入主接口
// 实现者: RateImporterImpl
#[async_trait]
pub trait RateImporter: Send + Sync {
    /// 从归类文件 + 税则文件导入并刷新税率目录
    ///
    /// # 参数
    /// - classification_path: 归类文件（.xlsx/.xls 多表，或 .csv）
    /// - duty_path: 税则文件
    ///
    /// # 返回
    /// - Ok(RateImportReport): 行数统计、跳过的工作表、写入记录数、历史条数
    /// - Err: 文件读取错误、目录写入错误
    async fn import_files(
        &self,
        classification_path: &Path,
        duty_path: &Path,
    ) -> ImportResult<RateImportReport>;

    /// 从已读取的工作表导入（外部生产者直接提供原始行）
    async fn import_sheets(
        &self,
        classification_sheets: Vec<RawSheet>,
        duty_sheets: Vec<RawSheet>,
    ) -> ImportResult<RateImportReport>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件解析接口（阶段 0）
// 实现者: ExcelParser, CsvParser, UniversalFileParser
pub trait FileParser: Send + Sync {
    /// 解析文件为工作表列表（每个工作表: 表头 + HashMap<列名, 值> 行）
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<RawSheet>>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 用途: 列识别 + 行映射（阶段 1）
// 实现者: RateFieldMapper
pub trait FieldMapper: Send + Sync {
    /// 识别表头中的逻辑字段
    ///
    /// # 返回
    /// - Some(ColumnMap): 至少识别出商品编码列
    /// - None: 未找到商品编码列（整表跳过）
    fn resolve_columns(&self, headers: &[String]) -> Option<ColumnMap>;

    /// 映射归类行（编码非法时返回 None）
    fn map_classification(
        &self,
        row: &HashMap<String, String>,
        columns: &ColumnMap,
        row_number: usize,
    ) -> Option<ClassificationRecord>;

    /// 映射税则行（编码非法时返回 None）
    fn map_measure(
        &self,
        row: &HashMap<String, String>,
        columns: &ColumnMap,
        row_number: usize,
    ) -> Option<TariffMeasure>;
}

// ==========================================
// DataCleaner Trait
// ==========================================
// 用途: 数据清洗接口（阶段 2）
// 实现者: DataCleaner
pub trait DataCleaner: Send + Sync {
    /// 折叠空白
    fn clean_text(&self, value: &str) -> String;

    /// 空串 / 占位符 → None
    fn normalize_null(&self, value: Option<String>) -> Option<String>;

    /// 提取单元格中的第一个数字作为税率（百分比）
    fn parse_rate(&self, value: &str) -> Option<Decimal>;

    /// 多格式日期解析
    fn parse_date(&self, value: &str) -> Option<NaiveDate>;

    /// 措施分类: 代码优先，描述子串兜底
    fn classify_measure(&self, code: Option<&str>, description: Option<&str>) -> MeasureKind;
}
