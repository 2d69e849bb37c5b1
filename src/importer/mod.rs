// ==========================================
// 关税归类与税费计算引擎 - 导入层
// ==========================================
// 职责: 外部税率数据导入,生成规范化税率目录
// 支持: Excel (.xlsx/.xls 多表), CSV
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod rate_importer_impl;
pub mod rate_importer_trait;

// 重导出核心类型
pub use data_cleaner::DataCleaner as DataCleanerImpl;
pub use error::{ImportError, ImportResult};
pub use field_mapper::{ColumnMap, RateField, RateFieldMapper};
pub use file_parser::{CsvParser, ExcelParser, RawSheet, UniversalFileParser};
pub use rate_importer_impl::RateImporterImpl;

// 重导出 Trait 接口
pub use rate_importer_trait::{DataCleaner, FieldMapper, FileParser, RateImporter};
