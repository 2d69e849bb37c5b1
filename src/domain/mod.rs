// ==========================================
// 关税归类与税费计算引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、编码规范化规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod hierarchy;
pub mod hs_code;
pub mod shipment;
pub mod tariff;
pub mod types;

// 重导出核心类型
pub use hierarchy::{
    BreadcrumbEntry, ChapterEntry, ChildGroup, ChildRate, HierarchyGranularity, HierarchyView,
    HsNode,
};
pub use hs_code::{is_generic_origin, HsCode};
pub use shipment::{
    BatchCalculationResult, BatchTotals, CalculationOptions, CargoItem, ImportBatch, ItemOutcome,
    TaxBreakdown,
};
pub use tariff::{
    CanonicalTariffRecord, ClassificationRecord, MeasureProvenance, RateImportReport, RateRecord,
    RateSource, TariffCatalog, TariffMeasure, TariffRateChange,
};
pub use types::{FreightAllocationMethod, HsLevel, Incoterm, MatchKind, MeasureKind, ValuationBasis};
