// ==========================================
// 关税归类与税费计算引擎 - 引擎层
// ==========================================
// 职责: 税率合并 / 税率查询 / 归类层级 / 完税价格 / 税费计算
// 红线: Engine 不拼 SQL，数据访问一律经 Repository
// ==========================================

pub mod customs_valuation;
pub mod duty_calculation;
pub mod fan_out;
pub mod hierarchy_resolver;
pub mod tariff_lookup;
pub mod tariff_merger;
pub mod tax_calculator;

// 重导出核心引擎
pub use customs_valuation::{allocate, CustomsValuationEngine};
pub use duty_calculation::{
    CalculationError, CalculationResult, CalculationSettings, DutyCalculationService,
};
pub use fan_out::bounded_fan_out;
pub use hierarchy_resolver::{HierarchyResolver, HierarchySettings};
pub use tariff_lookup::{
    BulkLookupOutcome, BulkLookupReport, LookupError, LookupResult, LookupSettings, SiblingRule,
    TariffLookup,
};
pub use tariff_merger::TariffMerger;
pub use tax_calculator::{round_money, TaxCalculator, TaxRates};
