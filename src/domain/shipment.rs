// ==========================================
// 关税归类与税费计算引擎 - 进口批次 / 货物明细模型
// ==========================================
// 对齐: import_batch / cargo_item 表
// 红线: 批次合计只能由明细汇总得到，不可独立修改
// ==========================================

use crate::domain::types::FreightAllocationMethod;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// ImportBatch - 进口批次（贸易条款）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: String,
    pub reference: Option<String>,          // 提单号 / 业务参考号
    pub incoterm: Option<String>,           // 贸易术语（原始字符串）
    pub international_freight: Decimal,     // 国际运费
    pub domestic_freight_export: Decimal,   // 出口段内陆运费
    pub domestic_freight_import: Decimal,   // 进口段内陆运费
    pub unloading_cost: Decimal,            // 卸货费
    pub insurance_cost: Decimal,            // 保险费
    pub freight_allocation_method: Option<FreightAllocationMethod>,
    pub deferred_vat: bool,                 // 延迟缴纳增值税（仅影响展示口径）
    pub totals: BatchTotals,                // 派生合计（由明细汇总）
    pub calculated_at: Option<DateTime<Utc>>,
}

// ==========================================
// BatchTotals - 批次合计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub total_value: Decimal,
    pub total_customs_value: Decimal,
    pub total_duty: Decimal,
    pub total_vat: Decimal,
    pub total_other_tax: Decimal,
    pub total_tax: Decimal,
}

impl BatchTotals {
    /// 由明细重新汇总
    pub fn from_items(items: &[CargoItem]) -> Self {
        items.iter().fold(BatchTotals::default(), |mut acc, item| {
            acc.total_value += item.total_value;
            acc.total_customs_value += item.customs_value.unwrap_or(Decimal::ZERO);
            acc.total_duty += item.duty_amount;
            acc.total_vat += item.vat_amount;
            acc.total_other_tax += item.other_tax_amount;
            acc.total_tax += item.total_tax;
            acc
        })
    }
}

// ==========================================
// CargoItem - 货物明细
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoItem {
    // ===== 主键与关联 =====
    pub item_id: String,
    pub batch_id: String,

    // ===== 商品信息 =====
    pub description: Option<String>,
    pub material: Option<String>,            // 材质
    pub origin_country_code: Option<String>, // 原产地
    pub matched_hs_code: Option<String>,     // 归类编码
    pub total_value: Decimal,                // 申报货值
    pub quantity: Option<Decimal>,
    pub gross_weight_kg: Option<Decimal>,

    // ===== 分摊结果 =====
    pub freight_allocation: Decimal,          // 国际运费分摊
    pub insurance_allocation: Decimal,        // 保险费分摊
    pub domestic_export_allocation: Decimal,  // 出口段内陆运费分摊
    pub domestic_import_allocation: Decimal,  // 进口段内陆运费分摊
    pub unloading_allocation: Decimal,        // 卸货费分摊
    pub customs_value: Option<Decimal>,       // 完税价格

    // ===== 适用税率（百分比）=====
    pub duty_rate: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub anti_dumping_rate: Option<Decimal>,
    pub countervailing_rate: Option<Decimal>,
    pub rate_note: Option<String>, // 税率近似匹配说明

    // ===== 计算结果 =====
    pub duty_amount: Decimal,
    pub vat_amount: Decimal,
    pub other_tax_amount: Decimal, // 反倾销 + 反补贴
    pub total_tax: Decimal,

    pub updated_at: Option<DateTime<Utc>>,
}

impl CargoItem {
    /// 新建一条待计算明细
    pub fn new(item_id: impl Into<String>, batch_id: impl Into<String>, total_value: Decimal) -> Self {
        Self {
            item_id: item_id.into(),
            batch_id: batch_id.into(),
            description: None,
            material: None,
            origin_country_code: None,
            matched_hs_code: None,
            total_value,
            quantity: None,
            gross_weight_kg: None,
            freight_allocation: Decimal::ZERO,
            insurance_allocation: Decimal::ZERO,
            domestic_export_allocation: Decimal::ZERO,
            domestic_import_allocation: Decimal::ZERO,
            unloading_allocation: Decimal::ZERO,
            customs_value: None,
            duty_rate: None,
            vat_rate: None,
            anti_dumping_rate: None,
            countervailing_rate: None,
            rate_note: None,
            duty_amount: Decimal::ZERO,
            vat_amount: Decimal::ZERO,
            other_tax_amount: Decimal::ZERO,
            total_tax: Decimal::ZERO,
            updated_at: None,
        }
    }
}

// ==========================================
// TaxBreakdown - 单条明细税费拆分
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub customs_value: Decimal,
    pub duty_amount: Decimal,
    pub anti_dumping_amount: Decimal,
    pub countervailing_amount: Decimal,
    pub other_tax_amount: Decimal,
    pub vat_base: Decimal,
    pub vat_amount: Decimal,
    pub vat_payable: Decimal,  // 延迟缴纳模式下为 0
    pub vat_deferred: Decimal, // 延迟缴纳模式下 = vat_amount
    pub total_tax: Decimal,
    pub total_payable: Decimal,
}

// ==========================================
// 计算选项与结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationOptions {
    pub recalculate_customs_value: bool, // 重新分摊并计算完税价格
    pub update_origin_tariffs: bool,     // 按原产地重新查询税率
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            recalculate_customs_value: true,
            update_origin_tariffs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub success: bool,
    pub breakdown: Option<TaxBreakdown>,
    pub rate_note: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCalculationResult {
    pub batch_id: String,
    pub totals: BatchTotals,
    pub items: Vec<ItemOutcome>,
}

impl BatchCalculationResult {
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|o| !o.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_batch_totals_from_items() {
        let mut a = CargoItem::new("I1", "B1", Decimal::from(1000));
        a.customs_value = Some(Decimal::from(1175));
        a.duty_amount = Decimal::from_str("141.00").unwrap();
        a.vat_amount = Decimal::from_str("250.00").unwrap();
        a.total_tax = Decimal::from_str("391.00").unwrap();

        let mut b = CargoItem::new("I2", "B1", Decimal::from(500));
        b.customs_value = None;
        b.other_tax_amount = Decimal::from(10);
        b.total_tax = Decimal::from(10);

        let totals = BatchTotals::from_items(&[a, b]);
        assert_eq!(totals.total_value, Decimal::from(1500));
        assert_eq!(totals.total_customs_value, Decimal::from(1175));
        assert_eq!(totals.total_other_tax, Decimal::from(10));
        assert_eq!(totals.total_tax, Decimal::from_str("401.00").unwrap());
    }
}
