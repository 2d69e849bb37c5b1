// ==========================================
// 关税归类与税费计算引擎 - 费用分摊与完税价格
// ==========================================
// 红线: 各明细分摊额之和必须等于批次费用（尾差计入最后一个非零基数明细）
// 红线: 基数合计为 0 时回退为平均分摊
// 红线: 进口段内陆运费与卸货费始终按货值比例分摊（不受分摊方式影响）
// ==========================================
// 完税价格口径:
//   EXW          : 货值 + 出口段内陆运费 + 国际运费 + 进口段费用 + 保险
//   FCA/FAS/FOB  : 货值 + 国际运费 + 进口段费用 + 保险
//   C 组 / D 组  : 货值（运保费已含在价格中）
// ==========================================

use crate::domain::shipment::{CargoItem, ImportBatch};
use crate::domain::types::{FreightAllocationMethod, ValuationBasis};
use crate::engine::tax_calculator::round_money;
use rust_decimal::Decimal;
use tracing::debug;

/// 按基数比例分摊总额
///
/// # 规则
/// - 每份按比例计算后取 2 位小数
/// - 尾差计入最后一个基数非零的份额，保证合计严格相等
/// - 基数合计 ≤ 0 时按平均分摊
pub fn allocate(total: Decimal, bases: &[Decimal]) -> Vec<Decimal> {
    if bases.is_empty() {
        return Vec::new();
    }

    let bases: Vec<Decimal> = bases.iter().map(|b| (*b).max(Decimal::ZERO)).collect();
    let sum: Decimal = bases.iter().sum();
    let bases = if sum > Decimal::ZERO {
        bases
    } else {
        vec![Decimal::ONE; bases.len()]
    };
    let sum: Decimal = bases.iter().sum();

    let mut shares: Vec<Decimal> = bases.iter().map(|b| round_money(total * *b / sum)).collect();

    let residual = total - shares.iter().sum::<Decimal>();
    if !residual.is_zero() {
        if let Some(last) = bases.iter().rposition(|b| !b.is_zero()) {
            shares[last] += residual;
        }
    }
    shares
}

/// 分摊基数
fn allocation_basis(item: &CargoItem, method: FreightAllocationMethod) -> Decimal {
    match method {
        FreightAllocationMethod::ByValue => item.total_value,
        FreightAllocationMethod::ByWeight => item.gross_weight_kg.unwrap_or(Decimal::ZERO),
        FreightAllocationMethod::ByQuantity => item.quantity.unwrap_or(Decimal::ZERO),
        FreightAllocationMethod::Equal => Decimal::ONE,
    }
}

// ==========================================
// CustomsValuationEngine
// ==========================================
pub struct CustomsValuationEngine {
    default_method: FreightAllocationMethod,
}

impl CustomsValuationEngine {
    pub fn new(default_method: FreightAllocationMethod) -> Self {
        Self { default_method }
    }

    /// 将批次费用分摊到各明细
    pub fn allocate_costs(&self, batch: &ImportBatch, items: &mut [CargoItem]) {
        let method = batch.freight_allocation_method.unwrap_or(self.default_method);
        let bases: Vec<Decimal> = items.iter().map(|i| allocation_basis(i, method)).collect();
        let value_bases: Vec<Decimal> = items.iter().map(|i| i.total_value).collect();

        let freight = allocate(batch.international_freight, &bases);
        let insurance = allocate(batch.insurance_cost, &bases);
        let export_leg = allocate(batch.domestic_freight_export, &bases);
        let import_leg = allocate(batch.domestic_freight_import, &value_bases);
        let unloading = allocate(batch.unloading_cost, &value_bases);

        for (idx, item) in items.iter_mut().enumerate() {
            item.freight_allocation = freight[idx];
            item.insurance_allocation = insurance[idx];
            item.domestic_export_allocation = export_leg[idx];
            item.domestic_import_allocation = import_leg[idx];
            item.unloading_allocation = unloading[idx];
        }

        debug!(
            batch_id = %batch.batch_id,
            method = %method,
            items = items.len(),
            "批次费用分摊完成"
        );
    }

    /// 按贸易术语口径计算完税价格（使用明细上的分摊额）
    pub fn customs_value(&self, item: &CargoItem, basis: ValuationBasis) -> Decimal {
        let import_side = item.freight_allocation
            + item.domestic_import_allocation
            + item.unloading_allocation
            + item.insurance_allocation;

        let value = match basis {
            ValuationBasis::ExWorks => item.total_value + item.domestic_export_allocation + import_side,
            ValuationBasis::FreeOnBoard => item.total_value + import_side,
            ValuationBasis::PriceInclusive => item.total_value,
        };
        round_money(value)
    }
}
