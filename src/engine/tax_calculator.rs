// ==========================================
// 关税归类与税费计算引擎 - 单条明细税费计算
// ==========================================
// 公式:
//   关税       = 完税价格 × 关税税率 / 100
//   反倾销税   = 完税价格 × 反倾销税率 / 100
//   反补贴税   = 完税价格 × 反补贴税率 / 100
//   增值税基   = 完税价格 + 关税 + 反倾销税 + 反补贴税
//   增值税     = 增值税基 × 增值税率 / 100
// 红线: 所有金额保留 2 位小数，四舍五入（远离零）
// 红线: 延迟缴纳只影响 payable / deferred 拆分，不影响计算结果
// ==========================================

use crate::domain::shipment::{CargoItem, TaxBreakdown};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// 金额取整: 2 位小数，半数远离零
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn percent_of(base: Decimal, rate: Decimal) -> Decimal {
    round_money(base * rate / HUNDRED)
}

/// 适用税率（百分比）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxRates {
    pub duty_rate: Decimal,
    pub vat_rate: Decimal,
    pub anti_dumping_rate: Decimal,
    pub countervailing_rate: Decimal,
}

// ==========================================
// TaxCalculator
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxCalculator;

impl TaxCalculator {
    pub fn new() -> Self {
        Self
    }

    /// 计算税费拆分
    ///
    /// # 参数
    /// - customs_value: 完税价格
    /// - rates: 适用税率
    /// - deferred_vat: 延迟缴纳增值税（payable 为 0，deferred = 增值税）
    pub fn compute(&self, customs_value: Decimal, rates: &TaxRates, deferred_vat: bool) -> TaxBreakdown {
        let customs_value = round_money(customs_value);
        let duty_amount = percent_of(customs_value, rates.duty_rate);
        let anti_dumping_amount = percent_of(customs_value, rates.anti_dumping_rate);
        let countervailing_amount = percent_of(customs_value, rates.countervailing_rate);
        let other_tax_amount = anti_dumping_amount + countervailing_amount;

        // 增值税在关税与惩罚性税之上复合计征
        let vat_base = customs_value + duty_amount + other_tax_amount;
        let vat_amount = percent_of(vat_base, rates.vat_rate);

        let (vat_payable, vat_deferred) = if deferred_vat {
            (Decimal::ZERO, vat_amount)
        } else {
            (vat_amount, Decimal::ZERO)
        };

        let total_tax = duty_amount + vat_amount + other_tax_amount;
        TaxBreakdown {
            customs_value,
            duty_amount,
            anti_dumping_amount,
            countervailing_amount,
            other_tax_amount,
            vat_base,
            vat_amount,
            vat_payable,
            vat_deferred,
            total_tax,
            total_payable: duty_amount + other_tax_amount + vat_payable,
        }
    }

    /// 将计算结果写回明细
    pub fn apply(&self, item: &mut CargoItem, rates: &TaxRates, breakdown: &TaxBreakdown) {
        item.customs_value = Some(breakdown.customs_value);
        item.duty_rate = Some(rates.duty_rate);
        item.vat_rate = Some(rates.vat_rate);
        item.anti_dumping_rate = Some(rates.anti_dumping_rate);
        item.countervailing_rate = Some(rates.countervailing_rate);
        item.duty_amount = breakdown.duty_amount;
        item.vat_amount = breakdown.vat_amount;
        item.other_tax_amount = breakdown.other_tax_amount;
        item.total_tax = breakdown.total_tax;
    }
}
