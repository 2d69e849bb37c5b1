// ==========================================
// 关税归类与税费计算引擎 - 批次税费计算服务
// ==========================================
// 流程: 读取批次 → 费用分摊 → 逐条明细（查税率 → 完税价格 → 税费）→ 回写 → 汇总
// 红线: 单条明细失败不中断批次，逐条记录成功 / 失败
// 红线: 批次合计只由已持久化的明细重新汇总
// ==========================================

use crate::config::{ConfigResult, TariffConfigReader};
use crate::domain::shipment::{
    BatchCalculationResult, BatchTotals, CalculationOptions, CargoItem, ImportBatch, ItemOutcome,
    TaxBreakdown,
};
use crate::domain::types::{FreightAllocationMethod, Incoterm, ValuationBasis};
use crate::engine::customs_valuation::CustomsValuationEngine;
use crate::engine::tariff_lookup::{LookupError, TariffLookup};
use crate::engine::tax_calculator::{TaxCalculator, TaxRates};
use crate::infra::Clock;
use crate::repository::{RepositoryError, ShipmentRepository};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

// ==========================================
// CalculationError
// ==========================================
#[derive(Error, Debug)]
pub enum CalculationError {
    #[error("缺少必填字段: {0}")]
    MissingField(String),

    #[error("未知贸易术语: {0}")]
    UnknownIncoterm(String),

    #[error("批次不存在: {0}")]
    BatchNotFound(String),

    #[error("货物明细不存在: {0}")]
    ItemNotFound(String),

    #[error("税率查询失败: {0}")]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type CalculationResult<T> = Result<T, CalculationError>;

/// 计算服务设置
#[derive(Debug, Clone)]
pub struct CalculationSettings {
    pub default_vat_rate: Decimal,
    pub default_allocation_method: FreightAllocationMethod,
}

impl Default for CalculationSettings {
    fn default() -> Self {
        Self {
            default_vat_rate: Decimal::from(20),
            default_allocation_method: FreightAllocationMethod::ByValue,
        }
    }
}

impl CalculationSettings {
    pub async fn from_config(reader: &dyn TariffConfigReader) -> ConfigResult<Self> {
        Ok(Self {
            default_vat_rate: reader.get_default_vat_rate().await?,
            default_allocation_method: reader.get_freight_allocation_method().await?,
        })
    }
}

/// 解析批次贸易术语（缺失 / 未知均为校验错误）
fn batch_valuation_basis(batch: &ImportBatch) -> CalculationResult<ValuationBasis> {
    let raw = batch
        .incoterm
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CalculationError::MissingField("incoterm".to_string()))?;
    Incoterm::parse(raw)
        .map(|t| t.valuation_basis())
        .ok_or_else(|| CalculationError::UnknownIncoterm(raw.to_string()))
}

// ==========================================
// DutyCalculationService
// ==========================================
pub struct DutyCalculationService {
    shipments: Arc<dyn ShipmentRepository>,
    lookup: Arc<TariffLookup>,
    valuation: CustomsValuationEngine,
    calculator: TaxCalculator,
    settings: CalculationSettings,
    clock: Arc<dyn Clock>,
}

impl DutyCalculationService {
    pub fn new(
        shipments: Arc<dyn ShipmentRepository>,
        lookup: Arc<TariffLookup>,
        settings: CalculationSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shipments,
            lookup,
            valuation: CustomsValuationEngine::new(settings.default_allocation_method),
            calculator: TaxCalculator::new(),
            settings,
            clock,
        }
    }

    /// 计算整个批次的税费
    ///
    /// # 参数
    /// - batch_id: 批次 ID
    /// - options: recalculate_customs_value（重新分摊与计算完税价格）/ update_origin_tariffs（按原产地重查税率）
    ///
    /// # 返回
    /// - 批次合计 + 逐条明细结果；批次级校验失败（批次不存在、贸易术语缺失或未知）返回 Err
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn calculate_batch(
        &self,
        batch_id: &str,
        options: CalculationOptions,
    ) -> CalculationResult<BatchCalculationResult> {
        let batch = self
            .shipments
            .find_batch(batch_id)
            .await?
            .ok_or_else(|| CalculationError::BatchNotFound(batch_id.to_string()))?;
        let mut items = self.shipments.list_items(batch_id).await?;

        let basis = if options.recalculate_customs_value {
            let basis = batch_valuation_basis(&batch)?;
            self.allocate_and_save(&batch, &mut items).await?;
            Some(basis)
        } else {
            None
        };

        let mut outcomes = Vec::with_capacity(items.len());
        for item in items.iter_mut() {
            let outcome = match self
                .process_item(item, basis, options.update_origin_tariffs, batch.deferred_vat)
                .await
            {
                Ok(breakdown) => ItemOutcome {
                    item_id: item.item_id.clone(),
                    success: true,
                    breakdown: Some(breakdown),
                    rate_note: item.rate_note.clone(),
                    error: None,
                },
                Err(e) => {
                    warn!(item_id = %item.item_id, error = %e, "明细计算失败，继续处理下一条");
                    ItemOutcome {
                        item_id: item.item_id.clone(),
                        success: false,
                        breakdown: None,
                        rate_note: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let totals = self.refresh_batch_totals(batch_id).await?;
        let result = BatchCalculationResult {
            batch_id: batch_id.to_string(),
            totals,
            items: outcomes,
        };

        info!(
            batch_id = %batch_id,
            items = result.items.len(),
            failed = result.failed_count(),
            total_customs_value = %result.totals.total_customs_value,
            total_tax = %result.totals.total_tax,
            "批次税费计算完成"
        );
        Ok(result)
    }

    /// 修改明细归类 / 原产地后重新查税率、重算该明细并重新汇总批次
    #[instrument(skip(self))]
    pub async fn reclassify_item(
        &self,
        item_id: &str,
        hs_code: Option<&str>,
        origin_country_code: Option<&str>,
    ) -> CalculationResult<ItemOutcome> {
        let existing = self
            .shipments
            .find_item(item_id)
            .await?
            .ok_or_else(|| CalculationError::ItemNotFound(item_id.to_string()))?;
        let batch = self
            .shipments
            .find_batch(&existing.batch_id)
            .await?
            .ok_or_else(|| CalculationError::BatchNotFound(existing.batch_id.clone()))?;

        let hs_code = hs_code.map(str::trim).filter(|s| !s.is_empty());
        let origin = origin_country_code
            .map(|o| o.trim().to_uppercase())
            .filter(|o| !o.is_empty());
        self.shipments
            .update_item_classification(item_id, hs_code, origin.as_deref())
            .await?;

        let mut item = self
            .shipments
            .find_item(item_id)
            .await?
            .ok_or_else(|| CalculationError::ItemNotFound(item_id.to_string()))?;

        // 分摊额不受归类影响；尚无完税价格时按批次口径重新分摊后补算
        let basis = if item.customs_value.is_none() {
            let basis = batch_valuation_basis(&batch)?;
            let mut items = self.shipments.list_items(&batch.batch_id).await?;
            self.allocate_and_save(&batch, &mut items).await?;
            if let Some(allocated) = items.iter().find(|i| i.item_id == item.item_id) {
                item.freight_allocation = allocated.freight_allocation;
                item.insurance_allocation = allocated.insurance_allocation;
                item.domestic_export_allocation = allocated.domestic_export_allocation;
                item.domestic_import_allocation = allocated.domestic_import_allocation;
                item.unloading_allocation = allocated.unloading_allocation;
            }
            Some(basis)
        } else {
            None
        };

        let breakdown = self
            .process_item(&mut item, basis, true, batch.deferred_vat)
            .await?;
        self.refresh_batch_totals(&batch.batch_id).await?;

        info!(item_id = %item_id, hs_code = ?item.matched_hs_code, "明细重新归类完成");
        Ok(ItemOutcome {
            item_id: item.item_id.clone(),
            success: true,
            breakdown: Some(breakdown),
            rate_note: item.rate_note.clone(),
            error: None,
        })
    }

    // ==========================================
    // 内部步骤
    // ==========================================

    /// 分摊批次费用并立即写回，明细后续失败也不影响分摊额合计
    async fn allocate_and_save(
        &self,
        batch: &ImportBatch,
        items: &mut [CargoItem],
    ) -> CalculationResult<()> {
        self.valuation.allocate_costs(batch, items);
        self.shipments.save_item_allocations(items).await?;
        Ok(())
    }

    /// 单条明细: 税率 → 完税价格 → 税费 → 回写
    async fn process_item(
        &self,
        item: &mut CargoItem,
        basis: Option<ValuationBasis>,
        refresh_rates: bool,
        deferred_vat: bool,
    ) -> CalculationResult<TaxBreakdown> {
        if refresh_rates || item.duty_rate.is_none() {
            self.refresh_rates(item).await?;
        }

        let customs_value = match basis {
            Some(basis) => self.valuation.customs_value(item, basis),
            None => item
                .customs_value
                .ok_or_else(|| CalculationError::MissingField("customs_value".to_string()))?,
        };

        let rates = TaxRates {
            duty_rate: item
                .duty_rate
                .ok_or_else(|| CalculationError::MissingField("duty_rate".to_string()))?,
            vat_rate: item.vat_rate.unwrap_or(self.settings.default_vat_rate),
            anti_dumping_rate: item.anti_dumping_rate.unwrap_or(Decimal::ZERO),
            countervailing_rate: item.countervailing_rate.unwrap_or(Decimal::ZERO),
        };

        let breakdown = self.calculator.compute(customs_value, &rates, deferred_vat);
        self.calculator.apply(item, &rates, &breakdown);
        item.updated_at = Some(self.clock.now());
        self.shipments.save_item_results(item).await?;
        Ok(breakdown)
    }

    /// 按归类编码 + 原产地重新解析税率（精确 10 位优先，其次 8 位前缀）
    async fn refresh_rates(&self, item: &mut CargoItem) -> CalculationResult<()> {
        let code = item
            .matched_hs_code
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CalculationError::MissingField("matched_hs_code".to_string()))?;

        let rate = self
            .lookup
            .lookup(&code, item.origin_country_code.as_deref())
            .await?;

        item.duty_rate = Some(rate.duty_rate);
        item.vat_rate = Some(rate.vat_rate.unwrap_or(self.settings.default_vat_rate));
        item.anti_dumping_rate = rate.anti_dumping_rate;
        item.countervailing_rate = rate.countervailing_rate;
        item.rate_note = rate.note;
        Ok(())
    }

    /// 从已持久化明细重新汇总并写回批次
    async fn refresh_batch_totals(&self, batch_id: &str) -> CalculationResult<BatchTotals> {
        let persisted = self.shipments.list_items(batch_id).await?;
        let totals = BatchTotals::from_items(&persisted);
        self.shipments
            .save_batch_totals(batch_id, &totals, self.clock.now())
            .await?;
        Ok(totals)
    }
}
