// ==========================================
// 关税归类与税费计算引擎 - 批次税费 API
// ==========================================
// 职责: 批次 / 明细录入，批次税费计算，明细重新归类
// 对外接口: 批次 ID + 计算选项 → 批次合计 + 逐条明细结果
// ==========================================

use std::sync::Arc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{ImportValidator, NewCargoItem, NewImportBatch};
use crate::domain::hs_code::digits_only;
use crate::domain::shipment::{
    BatchCalculationResult, BatchTotals, CalculationOptions, CargoItem, ImportBatch, ItemOutcome,
};
use crate::domain::types::FreightAllocationMethod;
use crate::engine::DutyCalculationService;
use crate::repository::ShipmentRepository;

/// 批次详情（批次 + 明细）
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchDetail {
    pub batch: ImportBatch,
    pub items: Vec<CargoItem>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// 批次税费 API
pub struct DutyApi {
    shipments: Arc<dyn ShipmentRepository>,
    calculation: Arc<DutyCalculationService>,
}

impl DutyApi {
    pub fn new(shipments: Arc<dyn ShipmentRepository>, calculation: Arc<DutyCalculationService>) -> Self {
        Self {
            shipments,
            calculation,
        }
    }

    // ==========================================
    // 录入
    // ==========================================

    /// 新建进口批次
    pub async fn create_batch(&self, request: NewImportBatch) -> ApiResult<ImportBatch> {
        ImportValidator::validate_batch(&request)?;

        let batch = ImportBatch {
            batch_id: trimmed(request.batch_id).unwrap_or_default(),
            reference: trimmed(request.reference),
            incoterm: trimmed(request.incoterm).map(|t| t.to_uppercase()),
            international_freight: request.international_freight.unwrap_or(Decimal::ZERO),
            domestic_freight_export: request.domestic_freight_export.unwrap_or(Decimal::ZERO),
            domestic_freight_import: request.domestic_freight_import.unwrap_or(Decimal::ZERO),
            unloading_cost: request.unloading_cost.unwrap_or(Decimal::ZERO),
            insurance_cost: request.insurance_cost.unwrap_or(Decimal::ZERO),
            freight_allocation_method: trimmed(request.freight_allocation_method)
                .map(|m| FreightAllocationMethod::parse(&m)),
            deferred_vat: request.deferred_vat,
            totals: BatchTotals::default(),
            calculated_at: None,
        };

        self.shipments.insert_batch(&batch).await?;
        debug!(batch_id = %batch.batch_id, "批次已创建");
        Ok(batch)
    }

    /// 新增货物明细
    pub async fn add_item(&self, request: NewCargoItem) -> ApiResult<CargoItem> {
        ImportValidator::validate_item(&request)?;

        let batch_id = trimmed(request.batch_id).unwrap_or_default();
        if self.shipments.find_batch(&batch_id).await?.is_none() {
            return Err(ApiError::BatchNotFound(batch_id));
        }

        let mut item = CargoItem::new(
            trimmed(request.item_id).unwrap_or_default(),
            batch_id,
            request.total_value.unwrap_or(Decimal::ZERO),
        );
        item.description = trimmed(request.description);
        item.material = trimmed(request.material);
        item.origin_country_code = trimmed(request.origin_country_code).map(|o| o.to_uppercase());
        item.matched_hs_code = trimmed(request.hs_code).map(|c| digits_only(&c));
        item.quantity = request.quantity;
        item.gross_weight_kg = request.gross_weight_kg;

        self.shipments.insert_item(&item).await?;
        Ok(item)
    }

    /// 批次详情
    pub async fn get_batch(&self, batch_id: &str) -> ApiResult<BatchDetail> {
        let batch = self
            .shipments
            .find_batch(batch_id)
            .await?
            .ok_or_else(|| ApiError::BatchNotFound(batch_id.to_string()))?;
        let items = self.shipments.list_items(batch_id).await?;
        Ok(BatchDetail { batch, items })
    }

    /// 单条明细
    pub async fn get_item(&self, item_id: &str) -> ApiResult<CargoItem> {
        self.shipments
            .find_item(item_id)
            .await?
            .ok_or_else(|| ApiError::ProductNotFound(item_id.to_string()))
    }

    // ==========================================
    // 计算
    // ==========================================

    /// 计算批次税费
    ///
    /// # 返回
    /// - 批次合计（由已持久化明细汇总）+ 逐条明细结果；单条失败不影响整体返回
    pub async fn calculate_batch(
        &self,
        batch_id: &str,
        options: CalculationOptions,
    ) -> ApiResult<BatchCalculationResult> {
        if batch_id.trim().is_empty() {
            return Err(ApiError::ValidationError(vec!["batch_id".to_string()]));
        }
        let result = self.calculation.calculate_batch(batch_id.trim(), options).await?;
        info!(
            batch_id = %result.batch_id,
            failed = result.failed_count(),
            total_tax = %result.totals.total_tax,
            "批次计算接口返回"
        );
        Ok(result)
    }

    /// 修改明细归类 / 原产地并重算
    pub async fn reclassify_item(
        &self,
        item_id: &str,
        hs_code: Option<&str>,
        origin_country_code: Option<&str>,
    ) -> ApiResult<ItemOutcome> {
        let hs_code = hs_code.map(digits_only).filter(|c| !c.is_empty());
        Ok(self
            .calculation
            .reclassify_item(item_id, hs_code.as_deref(), origin_country_code)
            .await?)
    }
}
