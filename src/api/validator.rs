// ==========================================
// 关税归类与税费计算引擎 - 导入数据校验器
// ==========================================
// 职责: 批次 / 货物明细录入的必填字段校验
// 规则: 一次性收集所有缺失字段，而不是遇到第一个就返回
// ==========================================

use rust_decimal::Decimal;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::hs_code::{digits_only, MIN_CODE_DIGITS};
use crate::domain::types::Incoterm;

/// 批次录入请求
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NewImportBatch {
    pub batch_id: Option<String>,
    pub reference: Option<String>,
    pub incoterm: Option<String>,
    pub international_freight: Option<Decimal>,
    pub domestic_freight_export: Option<Decimal>,
    pub domestic_freight_import: Option<Decimal>,
    pub unloading_cost: Option<Decimal>,
    pub insurance_cost: Option<Decimal>,
    pub freight_allocation_method: Option<String>,
    pub deferred_vat: bool,
}

/// 货物明细录入请求
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NewCargoItem {
    pub item_id: Option<String>,
    pub batch_id: Option<String>,
    pub description: Option<String>,
    pub material: Option<String>,
    pub origin_country_code: Option<String>,
    pub hs_code: Option<String>,
    pub total_value: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub gross_weight_kg: Option<Decimal>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

// ==========================================
// ImportValidator
// ==========================================
pub struct ImportValidator;

impl ImportValidator {
    /// 校验批次请求
    ///
    /// # 返回
    /// - Err(ValidationError): 缺失字段列表
    /// - Err(InvalidInput): 贸易术语无法识别 / 费用为负
    pub fn validate_batch(request: &NewImportBatch) -> ApiResult<()> {
        let mut missing = Vec::new();
        if is_blank(&request.batch_id) {
            missing.push("batch_id".to_string());
        }
        if is_blank(&request.incoterm) {
            missing.push("incoterm".to_string());
        }
        if !missing.is_empty() {
            return Err(ApiError::ValidationError(missing));
        }

        if let Some(term) = request.incoterm.as_deref() {
            if Incoterm::parse(term).is_none() {
                return Err(ApiError::InvalidInput(format!("未知贸易术语: {}", term.trim())));
            }
        }

        let charges = [
            ("international_freight", request.international_freight),
            ("domestic_freight_export", request.domestic_freight_export),
            ("domestic_freight_import", request.domestic_freight_import),
            ("unloading_cost", request.unloading_cost),
            ("insurance_cost", request.insurance_cost),
        ];
        for (field, value) in charges {
            if value.map_or(false, |v| v.is_sign_negative() && !v.is_zero()) {
                return Err(ApiError::InvalidInput(format!("{} 不能为负数", field)));
            }
        }
        Ok(())
    }

    /// 校验货物明细请求
    pub fn validate_item(request: &NewCargoItem) -> ApiResult<()> {
        let mut missing = Vec::new();
        if is_blank(&request.item_id) {
            missing.push("item_id".to_string());
        }
        if is_blank(&request.batch_id) {
            missing.push("batch_id".to_string());
        }
        if is_blank(&request.description) {
            missing.push("description".to_string());
        }
        if request.total_value.is_none() {
            missing.push("total_value".to_string());
        }
        if !missing.is_empty() {
            return Err(ApiError::ValidationError(missing));
        }

        if let Some(code) = request.hs_code.as_deref().filter(|c| !c.trim().is_empty()) {
            if digits_only(code).len() < MIN_CODE_DIGITS {
                return Err(ApiError::InvalidInput(format!("编码格式无效: {}", code)));
            }
        }
        if request.total_value.map_or(false, |v| v.is_sign_negative() && !v.is_zero()) {
            return Err(ApiError::InvalidInput("total_value 不能为负数".to_string()));
        }
        Ok(())
    }
}
