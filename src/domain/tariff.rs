// ==========================================
// 关税归类与税费计算引擎 - 税率领域模型
// ==========================================
// 职责: 归类记录 / 税率措施 / 规范化税率记录 / 税率目录快照
// 红线: 目录快照合并后不可变，下一次合并整体替换
// ==========================================

use crate::domain::hs_code::HsCode;
use crate::domain::types::{MatchKind, MeasureKind};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 增值税措施代码（合并时不作为独立措施，写入 vat_rate）
pub const VAT_MEASURE_CODE: &str = "305";

// ==========================================
// ClassificationRecord - 归类记录
// ==========================================
// 来源: 归类工作表（商品编码 + 描述 + 有效期）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub code: HsCode,
    pub description: String,
    pub description_translated: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub row_number: usize,
}

// ==========================================
// TariffMeasure - 税率措施（税则表一行）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffMeasure {
    pub code: HsCode,                         // hs_code(8) + hs_code10
    pub measure_kind: MeasureKind,            // 措施类型
    pub measure_code: Option<String>,         // 3 位措施代码（103/142/551...）
    pub measure_description: Option<String>,  // 措施类型自由文本
    pub duty_rate: Option<Decimal>,           // 税率（百分比，可空）
    pub origin_country_code: Option<String>,  // 原产地（空 = 所有原产地）
    pub origin_description: Option<String>,   // 原产地描述
    pub legal_base: Option<String>,           // 法律依据
    pub quota_order_number: Option<String>,   // 配额序号
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub goods_description: Option<String>,    // 税则表自带的商品描述（可空）
    pub row_number: usize,
}

impl TariffMeasure {
    /// 原产地去重键（代码优先，缺失时用描述）
    pub fn origin_key(&self) -> String {
        self.origin_country_code
            .clone()
            .or_else(|| self.origin_description.clone())
            .unwrap_or_default()
    }

    /// 是否为增值税措施
    pub fn is_vat(&self) -> bool {
        if self.measure_code.as_deref() == Some(VAT_MEASURE_CODE) {
            return true;
        }
        self.measure_description
            .as_deref()
            .map(|d| {
                let lower = d.to_lowercase();
                lower == "vat" || lower.starts_with("value added tax")
            })
            .unwrap_or(false)
    }

    pub fn provenance(&self) -> MeasureProvenance {
        MeasureProvenance {
            measure_code: self.measure_code.clone(),
            legal_base: self.legal_base.clone(),
            origin_country_code: self.origin_country_code.clone(),
        }
    }
}

/// 措施出处（最高税率对应的那条措施）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureProvenance {
    pub measure_code: Option<String>,
    pub legal_base: Option<String>,
    pub origin_country_code: Option<String>,
}

// ==========================================
// CanonicalTariffRecord - 规范化税率记录
// ==========================================
// 主键口径: (hs_code10, origin_country_code)
// 对齐: tariff_rate 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTariffRecord {
    // ===== 主键 =====
    pub hs_code: String,                     // 8 位
    pub hs_code10: String,                   // 10 位
    pub origin_country_code: Option<String>, // 空 = 所有原产地
    pub origin_description: Option<String>,

    // ===== 描述 =====
    pub description: String,
    pub description_translated: Option<String>,

    // ===== 税率 =====
    pub duty_rate: Decimal,                   // = ThirdCountry 基准
    pub vat_rate: Option<Decimal>,
    pub anti_dumping_rate: Option<Decimal>,
    pub countervailing_rate: Option<Decimal>,
    pub preferential_rate: Option<Decimal>,
    pub has_anti_dumping: bool,
    pub has_countervailing: bool,

    // ===== 出处 =====
    pub measure_type: MeasureKind,
    pub measure_code: Option<String>,
    pub legal_base: Option<String>,
    pub quota_order_number: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub anti_dumping_source: Option<MeasureProvenance>,
    pub countervailing_source: Option<MeasureProvenance>,
}

impl CanonicalTariffRecord {
    /// 以编码和描述构造一条空白基准记录
    pub fn baseline(code: &HsCode, description: impl Into<String>) -> Self {
        Self {
            hs_code: code.hs8.clone(),
            hs_code10: code.hs10.clone(),
            origin_country_code: None,
            origin_description: None,
            description: description.into(),
            description_translated: None,
            duty_rate: Decimal::ZERO,
            vat_rate: None,
            anti_dumping_rate: None,
            countervailing_rate: None,
            preferential_rate: None,
            has_anti_dumping: false,
            has_countervailing: false,
            measure_type: MeasureKind::ThirdCountry,
            measure_code: None,
            legal_base: None,
            quota_order_number: None,
            start_date: None,
            end_date: None,
            anti_dumping_source: None,
            countervailing_source: None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.measure_type == MeasureKind::ThirdCountry && self.origin_country_code.is_none()
    }
}

// ==========================================
// TariffCatalog - 税率目录快照（不可变）
// ==========================================
#[derive(Debug, Clone)]
pub struct TariffCatalog {
    records: Arc<Vec<CanonicalTariffRecord>>,
    index_by_hs10: Arc<HashMap<String, Vec<usize>>>,
    built_at: DateTime<Utc>,
}

impl TariffCatalog {
    pub fn new(records: Vec<CanonicalTariffRecord>) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            index.entry(record.hs_code10.clone()).or_default().push(idx);
        }
        Self {
            records: Arc::new(records),
            index_by_hs10: Arc::new(index),
            built_at: Utc::now(),
        }
    }

    pub fn records(&self) -> &[CanonicalTariffRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// 指定 HS10 的全部记录（按合并输出顺序）
    pub fn by_hs10(&self, hs10: &str) -> Vec<&CanonicalTariffRecord> {
        self.index_by_hs10
            .get(hs10)
            .map(|idxs| idxs.iter().map(|i| &self.records[*i]).collect())
            .unwrap_or_default()
    }

    /// 指定 HS10 的 ThirdCountry 基准记录
    pub fn third_country(&self, hs10: &str) -> Option<&CanonicalTariffRecord> {
        self.by_hs10(hs10)
            .into_iter()
            .find(|r| r.measure_type == MeasureKind::ThirdCountry)
    }

    /// 按措施类型统计
    pub fn count_by_kind(&self) -> HashMap<MeasureKind, usize> {
        let mut counts = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.measure_type).or_insert(0) += 1;
        }
        counts
    }
}

// ==========================================
// RateRecord - 税率查询结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateSource {
    Catalog, // 本地税率目录
    Remote,  // 远程归类服务
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub requested_code: String,
    pub matched_code: String, // 实际命中的 10 位编码
    pub origin_country_code: Option<String>,
    pub description: Option<String>,
    pub duty_rate: Decimal,
    pub vat_rate: Option<Decimal>,
    pub anti_dumping_rate: Option<Decimal>,
    pub countervailing_rate: Option<Decimal>,
    pub preferential_rate: Option<Decimal>,
    pub match_kind: MatchKind,
    pub note: Option<String>, // 近似匹配说明
    pub source: RateSource,
}

impl RateRecord {
    pub fn is_exact(&self) -> bool {
        self.match_kind.is_exact()
    }
}

// ==========================================
// TariffRateChange - 税率变更历史
// ==========================================
// 对齐: tariff_rate_history 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffRateChange {
    pub hs_code10: String,
    pub origin_country_code: Option<String>,
    pub old_duty_rate: Option<Decimal>,
    pub new_duty_rate: Option<Decimal>,
    pub old_vat_rate: Option<Decimal>,
    pub new_vat_rate: Option<Decimal>,
    pub changed_at: DateTime<Utc>,
    pub import_batch_id: Option<String>,
}

// ==========================================
// RateImportReport - 税率导入报告
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateImportReport {
    pub batch_id: String,
    pub classification_rows: usize,
    pub duty_rows: usize,
    pub discarded_rows: usize,
    pub skipped_sheets: Vec<String>,
    pub records_written: usize,
    pub history_entries: usize,
    pub elapsed_ms: u128,
}
