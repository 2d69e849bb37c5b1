// ==========================================
// 关税归类与税费计算引擎 - 税率合并引擎
// ==========================================
// 红线: 同一 HS10 至多一条 ThirdCountry 基准记录
// 红线: 惩罚性措施（反倾销/反补贴）不去重，每个原产地一条
// ==========================================
// 输入: 归类记录 + 税率措施（内存数据，无 I/O）
// 输出: TariffCatalog 不可变快照
// ==========================================

use crate::domain::hs_code::{is_generic_origin, HsCode};
use crate::domain::tariff::{
    CanonicalTariffRecord, ClassificationRecord, TariffCatalog, TariffMeasure,
};
use crate::domain::types::MeasureKind;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

// ==========================================
// MeasureBucket - 同一 HS8 下的措施分组
// ==========================================
#[derive(Debug, Default)]
struct MeasureBucket<'a> {
    third_country: Option<&'a TariffMeasure>,
    anti_dumping: Vec<&'a TariffMeasure>,
    countervailing: Vec<&'a TariffMeasure>,
    preferential: Vec<&'a TariffMeasure>,
    other: Vec<&'a TariffMeasure>,
    vat_rate: Option<Decimal>,
}

impl<'a> MeasureBucket<'a> {
    fn push(&mut self, measure: &'a TariffMeasure) {
        if measure.is_vat() {
            if self.vat_rate.is_none() {
                self.vat_rate = measure.duty_rate;
            }
            return;
        }

        match measure.measure_kind {
            MeasureKind::ThirdCountry => match self.third_country {
                None => self.third_country = Some(measure),
                // 有税率的行优先；同等条件下先到先得
                Some(existing) if existing.duty_rate.is_none() && measure.duty_rate.is_some() => {
                    self.third_country = Some(measure)
                }
                Some(_) => {}
            },
            MeasureKind::AntiDumping => self.anti_dumping.push(measure),
            MeasureKind::Countervailing => self.countervailing.push(measure),
            MeasureKind::Preferential => self.preferential.push(measure),
            MeasureKind::Other => self.other.push(measure),
        }
    }

    fn base_duty_rate(&self) -> Decimal {
        self.third_country
            .and_then(|m| m.duty_rate)
            .unwrap_or(Decimal::ZERO)
    }
}

/// 取税率最高的措施（同税率取先出现者）
fn max_rate<'a, I>(measures: I) -> Option<&'a TariffMeasure>
where
    I: IntoIterator<Item = &'a TariffMeasure>,
{
    measures
        .into_iter()
        .filter(|m| m.duty_rate.is_some())
        .fold(None::<&'a TariffMeasure>, |best, m| match best {
            Some(b) if b.duty_rate >= m.duty_rate => Some(b),
            _ => Some(m),
        })
}

/// Other 措施去重键: (原产地, 措施代码或描述)
fn other_key(measure: &TariffMeasure) -> (String, String) {
    let kind = measure
        .measure_code
        .clone()
        .or_else(|| measure.measure_description.clone())
        .unwrap_or_default();
    (measure.origin_key(), kind)
}

// ==========================================
// TariffMerger - 税率合并引擎
// ==========================================
pub struct TariffMerger;

impl TariffMerger {
    pub fn new() -> Self {
        Self
    }

    /// 合并归类记录与税率措施
    ///
    /// # 规则
    /// 1. 措施按 HS8 分组（ThirdCountry 单值，其余列表）
    /// 2. 每个 HS10 一条基准记录: 税率 = ThirdCountry（缺失为 0），
    ///    反倾销/反补贴取组内最高税率并记录出处
    /// 3. HS8 首次出现时追加: 每条反倾销、每条反补贴、
    ///    按原产地去重的优惠税率、按 (原产地, 类型) 去重的其他措施
    /// 4. 无归类记录的 HS8: 保留 ThirdCountry 与特定原产地措施
    #[instrument(skip(self, classifications, measures), fields(
        classification_rows = classifications.len(),
        duty_rows = measures.len()
    ))]
    pub fn merge(
        &self,
        classifications: &[ClassificationRecord],
        measures: &[TariffMeasure],
    ) -> TariffCatalog {
        // === 步骤 1: 按 HS8 分组（保持首次出现顺序）===
        let mut bucket_order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, MeasureBucket> = HashMap::new();
        for measure in measures {
            let hs8 = measure.code.hs8.clone();
            if !buckets.contains_key(&hs8) {
                bucket_order.push(hs8.clone());
            }
            buckets.entry(hs8).or_default().push(measure);
        }
        debug!(buckets = buckets.len(), "措施分组完成");

        // === 步骤 2/3: 归类记录 → 基准记录 + 附加记录 ===
        let mut records = Vec::new();
        let mut seen_hs10: HashSet<String> = HashSet::new();
        let mut emitted_hs8: HashSet<String> = HashSet::new();
        let mut duplicate_rows = 0usize;

        for cls in classifications {
            let bucket = buckets.get(&cls.code.hs8);

            if seen_hs10.insert(cls.code.hs10.clone()) {
                records.push(self.base_record(cls, bucket));
            } else {
                duplicate_rows += 1;
            }

            if let Some(bucket) = bucket {
                if emitted_hs8.insert(cls.code.hs8.clone()) {
                    records.extend(self.origin_records(
                        &cls.code,
                        &cls.description,
                        cls.description_translated.as_deref(),
                        bucket,
                    ));
                }
            }
        }

        // === 步骤 4: 无归类对应的措施 ===
        let mut standalone = 0usize;
        for hs8 in &bucket_order {
            if emitted_hs8.contains(hs8) {
                continue;
            }
            if let Some(bucket) = buckets.get(hs8) {
                let extra = self.standalone_records(bucket);
                standalone += extra.len();
                records.extend(extra);
            }
        }

        let catalog = TariffCatalog::new(records);
        let counts = catalog.count_by_kind();
        info!(
            total = catalog.len(),
            third_country = counts.get(&MeasureKind::ThirdCountry).copied().unwrap_or(0),
            anti_dumping = counts.get(&MeasureKind::AntiDumping).copied().unwrap_or(0),
            countervailing = counts.get(&MeasureKind::Countervailing).copied().unwrap_or(0),
            preferential = counts.get(&MeasureKind::Preferential).copied().unwrap_or(0),
            other = counts.get(&MeasureKind::Other).copied().unwrap_or(0),
            standalone = standalone,
            duplicate_rows = duplicate_rows,
            "税率合并完成"
        );
        catalog
    }

    // ==========================================
    // 记录构造
    // ==========================================

    fn base_record(
        &self,
        cls: &ClassificationRecord,
        bucket: Option<&MeasureBucket>,
    ) -> CanonicalTariffRecord {
        let mut record = CanonicalTariffRecord::baseline(&cls.code, cls.description.clone());
        record.description_translated = cls.description_translated.clone();
        record.start_date = cls.start_date;
        record.end_date = cls.end_date;

        let Some(bucket) = bucket else {
            return record;
        };

        record.duty_rate = bucket.base_duty_rate();
        record.vat_rate = bucket.vat_rate;
        if let Some(tc) = bucket.third_country {
            record.measure_code = tc.measure_code.clone();
            record.legal_base = tc.legal_base.clone();
            record.quota_order_number = tc.quota_order_number.clone();
            record.start_date = tc.start_date.or(cls.start_date);
            record.end_date = tc.end_date.or(cls.end_date);
        }

        Self::apply_penalties(
            &mut record,
            bucket.anti_dumping.iter().copied(),
            bucket.countervailing.iter().copied(),
        );
        record
    }

    /// 附加原产地记录（HS8 首次出现时）
    fn origin_records(
        &self,
        code: &HsCode,
        description: &str,
        description_translated: Option<&str>,
        bucket: &MeasureBucket,
    ) -> Vec<CanonicalTariffRecord> {
        let mut out = Vec::new();

        for measure in bucket.anti_dumping.iter().chain(bucket.countervailing.iter()) {
            out.push(self.origin_record(code, description, description_translated, measure, bucket));
        }

        let mut seen_pref = HashSet::new();
        for measure in &bucket.preferential {
            if seen_pref.insert(measure.origin_key()) {
                out.push(self.origin_record(code, description, description_translated, measure, bucket));
            }
        }

        let mut seen_other = HashSet::new();
        for measure in &bucket.other {
            if is_generic_origin(measure.origin_country_code.as_deref()) {
                continue;
            }
            if seen_other.insert(other_key(measure)) {
                out.push(self.origin_record(code, description, description_translated, measure, bucket));
            }
        }

        out
    }

    /// 单条原产地记录: 基准税率沿用 ThirdCountry，
    /// 反倾销/反补贴取同原产地最高值，本措施自身税率写入对应字段
    fn origin_record(
        &self,
        code: &HsCode,
        description: &str,
        description_translated: Option<&str>,
        measure: &TariffMeasure,
        bucket: &MeasureBucket,
    ) -> CanonicalTariffRecord {
        let mut record = CanonicalTariffRecord::baseline(code, description);
        record.description_translated = description_translated.map(str::to_string);
        Self::copy_measure_fields(&mut record, measure);
        record.duty_rate = bucket.base_duty_rate();
        record.vat_rate = bucket.vat_rate;

        let origin = measure.origin_key();
        Self::apply_penalties(
            &mut record,
            bucket
                .anti_dumping
                .iter()
                .copied()
                .filter(|m| m.origin_key() == origin),
            bucket
                .countervailing
                .iter()
                .copied()
                .filter(|m| m.origin_key() == origin),
        );
        Self::apply_own_rate(&mut record, measure);
        record
    }

    /// 无归类对应的措施组
    fn standalone_records(&self, bucket: &MeasureBucket) -> Vec<CanonicalTariffRecord> {
        let mut out = Vec::new();

        if let Some(tc) = bucket.third_country {
            let mut record = CanonicalTariffRecord::baseline(
                &tc.code,
                tc.goods_description.clone().unwrap_or_default(),
            );
            Self::copy_measure_fields(&mut record, tc);
            record.origin_country_code = None;
            record.origin_description = None;
            record.duty_rate = bucket.base_duty_rate();
            record.vat_rate = bucket.vat_rate;
            Self::apply_penalties(
                &mut record,
                bucket.anti_dumping.iter().copied(),
                bucket.countervailing.iter().copied(),
            );
            out.push(record);
        }

        let mut seen_pref = HashSet::new();
        let mut seen_other = HashSet::new();
        let specific = bucket
            .anti_dumping
            .iter()
            .chain(bucket.countervailing.iter())
            .chain(bucket.preferential.iter())
            .chain(bucket.other.iter())
            .filter(|m| !is_generic_origin(m.origin_country_code.as_deref()));

        for measure in specific {
            let keep = match measure.measure_kind {
                MeasureKind::Preferential => seen_pref.insert(measure.origin_key()),
                MeasureKind::Other => seen_other.insert(other_key(measure)),
                _ => true,
            };
            if !keep {
                continue;
            }

            let mut record = CanonicalTariffRecord::baseline(
                &measure.code,
                measure.goods_description.clone().unwrap_or_default(),
            );
            Self::copy_measure_fields(&mut record, measure);
            record.vat_rate = bucket.vat_rate;
            // 惩罚性税率是附加税，不是基准税率
            record.duty_rate = if measure.measure_kind.is_penalty() {
                Decimal::ZERO
            } else {
                measure.duty_rate.unwrap_or(Decimal::ZERO)
            };
            Self::apply_own_rate(&mut record, measure);
            out.push(record);
        }

        out
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    fn copy_measure_fields(record: &mut CanonicalTariffRecord, measure: &TariffMeasure) {
        record.origin_country_code = measure.origin_country_code.clone();
        record.origin_description = measure.origin_description.clone();
        record.measure_type = measure.measure_kind;
        record.measure_code = measure.measure_code.clone();
        record.legal_base = measure.legal_base.clone();
        record.quota_order_number = measure.quota_order_number.clone();
        record.start_date = measure.start_date;
        record.end_date = measure.end_date;
    }

    fn apply_penalties<'a>(
        record: &mut CanonicalTariffRecord,
        anti_dumping: impl Iterator<Item = &'a TariffMeasure> + Clone,
        countervailing: impl Iterator<Item = &'a TariffMeasure> + Clone,
    ) {
        record.has_anti_dumping = anti_dumping.clone().next().is_some();
        if let Some(best) = max_rate(anti_dumping) {
            record.anti_dumping_rate = best.duty_rate;
            record.anti_dumping_source = Some(best.provenance());
        }

        record.has_countervailing = countervailing.clone().next().is_some();
        if let Some(best) = max_rate(countervailing) {
            record.countervailing_rate = best.duty_rate;
            record.countervailing_source = Some(best.provenance());
        }
    }

    fn apply_own_rate(record: &mut CanonicalTariffRecord, measure: &TariffMeasure) {
        match measure.measure_kind {
            MeasureKind::AntiDumping => {
                record.anti_dumping_rate = measure.duty_rate;
                record.has_anti_dumping = true;
                record.anti_dumping_source = Some(measure.provenance());
            }
            MeasureKind::Countervailing => {
                record.countervailing_rate = measure.duty_rate;
                record.has_countervailing = true;
                record.countervailing_source = Some(measure.provenance());
            }
            MeasureKind::Preferential => record.preferential_rate = measure.duty_rate,
            MeasureKind::ThirdCountry | MeasureKind::Other => {}
        }
    }
}

impl Default for TariffMerger {
    fn default() -> Self {
        Self::new()
    }
}
