// ==========================================
// 关税归类与税费计算引擎 - 税率查询引擎
// ==========================================
// 顺序: 缓存 → 本地目录(精确 HS10 / HS8 前缀升序)
//       → 远程(HS10 → HS8 补零 → HS6 补零) → 同品目近似兄弟编码
// 红线: 所有回退失败后才返回 NotFound，并附带已尝试的编码
// 红线: 近似匹配必须带说明，缓存时间短于精确匹配
// ==========================================

use crate::config::{ConfigResult, TariffConfigReader};
use crate::domain::hierarchy::HsNode;
use crate::domain::hs_code::{is_generic_origin, significant_digits, HsCode};
use crate::domain::tariff::{
    CanonicalTariffRecord, ClassificationRecord, RateRecord, RateSource,
};
use crate::domain::types::{MatchKind, MeasureKind};
use crate::engine::tariff_merger::TariffMerger;
use crate::i18n;
use crate::infra::{ClassificationDocument, ClassificationSource, Clock, RemoteError, TtlCache};
use crate::repository::{RepositoryError, TariffRepository};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// ==========================================
// LookupError
// ==========================================
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("未找到编码 {code} 的归类（已尝试: {}）", .tried.join(", "))]
    NotFound { code: String, tried: Vec<String> },

    #[error("编码格式无效: {0}")]
    InvalidCode(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type LookupResult<T> = Result<T, LookupError>;

// ==========================================
// SiblingRule - 近似兄弟编码选择规则
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiblingRule {
    OtherCodeSuffix,  // 有效位以 90 / 99 结尾（「其他」子目）
    OtherDescription, // 描述以 "Other" 开头
    SharedPrefix,     // 与请求编码共享 6 位前缀
    Lexical,          // 编码字典序
}

impl SiblingRule {
    pub const DEFAULT_POLICY: [SiblingRule; 4] = [
        SiblingRule::OtherCodeSuffix,
        SiblingRule::OtherDescription,
        SiblingRule::SharedPrefix,
        SiblingRule::Lexical,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "OTHER_CODE_SUFFIX" => Some(SiblingRule::OtherCodeSuffix),
            "OTHER_DESCRIPTION" => Some(SiblingRule::OtherDescription),
            "SHARED_PREFIX" => Some(SiblingRule::SharedPrefix),
            "LEXICAL" => Some(SiblingRule::Lexical),
            _ => None,
        }
    }

    /// 解析规则列表（未知规则忽略；结果为空时使用默认顺序）
    pub fn parse_policy(raw: &[String]) -> Vec<SiblingRule> {
        let mut rules = Vec::new();
        for name in raw {
            match SiblingRule::parse(name) {
                Some(rule) if !rules.contains(&rule) => rules.push(rule),
                Some(_) => {}
                None => warn!(rule = %name, "未知的兄弟编码选择规则，忽略"),
            }
        }
        if rules.is_empty() {
            rules = SiblingRule::DEFAULT_POLICY.to_vec();
        }
        rules
    }

    fn compare(&self, a: &HsNode, b: &HsNode, prefix6: &str) -> Ordering {
        match self {
            SiblingRule::OtherCodeSuffix => is_other_code(b).cmp(&is_other_code(a)),
            SiblingRule::OtherDescription => {
                is_other_description(b).cmp(&is_other_description(a))
            }
            SiblingRule::SharedPrefix => {
                b.code.starts_with(prefix6).cmp(&a.code.starts_with(prefix6))
            }
            SiblingRule::Lexical => a.code.cmp(&b.code),
        }
    }
}

fn is_other_code(node: &HsNode) -> bool {
    let significant = significant_digits(&node.code);
    significant.ends_with("90") || significant.ends_with("99")
}

fn is_other_description(node: &HsNode) -> bool {
    node.description.trim().to_lowercase().starts_with("other")
}

/// 按规则顺序选择最佳兄弟编码（仅可申报节点，排除已尝试的编码）
pub fn select_sibling<'a>(
    nodes: &'a [HsNode],
    requested: &HsCode,
    tried: &[String],
    policy: &[SiblingRule],
) -> Option<&'a HsNode> {
    let prefix6 = &requested.hs10[..6];
    let mut candidates: Vec<&HsNode> = nodes
        .iter()
        .filter(|n| n.declarable && !tried.contains(&n.code))
        .collect();

    // 稳定排序: 全部规则相同时保持源顺序
    candidates.sort_by(|a, b| {
        policy
            .iter()
            .map(|rule| rule.compare(a, b, prefix6))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    candidates.into_iter().next()
}

// ==========================================
// 税率选择（纯函数）
// ==========================================

/// 从同一 HS10 的目录记录中选出适用税率
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRates {
    pub hs_code10: String,
    pub description: String,
    pub duty_rate: Decimal,
    pub vat_rate: Option<Decimal>,
    pub anti_dumping_rate: Option<Decimal>,
    pub countervailing_rate: Option<Decimal>,
    pub preferential_rate: Option<Decimal>,
}

/// 选择规则
/// - 基准税率 / 增值税取 ThirdCountry 基准记录
/// - 未指定原产地: 反倾销 / 反补贴取全部记录中的最高值（保守口径）
/// - 指定原产地: 只取同原产地或非特定原产地的惩罚性记录中的最高值
/// - 优惠税率只在指定原产地时返回，且不自动替代基准税率
pub fn select_rates(records: &[&CanonicalTariffRecord], origin: Option<&str>) -> Option<SelectedRates> {
    let base = records
        .iter()
        .find(|r| r.is_baseline())
        .or_else(|| records.iter().find(|r| r.measure_type == MeasureKind::ThirdCountry))
        .or_else(|| records.first())?;

    let same_origin = |r: &CanonicalTariffRecord, o: &str| {
        r.origin_country_code
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(o))
    };

    let penalty_max = |kind: MeasureKind, pick: fn(&CanonicalTariffRecord) -> Option<Decimal>| {
        records
            .iter()
            .filter(|r| match origin {
                None => true,
                Some(o) => {
                    r.measure_type == kind
                        && (same_origin(**r, o) || is_generic_origin(r.origin_country_code.as_deref()))
                }
            })
            .filter_map(|r| pick(*r))
            .max()
    };

    let preferential_rate = origin.and_then(|o| {
        records
            .iter()
            .find(|r| r.measure_type == MeasureKind::Preferential && same_origin(**r, o))
            .and_then(|r| r.preferential_rate)
    });

    Some(SelectedRates {
        hs_code10: base.hs_code10.clone(),
        description: base.description.clone(),
        duty_rate: base.duty_rate,
        vat_rate: base
            .vat_rate
            .or_else(|| records.iter().find_map(|r| r.vat_rate)),
        anti_dumping_rate: penalty_max(MeasureKind::AntiDumping, |r| r.anti_dumping_rate),
        countervailing_rate: penalty_max(MeasureKind::Countervailing, |r| r.countervailing_rate),
        preferential_rate,
    })
}

// ==========================================
// LookupSettings
// ==========================================
#[derive(Debug, Clone)]
pub struct LookupSettings {
    pub exact_ttl: chrono::Duration,
    pub approximate_ttl: chrono::Duration,
    pub window_size: usize,
    pub window_delay: Duration,
    pub sibling_policy: Vec<SiblingRule>,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            exact_ttl: chrono::Duration::hours(24),
            approximate_ttl: chrono::Duration::hours(6),
            window_size: 5,
            window_delay: Duration::from_millis(200),
            sibling_policy: SiblingRule::DEFAULT_POLICY.to_vec(),
        }
    }
}

impl LookupSettings {
    pub async fn from_config(reader: &dyn TariffConfigReader) -> ConfigResult<Self> {
        let exact_hours = reader.get_exact_lookup_ttl_hours().await?;
        // 近似匹配 TTL 必须短于精确匹配
        let approximate_hours = reader
            .get_approximate_lookup_ttl_hours()
            .await?
            .min(exact_hours.saturating_sub(1).max(1));

        Ok(Self {
            exact_ttl: chrono::Duration::hours(exact_hours as i64),
            approximate_ttl: chrono::Duration::hours(approximate_hours as i64),
            window_size: reader.get_bulk_lookup_window_size().await?.max(1),
            window_delay: Duration::from_millis(reader.get_bulk_lookup_window_delay_ms().await?),
            sibling_policy: SiblingRule::parse_policy(&reader.get_sibling_priority_policy().await?),
        })
    }
}

// ==========================================
// 批量查询报告
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkLookupOutcome {
    pub code: String,
    pub rate: Option<RateRecord>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkLookupReport {
    pub outcomes: Vec<BulkLookupOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

type CacheKey = (String, Option<String>);

// ==========================================
// TariffLookup - 税率查询引擎
// ==========================================
pub struct TariffLookup {
    repo: Arc<dyn TariffRepository>,
    source: Arc<dyn ClassificationSource>,
    cache: TtlCache<CacheKey, RateRecord>,
    settings: LookupSettings,
    merger: TariffMerger,
}

impl TariffLookup {
    pub fn new(
        repo: Arc<dyn TariffRepository>,
        source: Arc<dyn ClassificationSource>,
        settings: LookupSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            source,
            cache: TtlCache::new(settings.exact_ttl, clock),
            settings,
            merger: TariffMerger::new(),
        }
    }

    pub fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    /// 查询 (编码, 原产地) 的适用税率
    ///
    /// # 返回
    /// - Ok(RateRecord): match_kind 标明精确 / 上级编码 / 近似兄弟编码
    /// - Err(NotFound): 全部回退失败，tried 为已尝试编码
    #[instrument(skip(self), fields(hs_code = %code))]
    pub async fn lookup(&self, code: &str, origin: Option<&str>) -> LookupResult<RateRecord> {
        let hs = HsCode::parse(code).ok_or_else(|| LookupError::InvalidCode(code.to_string()))?;
        let origin = normalize_origin(origin);
        let key = (hs.hs10.clone(), origin.clone());

        // === 步骤 1: 缓存 ===
        if let Some(mut cached) = self.cache.get(&key).await {
            debug!(hs_code10 = %hs.hs10, "税率缓存命中");
            cached.requested_code = code.to_string();
            return Ok(cached);
        }

        // === 步骤 2: 本地目录 ===
        if let Some(record) = self.lookup_catalog(code, &hs, origin.as_deref()).await? {
            self.remember(key, &record).await;
            return Ok(record);
        }

        // === 步骤 3: 远程 HS10 → HS8 → HS6 ===
        let mut tried: Vec<String> = Vec::new();
        for candidate in candidate_codes(&hs) {
            match self.source.fetch_commodity(&candidate, origin.as_deref()).await {
                Ok(doc) => {
                    let match_kind = if candidate == hs.hs10 {
                        MatchKind::Exact
                    } else {
                        info!(requested = %hs.hs10, matched = %candidate, "使用上级编码税率");
                        MatchKind::ParentPrefix(candidate.clone())
                    };
                    let record = self.record_from_document(code, &candidate, &doc, origin.as_deref(), match_kind);
                    self.remember(key, &record).await;
                    return Ok(record);
                }
                Err(e) if e.is_not_found() => {
                    debug!(candidate = %candidate, "远程编码不存在，继续回退");
                    tried.push(candidate);
                }
                Err(e) => return Err(e.into()),
            }
        }

        // === 步骤 4: 同品目近似兄弟编码 ===
        let record = self
            .lookup_sibling(code, &hs, origin.as_deref(), &mut tried)
            .await?;
        self.remember(key, &record).await;
        Ok(record)
    }

    /// 批量查询: 固定窗口并发，窗口之间等待；单个编码失败不影响其他编码
    #[instrument(skip(self, codes), fields(count = codes.len()))]
    pub async fn lookup_many(&self, codes: &[String], origin: Option<&str>) -> BulkLookupReport {
        let mut outcomes = Vec::with_capacity(codes.len());
        let windows: Vec<&[String]> = codes.chunks(self.settings.window_size.max(1)).collect();
        let window_count = windows.len();

        for (idx, window) in windows.into_iter().enumerate() {
            let results = join_all(window.iter().map(|code| self.lookup(code, origin))).await;
            for (code, result) in window.iter().zip(results) {
                outcomes.push(match result {
                    Ok(rate) => BulkLookupOutcome {
                        code: code.clone(),
                        rate: Some(rate),
                        error: None,
                    },
                    Err(e) => {
                        warn!(hs_code = %code, error = %e, "批量查询单个编码失败");
                        BulkLookupOutcome {
                            code: code.clone(),
                            rate: None,
                            error: Some(e.to_string()),
                        }
                    }
                });
            }

            if idx + 1 < window_count && !self.settings.window_delay.is_zero() {
                tokio::time::sleep(self.settings.window_delay).await;
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.rate.is_some()).count();
        let failed = outcomes.len() - succeeded;
        info!(succeeded, failed, "批量税率查询完成");

        BulkLookupReport {
            outcomes,
            succeeded,
            failed,
        }
    }

    // ==========================================
    // 内部步骤
    // ==========================================

    async fn lookup_catalog(
        &self,
        code: &str,
        hs: &HsCode,
        origin: Option<&str>,
    ) -> LookupResult<Option<RateRecord>> {
        let exact = self.repo.find_exact(&hs.hs10).await?;
        if !exact.is_empty() {
            let refs: Vec<&CanonicalTariffRecord> = exact.iter().collect();
            return Ok(select_rates(&refs, origin)
                .map(|rates| build_record(code, origin, rates, MatchKind::Exact, None, RateSource::Catalog)));
        }

        let by_prefix = self.repo.find_by_prefix(&hs.hs8).await?;
        let Some(first_code) = by_prefix.first().map(|r| r.hs_code10.clone()) else {
            return Ok(None);
        };
        let refs: Vec<&CanonicalTariffRecord> = by_prefix
            .iter()
            .filter(|r| r.hs_code10 == first_code)
            .collect();

        info!(requested = %hs.hs10, matched = %first_code, "本地目录按 8 位前缀匹配");
        let note = i18n::t_with_args(
            "lookup.parent_note",
            &[("requested", hs.hs10.as_str()), ("matched", first_code.as_str())],
        );
        Ok(select_rates(&refs, origin).map(|rates| {
            build_record(
                code,
                origin,
                rates,
                MatchKind::ParentPrefix(first_code.clone()),
                Some(note),
                RateSource::Catalog,
            )
        }))
    }

    async fn lookup_sibling(
        &self,
        code: &str,
        hs: &HsCode,
        origin: Option<&str>,
        tried: &mut Vec<String>,
    ) -> LookupResult<RateRecord> {
        let heading = hs.heading().to_string();
        let heading_doc = match self.source.fetch_heading(&heading).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => {
                tried.push(heading);
                return Err(self.not_found(code, tried));
            }
            Err(e) => return Err(e.into()),
        };

        let Some(sibling) = select_sibling(&heading_doc.nodes, hs, tried, &self.settings.sibling_policy)
        else {
            tried.push(heading);
            return Err(self.not_found(code, tried));
        };
        let sibling_code = sibling.code.clone();

        warn!(requested = %hs.hs10, sibling = %sibling_code, "使用同品目近似编码税率");
        match self.source.fetch_commodity(&sibling_code, origin).await {
            Ok(doc) => {
                let mut record = self.record_from_document(
                    code,
                    &sibling_code,
                    &doc,
                    origin,
                    MatchKind::SiblingApproximation(sibling_code.clone()),
                );
                record.note = Some(i18n::t_with_args(
                    "lookup.sibling_note",
                    &[("requested", hs.hs10.as_str()), ("matched", sibling_code.as_str())],
                ));
                Ok(record)
            }
            Err(e) if e.is_not_found() => {
                tried.push(sibling_code);
                Err(self.not_found(code, tried))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn not_found(&self, code: &str, tried: &[String]) -> LookupError {
        warn!(hs_code = %code, tried = ?tried, "全部回退失败");
        LookupError::NotFound {
            code: code.to_string(),
            tried: tried.to_vec(),
        }
    }

    /// 远程商品文档 → 经合并规则得到的税率记录
    fn record_from_document(
        &self,
        requested: &str,
        candidate: &str,
        doc: &ClassificationDocument,
        origin: Option<&str>,
        match_kind: MatchKind,
    ) -> RateRecord {
        let hs = HsCode::parse(&doc.code)
            .or_else(|| HsCode::parse(candidate))
            .unwrap_or_else(|| HsCode {
                hs8: candidate.chars().take(8).collect(),
                hs10: candidate.to_string(),
            });

        let classification = ClassificationRecord {
            code: hs.clone(),
            description: doc.description.clone(),
            description_translated: None,
            start_date: None,
            end_date: None,
            row_number: 0,
        };
        let measures: Vec<_> = doc
            .measures
            .iter()
            .cloned()
            .map(|mut m| {
                m.code = hs.clone();
                m
            })
            .collect();
        let catalog = self.merger.merge(std::slice::from_ref(&classification), &measures);
        let records = catalog.by_hs10(&hs.hs10);

        let rates = select_rates(&records, origin).unwrap_or_else(|| SelectedRates {
            hs_code10: hs.hs10.clone(),
            description: doc.description.clone(),
            duty_rate: Decimal::ZERO,
            vat_rate: None,
            anti_dumping_rate: None,
            countervailing_rate: None,
            preferential_rate: None,
        });

        let note = match &match_kind {
            MatchKind::ParentPrefix(matched) => {
                let requested10 = hs_requested(requested);
                Some(i18n::t_with_args(
                    "lookup.parent_note",
                    &[("requested", requested10.as_str()), ("matched", matched.as_str())],
                ))
            }
            _ => None,
        };
        build_record(requested, origin, rates, match_kind, note, RateSource::Remote)
    }

    async fn remember(&self, key: CacheKey, record: &RateRecord) {
        let ttl = if record.is_exact() {
            self.settings.exact_ttl
        } else {
            self.settings.approximate_ttl
        };
        self.cache.insert_with_ttl(key, record.clone(), ttl).await;
    }
}

fn hs_requested(code: &str) -> String {
    HsCode::parse(code)
        .map(|hs| hs.hs10)
        .unwrap_or_else(|| code.to_string())
}

fn normalize_origin(origin: Option<&str>) -> Option<String> {
    origin
        .map(|o| o.trim().to_uppercase())
        .filter(|o| !o.is_empty())
}

/// 远程候选编码: HS10 → HS8 补零 → HS6 补零（去重，保持顺序）
fn candidate_codes(hs: &HsCode) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(3);
    for candidate in [hs.hs10.clone(), hs.hs8_padded(), hs.hs6_padded()] {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn build_record(
    requested: &str,
    origin: Option<&str>,
    rates: SelectedRates,
    match_kind: MatchKind,
    note: Option<String>,
    source: RateSource,
) -> RateRecord {
    RateRecord {
        requested_code: requested.to_string(),
        matched_code: rates.hs_code10,
        origin_country_code: origin.map(str::to_string),
        description: Some(rates.description).filter(|d| !d.is_empty()),
        duty_rate: rates.duty_rate,
        vat_rate: rates.vat_rate,
        anti_dumping_rate: rates.anti_dumping_rate,
        countervailing_rate: rates.countervailing_rate,
        preferential_rate: rates.preferential_rate,
        match_kind,
        note,
        source,
    }
}
