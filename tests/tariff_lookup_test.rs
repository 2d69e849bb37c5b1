// ==========================================
// 税率查询集成测试
// ==========================================
// 测试目标: 本地目录 → 远程 HS10/HS8/HS6 → 同品目近似编码 的回退链路，
//           缓存 TTL，批量查询的逐条结果
// ==========================================


use std::sync::Arc;

use tariff_duty_engine::domain::types::{MatchKind, MeasureKind};
use tariff_duty_engine::domain::tariff::RateSource;
use tariff_duty_engine::engine::{LookupError, LookupSettings, TariffLookup, TariffMerger};
use tariff_duty_engine::infra::{ClassificationSource, Clock, ManualClock};
use tariff_duty_engine::logging;
use tariff_duty_engine::repository::{TariffRepository, TariffRepositoryImpl};
use test_helpers::*;

struct Fixture {
    _temp_file: tempfile::NamedTempFile,
    repo: Arc<TariffRepositoryImpl>,
    source: Arc<FakeClassificationSource>,
    clock: Arc<ManualClock>,
    lookup: TariffLookup,
}

fn fixture() -> Fixture {
    logging::init_test();
    let (temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let repo = Arc::new(TariffRepositoryImpl::new(&db_path).expect("Failed to create tariff repo"));
    let source = Arc::new(FakeClassificationSource::new());
    let clock = fixed_clock();

    let mut settings = LookupSettings::default();
    settings.window_delay = std::time::Duration::from_millis(1);

    let lookup = TariffLookup::new(
        repo.clone() as Arc<dyn TariffRepository>,
        source.clone() as Arc<dyn ClassificationSource>,
        settings,
        clock.clone() as Arc<dyn Clock>,
    );
    Fixture {
        _temp_file: temp_file,
        repo,
        source,
        clock,
        lookup,
    }
}

/// 写入 6911 10 00 的本地目录: 第三国 12%，对 CN 反倾销 36.1%，增值税 19%
async fn seed_porcelain_catalog(repo: &TariffRepositoryImpl) {
    let classifications = vec![classification("6911100000", "Tableware and kitchenware")];
    let measures = vec![
        measure("6911100000", MeasureKind::ThirdCountry, "103", Some("12"), None),
        measure("6911100000", MeasureKind::AntiDumping, "551", Some("36.1"), Some("CN")),
        measure("6911100000", MeasureKind::Other, "305", Some("19"), None),
    ];
    let catalog = TariffMerger::new().merge(&classifications, &measures);
    repo.replace_catalog(catalog.records(), "seed")
        .await
        .expect("Failed to seed catalog");
}

#[tokio::test]
async fn test_catalog_exact_match_applies_origin_penalties() {
    let f = fixture();
    seed_porcelain_catalog(&f.repo).await;

    let cn = f.lookup.lookup("6911.10.00.00", Some("cn")).await.unwrap();
    assert_eq!(cn.match_kind, MatchKind::Exact);
    assert_eq!(cn.source, RateSource::Catalog);
    assert_eq!(cn.duty_rate, d("12"));
    assert_eq!(cn.vat_rate, Some(d("19")));
    assert_eq!(cn.anti_dumping_rate, Some(d("36.1")));

    let us = f.lookup.lookup("6911100000", Some("US")).await.unwrap();
    assert_eq!(us.duty_rate, d("12"));
    assert_eq!(us.anti_dumping_rate, None);

    // 未指定原产地: 保守口径取最高惩罚税率
    let any = f.lookup.lookup("6911100000", None).await.unwrap();
    assert_eq!(any.anti_dumping_rate, Some(d("36.1")));

    assert_eq!(f.source.commodity_calls(), 0);
}

#[tokio::test]
async fn test_catalog_prefix_match_is_marked_as_parent() {
    let f = fixture();
    seed_porcelain_catalog(&f.repo).await;

    let record = f.lookup.lookup("6911100099", None).await.unwrap();
    assert_eq!(record.match_kind, MatchKind::ParentPrefix("6911100000".to_string()));
    assert_eq!(record.matched_code, "6911100000");
    assert!(!record.is_exact());
    assert!(record.note.as_deref().unwrap_or_default().contains("6911100000"));
}

#[tokio::test]
async fn test_remote_fallback_to_eight_digit_parent() {
    let f = fixture();
    f.source.add_commodity(porcelain_commodity("6911101000", "Tea sets", "12", None));

    let record = f.lookup.lookup("6911101099", None).await.unwrap();
    assert_eq!(record.source, RateSource::Remote);
    assert_eq!(record.match_kind, MatchKind::ParentPrefix("6911101000".to_string()));
    assert_eq!(record.duty_rate, d("12"));
    assert!(record.note.is_some());
    // HS10 404 → HS8 命中
    assert_eq!(f.source.commodity_calls(), 2);
}

#[tokio::test]
async fn test_sibling_approximation_when_all_prefixes_missing() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());
    f.source.add_commodity(porcelain_commodity("6911109090", "Other tableware", "12", Some(("36.1", "CN"))));

    let record = f.lookup.lookup("6911109050", Some("CN")).await.unwrap();
    assert_eq!(
        record.match_kind,
        MatchKind::SiblingApproximation("6911109090".to_string())
    );
    assert_eq!(record.matched_code, "6911109090");
    assert_eq!(record.anti_dumping_rate, Some(d("36.1")));
    let note = record.note.expect("sibling match carries a note");
    assert!(note.contains("6911109050"));
    assert!(note.contains("6911109090"));
}

#[tokio::test]
async fn test_not_found_reports_every_attempted_code() {
    let f = fixture();

    let err = f.lookup.lookup("6911109050", None).await.unwrap_err();
    match err {
        LookupError::NotFound { code, tried } => {
            assert_eq!(code, "6911109050");
            assert_eq!(tried, vec!["6911109050", "6911109000", "6911100000", "6911"]);
        }
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_upstream_failure_is_not_treated_as_not_found() {
    let f = fixture();
    *f.source.fail_status.lock().unwrap() = Some(503);

    let err = f.lookup.lookup("6911101000", None).await.unwrap_err();
    assert!(matches!(err, LookupError::Remote(_)));
    assert_eq!(f.source.commodity_calls(), 1);
}

#[tokio::test]
async fn test_cache_ttl_for_exact_and_approximate_matches() {
    let f = fixture();
    f.source.add_commodity(porcelain_commodity("6911101000", "Tea sets", "12", None));

    // 精确匹配: 24h 内命中缓存
    f.lookup.lookup("6911101000", None).await.unwrap();
    f.clock.advance(chrono::Duration::hours(23));
    f.lookup.lookup("6911101000", None).await.unwrap();
    assert_eq!(f.source.commodity_calls(), 1);
    f.clock.advance(chrono::Duration::hours(2));
    f.lookup.lookup("6911101000", None).await.unwrap();
    assert_eq!(f.source.commodity_calls(), 2);

    // 近似匹配: 6h 后过期
    f.lookup.lookup("6911101099", None).await.unwrap();
    let calls = f.source.commodity_calls();
    f.clock.advance(chrono::Duration::hours(5));
    f.lookup.lookup("6911101099", None).await.unwrap();
    assert_eq!(f.source.commodity_calls(), calls);
    f.clock.advance(chrono::Duration::hours(2));
    f.lookup.lookup("6911101099", None).await.unwrap();
    assert_eq!(f.source.commodity_calls(), calls + 2);
}

#[tokio::test]
async fn test_bulk_lookup_tracks_each_code_independently() {
    let f = fixture();
    seed_porcelain_catalog(&f.repo).await;

    let codes: Vec<String> = vec![
        "6911100000".to_string(),
        "12".to_string(),
        "6911100000".to_string(),
        "0101210000".to_string(),
        "6911100050".to_string(),
        "6911100000".to_string(),
        "6911100000".to_string(),
    ];
    let report = f.lookup.lookup_many(&codes, Some("CN")).await;

    assert_eq!(report.outcomes.len(), codes.len());
    assert_eq!(report.failed, 2);
    assert_eq!(report.succeeded, 5);
    let failed: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| o.error.is_some())
        .map(|o| o.code.as_str())
        .collect();
    assert_eq!(failed, vec!["12", "0101210000"]);
    // 结果顺序与输入一致
    for (outcome, code) in report.outcomes.iter().zip(&codes) {
        assert_eq!(&outcome.code, code);
    }
}
