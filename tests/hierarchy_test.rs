// ==========================================
// 归类层级解析集成测试
// ==========================================
// 测试目标: 章 / 品目 / 商品三种视图、祖先推导、子商品分组、
//           子商品税率扇出上限、翻译回退、缓存
// ==========================================


use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tariff_duty_engine::domain::hierarchy::{ChapterEntry, HierarchyGranularity};
use tariff_duty_engine::domain::types::HsLevel;
use tariff_duty_engine::engine::{
    HierarchyResolver, HierarchySettings, LookupError, LookupSettings, TariffLookup,
};
use tariff_duty_engine::infra::{
    BestEffortTranslator, ClassificationDocument, ClassificationSource, Clock, ManualClock,
    Translator,
};
use tariff_duty_engine::logging;
use tariff_duty_engine::repository::{TariffRepository, TariffRepositoryImpl};
use test_helpers::*;

struct Fixture {
    _temp_file: tempfile::NamedTempFile,
    source: Arc<FakeClassificationSource>,
    translator: Arc<PrefixTranslator>,
    clock: Arc<ManualClock>,
    resolver: HierarchyResolver,
}

fn fixture_with(translation_fails: bool, settings: HierarchySettings) -> Fixture {
    logging::init_test();
    let (temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let repo = Arc::new(TariffRepositoryImpl::new(&db_path).expect("Failed to create tariff repo"));
    let source = Arc::new(FakeClassificationSource::new());
    let clock = fixed_clock();

    let lookup = Arc::new(TariffLookup::new(
        repo as Arc<dyn TariffRepository>,
        source.clone() as Arc<dyn ClassificationSource>,
        LookupSettings::default(),
        clock.clone() as Arc<dyn Clock>,
    ));
    let translator = Arc::new(PrefixTranslator::new(translation_fails));
    let best_effort = Arc::new(BestEffortTranslator::new(
        translator.clone() as Arc<dyn Translator>,
        "en",
        "zh",
        Duration::from_secs(1),
        chrono::Duration::hours(24),
        clock.clone() as Arc<dyn Clock>,
    ));
    let resolver = HierarchyResolver::new(
        source.clone() as Arc<dyn ClassificationSource>,
        lookup,
        best_effort,
        settings,
        clock.clone() as Arc<dyn Clock>,
    );

    Fixture {
        _temp_file: temp_file,
        source,
        translator,
        clock,
        resolver,
    }
}

fn fixture() -> Fixture {
    fixture_with(false, HierarchySettings::default())
}

fn ceramics_chapter() -> ClassificationDocument {
    let mut doc = porcelain_heading();
    doc.code = "6900000000".to_string();
    doc.description = "Ceramic products".to_string();
    doc.heading = None;
    doc.nodes = vec![
        node("6901000000", 0, false, "Bricks, blocks, tiles of siliceous fossil meals"),
        node("6911000000", 0, false, "Tableware, kitchenware, of porcelain or china"),
        node("6912000000", 0, false, "Ceramic tableware, other than of porcelain"),
    ];
    doc
}

#[tokio::test]
async fn test_commodity_view_derives_ancestors_and_breadcrumb() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());
    f.source.add_commodity(porcelain_commodity("6911109010", "Plates", "12", None));

    let view = f.resolver.resolve("6911.10.90.10", None).await.unwrap();

    assert_eq!(view.granularity, HierarchyGranularity::Commodity);
    assert_eq!(view.requested_code, "6911109010");
    assert_eq!(view.description.as_deref(), Some("Plates"));

    let ancestors: Vec<&str> = view.ancestors.iter().map(|n| n.code.as_str()).collect();
    assert_eq!(ancestors, vec!["6911100000", "6911109000"]);
    assert!(view.ancestors.iter().all(|n| !n.declarable));

    let target = view.target.as_ref().unwrap();
    assert_eq!(target.code, "6911109010");
    assert!(target.declarable);

    let levels: Vec<HsLevel> = view.breadcrumb.iter().map(|b| b.level).collect();
    assert_eq!(&levels[..3], &[HsLevel::Section, HsLevel::Chapter, HsLevel::Heading]);
    let crumbs: Vec<&str> = view.breadcrumb.iter().map(|b| b.code.as_str()).collect();
    assert_eq!(
        crumbs,
        vec!["XIII", "69", "6911", "6911100000", "6911109000", "6911109010"]
    );

    // 子商品按最近的不可申报父节点归组
    assert_eq!(view.child_groups.len(), 1);
    let group = &view.child_groups[0];
    assert_eq!(group.group_code.as_deref(), Some("6911109000"));
    assert_eq!(group.label, "Other");
    let children: Vec<&str> = group.children.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(children, vec!["6911109010", "6911109090"]);

    // 未提供原产地时不查询子商品税率
    assert!(view.child_rates.is_empty());
    assert_eq!(f.source.commodity_calls(), 1);
}

#[tokio::test]
async fn test_six_digit_request_groups_whole_subheading() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());

    let view = f.resolver.resolve("691110", None).await.unwrap();

    assert_eq!(view.granularity, HierarchyGranularity::Commodity);
    let target = view.target.as_ref().unwrap();
    assert_eq!(target.code, "6911100000");
    assert!(view.ancestors.is_empty());

    let groups: Vec<(Option<&str>, usize)> = view
        .child_groups
        .iter()
        .map(|g| (g.group_code.as_deref(), g.children.len()))
        .collect();
    assert_eq!(
        groups,
        vec![(Some("6911100000"), 1), (Some("6911109000"), 2)]
    );
}

#[tokio::test]
async fn test_child_rates_are_capped_and_isolated() {
    let settings = HierarchySettings {
        child_rate_limit: 1,
        ..HierarchySettings::default()
    };
    let f = fixture_with(false, settings);
    f.source.add_heading(porcelain_heading());
    f.source.add_commodity(porcelain_commodity("6911109010", "Plates", "12", Some(("36.1", "CN"))));

    let view = f.resolver.resolve("6911109010", Some("cn")).await.unwrap();

    assert_eq!(view.origin.as_deref(), Some("CN"));
    assert_eq!(view.child_rates.len(), 1);
    let first = &view.child_rates[0];
    assert_eq!(first.code, "6911109010");
    let rate = first.rate.as_ref().unwrap();
    assert_eq!(rate.duty_rate, d("12"));
    assert_eq!(rate.anti_dumping_rate, Some(d("36.1")));
}

#[tokio::test]
async fn test_child_rate_failure_does_not_fail_view() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());
    // 只有 6911101000 有商品文档，其余子商品的税率查询全部回退失败
    f.source.add_commodity(porcelain_commodity("6911101000", "Tea sets", "12", None));

    let view = f.resolver.resolve("691110", Some("US")).await.unwrap();

    let outcomes: Vec<(&str, bool)> = view
        .child_rates
        .iter()
        .map(|c| (c.code.as_str(), c.rate.is_some()))
        .collect();
    assert_eq!(
        outcomes,
        vec![("6911101000", true), ("6911109010", false), ("6911109090", false)]
    );
    assert!(view.child_rates[1].error.is_some());
}

#[tokio::test]
async fn test_descriptions_are_translated_best_effort() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());
    f.source.add_commodity(porcelain_commodity("6911109010", "Plates", "12", None));

    let view = f.resolver.resolve("6911109010", None).await.unwrap();

    assert_eq!(view.description_translated.as_deref(), Some("[zh] Plates"));
    assert_eq!(
        view.ancestors[0].description_translated.as_deref(),
        Some("[zh] Tableware and kitchenware")
    );
    assert_eq!(
        view.child_groups[0].label_translated.as_deref(),
        Some("[zh] Other")
    );
    // 原文保留
    assert_eq!(view.ancestors[0].description, "Tableware and kitchenware");
}

#[tokio::test]
async fn test_translation_failure_keeps_original_text() {
    let f = fixture_with(true, HierarchySettings::default());
    f.source.add_heading(porcelain_heading());
    f.source.add_commodity(porcelain_commodity("6911109010", "Plates", "12", None));

    let view = f.resolver.resolve("6911109010", None).await.unwrap();

    assert!(f.translator.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(view.description.as_deref(), Some("Plates"));
    assert_eq!(view.description_translated, None);
    assert!(view.breadcrumb.iter().all(|b| b.description_translated.is_none()));
    assert_eq!(view.ancestors.len(), 2);
}

#[tokio::test]
async fn test_chapter_and_heading_views() {
    let f = fixture();
    f.source.add_chapter(ceramics_chapter());
    f.source.add_heading(porcelain_heading());

    let chapter = f.resolver.resolve("69", None).await.unwrap();
    assert_eq!(chapter.granularity, HierarchyGranularity::Chapter);
    assert_eq!(chapter.requested_code, "69");
    assert_eq!(chapter.children.len(), 3);
    assert!(chapter.breadcrumb.iter().any(|b| b.level == HsLevel::Chapter && b.code == "69"));

    let heading = f.resolver.resolve("6911", None).await.unwrap();
    assert_eq!(heading.granularity, HierarchyGranularity::Heading);
    assert_eq!(heading.children.len(), 6);
    let crumbs: Vec<&str> = heading.breadcrumb.iter().map(|b| b.code.as_str()).collect();
    assert_eq!(crumbs, vec!["XIII", "69", "6911"]);
    assert!(heading.child_groups.is_empty());
}

#[tokio::test]
async fn test_missing_heading_is_not_found() {
    let f = fixture();

    match f.resolver.resolve("6912", None).await.unwrap_err() {
        LookupError::NotFound { code, tried } => {
            assert_eq!(code, "6912");
            assert_eq!(tried, vec!["6912"]);
        }
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_upstream_error_propagates() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());
    *f.source.fail_status.lock().unwrap() = Some(500);

    let err = f.resolver.resolve("6911109010", None).await.unwrap_err();
    assert!(matches!(err, LookupError::Remote(_)));
}

#[tokio::test]
async fn test_views_are_cached_per_code_and_origin() {
    let f = fixture();
    f.source.add_heading(porcelain_heading());

    f.resolver.resolve("6911", None).await.unwrap();
    f.resolver.resolve("6911", None).await.unwrap();
    assert_eq!(f.source.heading_calls.load(Ordering::SeqCst), 1);

    f.clock.advance(chrono::Duration::minutes(31));
    f.resolver.resolve("6911", None).await.unwrap();
    assert_eq!(f.source.heading_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_chapter_index_uses_reference_ttl() {
    let f = fixture();
    f.source.chapter_index.lock().unwrap().push(ChapterEntry {
        code: "69".to_string(),
        description: "Ceramic products".to_string(),
        section_code: Some("XIII".to_string()),
        section_title: None,
    });

    assert_eq!(f.resolver.chapter_index().await.unwrap().len(), 1);
    f.clock.advance(chrono::Duration::days(6));
    f.resolver.chapter_index().await.unwrap();
    assert_eq!(f.source.index_calls.load(Ordering::SeqCst), 1);

    f.clock.advance(chrono::Duration::days(2));
    f.resolver.chapter_index().await.unwrap();
    assert_eq!(f.source.index_calls.load(Ordering::SeqCst), 2);
}
