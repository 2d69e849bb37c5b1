// ==========================================
// 批次税费计算集成测试
// ==========================================
// 测试目标: 费用分摊 → 完税价格 → 税率查询 → 税费计算 → 批次汇总
//           单条失败隔离、重新归类、延迟缴纳增值税、API 校验
// ==========================================


use std::sync::Arc;

use rust_decimal::Decimal;
use tariff_duty_engine::api::{ApiError, DutyApi, NewCargoItem, NewImportBatch};
use tariff_duty_engine::domain::shipment::CalculationOptions;
use tariff_duty_engine::domain::types::MeasureKind;
use tariff_duty_engine::engine::{
    CalculationError, CalculationSettings, DutyCalculationService, LookupSettings, TariffLookup,
    TariffMerger,
};
use tariff_duty_engine::infra::{ClassificationSource, Clock};
use tariff_duty_engine::logging;
use tariff_duty_engine::repository::{
    ShipmentRepository, ShipmentRepositoryImpl, TariffRepository, TariffRepositoryImpl,
};
use test_helpers::*;

struct Fixture {
    _temp_file: tempfile::NamedTempFile,
    shipments: Arc<ShipmentRepositoryImpl>,
    service: Arc<DutyCalculationService>,
    api: DutyApi,
}

async fn fixture() -> Fixture {
    logging::init_test();
    let (temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let tariff_repo = Arc::new(TariffRepositoryImpl::new(&db_path).expect("Failed to create tariff repo"));
    let shipments = Arc::new(ShipmentRepositoryImpl::new(&db_path).expect("Failed to create shipment repo"));
    let clock = fixed_clock();

    // 6911 10 00: 第三国 12%，对 CN 反倾销 36.1%，增值税 19%
    let classifications = vec![
        classification("6911100000", "Tableware and kitchenware"),
        classification("7323930000", "Table articles of stainless steel"),
    ];
    let measures = vec![
        measure("6911100000", MeasureKind::ThirdCountry, "103", Some("12"), None),
        measure("6911100000", MeasureKind::AntiDumping, "551", Some("36.1"), Some("CN")),
        measure("6911100000", MeasureKind::Other, "305", Some("19"), None),
        measure("7323930000", MeasureKind::ThirdCountry, "103", Some("3.2"), None),
    ];
    let catalog = TariffMerger::new().merge(&classifications, &measures);
    tariff_repo
        .replace_catalog(catalog.records(), "seed")
        .await
        .expect("Failed to seed catalog");

    let lookup = Arc::new(TariffLookup::new(
        tariff_repo as Arc<dyn TariffRepository>,
        Arc::new(FakeClassificationSource::new()) as Arc<dyn ClassificationSource>,
        LookupSettings::default(),
        clock.clone() as Arc<dyn Clock>,
    ));
    let service = Arc::new(DutyCalculationService::new(
        shipments.clone() as Arc<dyn ShipmentRepository>,
        lookup,
        CalculationSettings::default(),
        clock as Arc<dyn Clock>,
    ));
    let api = DutyApi::new(shipments.clone() as Arc<dyn ShipmentRepository>, service.clone());

    Fixture {
        _temp_file: temp_file,
        shipments,
        service,
        api,
    }
}

#[tokio::test]
async fn test_fob_batch_end_to_end() {
    let f = fixture().await;
    let mut b = batch("B-FOB", "FOB");
    b.international_freight = d("150");
    b.domestic_freight_export = d("40");
    b.domestic_freight_import = d("20");
    b.insurance_cost = d("5");
    f.shipments.insert_batch(&b).await.unwrap();
    f.shipments
        .insert_item(&item("I1", "B-FOB", "1000", "6911100000", Some("CN")))
        .await
        .unwrap();

    let result = f
        .service
        .calculate_batch("B-FOB", CalculationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.failed_count(), 0);
    let breakdown = result.items[0].breakdown.as_ref().unwrap();
    // 出口段内陆运费不计入 FOB 完税价格
    assert_eq!(breakdown.customs_value, d("1175.00"));
    assert_eq!(breakdown.duty_amount, d("141.00"));
    assert_eq!(breakdown.anti_dumping_amount, d("424.18"));
    assert_eq!(breakdown.vat_base, d("1740.18"));
    assert_eq!(breakdown.vat_amount, d("330.63"));
    assert_eq!(breakdown.total_tax, d("895.81"));

    assert_eq!(result.totals.total_customs_value, d("1175.00"));
    assert_eq!(result.totals.total_tax, d("895.81"));

    let stored = f.shipments.find_batch("B-FOB").await.unwrap().unwrap();
    assert_eq!(stored.totals, result.totals);
    assert!(stored.calculated_at.is_some());
}

#[tokio::test]
async fn test_cif_porcelain_from_china() {
    let f = fixture().await;
    f.shipments.insert_batch(&batch("B-CIF", "CIF")).await.unwrap();
    f.shipments
        .insert_item(&item("I1", "B-CIF", "1000", "6911.10.00", Some("CN")))
        .await
        .unwrap();

    let result = f
        .service
        .calculate_batch("B-CIF", CalculationOptions::default())
        .await
        .unwrap();

    let breakdown = result.items[0].breakdown.as_ref().unwrap();
    assert_eq!(breakdown.customs_value, d("1000.00"));
    assert_eq!(breakdown.duty_amount, d("120.00"));
    assert_eq!(breakdown.other_tax_amount, d("361.00"));
    assert_eq!(breakdown.vat_base, d("1481.00"));
    assert_eq!(breakdown.vat_amount, d("281.39"));
    assert_eq!(breakdown.total_tax, d("762.39"));
    assert_eq!(breakdown.total_payable, d("762.39"));

    let stored = f.shipments.find_item("I1").await.unwrap().unwrap();
    assert_eq!(stored.duty_rate, Some(d("12")));
    assert_eq!(stored.vat_rate, Some(d("19")));
    assert_eq!(stored.anti_dumping_rate, Some(d("36.1")));
    assert_eq!(stored.total_tax, d("762.39"));
}

#[tokio::test]
async fn test_deferred_vat_changes_payable_only() {
    let f = fixture().await;
    let mut b = batch("B-DEF", "CIF");
    b.deferred_vat = true;
    f.shipments.insert_batch(&b).await.unwrap();
    f.shipments
        .insert_item(&item("I1", "B-DEF", "1000", "6911100000", Some("CN")))
        .await
        .unwrap();

    let result = f
        .service
        .calculate_batch("B-DEF", CalculationOptions::default())
        .await
        .unwrap();

    let breakdown = result.items[0].breakdown.as_ref().unwrap();
    assert_eq!(breakdown.vat_amount, d("281.39"));
    assert_eq!(breakdown.vat_payable, Decimal::ZERO);
    assert_eq!(breakdown.vat_deferred, d("281.39"));
    assert_eq!(breakdown.total_payable, d("481.00"));
    assert_eq!(breakdown.total_tax, d("762.39"));
}

#[tokio::test]
async fn test_allocations_sum_to_batch_charges() {
    let f = fixture().await;
    let mut b = batch("B-ALLOC", "FOB");
    b.international_freight = d("100");
    b.insurance_cost = d("10");
    f.shipments.insert_batch(&b).await.unwrap();
    for id in ["I1", "I2", "I3"] {
        f.shipments
            .insert_item(&item(id, "B-ALLOC", "100", "7323930000", None))
            .await
            .unwrap();
    }

    f.service
        .calculate_batch("B-ALLOC", CalculationOptions::default())
        .await
        .unwrap();

    let detail = f.api.get_batch("B-ALLOC").await.unwrap();
    let freight: Vec<Decimal> = detail.items.iter().map(|i| i.freight_allocation).collect();
    assert_eq!(freight, vec![d("33.33"), d("33.33"), d("33.34")]);
    assert_eq!(freight.iter().sum::<Decimal>(), d("100"));
    let insurance: Decimal = detail.items.iter().map(|i| i.insurance_allocation).sum();
    assert_eq!(insurance, d("10"));

    // 未找到 VAT 措施时使用默认税率 20%
    assert!(detail.items.iter().all(|i| i.vat_rate == Some(d("20"))));
    assert_eq!(detail.batch.totals.total_customs_value, d("410.00"));
}

#[tokio::test]
async fn test_recalculation_is_idempotent() {
    let f = fixture().await;
    let mut b = batch("B-IDEM", "FOB");
    b.international_freight = d("77.77");
    f.shipments.insert_batch(&b).await.unwrap();
    f.shipments
        .insert_item(&item("I1", "B-IDEM", "333.33", "6911100000", Some("CN")))
        .await
        .unwrap();
    f.shipments
        .insert_item(&item("I2", "B-IDEM", "666.67", "7323930000", Some("US")))
        .await
        .unwrap();

    let first = f
        .service
        .calculate_batch("B-IDEM", CalculationOptions::default())
        .await
        .unwrap();
    let second = f
        .service
        .calculate_batch(
            "B-IDEM",
            CalculationOptions {
                recalculate_customs_value: true,
                update_origin_tariffs: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(first.totals, second.totals);
    for (a, b) in first.items.iter().zip(&second.items) {
        assert_eq!(a.breakdown, b.breakdown);
    }
}

#[tokio::test]
async fn test_item_failure_does_not_abort_batch() {
    let f = fixture().await;
    f.shipments.insert_batch(&batch("B-MIX", "CIF")).await.unwrap();
    f.shipments
        .insert_item(&item("GOOD", "B-MIX", "1000", "6911100000", Some("CN")))
        .await
        .unwrap();
    // 本地目录与远程都没有该编码
    f.shipments
        .insert_item(&item("UNKNOWN", "B-MIX", "500", "0101210000", None))
        .await
        .unwrap();
    let mut no_code = item("NOCODE", "B-MIX", "200", "6911100000", None);
    no_code.matched_hs_code = None;
    f.shipments.insert_item(&no_code).await.unwrap();

    let result = f
        .service
        .calculate_batch("B-MIX", CalculationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.items.len(), 3);
    assert_eq!(result.failed_count(), 2);
    assert!(result.items[0].success);
    assert!(result.items[1].error.as_deref().unwrap().contains("0101210000"));
    assert!(result.items[2].error.as_deref().unwrap().contains("matched_hs_code"));

    // 合计只包含成功明细的税费
    assert_eq!(result.totals.total_tax, d("762.39"));
    let unknown = f.shipments.find_item("UNKNOWN").await.unwrap().unwrap();
    assert_eq!(unknown.total_tax, Decimal::ZERO);
    assert_eq!(unknown.duty_rate, None);
}

#[tokio::test]
async fn test_failed_item_keeps_its_share_of_batch_charges() {
    let f = fixture().await;
    let mut b = batch("B-FOB-MIX", "FOB");
    b.international_freight = d("100");
    b.insurance_cost = d("10");
    f.shipments.insert_batch(&b).await.unwrap();
    f.shipments
        .insert_item(&item("OK", "B-FOB-MIX", "1000", "6911100000", Some("US")))
        .await
        .unwrap();
    f.shipments
        .insert_item(&item("BAD", "B-FOB-MIX", "1000", "0101210000", None))
        .await
        .unwrap();

    let result = f
        .service
        .calculate_batch("B-FOB-MIX", CalculationOptions::default())
        .await
        .unwrap();
    assert_eq!(result.failed_count(), 1);
    assert!(!result.items[1].success);

    // 失败明细的分摊额同样落库，分摊合计等于批次费用
    let stored = f.shipments.list_items("B-FOB-MIX").await.unwrap();
    let freight: Decimal = stored.iter().map(|i| i.freight_allocation).sum();
    let insurance: Decimal = stored.iter().map(|i| i.insurance_allocation).sum();
    assert_eq!(freight, d("100"));
    assert_eq!(insurance, d("10"));

    let bad = stored.iter().find(|i| i.item_id == "BAD").unwrap();
    assert_eq!(bad.freight_allocation, d("50"));
    assert_eq!(bad.customs_value, None);
    assert_eq!(result.totals.total_customs_value, d("1055.00"));
}

#[tokio::test]
async fn test_reclassify_uncalculated_fob_item_includes_charges() {
    let f = fixture().await;
    let mut b = batch("B-FOB-NEW", "FOB");
    b.international_freight = d("150");
    b.domestic_freight_import = d("20");
    b.insurance_cost = d("5");
    f.shipments.insert_batch(&b).await.unwrap();
    f.shipments
        .insert_item(&item("I1", "B-FOB-NEW", "1000", "7323930000", Some("US")))
        .await
        .unwrap();

    // 从未计算过的明细直接改归类
    let outcome = f
        .service
        .reclassify_item("I1", Some("6911100000"), None)
        .await
        .unwrap();

    let breakdown = outcome.breakdown.unwrap();
    assert_eq!(breakdown.customs_value, d("1175.00"));
    assert_eq!(breakdown.duty_amount, d("141.00"));

    let stored = f.shipments.find_item("I1").await.unwrap().unwrap();
    assert_eq!(stored.freight_allocation, d("150"));
    assert_eq!(stored.domestic_import_allocation, d("20"));
    assert_eq!(stored.insurance_allocation, d("5"));
    assert_eq!(stored.customs_value, Some(d("1175.00")));

    let totals = f.shipments.find_batch("B-FOB-NEW").await.unwrap().unwrap().totals;
    assert_eq!(totals.total_customs_value, d("1175.00"));
}

#[tokio::test]
async fn test_batch_level_errors() {
    let f = fixture().await;

    let missing = f
        .service
        .calculate_batch("NOPE", CalculationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, CalculationError::BatchNotFound(_)));

    f.shipments.insert_batch(&batch("B-BAD", "XYZ")).await.unwrap();
    let unknown = f
        .service
        .calculate_batch("B-BAD", CalculationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(unknown, CalculationError::UnknownIncoterm(ref t) if t == "XYZ"));

    // 不重算完税价格时不需要贸易术语
    let skipped = f
        .service
        .calculate_batch(
            "B-BAD",
            CalculationOptions {
                recalculate_customs_value: false,
                update_origin_tariffs: false,
            },
        )
        .await
        .unwrap();
    assert!(skipped.items.is_empty());
}

#[tokio::test]
async fn test_reclassify_item_updates_rates_and_totals() {
    let f = fixture().await;
    f.shipments.insert_batch(&batch("B-RC", "CIF")).await.unwrap();
    f.shipments
        .insert_item(&item("I1", "B-RC", "1000", "6911100000", Some("US")))
        .await
        .unwrap();

    let before = f
        .service
        .calculate_batch("B-RC", CalculationOptions::default())
        .await
        .unwrap();
    // 美国原产: 无反倾销
    assert_eq!(before.totals.total_other_tax, Decimal::ZERO);
    assert_eq!(before.totals.total_tax, d("332.80"));

    let outcome = f.api.reclassify_item("I1", None, Some("cn")).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.breakdown.unwrap().other_tax_amount, d("361.00"));

    let stored = f.shipments.find_item("I1").await.unwrap().unwrap();
    assert_eq!(stored.origin_country_code.as_deref(), Some("CN"));
    assert_eq!(stored.matched_hs_code.as_deref(), Some("6911100000"));

    let batch = f.shipments.find_batch("B-RC").await.unwrap().unwrap();
    assert_eq!(batch.totals.total_tax, d("762.39"));

    // 改为不锈钢餐具编码
    let outcome = f
        .api
        .reclassify_item("I1", Some("7323.93.00.00"), None)
        .await
        .unwrap();
    let breakdown = outcome.breakdown.unwrap();
    assert_eq!(breakdown.duty_amount, d("32.00"));
    assert_eq!(breakdown.other_tax_amount, Decimal::ZERO);
}

#[tokio::test]
async fn test_duty_api_validation_and_not_found() {
    let f = fixture().await;

    let err = f
        .api
        .create_batch(NewImportBatch {
            batch_id: Some("B-API".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(ref fields) if fields == &vec!["incoterm".to_string()]));

    let err = f
        .api
        .create_batch(NewImportBatch {
            batch_id: Some("B-API".to_string()),
            incoterm: Some("ZZZ".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));

    let created = f
        .api
        .create_batch(NewImportBatch {
            batch_id: Some(" B-API ".to_string()),
            incoterm: Some("fob".to_string()),
            international_freight: Some(d("10")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.batch_id, "B-API");
    assert_eq!(created.incoterm.as_deref(), Some("FOB"));

    let err = f
        .api
        .add_item(NewCargoItem {
            item_id: Some("I1".to_string()),
            batch_id: Some("MISSING".to_string()),
            description: Some("Plates".to_string()),
            total_value: Some(d("10")),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BatchNotFound(_)));

    let added = f
        .api
        .add_item(NewCargoItem {
            item_id: Some("I1".to_string()),
            batch_id: Some("B-API".to_string()),
            description: Some("Plates".to_string()),
            hs_code: Some("6911.10.00".to_string()),
            origin_country_code: Some("cn".to_string()),
            total_value: Some(d("100")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(added.matched_hs_code.as_deref(), Some("69111000"));
    assert_eq!(added.origin_country_code.as_deref(), Some("CN"));

    let err = f.api.get_item("NOPE").await.unwrap_err();
    assert!(matches!(err, ApiError::ProductNotFound(_)));
    assert!(err.user_message().contains("NOPE"));

    let err = f.api.reclassify_item("NOPE", None, Some("CN")).await.unwrap_err();
    assert!(matches!(err, ApiError::ProductNotFound(_)));

    let result = f
        .api
        .calculate_batch("B-API", CalculationOptions::default())
        .await
        .unwrap();
    assert_eq!(result.totals.total_customs_value, d("110.00"));
}
