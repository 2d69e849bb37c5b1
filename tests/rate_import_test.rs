// ==========================================
// 税率文件导入集成测试
// ==========================================
// 测试目标: CSV 文件 → 列识别 → 合并 → 目录替换 → 税率历史
//           以及导入后的本地目录查询（不访问远程服务）
// ==========================================


use std::io::Write;
use std::sync::Arc;

use tariff_duty_engine::api::ApiError;
use tariff_duty_engine::app::AppState;
use tariff_duty_engine::domain::tariff::RateSource;
use tariff_duty_engine::domain::types::MatchKind;
use tariff_duty_engine::infra::ClassificationSource;
use tariff_duty_engine::logging;
use tempfile::{Builder, NamedTempFile};
use test_helpers::*;

fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut temp_file = Builder::new().suffix(".csv").tempfile().unwrap();
    for line in lines {
        writeln!(temp_file, "{}", line).unwrap();
    }
    temp_file.flush().unwrap();
    temp_file
}

fn path_of(file: &NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

async fn state() -> (NamedTempFile, Arc<FakeClassificationSource>, AppState) {
    logging::init_test();
    let (temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let source = Arc::new(FakeClassificationSource::new());
    let state = AppState::with_source(db_path, Some(source.clone() as Arc<dyn ClassificationSource>))
        .await
        .expect("Failed to build AppState");
    (temp_file, source, state)
}

fn classification_csv() -> NamedTempFile {
    csv_file(&[
        "Goods nomenclature item id,Description,Start date",
        "6911100000,Tableware and kitchenware,2021-01-01",
        "6911900000,Other articles,2021-01-01",
        // 数值型单元格丢失前导零
        "101210000,Pure-bred breeding horses,2021-01-01",
        "69,Too short,",
    ])
}

fn duty_csv(third_country_rate: &str) -> NamedTempFile {
    let third_country = format!("6911100000,103,{}%,1011,", third_country_rate);
    csv_file(&[
        "Commodity code,Measure type code,Duty,Geographical area,Legal base",
        third_country.as_str(),
        "6911100000,551,36.1%,CN,R2013/0412",
        "6911100000,305,19%,1011,",
        "6911900000,103,3.5%,1011,",
        "0101210000,103,0%,1011,",
    ])
}

#[tokio::test]
async fn test_import_csv_then_lookup_from_catalog() {
    let (_db, source, state) = state().await;
    let classification = classification_csv();
    let duty = duty_csv("12");

    let report = state
        .tariff_api
        .import_rates(path_of(&classification), path_of(&duty))
        .await
        .unwrap();

    assert_eq!(report.classification_rows, 3);
    assert_eq!(report.duty_rows, 5);
    assert_eq!(report.discarded_rows, 1);
    assert!(report.skipped_sheets.is_empty());
    assert!(report.records_written >= 3);
    assert_eq!(report.history_entries, 0);

    let cn = state
        .tariff_api
        .lookup_rate("6911 10 00 00", Some("CN"))
        .await
        .unwrap();
    assert_eq!(cn.source, RateSource::Catalog);
    assert_eq!(cn.match_kind, MatchKind::Exact);
    assert_eq!(cn.duty_rate, d("12"));
    assert_eq!(cn.vat_rate, Some(d("19")));
    assert_eq!(cn.anti_dumping_rate, Some(d("36.1")));

    let horses = state.tariff_api.lookup_rate("0101210000", None).await.unwrap();
    assert_eq!(horses.duty_rate, d("0"));

    assert_eq!(source.commodity_calls(), 0);
}

#[tokio::test]
async fn test_reimport_records_rate_history() {
    let (_db, _source, state) = state().await;
    let classification = classification_csv();

    state
        .tariff_api
        .import_rates(path_of(&classification), path_of(&duty_csv("12")))
        .await
        .unwrap();
    let second = state
        .tariff_api
        .import_rates(path_of(&classification), path_of(&duty_csv("10")))
        .await
        .unwrap();
    assert_eq!(second.history_entries, 1);

    let history = state.tariff_api.rate_history("6911100000").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_duty_rate, Some(d("12")));
    assert_eq!(history[0].new_duty_rate, Some(d("10")));
    assert_eq!(history[0].import_batch_id.as_deref(), Some(second.batch_id.as_str()));

    // 目录整体替换: 查询返回新税率
    let rate = state.tariff_api.lookup_rate("6911100000", None).await.unwrap();
    assert_eq!(rate.duty_rate, d("10"));
}

#[tokio::test]
async fn test_import_without_code_column_is_rejected() {
    let (_db, _source, state) = state().await;
    let classification = csv_file(&["Remark,Author", "nothing,nobody"]);
    let duty = csv_file(&["Remark", "still nothing"]);

    let err = state
        .tariff_api
        .import_rates(path_of(&classification), path_of(&duty))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ImportError(_)));
}

#[tokio::test]
async fn test_import_missing_file_is_reported() {
    let (_db, _source, state) = state().await;
    let duty = duty_csv("12");

    let err = state
        .tariff_api
        .import_rates("/nonexistent/classification.csv", path_of(&duty))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ImportError(_) | ApiError::InvalidInput(_)));
}
