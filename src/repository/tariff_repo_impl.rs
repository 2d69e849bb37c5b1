// ==========================================
// 关税归类与税费计算引擎 - 税率目录 Repository 实现
// ==========================================
// 职责: 实现税率目录数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::tariff::{CanonicalTariffRecord, RateImportReport, TariffRateChange};
use crate::domain::types::MeasureKind;
use crate::repository::columns::{
    date_text, decimal_text, get_decimal, get_opt_date, get_opt_decimal, get_opt_json,
    opt_decimal_text,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::tariff_repo::{CatalogRefreshSummary, TariffRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, Transaction};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = r#"
    hs_code, hs_code10, origin_country_code, origin_description,
    description, description_translated,
    duty_rate, vat_rate, anti_dumping_rate, countervailing_rate, preferential_rate,
    has_anti_dumping, has_countervailing,
    measure_type, measure_code, legal_base, quota_order_number,
    start_date, end_date, anti_dumping_source, countervailing_source
"#;

fn map_record(row: &Row<'_>) -> rusqlite::Result<CanonicalTariffRecord> {
    Ok(CanonicalTariffRecord {
        hs_code: row.get(0)?,
        hs_code10: row.get(1)?,
        origin_country_code: row.get(2)?,
        origin_description: row.get(3)?,
        description: row.get(4)?,
        description_translated: row.get(5)?,
        duty_rate: get_decimal(row, 6)?,
        vat_rate: get_opt_decimal(row, 7)?,
        anti_dumping_rate: get_opt_decimal(row, 8)?,
        countervailing_rate: get_opt_decimal(row, 9)?,
        preferential_rate: get_opt_decimal(row, 10)?,
        has_anti_dumping: row.get::<_, i64>(11)? != 0,
        has_countervailing: row.get::<_, i64>(12)? != 0,
        measure_type: MeasureKind::parse(&row.get::<_, String>(13)?),
        measure_code: row.get(14)?,
        legal_base: row.get(15)?,
        quota_order_number: row.get(16)?,
        start_date: get_opt_date(row, 17)?,
        end_date: get_opt_date(row, 18)?,
        anti_dumping_source: get_opt_json(row, 19)?,
        countervailing_source: get_opt_json(row, 20)?,
    })
}

// ==========================================
// TariffRepositoryImpl
// ==========================================
pub struct TariffRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl TariffRepositoryImpl {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 现有基准税率快照: hs_code10 → (duty_rate, vat_rate)
    fn snapshot_baselines_tx(
        tx: &Transaction,
    ) -> RepositoryResult<HashMap<String, (Decimal, Option<Decimal>)>> {
        let mut stmt = tx.prepare(
            r#"
            SELECT hs_code10, duty_rate, vat_rate FROM tariff_rate
            WHERE measure_type = 'THIRD_COUNTRY' AND origin_country_code IS NULL
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, get_decimal(row, 1)?, get_opt_decimal(row, 2)?))
        })?;

        let mut snapshot = HashMap::new();
        for row in rows {
            let (hs10, duty, vat) = row?;
            snapshot.insert(hs10, (duty, vat));
        }
        Ok(snapshot)
    }

    fn insert_records_tx(
        tx: &Transaction,
        records: &[CanonicalTariffRecord],
        import_batch_id: &str,
        now: &str,
    ) -> RepositoryResult<usize> {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO tariff_rate (
                hs_code, hs_code10, origin_country_code, origin_description,
                description, description_translated,
                duty_rate, vat_rate, anti_dumping_rate, countervailing_rate, preferential_rate,
                has_anti_dumping, has_countervailing,
                measure_type, measure_code, legal_base, quota_order_number,
                start_date, end_date, anti_dumping_source, countervailing_source,
                import_batch_id, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
            )
            "#,
        )?;

        let mut count = 0;
        for record in records {
            let ad_source = record
                .anti_dumping_source
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
            let cvd_source = record
                .countervailing_source
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

            stmt.execute(params![
                record.hs_code,
                record.hs_code10,
                record.origin_country_code,
                record.origin_description,
                record.description,
                record.description_translated,
                decimal_text(&record.duty_rate),
                opt_decimal_text(record.vat_rate.as_ref()),
                opt_decimal_text(record.anti_dumping_rate.as_ref()),
                opt_decimal_text(record.countervailing_rate.as_ref()),
                opt_decimal_text(record.preferential_rate.as_ref()),
                record.has_anti_dumping as i64,
                record.has_countervailing as i64,
                record.measure_type.as_str(),
                record.measure_code,
                record.legal_base,
                record.quota_order_number,
                date_text(record.start_date),
                date_text(record.end_date),
                ad_source,
                cvd_source,
                import_batch_id,
                now,
            ])?;
            count += 1;
        }
        Ok(count)
    }

    fn query_records(&self, sql: &str, arg: &str) -> RepositoryResult<Vec<CanonicalTariffRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![arg], map_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[async_trait]
impl TariffRepository for TariffRepositoryImpl {
    async fn replace_catalog(
        &self,
        records: &[CanonicalTariffRecord],
        import_batch_id: &str,
    ) -> RepositoryResult<CatalogRefreshSummary> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        // 步骤 1: 旧基准快照
        let previous = Self::snapshot_baselines_tx(&tx)?;
        debug!(previous = previous.len(), "旧基准税率快照完成");

        // 步骤 2: 整体替换
        tx.execute("DELETE FROM tariff_rate", [])?;
        let records_written = Self::insert_records_tx(&tx, records, import_batch_id, &now)?;

        // 步骤 3: 基准税率变更历史
        let mut history_entries = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO tariff_rate_history (
                    hs_code10, origin_country_code, old_duty_rate, new_duty_rate,
                    old_vat_rate, new_vat_rate, changed_at, import_batch_id
                ) VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for record in records.iter().filter(|r| r.is_baseline()) {
                let Some((old_duty, old_vat)) = previous.get(&record.hs_code10) else {
                    continue;
                };
                if *old_duty == record.duty_rate && *old_vat == record.vat_rate {
                    continue;
                }
                stmt.execute(params![
                    record.hs_code10,
                    decimal_text(old_duty),
                    decimal_text(&record.duty_rate),
                    opt_decimal_text(old_vat.as_ref()),
                    opt_decimal_text(record.vat_rate.as_ref()),
                    now,
                    import_batch_id,
                ])?;
                history_entries += 1;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            records_written = records_written,
            history_entries = history_entries,
            import_batch_id = %import_batch_id,
            "税率目录刷新完成"
        );

        Ok(CatalogRefreshSummary {
            records_written,
            history_entries,
        })
    }

    async fn find_exact(&self, hs_code10: &str) -> RepositoryResult<Vec<CanonicalTariffRecord>> {
        let sql = format!(
            "SELECT {} FROM tariff_rate WHERE hs_code10 = ?1 ORDER BY id",
            SELECT_COLUMNS
        );
        self.query_records(&sql, hs_code10)
    }

    async fn find_by_prefix(&self, hs_code8: &str) -> RepositoryResult<Vec<CanonicalTariffRecord>> {
        let sql = format!(
            "SELECT {} FROM tariff_rate WHERE hs_code = ?1 ORDER BY hs_code10 ASC, id ASC",
            SELECT_COLUMNS
        );
        self.query_records(&sql, hs_code8)
    }

    async fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tariff_rate", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn list_history(&self, hs_code10: &str) -> RepositoryResult<Vec<TariffRateChange>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT hs_code10, origin_country_code, old_duty_rate, new_duty_rate,
                   old_vat_rate, new_vat_rate, changed_at, import_batch_id
            FROM tariff_rate_history
            WHERE hs_code10 = ?1
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![hs_code10], |row| {
            let changed_at: String = row.get(6)?;
            Ok(TariffRateChange {
                hs_code10: row.get(0)?,
                origin_country_code: row.get(1)?,
                old_duty_rate: get_opt_decimal(row, 2)?,
                new_duty_rate: get_opt_decimal(row, 3)?,
                old_vat_rate: get_opt_decimal(row, 4)?,
                new_vat_rate: get_opt_decimal(row, 5)?,
                changed_at: DateTime::parse_from_rfc3339(&changed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            6,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                import_batch_id: row.get(7)?,
            })
        })?;

        let mut changes = Vec::new();
        for row in rows {
            changes.push(row?);
        }
        Ok(changes)
    }

    async fn insert_import_log(&self, report: &RateImportReport) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let skipped = serde_json::to_string(&report.skipped_sheets)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO rate_import_log (
                batch_id, classification_rows, duty_rows, discarded_rows, skipped_sheets,
                records_written, history_entries, elapsed_ms, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                report.batch_id,
                report.classification_rows as i64,
                report.duty_rows as i64,
                report.discarded_rows as i64,
                skipped,
                report.records_written as i64,
                report.history_entries as i64,
                report.elapsed_ms as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::hs_code::HsCode;

    fn repo() -> TariffRepositoryImpl {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        TariffRepositoryImpl::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn baseline(code: &str, duty: i64) -> CanonicalTariffRecord {
        let mut record = CanonicalTariffRecord::baseline(&HsCode::parse(code).unwrap(), "Tableware");
        record.duty_rate = Decimal::from(duty);
        record
    }

    #[tokio::test]
    async fn test_replace_catalog_writes_history_on_change() {
        let repo = repo();

        let first = repo
            .replace_catalog(&[baseline("6911100000", 12), baseline("6912000000", 6)], "B1")
            .await
            .unwrap();
        assert_eq!(first.records_written, 2);
        assert_eq!(first.history_entries, 0);

        let second = repo
            .replace_catalog(&[baseline("6911100000", 10), baseline("6912000000", 6)], "B2")
            .await
            .unwrap();
        assert_eq!(second.history_entries, 1);
        assert_eq!(repo.count().await.unwrap(), 2);

        let history = repo.list_history("6911100000").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_duty_rate, Some(Decimal::from(12)));
        assert_eq!(history[0].new_duty_rate, Some(Decimal::from(10)));
        assert_eq!(history[0].import_batch_id.as_deref(), Some("B2"));
    }

    #[tokio::test]
    async fn test_find_by_prefix_ordered_ascending() {
        let repo = repo();
        repo.replace_catalog(
            &[
                baseline("6911100090", 12),
                baseline("6911100010", 12),
                baseline("6911900000", 8),
            ],
            "B1",
        )
        .await
        .unwrap();

        let found = repo.find_by_prefix("69111000").await.unwrap();
        let codes: Vec<_> = found.iter().map(|r| r.hs_code10.as_str()).collect();
        assert_eq!(codes, vec!["6911100010", "6911100090"]);

        assert_eq!(repo.find_exact("6911900000").await.unwrap().len(), 1);
        assert!(repo.find_exact("6911200000").await.unwrap().is_empty());
    }
}
