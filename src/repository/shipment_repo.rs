// ==========================================
// 关税归类与税费计算引擎 - 进口批次 / 货物明细仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 批次合计只由明细汇总后写回，不提供独立修改入口
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::shipment::{BatchTotals, CargoItem, ImportBatch};
use crate::domain::types::FreightAllocationMethod;
use crate::repository::columns::{
    datetime_text, decimal_text, get_decimal, get_opt_datetime, get_opt_decimal, opt_decimal_text,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// ShipmentRepository Trait
// ==========================================
// 用途: 进口批次与货物明细的读写
// 实现者: ShipmentRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    // ===== 批次 =====

    /// 新建批次（合计字段按 0 写入）
    async fn insert_batch(&self, batch: &ImportBatch) -> RepositoryResult<()>;

    /// 查询批次
    async fn find_batch(&self, batch_id: &str) -> RepositoryResult<Option<ImportBatch>>;

    /// 写回批次合计（由明细汇总得到）
    async fn save_batch_totals(
        &self,
        batch_id: &str,
        totals: &BatchTotals,
        calculated_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    // ===== 明细 =====

    /// 新建明细
    async fn insert_item(&self, item: &CargoItem) -> RepositoryResult<()>;

    /// 查询明细
    async fn find_item(&self, item_id: &str) -> RepositoryResult<Option<CargoItem>>;

    /// 批次下全部明细（按录入顺序）
    async fn list_items(&self, batch_id: &str) -> RepositoryResult<Vec<CargoItem>>;

    /// 写回单条明细的分摊、税率与计算结果
    async fn save_item_results(&self, item: &CargoItem) -> RepositoryResult<()>;

    /// 在一个事务内写回批次下各明细的费用分摊额（不涉及税率与税额）
    async fn save_item_allocations(&self, items: &[CargoItem]) -> RepositoryResult<()>;

    /// 更新明细的归类编码 / 原产地（None 表示保持原值）
    async fn update_item_classification(
        &self,
        item_id: &str,
        hs_code: Option<&str>,
        origin_country_code: Option<&str>,
    ) -> RepositoryResult<()>;
}

const ITEM_COLUMNS: &str = r#"
    item_id, batch_id, description, material, origin_country_code, matched_hs_code,
    total_value, quantity, gross_weight_kg,
    freight_allocation, insurance_allocation, domestic_export_allocation,
    domestic_import_allocation, unloading_allocation, customs_value,
    duty_rate, vat_rate, anti_dumping_rate, countervailing_rate, rate_note,
    duty_amount, vat_amount, other_tax_amount, total_tax, updated_at
"#;

fn map_item(row: &Row<'_>) -> rusqlite::Result<CargoItem> {
    Ok(CargoItem {
        item_id: row.get(0)?,
        batch_id: row.get(1)?,
        description: row.get(2)?,
        material: row.get(3)?,
        origin_country_code: row.get(4)?,
        matched_hs_code: row.get(5)?,
        total_value: get_decimal(row, 6)?,
        quantity: get_opt_decimal(row, 7)?,
        gross_weight_kg: get_opt_decimal(row, 8)?,
        freight_allocation: get_decimal(row, 9)?,
        insurance_allocation: get_decimal(row, 10)?,
        domestic_export_allocation: get_decimal(row, 11)?,
        domestic_import_allocation: get_decimal(row, 12)?,
        unloading_allocation: get_decimal(row, 13)?,
        customs_value: get_opt_decimal(row, 14)?,
        duty_rate: get_opt_decimal(row, 15)?,
        vat_rate: get_opt_decimal(row, 16)?,
        anti_dumping_rate: get_opt_decimal(row, 17)?,
        countervailing_rate: get_opt_decimal(row, 18)?,
        rate_note: row.get(19)?,
        duty_amount: get_decimal(row, 20)?,
        vat_amount: get_decimal(row, 21)?,
        other_tax_amount: get_decimal(row, 22)?,
        total_tax: get_decimal(row, 23)?,
        updated_at: get_opt_datetime(row, 24)?,
    })
}

fn map_batch(row: &Row<'_>) -> rusqlite::Result<ImportBatch> {
    Ok(ImportBatch {
        batch_id: row.get(0)?,
        reference: row.get(1)?,
        incoterm: row.get(2)?,
        international_freight: get_decimal(row, 3)?,
        domestic_freight_export: get_decimal(row, 4)?,
        domestic_freight_import: get_decimal(row, 5)?,
        unloading_cost: get_decimal(row, 6)?,
        insurance_cost: get_decimal(row, 7)?,
        freight_allocation_method: row
            .get::<_, Option<String>>(8)?
            .map(|m| FreightAllocationMethod::parse(&m)),
        deferred_vat: row.get::<_, i64>(9)? != 0,
        totals: BatchTotals {
            total_value: get_decimal(row, 10)?,
            total_customs_value: get_decimal(row, 11)?,
            total_duty: get_decimal(row, 12)?,
            total_vat: get_decimal(row, 13)?,
            total_other_tax: get_decimal(row, 14)?,
            total_tax: get_decimal(row, 15)?,
        },
        calculated_at: get_opt_datetime(row, 16)?,
    })
}

// ==========================================
// ShipmentRepositoryImpl
// ==========================================
pub struct ShipmentRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl ShipmentRepositoryImpl {
    /// 创建新的仓储实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl ShipmentRepository for ShipmentRepositoryImpl {
    async fn insert_batch(&self, batch: &ImportBatch) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_batch (
                batch_id, reference, incoterm, international_freight,
                domestic_freight_export, domestic_freight_import, unloading_cost,
                insurance_cost, freight_allocation_method, deferred_vat
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                batch.batch_id,
                batch.reference,
                batch.incoterm,
                decimal_text(&batch.international_freight),
                decimal_text(&batch.domestic_freight_export),
                decimal_text(&batch.domestic_freight_import),
                decimal_text(&batch.unloading_cost),
                decimal_text(&batch.insurance_cost),
                batch.freight_allocation_method.map(|m| m.as_str()),
                batch.deferred_vat as i64,
            ],
        )?;
        Ok(())
    }

    async fn find_batch(&self, batch_id: &str) -> RepositoryResult<Option<ImportBatch>> {
        let conn = self.get_conn()?;
        let batch = conn
            .query_row(
                r#"
                SELECT batch_id, reference, incoterm, international_freight,
                       domestic_freight_export, domestic_freight_import, unloading_cost,
                       insurance_cost, freight_allocation_method, deferred_vat,
                       total_value, total_customs_value, total_duty, total_vat,
                       total_other_tax, total_tax, calculated_at
                FROM import_batch WHERE batch_id = ?1
                "#,
                params![batch_id],
                map_batch,
            )
            .optional()?;
        Ok(batch)
    }

    async fn save_batch_totals(
        &self,
        batch_id: &str,
        totals: &BatchTotals,
        calculated_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE import_batch SET
                total_value = ?2, total_customs_value = ?3, total_duty = ?4,
                total_vat = ?5, total_other_tax = ?6, total_tax = ?7, calculated_at = ?8
            WHERE batch_id = ?1
            "#,
            params![
                batch_id,
                decimal_text(&totals.total_value),
                decimal_text(&totals.total_customs_value),
                decimal_text(&totals.total_duty),
                decimal_text(&totals.total_vat),
                decimal_text(&totals.total_other_tax),
                decimal_text(&totals.total_tax),
                calculated_at.to_rfc3339(),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportBatch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_item(&self, item: &CargoItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO cargo_item (
                item_id, batch_id, description, material, origin_country_code,
                matched_hs_code, total_value, quantity, gross_weight_kg,
                duty_rate, vat_rate, anti_dumping_rate, countervailing_rate
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                item.item_id,
                item.batch_id,
                item.description,
                item.material,
                item.origin_country_code,
                item.matched_hs_code,
                decimal_text(&item.total_value),
                opt_decimal_text(item.quantity.as_ref()),
                opt_decimal_text(item.gross_weight_kg.as_ref()),
                opt_decimal_text(item.duty_rate.as_ref()),
                opt_decimal_text(item.vat_rate.as_ref()),
                opt_decimal_text(item.anti_dumping_rate.as_ref()),
                opt_decimal_text(item.countervailing_rate.as_ref()),
            ],
        )?;
        Ok(())
    }

    async fn find_item(&self, item_id: &str) -> RepositoryResult<Option<CargoItem>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM cargo_item WHERE item_id = ?1", ITEM_COLUMNS);
        let item = conn.query_row(&sql, params![item_id], map_item).optional()?;
        Ok(item)
    }

    async fn list_items(&self, batch_id: &str) -> RepositoryResult<Vec<CargoItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM cargo_item WHERE batch_id = ?1 ORDER BY rowid",
            ITEM_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![batch_id], map_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    async fn save_item_results(&self, item: &CargoItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE cargo_item SET
                origin_country_code = ?2, matched_hs_code = ?3,
                freight_allocation = ?4, insurance_allocation = ?5,
                domestic_export_allocation = ?6, domestic_import_allocation = ?7,
                unloading_allocation = ?8, customs_value = ?9,
                duty_rate = ?10, vat_rate = ?11, anti_dumping_rate = ?12,
                countervailing_rate = ?13, rate_note = ?14,
                duty_amount = ?15, vat_amount = ?16, other_tax_amount = ?17,
                total_tax = ?18, updated_at = ?19
            WHERE item_id = ?1
            "#,
            params![
                item.item_id,
                item.origin_country_code,
                item.matched_hs_code,
                decimal_text(&item.freight_allocation),
                decimal_text(&item.insurance_allocation),
                decimal_text(&item.domestic_export_allocation),
                decimal_text(&item.domestic_import_allocation),
                decimal_text(&item.unloading_allocation),
                opt_decimal_text(item.customs_value.as_ref()),
                opt_decimal_text(item.duty_rate.as_ref()),
                opt_decimal_text(item.vat_rate.as_ref()),
                opt_decimal_text(item.anti_dumping_rate.as_ref()),
                opt_decimal_text(item.countervailing_rate.as_ref()),
                item.rate_note,
                decimal_text(&item.duty_amount),
                decimal_text(&item.vat_amount),
                decimal_text(&item.other_tax_amount),
                decimal_text(&item.total_tax),
                datetime_text(item.updated_at),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CargoItem".to_string(),
                id: item.item_id.clone(),
            });
        }
        Ok(())
    }

    async fn save_item_allocations(&self, items: &[CargoItem]) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        {
            let mut stmt = tx.prepare(
                r#"
                UPDATE cargo_item SET
                    freight_allocation = ?2, insurance_allocation = ?3,
                    domestic_export_allocation = ?4, domestic_import_allocation = ?5,
                    unloading_allocation = ?6
                WHERE item_id = ?1
                "#,
            )?;
            for item in items {
                let affected = stmt.execute(params![
                    item.item_id,
                    decimal_text(&item.freight_allocation),
                    decimal_text(&item.insurance_allocation),
                    decimal_text(&item.domestic_export_allocation),
                    decimal_text(&item.domestic_import_allocation),
                    decimal_text(&item.unloading_allocation),
                ])?;
                if affected == 0 {
                    return Err(RepositoryError::NotFound {
                        entity: "CargoItem".to_string(),
                        id: item.item_id.clone(),
                    });
                }
            }
        }
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    async fn update_item_classification(
        &self,
        item_id: &str,
        hs_code: Option<&str>,
        origin_country_code: Option<&str>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE cargo_item SET matched_hs_code = COALESCE(?2, matched_hs_code), \
             origin_country_code = COALESCE(?3, origin_country_code) WHERE item_id = ?1",
            params![item_id, hs_code, origin_country_code],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CargoItem".to_string(),
                id: item_id.to_string(),
            });
        }
        Ok(())
    }
}
