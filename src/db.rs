// ==========================================
// 关税归类与税费计算引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建表（幂等），金额/税率列统一存 TEXT 十进制字符串
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER NOT NULL,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL DEFAULT 'global',
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS tariff_rate (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    hs_code               TEXT NOT NULL,
    hs_code10             TEXT NOT NULL,
    origin_country_code   TEXT,
    origin_description    TEXT,
    description           TEXT NOT NULL DEFAULT '',
    description_translated TEXT,
    duty_rate             TEXT NOT NULL DEFAULT '0',
    vat_rate              TEXT,
    anti_dumping_rate     TEXT,
    countervailing_rate   TEXT,
    preferential_rate     TEXT,
    has_anti_dumping      INTEGER NOT NULL DEFAULT 0,
    has_countervailing    INTEGER NOT NULL DEFAULT 0,
    measure_type          TEXT NOT NULL,
    measure_code          TEXT,
    legal_base            TEXT,
    quota_order_number    TEXT,
    start_date            TEXT,
    end_date              TEXT,
    anti_dumping_source   TEXT,
    countervailing_source TEXT,
    import_batch_id       TEXT,
    updated_at            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tariff_rate_hs10 ON tariff_rate (hs_code10, origin_country_code);
CREATE INDEX IF NOT EXISTS idx_tariff_rate_hs8 ON tariff_rate (hs_code);

CREATE TABLE IF NOT EXISTS tariff_rate_history (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    hs_code10           TEXT NOT NULL,
    origin_country_code TEXT,
    old_duty_rate       TEXT,
    new_duty_rate       TEXT,
    old_vat_rate        TEXT,
    new_vat_rate        TEXT,
    changed_at          TEXT NOT NULL,
    import_batch_id     TEXT
);

CREATE TABLE IF NOT EXISTS rate_import_log (
    batch_id             TEXT PRIMARY KEY,
    classification_rows  INTEGER NOT NULL,
    duty_rows            INTEGER NOT NULL,
    discarded_rows       INTEGER NOT NULL,
    skipped_sheets       TEXT NOT NULL,
    records_written      INTEGER NOT NULL,
    history_entries      INTEGER NOT NULL,
    elapsed_ms           INTEGER NOT NULL,
    imported_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS import_batch (
    batch_id                  TEXT PRIMARY KEY,
    reference                 TEXT,
    incoterm                  TEXT,
    international_freight     TEXT NOT NULL DEFAULT '0',
    domestic_freight_export   TEXT NOT NULL DEFAULT '0',
    domestic_freight_import   TEXT NOT NULL DEFAULT '0',
    unloading_cost            TEXT NOT NULL DEFAULT '0',
    insurance_cost            TEXT NOT NULL DEFAULT '0',
    freight_allocation_method TEXT,
    deferred_vat              INTEGER NOT NULL DEFAULT 0,
    total_value               TEXT NOT NULL DEFAULT '0',
    total_customs_value       TEXT NOT NULL DEFAULT '0',
    total_duty                TEXT NOT NULL DEFAULT '0',
    total_vat                 TEXT NOT NULL DEFAULT '0',
    total_other_tax           TEXT NOT NULL DEFAULT '0',
    total_tax                 TEXT NOT NULL DEFAULT '0',
    calculated_at             TEXT
);

CREATE TABLE IF NOT EXISTS cargo_item (
    item_id                    TEXT PRIMARY KEY,
    batch_id                   TEXT NOT NULL REFERENCES import_batch(batch_id) ON DELETE CASCADE,
    description                TEXT,
    material                   TEXT,
    origin_country_code        TEXT,
    matched_hs_code            TEXT,
    total_value                TEXT NOT NULL DEFAULT '0',
    quantity                   TEXT,
    gross_weight_kg            TEXT,
    freight_allocation         TEXT NOT NULL DEFAULT '0',
    insurance_allocation       TEXT NOT NULL DEFAULT '0',
    domestic_export_allocation TEXT NOT NULL DEFAULT '0',
    domestic_import_allocation TEXT NOT NULL DEFAULT '0',
    unloading_allocation       TEXT NOT NULL DEFAULT '0',
    customs_value              TEXT,
    duty_rate                  TEXT,
    vat_rate                   TEXT,
    anti_dumping_rate          TEXT,
    countervailing_rate        TEXT,
    rate_note                  TEXT,
    duty_amount                TEXT NOT NULL DEFAULT '0',
    vat_amount                 TEXT NOT NULL DEFAULT '0',
    other_tax_amount           TEXT NOT NULL DEFAULT '0',
    total_tax                  TEXT NOT NULL DEFAULT '0',
    updated_at                 TEXT
);
CREATE INDEX IF NOT EXISTS idx_cargo_item_batch ON cargo_item (batch_id);
"#;

/// 建表（幂等），首次建库时写入 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    if read_schema_version(conn)?.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

/// 读取 schema_version（若表不存在或为空则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
