// ==========================================
// 关税归类与税费计算引擎 - 列编解码辅助
// ==========================================
// 约定: 金额/税率列为 TEXT 十进制字符串，日期列为 YYYY-MM-DD
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;

pub fn decimal_text(value: &Decimal) -> String {
    value.normalize().to_string()
}

pub fn opt_decimal_text(value: Option<&Decimal>) -> Option<String> {
    value.map(decimal_text)
}

/// 读取可空 Decimal 列
pub fn get_opt_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            Decimal::from_str(s.trim()).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .transpose()
}

/// 读取非空 Decimal 列（空值按 0 处理）
pub fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    Ok(get_opt_decimal(row, idx)?.unwrap_or(Decimal::ZERO))
}

pub fn get_opt_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .transpose()
}

pub fn get_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

/// 读取 JSON 列
pub fn get_opt_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .transpose()
}

pub fn date_text(value: Option<NaiveDate>) -> Option<String> {
    value.map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn datetime_text(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|d| d.to_rfc3339())
}
