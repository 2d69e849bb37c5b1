// ==========================================
// 关税归类与税费计算引擎 - 数据清洗器实现
// ==========================================
// 职责: TRIM / NULL 标准化 / 税率数值提取 / 多格式日期 / 措施分类
// ==========================================

use crate::domain::types::MeasureKind;
use crate::importer::rate_importer_trait::DataCleaner as DataCleanerTrait;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

// Excel 序列日期的合理区间（约 1954 ~ 2119 年）
const EXCEL_SERIAL_MIN: f64 = 20_000.0;
const EXCEL_SERIAL_MAX: f64 = 80_000.0;

pub struct DataCleaner;

impl DataCleanerTrait for DataCleaner {
    fn clean_text(&self, value: &str) -> String {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn normalize_null(&self, value: Option<String>) -> Option<String> {
        value.and_then(|v| {
            let trimmed = v.trim();
            match trimmed {
                "" | "-" | "—" | "N/A" | "n/a" | "NULL" | "null" => None,
                _ => Some(self.clean_text(trimmed)),
            }
        })
    }

    fn parse_rate(&self, value: &str) -> Option<Decimal> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("free") || trimmed == "免税" {
            return Some(Decimal::ZERO);
        }

        // 取单元格中的第一个数字（允许逗号作小数点）
        let mut number = String::new();
        let mut seen_separator = false;
        let mut chars = trimmed.chars().peekable();
        while let Some(c) = chars.next() {
            if c.is_ascii_digit() {
                number.push(c);
            } else if !number.is_empty()
                && !seen_separator
                && (c == '.' || c == ',')
                && chars.peek().map_or(false, |n| n.is_ascii_digit())
            {
                number.push('.');
                seen_separator = true;
            } else if !number.is_empty() {
                break;
            }
        }

        if number.is_empty() {
            return None;
        }
        Decimal::from_str(&number).ok()
    }

    fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }

        // 只取日期部分（"2024-01-01 00:00:00" / "2024-01-01T00:00:00"）
        let date_part = trimmed
            .split(|c: char| c == ' ' || c == 'T')
            .next()
            .unwrap_or(trimmed);

        for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y%m%d", "%Y/%m/%d"] {
            if let Ok(date) = NaiveDate::parse_from_str(date_part, fmt) {
                return Some(date);
            }
        }

        // Excel 序列日期（1900 日期系统，基准 1899-12-30）
        let serial = trimmed.parse::<f64>().ok()?;
        if !(EXCEL_SERIAL_MIN..=EXCEL_SERIAL_MAX).contains(&serial) {
            return None;
        }
        NaiveDate::from_ymd_opt(1899, 12, 30)
            .and_then(|base| base.checked_add_signed(Duration::days(serial.trunc() as i64)))
    }

    fn classify_measure(&self, code: Option<&str>, description: Option<&str>) -> MeasureKind {
        if let Some(code) = code.map(str::trim) {
            match code {
                "103" | "105" => return MeasureKind::ThirdCountry,
                "142" | "143" | "145" | "146" => return MeasureKind::Preferential,
                "551" | "552" => return MeasureKind::AntiDumping,
                "553" | "554" => return MeasureKind::Countervailing,
                _ => {}
            }
        }

        let Some(desc) = description else {
            return MeasureKind::Other;
        };
        let lower = desc.to_lowercase();
        if lower.contains("third country") {
            MeasureKind::ThirdCountry
        } else if lower.contains("anti-dumping") || lower.contains("anti dumping") {
            MeasureKind::AntiDumping
        } else if lower.contains("countervailing") {
            MeasureKind::Countervailing
        } else if lower.contains("preferential") || lower.contains("tariff preference") {
            MeasureKind::Preferential
        } else {
            MeasureKind::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_null() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.normalize_null(Some("  ".to_string())), None);
        assert_eq!(cleaner.normalize_null(Some("n/a".to_string())), None);
        assert_eq!(
            cleaner.normalize_null(Some("  Tableware   and kitchenware ".to_string())),
            Some("Tableware and kitchenware".to_string())
        );
        assert_eq!(cleaner.normalize_null(None), None);
    }

    #[test]
    fn test_parse_rate_first_number() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_rate("12 %"), Some(Decimal::from(12)));
        assert_eq!(cleaner.parse_rate("12.0"), Some(Decimal::from_str("12.0").unwrap()));
        assert_eq!(cleaner.parse_rate("36,1%"), Some(Decimal::from_str("36.1").unwrap()));
        assert_eq!(
            cleaner.parse_rate("8.00 % + 4.40 GBP / 100 kg"),
            Some(Decimal::from_str("8.00").unwrap())
        );
        assert_eq!(cleaner.parse_rate("Free"), Some(Decimal::ZERO));
        assert_eq!(cleaner.parse_rate("see notes"), None);
        assert_eq!(cleaner.parse_rate(""), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let cleaner = DataCleaner;
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(cleaner.parse_date("2024-03-15"), expected);
        assert_eq!(cleaner.parse_date("15.03.2024"), expected);
        assert_eq!(cleaner.parse_date("15/03/2024"), expected);
        assert_eq!(cleaner.parse_date("20240315"), expected);
        assert_eq!(cleaner.parse_date("2024-03-15 00:00:00"), expected);
        // Excel 序列: 45366 = 2024-03-15
        assert_eq!(cleaner.parse_date("45366"), expected);
        assert_eq!(cleaner.parse_date("not a date"), None);
    }

    #[test]
    fn test_classify_measure_code_first() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.classify_measure(Some("103"), Some("preferential")),
            MeasureKind::ThirdCountry
        );
        assert_eq!(cleaner.classify_measure(Some("552"), None), MeasureKind::AntiDumping);
        assert_eq!(cleaner.classify_measure(Some("554"), None), MeasureKind::Countervailing);
        assert_eq!(cleaner.classify_measure(Some("142"), None), MeasureKind::Preferential);
    }

    #[test]
    fn test_classify_measure_description_fallback() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.classify_measure(None, Some("Third Country Duty")),
            MeasureKind::ThirdCountry
        );
        assert_eq!(
            cleaner.classify_measure(Some("999"), Some("Definitive ANTI-DUMPING duty")),
            MeasureKind::AntiDumping
        );
        assert_eq!(
            cleaner.classify_measure(None, Some("Tariff preference")),
            MeasureKind::Preferential
        );
        assert_eq!(
            cleaner.classify_measure(None, Some("Import control")),
            MeasureKind::Other
        );
    }
}
