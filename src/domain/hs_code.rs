// ==========================================
// 关税归类与税费计算引擎 - HS 编码规范化
// ==========================================
// 职责: 数字化 / 补零 / 有效位截取 / 原产地口径判定
// 红线: 不含 I/O，纯函数
// ==========================================

use serde::{Deserialize, Serialize};

/// 合法 HS 编码的最少位数（不足则整行丢弃）
pub const MIN_CODE_DIGITS: usize = 4;

/// 规范化后的 HS 编码（8 位 + 10 位两种口径）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HsCode {
    pub hs8: String,  // 前 8 位，不足右补 0
    pub hs10: String, // 前 10 位，不足右补 0（主键口径）
}

impl HsCode {
    /// 解析原始编码
    ///
    /// # 返回
    /// - Some(HsCode): 去除非数字字符后至少 4 位
    /// - None: 非数字或位数不足
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = digits_only(raw);
        if digits.len() < MIN_CODE_DIGITS {
            return None;
        }
        Some(Self {
            hs8: pad_right(&digits, 8),
            hs10: pad_right(&digits, 10),
        })
    }

    /// 6 位子目口径（补零到 10 位）
    pub fn hs6_padded(&self) -> String {
        pad_right(&self.hs10[..6], 10)
    }

    /// 8 位口径补零到 10 位
    pub fn hs8_padded(&self) -> String {
        pad_right(&self.hs8, 10)
    }

    pub fn heading(&self) -> &str {
        &self.hs10[..4]
    }

    pub fn chapter(&self) -> &str {
        &self.hs10[..2]
    }
}

/// 仅保留 ASCII 数字
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 截断或右补 0 到指定长度
pub fn pad_right(code: &str, len: usize) -> String {
    let mut out: String = code.chars().take(len).collect();
    while out.len() < len {
        out.push('0');
    }
    out
}

/// 去掉成对的尾部 "00"，得到编码的有效位
///
/// 例: "0101210000" → "010121"，"6911100000" → "691110"
pub fn significant_digits(code: &str) -> String {
    let mut digits = digits_only(code);
    while digits.len() > 2 && digits.len() % 2 == 0 && digits.ends_with("00") {
        digits.truncate(digits.len() - 2);
    }
    digits
}

/// 两个编码在 10 位口径下是否相同
pub fn same_code(a: &str, b: &str) -> bool {
    pad_right(&digits_only(a), 10) == pad_right(&digits_only(b), 10)
}

/// 原产地是否为非特定口径（全球 / 欧盟集合 / 缺失）
///
/// 规则: 空值、1008、1011 以及任何 10/20 开头的地理区域组代码均视为非特定
pub fn is_generic_origin(origin: Option<&str>) -> bool {
    match origin.map(str::trim) {
        None | Some("") => true,
        Some(code) => code.starts_with("10") || code.starts_with("20"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pads_and_truncates() {
        let code = HsCode::parse("6911.10.00").unwrap();
        assert_eq!(code.hs8, "69111000");
        assert_eq!(code.hs10, "6911100000");

        let long = HsCode::parse("691110009012").unwrap();
        assert_eq!(long.hs10, "6911100090");
        assert_eq!(long.hs8, "69111000");
    }

    #[test]
    fn test_parse_rejects_short_or_non_numeric() {
        assert!(HsCode::parse("691").is_none());
        assert!(HsCode::parse("abc").is_none());
        assert!(HsCode::parse("").is_none());
        assert!(HsCode::parse("0101").is_some());
    }

    #[test]
    fn test_significant_digits() {
        assert_eq!(significant_digits("0101210000"), "010121");
        assert_eq!(significant_digits("6911100000"), "691110");
        assert_eq!(significant_digits("0100000000"), "01");
        assert_eq!(significant_digits("6911100010"), "6911100010");
    }

    #[test]
    fn test_candidate_paddings() {
        let code = HsCode::parse("6911100010").unwrap();
        assert_eq!(code.hs8_padded(), "6911100000");
        assert_eq!(code.hs6_padded(), "6911100000");
        assert_eq!(code.heading(), "6911");
        assert_eq!(code.chapter(), "69");
    }

    #[test]
    fn test_generic_origin() {
        assert!(is_generic_origin(None));
        assert!(is_generic_origin(Some("")));
        assert!(is_generic_origin(Some("1011")));
        assert!(is_generic_origin(Some("1008")));
        assert!(is_generic_origin(Some("2005")));
        assert!(!is_generic_origin(Some("CN")));
        assert!(!is_generic_origin(Some("TW")));
    }
}
