// ==========================================
// 关税归类与税费计算引擎 - 领域类型定义
// ==========================================
// 职责: 税率措施类型 / 归类层级 / 贸易术语 / 运费分摊方式
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 税率措施类型 (Measure Kind)
// ==========================================
// 红线: 同一 HS10 至多一条 ThirdCountry 基准措施
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasureKind {
    ThirdCountry,   // 第三国关税（基准税率）
    AntiDumping,    // 反倾销税
    Countervailing, // 反补贴税
    Preferential,   // 优惠税率
    Other,          // 其他措施
}

impl MeasureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureKind::ThirdCountry => "THIRD_COUNTRY",
            MeasureKind::AntiDumping => "ANTI_DUMPING",
            MeasureKind::Countervailing => "COUNTERVAILING",
            MeasureKind::Preferential => "PREFERENTIAL",
            MeasureKind::Other => "OTHER",
        }
    }

    /// 从数据库字符串解析（未知值归为 Other）
    pub fn parse(raw: &str) -> Self {
        match raw.trim().trim_matches('"') {
            "THIRD_COUNTRY" => MeasureKind::ThirdCountry,
            "ANTI_DUMPING" => MeasureKind::AntiDumping,
            "COUNTERVAILING" => MeasureKind::Countervailing,
            "PREFERENTIAL" => MeasureKind::Preferential,
            _ => MeasureKind::Other,
        }
    }

    /// 惩罚性措施（附加税，不替代基准税率）
    pub fn is_penalty(&self) -> bool {
        matches!(self, MeasureKind::AntiDumping | MeasureKind::Countervailing)
    }
}

impl fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 归类层级 (HS Level)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HsLevel {
    Section,    // 类
    Chapter,    // 章（2 位）
    Heading,    // 品目（4 位）
    Subheading, // 子目 / 材质分级（6-8 位）
    Commodity,  // 可申报商品（10 位）
}

impl HsLevel {
    /// 按编码有效位数推断层级
    pub fn from_code(code: &str) -> Self {
        let significant = crate::domain::hs_code::significant_digits(code);
        match significant.len() {
            0..=2 => HsLevel::Chapter,
            3..=4 => HsLevel::Heading,
            5..=8 => HsLevel::Subheading,
            _ => HsLevel::Commodity,
        }
    }
}

impl fmt::Display for HsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HsLevel::Section => write!(f, "SECTION"),
            HsLevel::Chapter => write!(f, "CHAPTER"),
            HsLevel::Heading => write!(f, "HEADING"),
            HsLevel::Subheading => write!(f, "SUBHEADING"),
            HsLevel::Commodity => write!(f, "COMMODITY"),
        }
    }
}

// ==========================================
// 贸易术语 (Incoterms 2020 + 旧版 DAT/DDU)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Incoterm {
    Exw,
    Fca,
    Fas,
    Fob,
    Cfr,
    Cif,
    Cpt,
    Cip,
    Dap,
    Dpu,
    Ddp,
    Dat, // 旧版，等同 DPU
    Ddu, // 旧版，等同 DAP
}

/// 完税价格口径分组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuationBasis {
    /// 工厂交货: 加出口段内陆运费 + 国际运费 + 进口段费用 + 保险
    ExWorks,
    /// 装运港/承运人交货: 加国际运费 + 进口段费用 + 保险
    FreeOnBoard,
    /// 价格已含运保费（C 组 / D 组）
    PriceInclusive,
}

impl Incoterm {
    pub const ALL: [Incoterm; 13] = [
        Incoterm::Exw,
        Incoterm::Fca,
        Incoterm::Fas,
        Incoterm::Fob,
        Incoterm::Cfr,
        Incoterm::Cif,
        Incoterm::Cpt,
        Incoterm::Cip,
        Incoterm::Dap,
        Incoterm::Dpu,
        Incoterm::Ddp,
        Incoterm::Dat,
        Incoterm::Ddu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Incoterm::Exw => "EXW",
            Incoterm::Fca => "FCA",
            Incoterm::Fas => "FAS",
            Incoterm::Fob => "FOB",
            Incoterm::Cfr => "CFR",
            Incoterm::Cif => "CIF",
            Incoterm::Cpt => "CPT",
            Incoterm::Cip => "CIP",
            Incoterm::Dap => "DAP",
            Incoterm::Dpu => "DPU",
            Incoterm::Ddp => "DDP",
            Incoterm::Dat => "DAT",
            Incoterm::Ddu => "DDU",
        }
    }

    /// 解析贸易术语（忽略大小写和空白，未知值返回 None）
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        Incoterm::ALL.iter().copied().find(|t| t.as_str() == upper)
    }

    pub fn valuation_basis(&self) -> ValuationBasis {
        match self {
            Incoterm::Exw => ValuationBasis::ExWorks,
            Incoterm::Fca | Incoterm::Fas | Incoterm::Fob => ValuationBasis::FreeOnBoard,
            _ => ValuationBasis::PriceInclusive,
        }
    }

    /// DDP: 卖方预付税费（影响下游记账，不影响完税价格）
    pub fn duties_prepaid(&self) -> bool {
        matches!(self, Incoterm::Ddp)
    }
}

impl fmt::Display for Incoterm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 运费分摊方式 (Freight Allocation Method)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreightAllocationMethod {
    #[default]
    ByValue,    // 按申报货值比例
    ByWeight,   // 按毛重比例
    ByQuantity, // 按数量比例
    Equal,      // 平均分摊
}

impl FreightAllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreightAllocationMethod::ByValue => "BY_VALUE",
            FreightAllocationMethod::ByWeight => "BY_WEIGHT",
            FreightAllocationMethod::ByQuantity => "BY_QUANTITY",
            FreightAllocationMethod::Equal => "EQUAL",
        }
    }

    /// 解析分摊方式（未知值回退为按货值）
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "BY_WEIGHT" | "WEIGHT" => FreightAllocationMethod::ByWeight,
            "BY_QUANTITY" | "QUANTITY" => FreightAllocationMethod::ByQuantity,
            "EQUAL" => FreightAllocationMethod::Equal,
            _ => FreightAllocationMethod::ByValue,
        }
    }
}

impl fmt::Display for FreightAllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 税率匹配方式 (Match Kind)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKind {
    /// 精确命中请求编码
    Exact,
    /// 命中上级编码（8 位补零 / 6 位补零）
    ParentPrefix(String),
    /// 同品目下的近似兄弟编码
    SiblingApproximation(String),
}

impl MatchKind {
    pub fn is_exact(&self) -> bool {
        matches!(self, MatchKind::Exact)
    }
}
