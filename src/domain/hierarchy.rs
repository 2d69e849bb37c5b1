// ==========================================
// 关税归类与税费计算引擎 - 归类层级模型
// ==========================================
// 红线: 远程服务返回的是扁平列表，不是树；
//       父子关系只能由「位置 + 缩进」推导
// ==========================================

use crate::domain::tariff::RateRecord;
use crate::domain::types::HsLevel;
use serde::{Deserialize, Serialize};

// ==========================================
// HsNode - 归类层级节点
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsNode {
    pub code: String,
    pub description: String,
    pub description_translated: Option<String>,
    pub level: HsLevel,
    pub indent: u32,       // 源数据缩进深度
    pub declarable: bool,  // true = 可申报叶子，false = 仅归类节点
}

impl HsNode {
    pub fn new(code: impl Into<String>, description: impl Into<String>, indent: u32, declarable: bool) -> Self {
        let code = code.into();
        let level = if declarable {
            HsLevel::Commodity
        } else {
            HsLevel::from_code(&code)
        };
        Self {
            code,
            description: description.into(),
            description_translated: None,
            level,
            indent,
            declarable,
        }
    }

    /// 展示用描述（有译文优先译文）
    pub fn display_description(&self) -> &str {
        self.description_translated
            .as_deref()
            .unwrap_or(&self.description)
    }
}

/// 查询粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HierarchyGranularity {
    Chapter,   // ≤2 位
    Heading,   // ≤4 位
    Commodity, // ≥6 位
}

/// 面包屑条目（类 → 章 → 品目 → 祖先 → 目标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreadcrumbEntry {
    pub level: HsLevel,
    pub code: String,
    pub description: String,
    pub description_translated: Option<String>,
}

/// 子商品分组（按最近的非申报父节点描述归组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildGroup {
    pub group_code: Option<String>, // None = 「其他」组
    pub label: String,
    pub label_translated: Option<String>,
    pub children: Vec<HsNode>,
}

/// 子商品税率（仅前 N 个子商品）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRate {
    pub code: String,
    pub rate: Option<RateRecord>,
    pub error: Option<String>,
}

// ==========================================
// HierarchyView - 归类层级视图
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyView {
    pub requested_code: String, // 规范化后的数字编码
    pub origin: Option<String>,
    pub granularity: HierarchyGranularity,
    pub description: Option<String>,
    pub description_translated: Option<String>,
    pub breadcrumb: Vec<BreadcrumbEntry>,
    pub ancestors: Vec<HsNode>,
    pub target: Option<HsNode>,
    pub children: Vec<HsNode>,          // 章 / 品目视图
    pub child_groups: Vec<ChildGroup>,  // 商品视图
    pub child_rates: Vec<ChildRate>,
}

impl HierarchyView {
    pub fn empty(requested_code: String, origin: Option<String>, granularity: HierarchyGranularity) -> Self {
        Self {
            requested_code,
            origin,
            granularity,
            description: None,
            description_translated: None,
            breadcrumb: Vec::new(),
            ancestors: Vec::new(),
            target: None,
            children: Vec::new(),
            child_groups: Vec::new(),
            child_rates: Vec::new(),
        }
    }
}

/// 章索引条目（静态参考列表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub code: String,
    pub description: String,
    pub section_code: Option<String>,
    pub section_title: Option<String>,
}
