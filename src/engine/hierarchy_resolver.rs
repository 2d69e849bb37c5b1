// ==========================================
// 关税归类与税费计算引擎 - 归类层级解析
// ==========================================
// 红线: 远程列表是扁平的，父子关系只由「位置 + 缩进」推导
// 红线: 祖先必须位于目标之前、缩进恰好小 1、且不可申报
// 红线: 翻译失败不影响结果（保留原文）
// ==========================================
// 粒度: ≤2 位 → 章视图；≤4 位 → 品目视图；其余 → 商品视图
// ==========================================

use crate::config::{ConfigResult, TariffConfigReader};
use crate::domain::hierarchy::{
    BreadcrumbEntry, ChapterEntry, ChildGroup, ChildRate, HierarchyGranularity, HierarchyView,
    HsNode,
};
use crate::domain::hs_code::{digits_only, pad_right, same_code, significant_digits};
use crate::domain::types::HsLevel;
use crate::engine::fan_out::bounded_fan_out;
use crate::engine::tariff_lookup::{LookupError, LookupResult, TariffLookup};
use crate::i18n;
use crate::infra::{
    BestEffortTranslator, ClassificationDocument, ClassificationSource, Clock, ReferenceEntry,
    TtlCache,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

// 翻译请求的并发上限
const TRANSLATION_CONCURRENCY: usize = 8;

const CHAPTER_INDEX_KEY: &str = "chapters";

// ==========================================
// 纯函数: 目标定位 / 祖先扫描 / 子商品分组
// ==========================================

/// 在扁平列表中定位目标（优先可申报节点，其次任意同码节点）
pub fn locate_target(nodes: &[HsNode], code: &str) -> Option<usize> {
    nodes
        .iter()
        .position(|n| n.declarable && same_code(&n.code, code))
        .or_else(|| nodes.iter().position(|n| same_code(&n.code, code)))
}

/// 从目标位置向前扫描祖先
///
/// # 规则
/// - 期望缩进从 target.indent - 1 开始，每命中一个祖先减 1
/// - 只接受不可申报节点（同码的可申报节点不会被当作祖先）
/// - 缩进到 0 或扫描到列表头部时停止
///
/// # 返回
/// - 按缩进递增排列的祖先节点
pub fn find_ancestors(nodes: &[HsNode], target_idx: usize) -> Vec<HsNode> {
    let Some(target) = nodes.get(target_idx) else {
        return Vec::new();
    };
    if target.indent == 0 {
        return Vec::new();
    }

    let mut expected = target.indent - 1;
    let mut ancestors = Vec::new();
    for node in nodes[..target_idx].iter().rev() {
        if node.indent == expected && !node.declarable {
            ancestors.push(node.clone());
            if expected == 0 {
                break;
            }
            expected -= 1;
        }
    }

    ancestors.reverse();
    ancestors
}

/// 将前缀（请求编码前至多 8 位）下的可申报子商品按最近的不可申报父节点分组
///
/// 找不到父节点的子商品归入「其他」组（group_code = None）
pub fn group_children(nodes: &[HsNode], prefix: &str, other_label: &str) -> Vec<ChildGroup> {
    let mut groups: Vec<ChildGroup> = Vec::new();

    for (idx, child) in nodes.iter().enumerate() {
        if !child.declarable || !child.code.starts_with(prefix) {
            continue;
        }

        let parent = nodes[..idx].iter().rev().find(|n| {
            !n.declarable && child.code.starts_with(significant_digits(&n.code).as_str())
        });
        let (group_code, label) = match parent {
            Some(p) => (Some(p.code.clone()), p.description.clone()),
            None => (None, other_label.to_string()),
        };

        match groups.iter_mut().find(|g| g.group_code == group_code) {
            Some(group) => group.children.push(child.clone()),
            None => groups.push(ChildGroup {
                group_code,
                label,
                label_translated: None,
                children: vec![child.clone()],
            }),
        }
    }

    groups
}

fn granularity_of(digits: &str) -> HierarchyGranularity {
    match digits.len() {
        0..=2 => HierarchyGranularity::Chapter,
        3..=4 => HierarchyGranularity::Heading,
        _ => HierarchyGranularity::Commodity,
    }
}

fn breadcrumb_entry(level: HsLevel, entry: &ReferenceEntry) -> BreadcrumbEntry {
    BreadcrumbEntry {
        level,
        code: entry.code.clone(),
        description: entry.description.clone(),
        description_translated: None,
    }
}

fn node_entry(node: &HsNode) -> BreadcrumbEntry {
    BreadcrumbEntry {
        level: node.level,
        code: node.code.clone(),
        description: node.description.clone(),
        description_translated: None,
    }
}

/// 类 → 章 → 品目
fn reference_breadcrumb(docs: &[&ClassificationDocument]) -> Vec<BreadcrumbEntry> {
    let pick = |f: fn(&ClassificationDocument) -> Option<&ReferenceEntry>| {
        docs.iter().find_map(|d| f(d)).cloned()
    };

    let mut breadcrumb = Vec::new();
    if let Some(section) = pick(|d| d.section.as_ref()) {
        breadcrumb.push(breadcrumb_entry(HsLevel::Section, &section));
    }
    if let Some(chapter) = pick(|d| d.chapter.as_ref()) {
        breadcrumb.push(breadcrumb_entry(HsLevel::Chapter, &chapter));
    }
    if let Some(heading) = pick(|d| d.heading.as_ref()) {
        breadcrumb.push(breadcrumb_entry(HsLevel::Heading, &heading));
    }
    breadcrumb
}

// ==========================================
// HierarchySettings
// ==========================================
#[derive(Debug, Clone)]
pub struct HierarchySettings {
    pub cache_ttl: chrono::Duration,
    pub reference_ttl: chrono::Duration,
    pub child_rate_limit: usize,
}

impl Default for HierarchySettings {
    fn default() -> Self {
        Self {
            cache_ttl: chrono::Duration::minutes(30),
            reference_ttl: chrono::Duration::days(7),
            child_rate_limit: 25,
        }
    }
}

impl HierarchySettings {
    pub async fn from_config(reader: &dyn TariffConfigReader) -> ConfigResult<Self> {
        Ok(Self {
            cache_ttl: chrono::Duration::minutes(reader.get_hierarchy_cache_ttl_minutes().await? as i64),
            reference_ttl: chrono::Duration::days(reader.get_reference_list_ttl_days().await? as i64),
            child_rate_limit: reader.get_child_rate_fanout_limit().await?,
        })
    }
}

// ==========================================
// HierarchyResolver
// ==========================================
pub struct HierarchyResolver {
    source: Arc<dyn ClassificationSource>,
    lookup: Arc<TariffLookup>,
    translator: Arc<BestEffortTranslator>,
    cache: TtlCache<(String, Option<String>), HierarchyView>,
    chapter_index_cache: TtlCache<String, Vec<ChapterEntry>>,
    settings: HierarchySettings,
}

impl HierarchyResolver {
    pub fn new(
        source: Arc<dyn ClassificationSource>,
        lookup: Arc<TariffLookup>,
        translator: Arc<BestEffortTranslator>,
        settings: HierarchySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            lookup,
            translator,
            cache: TtlCache::new(settings.cache_ttl, clock.clone()),
            chapter_index_cache: TtlCache::new(settings.reference_ttl, clock),
            settings,
        }
    }

    /// 解析编码的归类层级视图
    ///
    /// # 参数
    /// - code: 2~10 位编码（非数字字符被忽略）
    /// - origin: 可选原产地；提供时为前 N 个子商品附带该原产地税率
    #[instrument(skip(self), fields(hs_code = %code))]
    pub async fn resolve(&self, code: &str, origin: Option<&str>) -> LookupResult<HierarchyView> {
        let digits = digits_only(code);
        if digits.is_empty() || digits.len() > 10 {
            return Err(LookupError::InvalidCode(code.to_string()));
        }
        let origin = origin
            .map(|o| o.trim().to_uppercase())
            .filter(|o| !o.is_empty());

        let key = (digits.clone(), origin.clone());
        if let Some(view) = self.cache.get(&key).await {
            debug!(code = %digits, "层级缓存命中");
            return Ok(view);
        }

        let mut view = match granularity_of(&digits) {
            HierarchyGranularity::Chapter => self.chapter_view(&digits, origin).await?,
            HierarchyGranularity::Heading => self.heading_view(&digits, origin).await?,
            HierarchyGranularity::Commodity => self.commodity_view(&digits, origin).await?,
        };

        self.translate_view(&mut view).await;
        self.cache.insert(key, view.clone()).await;

        info!(
            code = %view.requested_code,
            ancestors = view.ancestors.len(),
            children = view.children.len(),
            groups = view.child_groups.len(),
            child_rates = view.child_rates.len(),
            "层级解析完成"
        );
        Ok(view)
    }

    /// 章索引（参考列表，长 TTL）
    pub async fn chapter_index(&self) -> LookupResult<Vec<ChapterEntry>> {
        let key = CHAPTER_INDEX_KEY.to_string();
        if let Some(chapters) = self.chapter_index_cache.get(&key).await {
            return Ok(chapters);
        }

        let chapters = self.source.fetch_chapter_index().await?;
        self.chapter_index_cache.insert(key, chapters.clone()).await;
        Ok(chapters)
    }

    // ==========================================
    // 各粒度视图
    // ==========================================

    async fn chapter_view(&self, digits: &str, origin: Option<String>) -> LookupResult<HierarchyView> {
        let chapter = format!("{:0>2}", digits);
        let doc = self
            .source
            .fetch_chapter(&chapter)
            .await
            .map_err(|e| not_found_or(e, digits, &chapter))?;

        let mut view = HierarchyView::empty(chapter.clone(), origin, HierarchyGranularity::Chapter);
        view.description = Some(doc.description.clone());
        view.breadcrumb = reference_breadcrumb(&[&doc]);
        if !view.breadcrumb.iter().any(|b| b.level == HsLevel::Chapter) {
            view.breadcrumb.push(BreadcrumbEntry {
                level: HsLevel::Chapter,
                code: chapter,
                description: doc.description.clone(),
                description_translated: None,
            });
        }
        view.children = doc.nodes;
        Ok(view)
    }

    async fn heading_view(&self, digits: &str, origin: Option<String>) -> LookupResult<HierarchyView> {
        let heading = pad_right(digits, 4);
        let doc = self
            .source
            .fetch_heading(&heading)
            .await
            .map_err(|e| not_found_or(e, digits, &heading))?;

        let mut view = HierarchyView::empty(heading.clone(), origin, HierarchyGranularity::Heading);
        view.description = Some(doc.description.clone());
        view.breadcrumb = reference_breadcrumb(&[&doc]);
        if !view.breadcrumb.iter().any(|b| b.level == HsLevel::Heading) {
            view.breadcrumb.push(BreadcrumbEntry {
                level: HsLevel::Heading,
                code: heading,
                description: doc.description.clone(),
                description_translated: None,
            });
        }
        view.children = doc.nodes;
        Ok(view)
    }

    async fn commodity_view(&self, digits: &str, origin: Option<String>) -> LookupResult<HierarchyView> {
        let code10 = pad_right(digits, 10);
        let heading = code10[..4].to_string();

        // 商品与品目并发获取
        let (commodity_res, heading_res) = tokio::join!(
            self.source.fetch_commodity(&code10, origin.as_deref()),
            self.source.fetch_heading(&heading)
        );

        let heading_doc = heading_res.map_err(|e| not_found_or(e, digits, &heading))?;
        let commodity_doc = match commodity_res {
            Ok(doc) => Some(doc),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let nodes = &heading_doc.nodes;
        let target_idx = locate_target(nodes, &code10);
        let target = match (target_idx, &commodity_doc) {
            (Some(idx), _) => nodes[idx].clone(),
            (None, Some(doc)) => HsNode::new(doc.code.clone(), doc.description.clone(), doc.indent, doc.declarable),
            (None, None) => {
                return Err(LookupError::NotFound {
                    code: digits.to_string(),
                    tried: vec![code10],
                })
            }
        };
        let ancestors = target_idx
            .map(|idx| find_ancestors(nodes, idx))
            .unwrap_or_default();

        let mut view = HierarchyView::empty(code10.clone(), origin.clone(), HierarchyGranularity::Commodity);
        view.description = Some(
            commodity_doc
                .as_ref()
                .map(|d| d.description.clone())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| target.description.clone()),
        );

        let mut reference_docs: Vec<&ClassificationDocument> = Vec::new();
        if let Some(doc) = &commodity_doc {
            reference_docs.push(doc);
        }
        reference_docs.push(&heading_doc);
        view.breadcrumb = reference_breadcrumb(&reference_docs);
        view.breadcrumb.extend(ancestors.iter().map(node_entry));
        view.breadcrumb.push(node_entry(&target));

        let other_label = i18n::t("hierarchy.other_group");
        let prefix = &digits[..digits.len().min(8)];
        view.child_groups = group_children(nodes, prefix, &other_label);

        if let Some(origin) = origin.as_deref() {
            view.child_rates = self.child_rates(&view.child_groups, origin).await;
        }

        view.ancestors = ancestors;
        view.target = Some(target);
        Ok(view)
    }

    /// 前 N 个子商品的原产地税率（有界并发，单个失败不影响其他）
    async fn child_rates(&self, groups: &[ChildGroup], origin: &str) -> Vec<ChildRate> {
        let limit = self.settings.child_rate_limit;
        let codes: Vec<String> = groups
            .iter()
            .flat_map(|g| g.children.iter().map(|c| c.code.clone()))
            .take(limit)
            .collect();

        bounded_fan_out(codes, limit, |code| async move {
            match self.lookup.lookup(&code, Some(origin)).await {
                Ok(rate) => ChildRate {
                    code,
                    rate: Some(rate),
                    error: None,
                },
                Err(e) => ChildRate {
                    code,
                    rate: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .await
    }

    // ==========================================
    // 翻译（尽力而为）
    // ==========================================

    async fn translate_view(&self, view: &mut HierarchyView) {
        let mut texts: Vec<String> = Vec::new();
        let mut push = |text: &str| {
            if !text.trim().is_empty() && !texts.iter().any(|t| t == text) {
                texts.push(text.to_string());
            }
        };

        if let Some(d) = &view.description {
            push(d);
        }
        view.breadcrumb.iter().for_each(|b| push(&b.description));
        view.ancestors.iter().for_each(|n| push(&n.description));
        view.target.iter().for_each(|n| push(&n.description));
        view.children.iter().for_each(|n| push(&n.description));
        for group in &view.child_groups {
            push(&group.label);
            group.children.iter().for_each(|n| push(&n.description));
        }

        if texts.is_empty() {
            return;
        }

        let translated = bounded_fan_out(texts.clone(), TRANSLATION_CONCURRENCY, |text| async move {
            self.translator.try_translate(&text).await
        })
        .await;
        let table: HashMap<String, String> = texts
            .into_iter()
            .zip(translated)
            .filter_map(|(src, t)| t.map(|t| (src, t)))
            .collect();
        if table.is_empty() {
            return;
        }

        let lookup = |text: &str| table.get(text).cloned();
        view.description_translated = view.description.as_deref().and_then(lookup);
        for entry in &mut view.breadcrumb {
            entry.description_translated = lookup(&entry.description);
        }
        let translate_node = |node: &mut HsNode| node.description_translated = lookup(&node.description);
        view.ancestors.iter_mut().for_each(translate_node);
        view.target.iter_mut().for_each(translate_node);
        view.children.iter_mut().for_each(translate_node);
        for group in &mut view.child_groups {
            group.label_translated = lookup(&group.label);
            group.children.iter_mut().for_each(translate_node);
        }
    }
}

/// 远程 404 → NotFound（带已尝试编码）；其他错误原样上抛
fn not_found_or(err: crate::infra::RemoteError, requested: &str, tried: &str) -> LookupError {
    if err.is_not_found() {
        LookupError::NotFound {
            code: requested.to_string(),
            tried: vec![tried.to_string()],
        }
    } else {
        err.into()
    }
}
