// ==========================================
// 关税归类与税费计算引擎 - 远程归类服务客户端
// ==========================================
// 协议: JSON:API 文档（data + included 类型化实体）
// 接口: GET chapters / chapters/{2} / headings/{4} / commodities/{10}[?origin=]
// 红线: 层级只由 included 中的「顺序 + number_indents」编码，客户端不重建树
// ==========================================

use crate::domain::hierarchy::{ChapterEntry, HsNode};
use crate::domain::hs_code::{digits_only, HsCode};
use crate::domain::tariff::TariffMeasure;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::rate_importer_trait::DataCleaner as _;
use crate::infra::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

// ==========================================
// JSON:API 文档结构
// ==========================================
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonApiDocument {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub included: Vec<ResourceObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceObject {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: Map<String, Value>,
}

impl ResourceObject {
    /// 字符串属性（数字按文本返回）
    fn str_attr(&self, key: &str) -> Option<String> {
        match self.attributes.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn bool_attr(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    fn u32_attr(&self, key: &str) -> Option<u32> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_u64().map(|v| v as u32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// relationships.{name}.data.id（数组取第一个）
    fn related_id(&self, name: &str) -> Option<String> {
        let data = self.relationships.get(name)?.get("data")?;
        let target = match data {
            Value::Array(items) => items.first()?,
            other => other,
        };
        target.get("id")?.as_str().map(str::to_string)
    }

    /// 商品编码（优先 goods_nomenclature_item_id，缺失用 id）
    fn goods_code(&self) -> String {
        digits_only(
            &self
                .str_attr("goods_nomenclature_item_id")
                .unwrap_or_else(|| self.id.clone()),
        )
    }

    fn description(&self) -> String {
        self.str_attr("description")
            .or_else(|| self.str_attr("formatted_description"))
            .or_else(|| self.str_attr("title"))
            .unwrap_or_default()
    }

    /// 是否可申报（标题级节点用 leaf 表示）
    fn declarable(&self) -> bool {
        self.bool_attr("declarable")
            .or_else(|| self.bool_attr("leaf"))
            .unwrap_or(false)
    }
}

impl JsonApiDocument {
    fn primary(&self) -> RemoteResult<ResourceObject> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| RemoteError::MalformedPayload(format!("data 不是单个资源: {}", e)))
    }

    fn primary_list(&self) -> RemoteResult<Vec<ResourceObject>> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| RemoteError::MalformedPayload(format!("data 不是资源列表: {}", e)))
    }

    fn first_included(&self, kind: &str) -> Option<&ResourceObject> {
        self.included.iter().find(|r| r.kind == kind)
    }

    fn find_included(&self, kind: &str, id: &str) -> Option<&ResourceObject> {
        self.included.iter().find(|r| r.kind == kind && r.id == id)
    }
}

// ==========================================
// 解析结果
// ==========================================

/// 面包屑参考条目（类 / 章 / 品目）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub code: String,
    pub description: String,
}

/// 一次远程查询的规范化结果
#[derive(Debug, Clone, Default)]
pub struct ClassificationDocument {
    pub code: String,
    pub description: String,
    pub declarable: bool,
    pub indent: u32,
    pub section: Option<ReferenceEntry>,
    pub chapter: Option<ReferenceEntry>,
    pub heading: Option<ReferenceEntry>,
    /// included 中的品目 / 商品节点（保持源顺序）
    pub nodes: Vec<HsNode>,
    /// 商品文档附带的税率措施
    pub measures: Vec<TariffMeasure>,
}

impl ClassificationDocument {
    /// 由 JSON:API 文档构造
    pub fn from_json_api(doc: &JsonApiDocument) -> RemoteResult<Self> {
        let primary = doc.primary()?;
        let code = primary.goods_code();

        let section = doc.first_included("section").map(|s| ReferenceEntry {
            code: s
                .str_attr("numeral")
                .or_else(|| s.str_attr("position"))
                .unwrap_or_else(|| s.id.clone()),
            description: s.description(),
        });
        let chapter = doc.first_included("chapter").map(|c| ReferenceEntry {
            code: c.goods_code().chars().take(2).collect(),
            description: c.description(),
        });
        let heading = doc.first_included("heading").map(|h| ReferenceEntry {
            code: h.goods_code().chars().take(4).collect(),
            description: h.description(),
        });

        let nodes = doc
            .included
            .iter()
            .filter(|r| matches!(r.kind.as_str(), "heading" | "commodity" | "subheading"))
            .map(|r| {
                HsNode::new(
                    r.goods_code(),
                    r.description(),
                    r.u32_attr("number_indents").unwrap_or(0),
                    r.declarable(),
                )
            })
            .collect();

        let measures = match HsCode::parse(&code) {
            Some(hs) => parse_measures(doc, &hs, &primary.description()),
            None => Vec::new(),
        };

        Ok(Self {
            description: primary.description(),
            declarable: primary.declarable(),
            indent: primary.u32_attr("number_indents").unwrap_or(0),
            code,
            section,
            chapter,
            heading,
            nodes,
            measures,
        })
    }
}

/// included 中的 measure 实体 → TariffMeasure（仅进口措施）
fn parse_measures(doc: &JsonApiDocument, code: &HsCode, goods_description: &str) -> Vec<TariffMeasure> {
    let cleaner = DataCleaner;

    doc.included
        .iter()
        .filter(|r| r.kind == "measure")
        .filter(|r| r.bool_attr("import").unwrap_or(true))
        .enumerate()
        .map(|(idx, measure)| {
            let measure_code = measure.related_id("measure_type");
            let measure_description = measure_code
                .as_deref()
                .and_then(|id| doc.find_included("measure_type", id))
                .map(|t| t.description());

            let duty_rate = measure
                .related_id("duty_expression")
                .and_then(|id| doc.find_included("duty_expression", &id).cloned())
                .and_then(|e| e.str_attr("base").or_else(|| e.str_attr("formatted_base")))
                .and_then(|base| cleaner.parse_rate(&base));

            let area_id = measure.related_id("geographical_area");
            let origin_description = area_id
                .as_deref()
                .and_then(|id| doc.find_included("geographical_area", id))
                .map(|a| a.description());

            let parse_date = |key: &str| {
                measure
                    .str_attr(key)
                    .and_then(|raw| cleaner.parse_date(&raw.chars().take(10).collect::<String>()))
            };

            TariffMeasure {
                code: code.clone(),
                measure_kind: cleaner
                    .classify_measure(measure_code.as_deref(), measure_description.as_deref()),
                measure_code,
                measure_description,
                duty_rate,
                origin_country_code: area_id,
                origin_description,
                legal_base: measure.related_id("legal_acts"),
                quota_order_number: measure.related_id("order_number"),
                start_date: parse_date("effective_start_date"),
                end_date: parse_date("effective_end_date"),
                goods_description: Some(goods_description.to_string()),
                row_number: idx + 1,
            }
        })
        .collect()
}

// ==========================================
// ClassificationSource Trait
// ==========================================
// 用途: 远程归类服务读取接口
// 实现者: HttpClassificationClient（测试中为内存实现）
#[async_trait]
pub trait ClassificationSource: Send + Sync {
    /// 章（2 位）: included 为品目列表
    async fn fetch_chapter(&self, chapter: &str) -> RemoteResult<ClassificationDocument>;

    /// 品目（4 位）: included 为带缩进的扁平商品列表
    async fn fetch_heading(&self, heading: &str) -> RemoteResult<ClassificationDocument>;

    /// 商品（10 位）: included 含祖先节点与税率措施
    async fn fetch_commodity(
        &self,
        code10: &str,
        origin: Option<&str>,
    ) -> RemoteResult<ClassificationDocument>;

    /// 章索引（静态参考列表）
    async fn fetch_chapter_index(&self) -> RemoteResult<Vec<ChapterEntry>>;
}

// ==========================================
// HttpClassificationClient
// ==========================================
pub struct HttpClassificationClient {
    http: Client,
    base_url: Url,
}

impl HttpClassificationClient {
    /// 创建客户端
    ///
    /// # 参数
    /// - base_url: 服务根地址（缺少结尾 `/` 时自动补齐）
    /// - timeout: 单次请求超时
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    async fn get_document(&self, path: &str, query: &[(&str, &str)]) -> RemoteResult<JsonApiDocument> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        debug!(url = %url, "请求远程归类服务");

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::UpstreamStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        response
            .json::<JsonApiDocument>()
            .await
            .map_err(|e| RemoteError::MalformedPayload(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl ClassificationSource for HttpClassificationClient {
    async fn fetch_chapter(&self, chapter: &str) -> RemoteResult<ClassificationDocument> {
        let doc = self.get_document(&format!("chapters/{}", chapter), &[]).await?;
        ClassificationDocument::from_json_api(&doc)
    }

    async fn fetch_heading(&self, heading: &str) -> RemoteResult<ClassificationDocument> {
        let doc = self.get_document(&format!("headings/{}", heading), &[]).await?;
        ClassificationDocument::from_json_api(&doc)
    }

    async fn fetch_commodity(
        &self,
        code10: &str,
        origin: Option<&str>,
    ) -> RemoteResult<ClassificationDocument> {
        let path = format!("commodities/{}", code10);
        let doc = match origin {
            Some(origin) => self.get_document(&path, &[("origin", origin)]).await?,
            None => self.get_document(&path, &[]).await?,
        };
        ClassificationDocument::from_json_api(&doc)
    }

    async fn fetch_chapter_index(&self) -> RemoteResult<Vec<ChapterEntry>> {
        let doc = self.get_document("chapters", &[]).await?;
        let chapters = doc
            .primary_list()?
            .into_iter()
            .map(|c| ChapterEntry {
                code: c.goods_code().chars().take(2).collect(),
                description: c.description(),
                section_code: c.related_id("section"),
                section_title: None,
            })
            .collect();
        Ok(chapters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MeasureKind;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn commodity_json() -> JsonApiDocument {
        serde_json::from_value(serde_json::json!({
            "data": {
                "id": "1", "type": "commodity",
                "attributes": {
                    "goods_nomenclature_item_id": "6911100000",
                    "description": "Tableware and kitchenware",
                    "number_indents": 1,
                    "declarable": true
                }
            },
            "included": [
                { "id": "14", "type": "section", "attributes": { "numeral": "XIII", "title": "Articles of stone" } },
                { "id": "69", "type": "chapter", "attributes": { "goods_nomenclature_item_id": "6900000000", "description": "Ceramic products" } },
                { "id": "6911", "type": "heading", "attributes": { "goods_nomenclature_item_id": "6911000000", "description": "Porcelain tableware" } },
                {
                    "id": "m1", "type": "measure",
                    "attributes": { "import": true, "effective_start_date": "2021-01-01T00:00:00.000Z" },
                    "relationships": {
                        "measure_type": { "data": { "id": "103", "type": "measure_type" } },
                        "duty_expression": { "data": { "id": "m1-duty_expression", "type": "duty_expression" } },
                        "geographical_area": { "data": { "id": "1011", "type": "geographical_area" } }
                    }
                },
                {
                    "id": "m2", "type": "measure",
                    "attributes": { "import": true },
                    "relationships": {
                        "measure_type": { "data": { "id": "552", "type": "measure_type" } },
                        "duty_expression": { "data": { "id": "m2-duty_expression", "type": "duty_expression" } },
                        "geographical_area": { "data": { "id": "CN", "type": "geographical_area" } }
                    }
                },
                {
                    "id": "m3", "type": "measure",
                    "attributes": { "import": false },
                    "relationships": { "measure_type": { "data": { "id": "103", "type": "measure_type" } } }
                },
                { "id": "103", "type": "measure_type", "attributes": { "description": "Third country duty" } },
                { "id": "552", "type": "measure_type", "attributes": { "description": "Definitive anti-dumping duty" } },
                { "id": "m1-duty_expression", "type": "duty_expression", "attributes": { "base": "12.00 %" } },
                { "id": "m2-duty_expression", "type": "duty_expression", "attributes": { "base": "36.1 %" } },
                { "id": "CN", "type": "geographical_area", "attributes": { "description": "China" } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_commodity_document_breadcrumb_and_measures() {
        let doc = ClassificationDocument::from_json_api(&commodity_json()).unwrap();
        assert_eq!(doc.code, "6911100000");
        assert!(doc.declarable);
        assert_eq!(doc.section.as_ref().unwrap().code, "XIII");
        assert_eq!(doc.chapter.as_ref().unwrap().code, "69");
        assert_eq!(doc.heading.as_ref().unwrap().code, "6911");

        // 出口措施被过滤
        assert_eq!(doc.measures.len(), 2);
        let third = &doc.measures[0];
        assert_eq!(third.measure_kind, MeasureKind::ThirdCountry);
        assert_eq!(third.duty_rate, Some(Decimal::from(12)));
        assert_eq!(third.start_date.unwrap().to_string(), "2021-01-01");

        let ad = &doc.measures[1];
        assert_eq!(ad.measure_kind, MeasureKind::AntiDumping);
        assert_eq!(ad.duty_rate, Some(Decimal::from_str("36.1").unwrap()));
        assert_eq!(ad.origin_country_code.as_deref(), Some("CN"));
        assert_eq!(ad.origin_description.as_deref(), Some("China"));
    }

    #[test]
    fn test_heading_document_keeps_flat_order() {
        let doc: JsonApiDocument = serde_json::from_value(serde_json::json!({
            "data": { "id": "0101", "type": "heading",
                      "attributes": { "goods_nomenclature_item_id": "0101000000", "description": "Live horses" } },
            "included": [
                { "id": "a", "type": "commodity", "attributes": { "goods_nomenclature_item_id": "0101210000", "description": "Horses", "number_indents": 1, "leaf": false } },
                { "id": "b", "type": "commodity", "attributes": { "goods_nomenclature_item_id": "0101210000", "description": "Pure-bred", "number_indents": 2, "leaf": true } }
            ]
        }))
        .unwrap();

        let parsed = ClassificationDocument::from_json_api(&doc).unwrap();
        assert_eq!(parsed.nodes.len(), 2);
        assert!(!parsed.nodes[0].declarable);
        assert!(parsed.nodes[1].declarable);
        assert_eq!(parsed.nodes[1].indent, 2);
        assert!(parsed.measures.is_empty());
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let doc = JsonApiDocument::default();
        let err = ClassificationDocument::from_json_api(&doc).unwrap_err();
        assert!(matches!(err, RemoteError::MalformedPayload(_)));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client =
            HttpClassificationClient::new("https://example.org/api/v2", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url.as_str(), "https://example.org/api/v2/");
        assert_eq!(
            client.base_url.join("headings/6911").unwrap().as_str(),
            "https://example.org/api/v2/headings/6911"
        );
    }
}
