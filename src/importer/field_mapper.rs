// ==========================================
// 关税归类与税费计算引擎 - 字段映射器实现
// ==========================================
// 职责: 表头别名识别 + 源字段 → 标准字段映射 + 类型转换
// 红线: 商品编码列是唯一必需列
// ==========================================

use crate::domain::hs_code::{digits_only, HsCode};
use crate::domain::tariff::{ClassificationRecord, TariffMeasure};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::rate_importer_trait::{
    DataCleaner as DataCleanerTrait, FieldMapper as FieldMapperTrait,
};
use std::collections::HashMap;

/// 逻辑字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateField {
    Code,
    Description,
    DescriptionTranslated,
    StartDate,
    EndDate,
    MeasureType,
    MeasureCode,
    DutyRate,
    Origin,
    OriginDescription,
    LegalBase,
    QuotaOrderNumber,
}

impl RateField {
    const ALL: [RateField; 12] = [
        RateField::Code,
        RateField::Description,
        RateField::DescriptionTranslated,
        RateField::StartDate,
        RateField::EndDate,
        RateField::MeasureType,
        RateField::MeasureCode,
        RateField::DutyRate,
        RateField::Origin,
        RateField::OriginDescription,
        RateField::LegalBase,
        RateField::QuotaOrderNumber,
    ];

    /// 列名别名（已规范化: 小写 + 下划线/连字符转空格）
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            RateField::Code => &[
                "hs code",
                "goods code",
                "goods nomenclature item id",
                "goods nomenclature code",
                "commodity code",
                "cn code",
                "taric code",
                "code",
                "商品编码",
                "税号",
                "hs编码",
            ],
            RateField::Description => &[
                "description",
                "goods description",
                "commodity description",
                "desc",
                "商品描述",
                "描述",
            ],
            RateField::DescriptionTranslated => &[
                "description translated",
                "translated description",
                "description zh",
                "中文描述",
                "译文",
            ],
            RateField::StartDate => &[
                "start date",
                "validity start date",
                "valid from",
                "起始日期",
                "生效日期",
            ],
            RateField::EndDate => &[
                "end date",
                "validity end date",
                "valid to",
                "终止日期",
                "失效日期",
            ],
            RateField::MeasureType => &[
                "measure type",
                "measure type description",
                "measure",
                "措施类型",
            ],
            RateField::MeasureCode => &[
                "measure type code",
                "measure type id",
                "measure code",
                "措施代码",
            ],
            RateField::DutyRate => &["duty", "duty rate", "duty expression", "rate", "税率"],
            RateField::Origin => &[
                "origin",
                "origin code",
                "geographical area",
                "geographical area id",
                "country",
                "原产地",
                "原产地代码",
            ],
            RateField::OriginDescription => &[
                "origin description",
                "geographical area description",
                "country name",
                "原产地描述",
            ],
            RateField::LegalBase => &["legal base", "regulation", "legal act", "法律依据"],
            RateField::QuotaOrderNumber => &[
                "quota order number",
                "order number",
                "quota",
                "配额序号",
            ],
        }
    }
}

/// 表头规范化: 去首尾空白、小写、下划线/连字符转空格、折叠空白
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ==========================================
// ColumnMap - 逻辑字段 → 实际列名
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<RateField, String>,
}

impl ColumnMap {
    pub fn get(&self, field: RateField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn code_column(&self) -> Option<&str> {
        self.get(RateField::Code)
    }

    pub fn has(&self, field: RateField) -> bool {
        self.columns.contains_key(&field)
    }
}

// ==========================================
// RateFieldMapper
// ==========================================
pub struct RateFieldMapper {
    cleaner: DataCleaner,
}

impl RateFieldMapper {
    pub fn new() -> Self {
        Self {
            cleaner: DataCleaner,
        }
    }

    /// 提取字符串字段（空值 / 占位符返回 None）
    fn get_string(
        &self,
        row: &HashMap<String, String>,
        columns: &ColumnMap,
        field: RateField,
    ) -> Option<String> {
        let header = columns.get(field)?;
        self.cleaner.normalize_null(row.get(header).cloned())
    }

    /// 解析编码列
    ///
    /// 数值型单元格会丢失前导零（"0101210000" → 101210000），
    /// HS 编码位数恒为偶数，奇数位时补回一位 0
    fn parse_code(&self, raw: &str) -> Option<HsCode> {
        let trimmed = raw.trim();
        // 浮点显示形式 "6911100000.0"
        let integral = match trimmed.split_once('.') {
            Some((int, frac))
                if !frac.is_empty()
                    && frac.chars().all(|c| c == '0')
                    && int.chars().all(|c| c.is_ascii_digit()) =>
            {
                int
            }
            _ => trimmed,
        };

        let mut digits = digits_only(integral);
        if matches!(digits.len(), 5 | 7 | 9) && integral.chars().all(|c| c.is_ascii_digit()) {
            digits.insert(0, '0');
        }
        HsCode::parse(&digits)
    }
}

impl Default for RateFieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapperTrait for RateFieldMapper {
    fn resolve_columns(&self, headers: &[String]) -> Option<ColumnMap> {
        let normalized: Vec<(String, &String)> = headers
            .iter()
            .map(|h| (normalize_header(h), h))
            .collect();

        let mut columns = HashMap::new();
        for field in RateField::ALL {
            // 别名按优先级顺序匹配
            let found = field.aliases().iter().find_map(|alias| {
                normalized
                    .iter()
                    .find(|(norm, _)| norm == alias)
                    .map(|(_, original)| (*original).clone())
            });
            if let Some(header) = found {
                columns.insert(field, header);
            }
        }

        if columns.contains_key(&RateField::Code) {
            Some(ColumnMap { columns })
        } else {
            None
        }
    }

    fn map_classification(
        &self,
        row: &HashMap<String, String>,
        columns: &ColumnMap,
        row_number: usize,
    ) -> Option<ClassificationRecord> {
        let raw_code = self.get_string(row, columns, RateField::Code)?;
        let code = self.parse_code(&raw_code)?;

        Some(ClassificationRecord {
            code,
            description: self
                .get_string(row, columns, RateField::Description)
                .unwrap_or_default(),
            description_translated: self.get_string(
                row,
                columns,
                RateField::DescriptionTranslated,
            ),
            start_date: self
                .get_string(row, columns, RateField::StartDate)
                .and_then(|v| self.cleaner.parse_date(&v)),
            end_date: self
                .get_string(row, columns, RateField::EndDate)
                .and_then(|v| self.cleaner.parse_date(&v)),
            row_number,
        })
    }

    fn map_measure(
        &self,
        row: &HashMap<String, String>,
        columns: &ColumnMap,
        row_number: usize,
    ) -> Option<TariffMeasure> {
        let raw_code = self.get_string(row, columns, RateField::Code)?;
        let code = self.parse_code(&raw_code)?;

        let measure_code = self
            .get_string(row, columns, RateField::MeasureCode)
            .map(|c| digits_only(&c))
            .filter(|c| !c.is_empty());
        let measure_description = self.get_string(row, columns, RateField::MeasureType);

        // 措施类型列有时直接是 3 位代码
        let measure_code = measure_code.or_else(|| {
            measure_description
                .as_deref()
                .filter(|d| d.len() == 3 && d.chars().all(|c| c.is_ascii_digit()))
                .map(str::to_string)
        });

        let measure_kind = self
            .cleaner
            .classify_measure(measure_code.as_deref(), measure_description.as_deref());

        Some(TariffMeasure {
            code,
            measure_kind,
            measure_code,
            measure_description,
            duty_rate: self
                .get_string(row, columns, RateField::DutyRate)
                .and_then(|v| self.cleaner.parse_rate(&v)),
            origin_country_code: self
                .get_string(row, columns, RateField::Origin)
                .map(|o| o.to_uppercase()),
            origin_description: self.get_string(row, columns, RateField::OriginDescription),
            legal_base: self.get_string(row, columns, RateField::LegalBase),
            quota_order_number: self.get_string(row, columns, RateField::QuotaOrderNumber),
            start_date: self
                .get_string(row, columns, RateField::StartDate)
                .and_then(|v| self.cleaner.parse_date(&v)),
            end_date: self
                .get_string(row, columns, RateField::EndDate)
                .and_then(|v| self.cleaner.parse_date(&v)),
            goods_description: self.get_string(row, columns, RateField::Description),
            row_number,
        })
    }
}
