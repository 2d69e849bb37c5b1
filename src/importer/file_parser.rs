// ==========================================
// 关税归类与税费计算引擎 - 文件解析器实现
// ==========================================
// 支持: Excel (.xlsx/.xls，逐个工作表) / CSV (.csv，单表)
// 输出: RawSheet（表名 + 表头 + 行记录）
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use crate::importer::rate_importer_trait::FileParser;
use calamine::{open_workbook_auto, Reader};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

// ==========================================
// RawSheet - 原始工作表
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

impl RawSheet {
    /// 由表头和行数据直接构造（外部生产者已完成读取时使用）
    pub fn from_rows(name: impl Into<String>, headers: &[&str], rows: Vec<Vec<&str>>) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|cells| {
                headers
                    .iter()
                    .zip(cells)
                    .map(|(h, v)| (h.clone(), v.trim().to_string()))
                    .collect::<HashMap<_, _>>()
            })
            .filter(|row| !row.values().all(|v| v.is_empty()))
            .collect();
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<RawSheet>> {
        let path = file_path;

        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        if let Some(ext) = path.extension() {
            if ext != "csv" {
                return Err(ImportError::UnsupportedFormat(
                    ext.to_string_lossy().to_string(),
                ));
            }
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row_map = HashMap::new();

            for (col_idx, value) in record.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    row_map.insert(header.clone(), value.trim().to_string());
                }
            }

            // 跳过完全空白的行
            if row_map.values().all(|v| v.is_empty()) {
                continue;
            }

            rows.push(row_map);
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("csv")
            .to_string();

        Ok(vec![RawSheet {
            name,
            headers,
            rows,
        }])
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl FileParser for ExcelParser {
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<RawSheet>> {
        let path = file_path;

        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext != "xlsx" && ext != "xls" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let mut workbook = open_workbook_auto(path)?;
        let sheet_names = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(ImportError::ExcelParseError("Excel 文件无工作表".to_string()));
        }

        // 归类表可能分布在多个工作表，逐个读取
        let mut sheets = Vec::with_capacity(sheet_names.len());
        for sheet_name in sheet_names {
            let range = workbook.worksheet_range(&sheet_name)?;

            let mut rows_iter = range.rows();
            let headers: Vec<String> = match rows_iter.next() {
                Some(header_row) => header_row
                    .iter()
                    .map(|cell| cell.to_string().trim().to_string())
                    .collect(),
                None => {
                    // 空表保留表名，交由上层决定是否跳过
                    sheets.push(RawSheet {
                        name: sheet_name,
                        ..RawSheet::default()
                    });
                    continue;
                }
            };

            let mut rows = Vec::new();
            for data_row in rows_iter {
                let mut row_map = HashMap::new();
                for (col_idx, cell) in data_row.iter().enumerate() {
                    if let Some(header) = headers.get(col_idx) {
                        row_map.insert(header.clone(), cell.to_string().trim().to_string());
                    }
                }

                if row_map.values().all(|v| v.is_empty()) {
                    continue;
                }
                rows.push(row_map);
            }

            sheets.push(RawSheet {
                name: sheet_name,
                headers,
                rows,
            });
        }

        Ok(sheets)
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl FileParser for UniversalFileParser {
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<RawSheet>> {
        let ext = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" => CsvParser.parse_sheets(file_path),
            "xlsx" | "xls" => ExcelParser.parse_sheets(file_path),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}
