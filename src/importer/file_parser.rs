// ==========================================
// 经销商库存同步系统 - 文件解析器实现
// ==========================================
// 职责: 原始字节 → 表格（RawTable），不做字段语义
// 支持: 分隔文本 (.csv/.tsv/.txt) / 电子表格 (.xlsx/.xlsm/.xlsb/.xls/.ods)
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto_from_rs, Data, Ods, Range, Reader, Xls, Xlsb, Xlsx};
use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::io::{Cursor, Read, Seek};
use tracing::{debug, warn};

// 分隔符嗅探候选（按优先级）
const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

// 嗅探时查看的行数
const SNIFF_LINES: usize = 10;

// ==========================================
// CellValue - 单元格值
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    ExcelDate(f64), // Excel 序列日期（1899-12-30 纪元）
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 文本形式（已 trim，空串返回 None）
    ///
    /// 整数值的浮点数不带小数部分输出，避免产品编码变成 "1001.0"
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            CellValue::Empty => return None,
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => format_float(*f),
            CellValue::Bool(b) => b.to_string(),
            CellValue::ExcelDate(f) => format_float(*f),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(f) => CellValue::Float(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::ExcelDate(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        }
    }
}

// ==========================================
// RawRow / RawTable
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub row_number: usize, // 表内行号（1 起）
    pub cells: Vec<CellValue>,
}

impl RawRow {
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }

    pub fn cell(&self, idx: usize) -> &CellValue {
        self.cells.get(idx).unwrap_or(&CellValue::Empty)
    }
}

/// 一个工作表（或一份分隔文本）的非空行
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub sheet_name: Option<String>, // 分隔文本为 None
    pub rows: Vec<RawRow>,
}

// ==========================================
// 文件格式识别
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetKind {
    Xlsx,
    Xlsb,
    Xls,
    Ods,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited { force_tab: bool },
    Spreadsheet(SpreadsheetKind),
}

impl FileFormat {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = file_extension(filename)?;
        match ext.as_str() {
            "csv" | "txt" => Some(FileFormat::Delimited { force_tab: false }),
            "tsv" => Some(FileFormat::Delimited { force_tab: true }),
            "xlsx" | "xlsm" => Some(FileFormat::Spreadsheet(SpreadsheetKind::Xlsx)),
            "xlsb" => Some(FileFormat::Spreadsheet(SpreadsheetKind::Xlsb)),
            "xls" => Some(FileFormat::Spreadsheet(SpreadsheetKind::Xls)),
            "ods" => Some(FileFormat::Spreadsheet(SpreadsheetKind::Ods)),
            _ => None,
        }
    }
}

/// 小写扩展名（不含点）
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

pub fn is_supported_file(filename: &str) -> bool {
    FileFormat::from_filename(filename).is_some()
}

// ==========================================
// FileParser Trait
// ==========================================
pub trait FileParser: Send + Sync {
    fn parse_tables(&self, bytes: &[u8]) -> ImportResult<Vec<RawTable>>;
}

// ==========================================
// 分隔文本解析器
// ==========================================
pub struct DelimitedParser {
    force_tab: bool,
}

impl DelimitedParser {
    pub fn new(force_tab: bool) -> Self {
        Self { force_tab }
    }

    /// 按编码优先级依次尝试: BOM 声明 → UTF-8 → Windows-1252
    ///
    /// 解码无替换字符且 CSV 读取全部成功才算成功
    fn decode_candidates(bytes: &[u8]) -> Vec<(&'static Encoding, usize)> {
        let mut candidates = Vec::with_capacity(3);
        if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
            candidates.push((encoding, bom_len));
        }
        for encoding in [UTF_8, WINDOWS_1252] {
            if !candidates.iter().any(|(e, _)| *e == encoding) {
                candidates.push((encoding, 0));
            }
        }
        candidates
    }

    fn sniff_delimiter(text: &str) -> u8 {
        let lines: Vec<&str> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(SNIFF_LINES)
            .collect();

        let mut best = (b',', 0usize);
        for delimiter in DELIMITER_CANDIDATES {
            // 每行都出现才计分，取最少出现次数作为稳定度
            let min_count = lines
                .iter()
                .map(|l| count_outside_quotes(l, delimiter))
                .min()
                .unwrap_or(0);
            if min_count > best.1 {
                best = (delimiter, min_count);
            }
        }
        best.0
    }

    fn read_records(text: &str, delimiter: u8) -> ImportResult<Vec<RawRow>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row_number = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(rows.len() + 1);
            let row = RawRow {
                row_number,
                cells: record
                    .iter()
                    .map(|v| CellValue::Text(v.trim().to_string()))
                    .collect(),
            };
            // 跳过完全空白的行
            if !row.is_empty() {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

fn count_outside_quotes(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

impl FileParser for DelimitedParser {
    fn parse_tables(&self, bytes: &[u8]) -> ImportResult<Vec<RawTable>> {
        let mut last_error = None;

        for (encoding, bom_len) in Self::decode_candidates(bytes) {
            let decoded =
                match encoding.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
                {
                    Some(text) => text,
                    None => {
                        debug!(encoding = encoding.name(), "文本解码失败，尝试下一种编码");
                        continue;
                    }
                };

            let delimiter = if self.force_tab {
                b'\t'
            } else {
                Self::sniff_delimiter(&decoded)
            };

            match Self::read_records(&decoded, delimiter) {
                Ok(rows) => {
                    debug!(
                        encoding = encoding.name(),
                        delimiter = %(delimiter as char).escape_default(),
                        rows = rows.len(),
                        "分隔文本解析完成"
                    );
                    return Ok(vec![RawTable {
                        sheet_name: None,
                        rows,
                    }]);
                }
                Err(e) => {
                    debug!(encoding = encoding.name(), error = %e, "CSV 读取失败，尝试下一种编码");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ImportError::EncodingError("无可用的文本编码".to_string())))
    }
}

// ==========================================
// 电子表格解析器
// ==========================================
// 主引擎按扩展名选择；主引擎失败时用内容嗅探引擎重试
pub struct SpreadsheetParser {
    kind: SpreadsheetKind,
}

impl SpreadsheetParser {
    pub fn new(kind: SpreadsheetKind) -> Self {
        Self { kind }
    }

    fn parse_primary(&self, bytes: &[u8]) -> ImportResult<Vec<RawTable>> {
        let cursor = Cursor::new(bytes);
        let engine_error = |e: &dyn std::fmt::Display| ImportError::ExcelParseError(e.to_string());
        match self.kind {
            SpreadsheetKind::Xlsx => {
                let workbook: Xlsx<_> = Xlsx::new(cursor).map_err(|e| engine_error(&e))?;
                read_all_sheets(workbook)
            }
            SpreadsheetKind::Xlsb => {
                let workbook: Xlsb<_> = Xlsb::new(cursor).map_err(|e| engine_error(&e))?;
                read_all_sheets(workbook)
            }
            SpreadsheetKind::Xls => {
                let workbook: Xls<_> = Xls::new(cursor).map_err(|e| engine_error(&e))?;
                read_all_sheets(workbook)
            }
            SpreadsheetKind::Ods => {
                let workbook: Ods<_> = Ods::new(cursor).map_err(|e| engine_error(&e))?;
                read_all_sheets(workbook)
            }
        }
    }

    fn parse_fallback(&self, bytes: &[u8]) -> ImportResult<Vec<RawTable>> {
        let workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
        read_all_sheets(workbook)
    }
}

impl FileParser for SpreadsheetParser {
    fn parse_tables(&self, bytes: &[u8]) -> ImportResult<Vec<RawTable>> {
        match self.parse_primary(bytes) {
            Ok(tables) => Ok(tables),
            Err(primary_err) => {
                warn!(kind = ?self.kind, error = %primary_err, "主解析引擎失败，使用备用引擎重试");
                self.parse_fallback(bytes)
            }
        }
    }
}

/// 读取所有工作表；单个工作表失败则跳过，全部失败视为整个文件失败
fn read_all_sheets<RS, R>(mut workbook: R) -> ImportResult<Vec<RawTable>>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let sheet_names = workbook.sheet_names();
    if sheet_names.is_empty() {
        return Err(ImportError::ExcelParseError("工作簿无工作表".to_string()));
    }

    let mut tables = Vec::with_capacity(sheet_names.len());
    let mut failures = Vec::new();
    for name in sheet_names {
        match workbook.worksheet_range(&name) {
            Ok(range) => tables.push(range_to_table(&name, &range)),
            Err(e) => {
                warn!(sheet = %name, error = ?e, "工作表读取失败，跳过");
                failures.push(format!("{}: {:?}", name, e));
            }
        }
    }

    if tables.is_empty() {
        return Err(ImportError::ExcelParseError(failures.join("; ")));
    }
    Ok(tables)
}

fn range_to_table(sheet_name: &str, range: &Range<Data>) -> RawTable {
    // Range 可能不从 A1 开始，行号按工作表绝对位置计算
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

    let rows = range
        .rows()
        .enumerate()
        .map(|(idx, cells)| RawRow {
            row_number: first_row + idx + 1,
            cells: cells.iter().map(CellValue::from).collect(),
        })
        .filter(|row| !row.is_empty())
        .collect();

    RawTable {
        sheet_name: Some(sheet_name.to_string()),
        rows,
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    pub fn parse(&self, bytes: &[u8], filename: &str) -> ImportResult<Vec<RawTable>> {
        let format = FileFormat::from_filename(filename).ok_or_else(|| {
            ImportError::UnsupportedFormat(file_extension(filename).unwrap_or_default())
        })?;

        match format {
            FileFormat::Delimited { force_tab } => DelimitedParser::new(force_tab).parse_tables(bytes),
            FileFormat::Spreadsheet(kind) => SpreadsheetParser::new(kind).parse_tables(bytes),
        }
    }
}
