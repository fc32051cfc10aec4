// ==========================================
// 经销商库存同步系统 - 数据清洗器实现
// ==========================================
// 职责: TRIM / NULL 标准化 / 经销商名称清洗 / 数值与日期转换
// 约定: 转换失败一律返回 None，由调用方决定是否记录
// ==========================================

use crate::importer::file_parser::CellValue;
use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

// Excel 序列日期纪元（兼容 1900 闰年缺陷）
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

// 合理序列日期范围（1900-01-01 ~ 9999-12-31）
const EXCEL_SERIAL_MAX: f64 = 2_958_465.0;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

fn parenthetical_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)").ok()).as_ref()
}

fn whitespace_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").ok()).as_ref()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataCleaner;

impl DataCleaner {
    pub fn normalize_null(&self, value: Option<String>) -> Option<String> {
        value.and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn collapse_whitespace(&self, value: &str) -> String {
        match whitespace_re() {
            Some(re) => re.replace_all(value.trim(), " ").into_owned(),
            None => value.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    /// 删除所有括号分组 `(...)`
    pub fn strip_parentheticals(&self, value: &str) -> String {
        let stripped = match parenthetical_re() {
            Some(re) => re.replace_all(value, " ").into_owned(),
            None => value.to_string(),
        };
        self.collapse_whitespace(&stripped)
    }

    /// 经销商名称清洗
    ///
    /// 1. 删除所有括号分组
    /// 2. 若仍含 `" - "` 分隔符，仅保留其前部分
    ///
    /// 例: `"Acme Pharma (DLR)(Pyay) - Branch 2"` → `"Acme Pharma"`
    pub fn clean_dealer_name(&self, raw: &str) -> Option<String> {
        let stripped = match parenthetical_re() {
            Some(re) => re.replace_all(raw, "").into_owned(),
            None => raw.to_string(),
        };
        let head = match stripped.find(" - ") {
            Some(pos) => &stripped[..pos],
            None => stripped.as_str(),
        };
        let cleaned = self.collapse_whitespace(head);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// 整数解析: 支持千分位与整数值浮点（"1,200" / "12.0"）
    pub fn parse_int(&self, cell: &CellValue) -> Option<i64> {
        match cell {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) => float_to_int(*f),
            CellValue::Text(s) => {
                let digits: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
                if digits.is_empty() {
                    return None;
                }
                digits
                    .parse::<i64>()
                    .ok()
                    .or_else(|| digits.parse::<f64>().ok().and_then(float_to_int))
            }
            CellValue::Empty | CellValue::Bool(_) | CellValue::ExcelDate(_) => None,
        }
    }

    pub fn parse_price(&self, cell: &CellValue) -> Option<f64> {
        match cell {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) if f.is_finite() => Some(*f),
            CellValue::Text(s) => {
                let digits: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
                digits.parse::<f64>().ok().filter(|f| f.is_finite())
            }
            _ => None,
        }
    }

    /// 日期解析
    ///
    /// - 电子表格原生日期 / 数值: Excel 序列日期
    /// - 文本: YYYY-MM-DD / YYYY/MM/DD，允许带时间部分
    pub fn parse_date(&self, cell: &CellValue) -> Option<NaiveDate> {
        match cell {
            CellValue::ExcelDate(serial) | CellValue::Float(serial) => excel_serial_to_date(*serial),
            CellValue::Int(serial) => excel_serial_to_date(*serial as f64),
            CellValue::Text(s) => parse_date_text(s),
            CellValue::Empty | CellValue::Bool(_) => None,
        }
    }
}

fn float_to_int(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > EXCEL_SERIAL_MAX {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    // 日期时间字符串取日期前缀
    let date_part = trimmed
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()
        .unwrap_or(trimmed);

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_clean_dealer_name() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.clean_dealer_name("Acme Pharma (DLR)(Pyay) - Branch 2").as_deref(),
            Some("Acme Pharma")
        );
        assert_eq!(
            cleaner.clean_dealer_name("  Beta   Medical ").as_deref(),
            Some("Beta Medical")
        );
        assert_eq!(
            cleaner.clean_dealer_name("Gamma-Delta Traders").as_deref(),
            Some("Gamma-Delta Traders")
        );
        assert_eq!(cleaner.clean_dealer_name("(only brackets)"), None);
    }

    #[test]
    fn test_strip_parentheticals() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.strip_parentheticals("Paracetamol (500mg) Tablet"),
            "Paracetamol Tablet"
        );
    }

    #[test]
    fn test_parse_int_variants() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_int(&text("1,200")), Some(1200));
        assert_eq!(cleaner.parse_int(&text("12.0")), Some(12));
        assert_eq!(cleaner.parse_int(&text("12.5")), None);
        assert_eq!(cleaner.parse_int(&text("abc")), None);
        assert_eq!(cleaner.parse_int(&CellValue::Float(40.0)), Some(40));
        assert_eq!(cleaner.parse_int(&CellValue::Int(-3)), Some(-3));
        assert_eq!(cleaner.parse_int(&CellValue::Empty), None);
    }

    #[test]
    fn test_parse_price() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_price(&text("1,250.50")), Some(1250.5));
        assert_eq!(cleaner.parse_price(&CellValue::Int(9)), Some(9.0));
        assert_eq!(cleaner.parse_price(&text("n/a")), None);
    }

    #[test]
    fn test_parse_date_variants() {
        let cleaner = DataCleaner;
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(cleaner.parse_date(&text("2024-03-15")), expected);
        assert_eq!(cleaner.parse_date(&text("2024/03/15")), expected);
        assert_eq!(cleaner.parse_date(&text("2024-03-15 08:30:00")), expected);
        assert_eq!(cleaner.parse_date(&text("2024-03-15T08:30:00Z")), expected);
        // 45366 = 2024-03-15
        assert_eq!(cleaner.parse_date(&CellValue::ExcelDate(45366.0)), expected);
        assert_eq!(cleaner.parse_date(&CellValue::ExcelDate(45366.75)), expected);
        assert_eq!(cleaner.parse_date(&text("15-03-2024")), None);
        assert_eq!(cleaner.parse_date(&CellValue::Empty), None);
    }

    #[test]
    fn test_normalize_null() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.normalize_null(Some("  ".to_string())), None);
        assert_eq!(
            cleaner.normalize_null(Some(" x ".to_string())).as_deref(),
            Some("x")
        );
    }
}
