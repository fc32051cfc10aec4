// ==========================================
// 经销商库存同步系统 - 导入层
// ==========================================
// 职责: 外部库存文件 → 标准行记录 → 台账记录
// 支持: 分隔文本 (csv/tsv/txt), 电子表格 (xlsx/xlsm/xlsb/xls/ods)
// ==========================================

pub mod conflict_handler;
pub mod data_cleaner;
pub mod error;
pub mod extractor;
pub mod field_mapper;
pub mod file_parser;
pub mod stock_importer;

// 重导出核心类型
pub use conflict_handler::{BatchConflict, ConflictHandler};
pub use data_cleaner::DataCleaner;
pub use error::{ImportError, ImportResult};
pub use extractor::TabularExtractor;
pub use field_mapper::{CanonicalField, ColumnMapping, FieldMapper, FIELD_ALIASES};
pub use file_parser::{is_supported_file, CellValue, FileFormat, RawRow, RawTable, UniversalFileParser};
pub use stock_importer::{
    ImportOptions, ImportSummary, RowError, RowRange, StockImporter, DEFAULT_MAX_SKIP_REASONS,
};
