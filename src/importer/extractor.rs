// ==========================================
// 经销商库存同步系统 - 表格抽取器
// ==========================================
// 流程: 解析 → 表头识别 → 映射/清洗 → 必填过滤 → 数量派生
// 红线: 不向外抛错，文件不可读时返回空序列
// ==========================================

use crate::domain::stock::StockMovementRow;
use crate::engine::stock_state_derivation::StockStateDerivationService;
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{RawTable, UniversalFileParser};
use tracing::{debug, info, instrument, warn};

pub struct TabularExtractor {
    parser: UniversalFileParser,
    mapper: FieldMapper,
    derivation: StockStateDerivationService,
}

impl Default for TabularExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TabularExtractor {
    pub fn new() -> Self {
        Self {
            parser: UniversalFileParser,
            mapper: FieldMapper::new(),
            derivation: StockStateDerivationService::new(),
        }
    }

    /// 字节 + 文件名 → 行记录（按表、行顺序）
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn extract(&self, bytes: &[u8], filename: &str) -> Vec<StockMovementRow> {
        let tables = match self.parser.parse(bytes, filename) {
            Ok(tables) => tables,
            Err(e) => {
                warn!(filename = %filename, error = %e, "文件无法解析，跳过");
                return Vec::new();
            }
        };

        let rows: Vec<StockMovementRow> = tables
            .iter()
            .flat_map(|table| self.extract_table(filename, table))
            .collect();

        info!(filename = %filename, sheets = tables.len(), rows = rows.len(), "抽取完成");
        rows
    }

    fn extract_table(&self, filename: &str, table: &RawTable) -> Vec<StockMovementRow> {
        let Some(detection) = self.mapper.detect_header(&table.rows) else {
            debug!(sheet = ?table.sheet_name, "空表，跳过");
            return Vec::new();
        };

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        for raw in table.rows.iter().skip(detection.header_index + 1) {
            let mut row = self.mapper.map_row(
                filename,
                table.sheet_name.as_deref(),
                raw,
                &detection.mapping,
            );
            if !row.has_required_fields() {
                debug!(location = %row.location(), "缺少经销商或产品编码，丢弃");
                dropped += 1;
                continue;
            }
            self.derivation.apply(&mut row);
            rows.push(row);
        }

        debug!(
            sheet = ?table.sheet_name,
            positional = detection.mapping.is_positional(),
            kept = rows.len(),
            dropped,
            "工作表抽取完成"
        );
        rows
    }
}
