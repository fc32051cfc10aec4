// ==========================================
// 经销商库存同步系统 - 字段映射器实现
// ==========================================
// 职责: 表头识别 + 源列 → 标准字段映射 + 类型转换
// 规则: 别名表为有序映射，每张表只解析一次
// ==========================================

use crate::domain::stock::StockMovementRow;
use crate::domain::types::StockStatus;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::file_parser::{CellValue, RawRow};
use std::collections::HashMap;
use tracing::{debug, warn};

// 表头探测范围（前 N 个非空行）
pub const HEADER_SCAN_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    DealerName,
    DealerUniqueId,
    ProductCode,
    ProductName,
    LotNumber,
    DispatchDate,
    ExpiryDate,
    Quantity,
    SalesPrice,
    InvoiceId,
    Status,
    BlockedQuantity,
    OutForDeliveryQuantity,
    SoldQuantity,
    ReceivedQuantity,
    AvailableForSale,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::DealerName => "dealer_name",
            CanonicalField::DealerUniqueId => "dealer_unique_id",
            CanonicalField::ProductCode => "product_code",
            CanonicalField::ProductName => "product_name",
            CanonicalField::LotNumber => "lot_number",
            CanonicalField::DispatchDate => "dispatch_date",
            CanonicalField::ExpiryDate => "expiry_date",
            CanonicalField::Quantity => "quantity",
            CanonicalField::SalesPrice => "sales_price",
            CanonicalField::InvoiceId => "invoice_id",
            CanonicalField::Status => "status",
            CanonicalField::BlockedQuantity => "blocked_quantity",
            CanonicalField::OutForDeliveryQuantity => "out_for_delivery_quantity",
            CanonicalField::SoldQuantity => "sold_quantity",
            CanonicalField::ReceivedQuantity => "received_quantity",
            CanonicalField::AvailableForSale => "available_for_sale",
        }
    }
}

/// 标准字段 → 表头别名（均为规范化后的小写形式）
pub const FIELD_ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::DealerName,
        &[
            "dealer",
            "dealer name",
            "distributor",
            "distributor name",
            "customer",
            "customer name",
            "party name",
            "经销商",
            "经销商名称",
        ],
    ),
    (
        CanonicalField::DealerUniqueId,
        &[
            "dealer id",
            "dealer unique id",
            "dealer code",
            "distributor id",
            "distributor code",
            "customer id",
            "customer code",
            "unique id",
            "经销商编码",
        ],
    ),
    (
        CanonicalField::ProductCode,
        &[
            "product code",
            "item code",
            "sku",
            "material code",
            "product id",
            "item id",
            "产品编码",
        ],
    ),
    (
        CanonicalField::ProductName,
        &[
            "product",
            "product name",
            "item",
            "item name",
            "item description",
            "description",
            "material",
            "产品名称",
        ],
    ),
    (
        CanonicalField::LotNumber,
        &[
            "lot",
            "lot number",
            "lot no",
            "lot no.",
            "batch",
            "batch no",
            "batch no.",
            "batch number",
            "批号",
        ],
    ),
    (
        CanonicalField::DispatchDate,
        &[
            "dispatch date",
            "dispatched on",
            "date",
            "invoice date",
            "ship date",
            "shipment date",
            "delivery date",
            "发货日期",
        ],
    ),
    (
        CanonicalField::ExpiryDate,
        &[
            "expiry",
            "expiry date",
            "exp date",
            "exp",
            "expiration date",
            "best before",
            "有效期",
        ],
    ),
    (
        CanonicalField::Quantity,
        &[
            "quantity",
            "qty",
            "dispatch qty",
            "dispatched qty",
            "dispatch quantity",
            "units",
            "数量",
        ],
    ),
    (
        CanonicalField::SalesPrice,
        &[
            "price",
            "sales price",
            "unit price",
            "selling price",
            "rate",
            "单价",
        ],
    ),
    (
        CanonicalField::InvoiceId,
        &[
            "invoice",
            "invoice id",
            "invoice no",
            "invoice no.",
            "invoice number",
            "bill no",
            "发票号",
        ],
    ),
    (CanonicalField::Status, &["status", "stock status", "状态"]),
    (
        CanonicalField::BlockedQuantity,
        &["blocked", "blocked qty", "blocked quantity"],
    ),
    (
        CanonicalField::OutForDeliveryQuantity,
        &["out for delivery", "out for delivery qty", "ofd qty"],
    ),
    (
        CanonicalField::SoldQuantity,
        &["sold", "sold qty", "sold quantity"],
    ),
    (
        CanonicalField::ReceivedQuantity,
        &["received", "received qty", "received quantity", "grn qty"],
    ),
    (
        CanonicalField::AvailableForSale,
        &[
            "available",
            "available for sale",
            "available qty",
            "sellable qty",
        ],
    ),
];

/// 未识别任何表头时的列位置假设
pub const POSITIONAL_FIELDS: [CanonicalField; 7] = [
    CanonicalField::DealerName,
    CanonicalField::ProductCode,
    CanonicalField::ProductName,
    CanonicalField::LotNumber,
    CanonicalField::Quantity,
    CanonicalField::DispatchDate,
    CanonicalField::ExpiryDate,
];

/// 表头规范化: trim、小写、`_` 视作空格、合并空白、去掉末尾 `:`/`*`
pub fn normalize_header(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase().replace('_', " ");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches([':', '*'])
        .trim_end()
        .to_string()
}

pub fn canonical_field(header: &str) -> Option<CanonicalField> {
    let normalized = normalize_header(header);
    if normalized.is_empty() {
        return None;
    }
    FIELD_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&normalized.as_str()))
        .map(|(field, _)| *field)
}

// ==========================================
// ColumnMapping - 一张表的列映射
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    columns: HashMap<CanonicalField, usize>,
    positional: bool,
}

impl ColumnMapping {
    /// 依据表头行建立映射；同一字段出现多列时取第一列
    pub fn from_header(header: &RawRow) -> Self {
        let mut columns = HashMap::new();
        for (idx, cell) in header.cells.iter().enumerate() {
            if let Some(field) = cell.as_text().as_deref().and_then(canonical_field) {
                columns.entry(field).or_insert(idx);
            }
        }
        Self {
            columns,
            positional: false,
        }
    }

    pub fn positional() -> Self {
        let columns = POSITIONAL_FIELDS
            .iter()
            .enumerate()
            .map(|(idx, field)| (*field, idx))
            .collect();
        Self {
            columns,
            positional: true,
        }
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    pub fn recognised_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_of(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn cell<'a>(&self, row: &'a RawRow, field: CanonicalField) -> &'a CellValue {
        match self.column_of(field) {
            Some(idx) => row.cell(idx),
            None => &CellValue::Empty,
        }
    }
}

/// 表头探测结果
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderDetection {
    pub header_index: usize, // rows 中的下标，之前的行全部丢弃
    pub mapping: ColumnMapping,
}

pub struct FieldMapper {
    cleaner: DataCleaner,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapper {
    pub fn new() -> Self {
        Self {
            cleaner: DataCleaner,
        }
    }

    /// 在前 HEADER_SCAN_ROWS 个非空行中选出识别别名最多的行作为表头
    ///
    /// 一个别名都识别不到时，首个非空行视作表头并启用位置映射
    pub fn detect_header(&self, rows: &[RawRow]) -> Option<HeaderDetection> {
        if rows.is_empty() {
            return None;
        }

        // 并列时取靠前的行
        let mut best: Option<(usize, ColumnMapping)> = None;
        for (idx, row) in rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
            let mapping = ColumnMapping::from_header(row);
            let better = best
                .as_ref()
                .map_or(true, |(_, current)| mapping.recognised_count() > current.recognised_count());
            if better {
                best = Some((idx, mapping));
            }
        }

        match best {
            Some((header_index, mapping)) if mapping.recognised_count() > 0 => {
                debug!(header_row = rows[header_index].row_number, columns = mapping.recognised_count(), "识别到表头");
                Some(HeaderDetection {
                    header_index,
                    mapping,
                })
            }
            _ => {
                debug!(header_row = rows[0].row_number, "未识别到标准表头，使用位置映射");
                Some(HeaderDetection {
                    header_index: 0,
                    mapping: ColumnMapping::positional(),
                })
            }
        }
    }

    fn text(&self, row: &RawRow, mapping: &ColumnMapping, field: CanonicalField) -> Option<String> {
        mapping.cell(row, field).as_text()
    }

    fn int(
        &self,
        row: &RawRow,
        mapping: &ColumnMapping,
        field: CanonicalField,
        location: &str,
    ) -> Option<i64> {
        let cell = mapping.cell(row, field);
        if cell.is_empty() {
            return None;
        }
        let parsed = self.cleaner.parse_int(cell);
        if parsed.is_none() {
            warn!(location = %location, field = field.as_str(), value = ?cell, "整数字段无法解析，已置空");
        }
        parsed
    }

    /// 映射一行；不做必填校验（由抽取器过滤）
    pub fn map_row(
        &self,
        source_file: &str,
        sheet_name: Option<&str>,
        row: &RawRow,
        mapping: &ColumnMapping,
    ) -> StockMovementRow {
        let mut out = StockMovementRow {
            source_file: source_file.to_string(),
            sheet_name: sheet_name.map(str::to_string),
            row_number: row.row_number,
            ..Default::default()
        };
        let location = out.location();

        let dealer_raw = self.text(row, mapping, CanonicalField::DealerName);
        out.dealer_name = dealer_raw
            .as_deref()
            .and_then(|raw| self.cleaner.clean_dealer_name(raw));
        out.dealer_name_raw = dealer_raw;
        out.dealer_unique_id = self.text(row, mapping, CanonicalField::DealerUniqueId);

        out.product_code = self.text(row, mapping, CanonicalField::ProductCode);
        out.product_name = self.text(row, mapping, CanonicalField::ProductName);
        out.lot_number = self.text(row, mapping, CanonicalField::LotNumber);
        out.invoice_id = self.text(row, mapping, CanonicalField::InvoiceId);

        out.dispatch_date = self
            .cleaner
            .parse_date(mapping.cell(row, CanonicalField::DispatchDate));
        out.expiry_date = self
            .cleaner
            .parse_date(mapping.cell(row, CanonicalField::ExpiryDate));

        out.quantity = self.int(row, mapping, CanonicalField::Quantity, &location);
        out.sales_price = self
            .cleaner
            .parse_price(mapping.cell(row, CanonicalField::SalesPrice));

        out.status = self
            .text(row, mapping, CanonicalField::Status)
            .map(|s| StockStatus::parse(&s))
            .unwrap_or_default();
        out.blocked_quantity = self
            .int(row, mapping, CanonicalField::BlockedQuantity, &location)
            .unwrap_or(0);
        out.out_for_delivery_quantity = self
            .int(row, mapping, CanonicalField::OutForDeliveryQuantity, &location)
            .unwrap_or(0);
        out.sold_quantity = self
            .int(row, mapping, CanonicalField::SoldQuantity, &location)
            .unwrap_or(0);
        out.received_quantity = self.int(row, mapping, CanonicalField::ReceivedQuantity, &location);
        out.provided_available_for_sale =
            self.int(row, mapping, CanonicalField::AvailableForSale, &location);

        out
    }
}
