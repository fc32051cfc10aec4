// ==========================================
// 经销商库存同步系统 - 库存领域模型
// ==========================================
// 职责: 库存流水行 / 库存台账记录 / 自然键 / 可售汇总
// ==========================================

use crate::domain::types::StockStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// StockMovementRow - 库存流水行（瞬态）
// ==========================================
// 用途: 提取器输出，导入引擎输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockMovementRow {
    // ===== 来源定位 =====
    pub source_file: String,
    pub sheet_name: Option<String>,
    pub row_number: usize, // 表内行号（1 起，含表头行）

    // ===== 经销商 =====
    pub dealer_name: Option<String>,     // 清洗后的经销商名称
    pub dealer_name_raw: Option<String>, // 原始经销商名称
    pub dealer_unique_id: Option<String>,

    // ===== 产品与批次 =====
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub lot_number: Option<String>,

    // ===== 日期 =====
    pub dispatch_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,

    // ===== 数量与金额 =====
    pub quantity: Option<i64>,
    pub sales_price: Option<f64>,
    pub invoice_id: Option<String>,

    // ===== 数量状态机字段 =====
    pub status: StockStatus,
    pub blocked_quantity: i64,
    pub out_for_delivery_quantity: i64,
    pub sold_quantity: i64,
    pub received_quantity: Option<i64>,
    pub provided_available_for_sale: Option<i64>, // 上游给出的可售数（可能被覆盖）
    pub available_for_sale: i64,                  // 派生可售数
}

impl StockMovementRow {
    /// 经销商引用（名称或唯一编号）是否存在
    pub fn has_dealer_reference(&self) -> bool {
        self.dealer_name.is_some() || self.dealer_unique_id.is_some()
    }

    /// 满足最低必填要求：经销商引用 + 产品编码
    pub fn has_required_fields(&self) -> bool {
        self.has_dealer_reference() && self.product_code.is_some()
    }

    /// 用于日志/原因文本的行定位描述
    pub fn location(&self) -> String {
        match &self.sheet_name {
            Some(sheet) => format!("{}[{}]#{}", self.source_file, sheet, self.row_number),
            None => format!("{}#{}", self.source_file, self.row_number),
        }
    }
}

// ==========================================
// NaturalKey - 自然键
// ==========================================
// (dealer_unique_id, product_code, dispatch_date, invoice_id-or-null)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub dealer_unique_id: String,
    pub product_code: String,
    pub dispatch_date: Option<NaiveDate>,
    pub invoice_id: Option<String>,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.dealer_unique_id,
            self.product_code,
            self.dispatch_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.invoice_id.as_deref().unwrap_or("null"),
        )
    }
}

// ==========================================
// DealerStockRecord - 经销商库存台账记录
// ==========================================
// 红线: 本系统只创建，不更新（后续变更由订单履约方负责）
// 对齐: dealer_stock_record 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealerStockRecord {
    pub id: Option<i64>, // 落库后回填

    // ===== 自然键 =====
    pub dealer_unique_id: String,
    pub product_code: String,
    pub dispatch_date: Option<NaiveDate>,
    pub invoice_id: Option<String>,

    // ===== 解析后的引用 =====
    pub dealer_id: i64,
    pub product_id: Option<i64>, // 产品未匹配时为空

    // ===== 行内容 =====
    pub dealer_name: Option<String>,
    pub product_name: Option<String>,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: Option<i64>,
    pub sales_price: Option<f64>,
    pub status: StockStatus,
    pub blocked_quantity: i64,
    pub out_for_delivery_quantity: i64,
    pub sold_quantity: i64,
    pub received_quantity: Option<i64>,
    pub available_for_sale: i64,

    // ===== 来源与审计 =====
    pub source_file: String,
    pub sheet_name: Option<String>,
    pub row_number: usize,
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DealerStockRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            dealer_unique_id: self.dealer_unique_id.clone(),
            product_code: self.product_code.clone(),
            dispatch_date: self.dispatch_date,
            invoice_id: self.invoice_id.clone(),
        }
    }
}

// ==========================================
// SellableStock - 可售库存汇总（读模型）
// ==========================================
// 按 经销商 / 产品编码 / 批号 聚合 available_for_sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellableStock {
    pub dealer_unique_id: String,
    pub product_code: String,
    pub lot_number: Option<String>,
    pub available_for_sale: i64,
    pub record_count: i64,
}
