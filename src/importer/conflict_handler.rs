// ==========================================
// 经销商库存同步系统 - 冲突处理器实现
// ==========================================
// 职责: 构建自然键 + 检测同批次内重复
// 自然键: (dealer_unique_id, product_code, dispatch_date, invoice_id 或 null)
// ==========================================

use crate::domain::catalog::Dealer;
use crate::domain::stock::{NaturalKey, StockMovementRow};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchConflict {
    None,
    SameBatch { first_row: usize },
}

#[derive(Debug, Default)]
pub struct ConflictHandler {
    first_occurrence: HashMap<NaturalKey, usize>,
}

impl ConflictHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 构建自然键
    ///
    /// 经销商编码取行内编码，否则取解析到的经销商编码；两者都没有返回 None
    /// 产品编码使用原始值，不依赖目录匹配
    pub fn natural_key(row: &StockMovementRow, dealer: Option<&Dealer>) -> Option<NaturalKey> {
        let dealer_unique_id = row
            .dealer_unique_id
            .clone()
            .or_else(|| dealer.and_then(|d| d.unique_id.clone()))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())?;
        let product_code = row
            .product_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())?
            .to_string();

        Some(NaturalKey {
            dealer_unique_id,
            product_code,
            dispatch_date: row.dispatch_date,
            invoice_id: row
                .invoice_id
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .map(str::to_string),
        })
    }

    /// 登记并检测同批次内重复（首次出现返回 None）
    pub fn check_and_mark(&mut self, key: &NaturalKey, row_number: usize) -> BatchConflict {
        match self.first_occurrence.get(key) {
            Some(first_row) => BatchConflict::SameBatch {
                first_row: *first_row,
            },
            None => {
                self.first_occurrence.insert(key.clone(), row_number);
                BatchConflict::None
            }
        }
    }

    /// 撤销登记（行插入失败时调用，使后续同键行仍可尝试）
    pub fn forget(&mut self, key: &NaturalKey) {
        self.first_occurrence.remove(key);
    }
}
