// ==========================================
// 经销商库存同步系统 - 主数据目录模型
// ==========================================
// 红线: 主数据归外部目录系统所有，本系统只读
// ==========================================

use serde::{Deserialize, Serialize};

/// 经销商主数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dealer {
    pub id: i64,
    pub unique_id: Option<String>,
    pub name: String,
    pub alt_name: Option<String>,
}

/// 产品主数据（目录只按名称索引，没有编码字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
}

/// 单个批次使用的目录快照
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub dealers: Vec<Dealer>,
    pub products: Vec<Product>,
}

impl CatalogSnapshot {
    pub fn new(mut dealers: Vec<Dealer>, mut products: Vec<Product>) -> Self {
        // 按 id 排序，保证各级匹配的并列结果确定（取最小 id）
        dealers.sort_by_key(|d| d.id);
        products.sort_by_key(|p| p.id);
        Self { dealers, products }
    }

    pub fn is_empty(&self) -> bool {
        self.dealers.is_empty() && self.products.is_empty()
    }
}
