// ==========================================
// 经销商库存同步系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod catalog;
pub mod processed_file;
pub mod stock;
pub mod types;

// 重导出核心类型
pub use catalog::{CatalogSnapshot, Dealer, Product};
pub use processed_file::ProcessedFile;
pub use stock::{DealerStockRecord, NaturalKey, SellableStock, StockMovementRow};
pub use types::{ProcessedFileStatus, StockStatus};
