// ==========================================
// 经销商库存同步系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod catalog_repo;
pub mod error;
pub mod processed_file_repo;
pub mod stock_record_repo;

// 重导出核心仓储
pub use catalog_repo::{CatalogRepository, CatalogRepositoryImpl};
pub use error::{RepositoryError, RepositoryResult};
pub use processed_file_repo::{ProcessedFileRepository, ProcessedFileRepositoryImpl};
pub use stock_record_repo::{StockBatch, StockRecordRepository, StockRecordRepositoryImpl};
