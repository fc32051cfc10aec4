// ==========================================
// 经销商库存同步系统 - 核心库
// ==========================================
// 职责: 经销商库存流水文件 → 去重台账 → 可售库存
// 技术栈: Rust + SQLite + tokio
// 入口: 推送触发导入 / 定时轮询导入 / 本地文件导入
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 实体解析与库存状态推导
pub mod engine;

// 导入层 - 文件抽取与去重导入
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 远程文档库 - 令牌/站点/文件夹/下载
pub mod remote;

// 同步驱动层 - 推送导入与轮询调度
pub mod sync;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ProcessedFileStatus, StockStatus};

// 领域实体
pub use domain::{
    CatalogSnapshot, Dealer, DealerStockRecord, NaturalKey, ProcessedFile, Product,
    SellableStock, StockMovementRow,
};

// 引擎
pub use engine::{EntityResolver, StockStateDerivationService};

// 导入
pub use importer::{ImportError, ImportOptions, ImportSummary, RowRange, StockImporter, TabularExtractor};

// 驱动
pub use sync::{EventImporter, FileNotification, ImportPipeline, PollingScheduler, SyncError};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "经销商库存同步系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
