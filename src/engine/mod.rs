// ==========================================
// 经销商库存同步系统 - 引擎层
// ==========================================
// 职责: 实体解析与数量状态规则，不拼 SQL
// 红线: Engine 不直接访问数据库，目录数据以快照形式传入
// ==========================================

pub mod entity_resolver;
pub mod stock_state_derivation;

// 重导出核心引擎
pub use entity_resolver::EntityResolver;
pub use stock_state_derivation::StockStateDerivationService;
