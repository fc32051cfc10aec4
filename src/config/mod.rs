// ==========================================
// 经销商库存同步系统 - 配置层
// ==========================================
// 职责: 系统配置管理,支持环境变量覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod sync_config;

// 重导出核心配置管理器
pub use config_manager::{apply_env_overrides, config_keys, env_keys, ConfigManager};
pub use sync_config::{
    ImportSettings, RemoteSettings, SchedulerSettings, SyncConfig, SyncConfigReader,
};
