// ==========================================
// 经销商库存同步系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 覆写: 密钥类配置可由环境变量覆盖
// ==========================================

use crate::config::sync_config::{
    ImportSettings, RemoteSettings, SchedulerSettings, SyncConfig, SyncConfigReader,
};
use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 解析数值/布尔配置，格式错误时告警并回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(config_key = key, raw_value = %raw, default = %default, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    fn load_remote_settings(&self) -> RepositoryResult<RemoteSettings> {
        let defaults = RemoteSettings::default();
        Ok(RemoteSettings {
            authority_url: self
                .get_config_or_default(config_keys::REMOTE_AUTHORITY_URL, &defaults.authority_url)?,
            api_base_url: self
                .get_config_or_default(config_keys::REMOTE_API_BASE_URL, &defaults.api_base_url)?,
            tenant_id: self.get_config_or_default(config_keys::REMOTE_TENANT_ID, "")?,
            client_id: self.get_config_or_default(config_keys::REMOTE_CLIENT_ID, "")?,
            client_secret: self.get_config_or_default(config_keys::REMOTE_CLIENT_SECRET, "")?,
            scope: self.get_config_or_default(config_keys::REMOTE_SCOPE, &defaults.scope)?,
            site_url: self.get_config_or_default(config_keys::REMOTE_SITE_URL, "")?,
            folder_path: self.get_config_or_default(config_keys::REMOTE_FOLDER_PATH, "")?,
            request_timeout_secs: self.get_parsed_or_default(
                config_keys::REMOTE_REQUEST_TIMEOUT_SECS,
                defaults.request_timeout_secs,
            )?,
            token_safety_margin_secs: self.get_parsed_or_default(
                config_keys::REMOTE_TOKEN_SAFETY_MARGIN_SECS,
                defaults.token_safety_margin_secs,
            )?,
        })
    }
}

/// 环境变量覆写（仅非空值生效）
pub fn apply_env_overrides(config: &mut SyncConfig) {
    apply_env_overrides_from(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_from<F>(config: &mut SyncConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let overrides: [(&str, &mut String); 3] = [
        (env_keys::TENANT_ID, &mut config.remote.tenant_id),
        (env_keys::CLIENT_ID, &mut config.remote.client_id),
        (env_keys::CLIENT_SECRET, &mut config.remote.client_secret),
    ];
    for (name, target) in overrides {
        if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
            *target = value.trim().to_string();
        }
    }
}

impl SyncConfigReader for ConfigManager {
    fn load_sync_config(&self) -> RepositoryResult<SyncConfig> {
        let scheduler_defaults = SchedulerSettings::default();
        let import_defaults = ImportSettings::default();

        let mut config = SyncConfig {
            remote: self.load_remote_settings()?,
            scheduler: SchedulerSettings {
                enabled: self
                    .get_parsed_or_default(config_keys::SCHEDULER_ENABLED, scheduler_defaults.enabled)?,
                poll_interval_secs: self.get_parsed_or_default(
                    config_keys::SCHEDULER_POLL_INTERVAL_SECS,
                    scheduler_defaults.poll_interval_secs,
                )?,
            },
            import: ImportSettings {
                max_skip_reasons: self.get_parsed_or_default(
                    config_keys::IMPORT_MAX_SKIP_REASONS,
                    import_defaults.max_skip_reasons,
                )?,
            },
        };
        apply_env_overrides(&mut config);
        Ok(config)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 远程文档库
    pub const REMOTE_AUTHORITY_URL: &str = "remote_authority_url";
    pub const REMOTE_API_BASE_URL: &str = "remote_api_base_url";
    pub const REMOTE_TENANT_ID: &str = "remote_tenant_id";
    pub const REMOTE_CLIENT_ID: &str = "remote_client_id";
    pub const REMOTE_CLIENT_SECRET: &str = "remote_client_secret";
    pub const REMOTE_SCOPE: &str = "remote_scope";
    pub const REMOTE_SITE_URL: &str = "remote_site_url";
    pub const REMOTE_FOLDER_PATH: &str = "remote_folder_path";
    pub const REMOTE_REQUEST_TIMEOUT_SECS: &str = "remote_request_timeout_secs";
    pub const REMOTE_TOKEN_SAFETY_MARGIN_SECS: &str = "remote_token_safety_margin_secs";

    // 轮询调度
    pub const SCHEDULER_ENABLED: &str = "scheduler_enabled";
    pub const SCHEDULER_POLL_INTERVAL_SECS: &str = "scheduler_poll_interval_secs";

    // 导入
    pub const IMPORT_MAX_SKIP_REASONS: &str = "import_max_skip_reasons";
}

// ==========================================
// 环境变量名
// ==========================================
pub mod env_keys {
    pub const TENANT_ID: &str = "DSS_TENANT_ID";
    pub const CLIENT_ID: &str = "DSS_CLIENT_ID";
    pub const CLIENT_SECRET: &str = "DSS_CLIENT_SECRET";
    pub const DB_PATH: &str = "DSS_DB_PATH";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use std::collections::HashMap;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_config_kv_empty() {
        let manager = setup();
        let mut config = SyncConfig {
            remote: manager.load_remote_settings().unwrap(),
            ..Default::default()
        };
        apply_env_overrides_from(&mut config, |_| None);

        assert_eq!(config.remote.api_base_url, "https://graph.microsoft.com/v1.0");
        assert_eq!(config.remote.request_timeout_secs, 30);
        assert_eq!(config.remote.token_safety_margin_secs, 300);
        assert!(config.remote.tenant_id.is_empty());
    }

    #[test]
    fn test_values_read_from_config_kv() {
        let manager = setup();
        manager
            .set_global_config_value(config_keys::REMOTE_FOLDER_PATH, "Dealer Stock/Inbox")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_POLL_INTERVAL_SECS, "60")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SCHEDULER_ENABLED, "false")
            .unwrap();
        // 格式错误回退默认值
        manager
            .set_global_config_value(config_keys::IMPORT_MAX_SKIP_REASONS, "lots")
            .unwrap();

        let config = manager.load_sync_config().unwrap();
        assert_eq!(config.remote.folder_path, "Dealer Stock/Inbox");
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert!(!config.scheduler.enabled);
        assert_eq!(config.import.max_skip_reasons, 50);
    }

    #[test]
    fn test_set_value_is_upsert() {
        let manager = setup();
        manager.set_global_config_value("k", "1").unwrap();
        manager.set_global_config_value("k", "2").unwrap();
        assert_eq!(manager.get_global_config_value("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config.remote.client_id = "from-db".to_string();
        let env: HashMap<&str, &str> = [
            (env_keys::CLIENT_ID, "from-env"),
            (env_keys::CLIENT_SECRET, "  "),
        ]
        .into_iter()
        .collect();

        apply_env_overrides_from(&mut config, |name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.remote.client_id, "from-env");
        // 空白值不覆盖
        assert!(config.remote.client_secret.is_empty());
    }
}
