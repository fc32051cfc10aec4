// ==========================================
// 经销商库存同步系统 - 同步配置
// ==========================================
// 职责: 远程连接 / 轮询调度 / 导入 三组配置及默认值
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::repository::error::RepositoryResult;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOKEN_SAFETY_MARGIN_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAX_SKIP_REASONS: usize = 50;

// ==========================================
// 远程文档库连接配置
// ==========================================
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub authority_url: String,
    pub api_base_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub site_url: String,    // 如 https://contoso.sharepoint.com/sites/Dealers
    pub folder_path: String, // 相对文档库根目录，如 Dealer Stock/Inbox
    pub request_timeout_secs: u64,
    pub token_safety_margin_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: DEFAULT_SCOPE.to_string(),
            site_url: String::new(),
            folder_path: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_safety_margin_secs: DEFAULT_TOKEN_SAFETY_MARGIN_SECS,
        }
    }
}

impl RemoteSettings {
    /// 缺失的必填项（空串视为缺失）
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("site_url", &self.site_url),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// 轮询用规范化文件夹路径（去首尾斜杠）
    pub fn normalized_folder_path(&self) -> String {
        self.folder_path.trim().trim_matches('/').to_string()
    }
}

// 密钥不进日志
impl fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("authority_url", &self.authority_url)
            .field("api_base_url", &self.api_base_url)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("scope", &self.scope)
            .field("site_url", &self.site_url)
            .field("folder_path", &self.folder_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_safety_margin_secs", &self.token_safety_margin_secs)
            .finish()
    }
}

// ==========================================
// 轮询调度配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

// ==========================================
// 导入配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSettings {
    pub max_skip_reasons: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_skip_reasons: DEFAULT_MAX_SKIP_REASONS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub remote: RemoteSettings,
    pub scheduler: SchedulerSettings,
    pub import: ImportSettings,
}

// ==========================================
// SyncConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait SyncConfigReader: Send + Sync {
    /// 读取完整同步配置（缺失项取默认值）
    fn load_sync_config(&self) -> RepositoryResult<SyncConfig>;
}
