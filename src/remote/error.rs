// ==========================================
// 经销商库存同步系统 - 远程访问错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 远程调用固定超时、不重试，由调用方决定下次何时再试
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("远程接口返回 {status} ({url}): {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("远程资源不存在: {0}")]
    NotFound(String),

    #[error("远程响应无法解析: {0}")]
    InvalidResponse(String),

    #[error("远程连接配置错误: {0}")]
    Config(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Result 类型别名
pub type RemoteResult<T> = Result<T, RemoteError>;
