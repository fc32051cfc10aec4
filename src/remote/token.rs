// ==========================================
// 经销商库存同步系统 - 访问令牌服务
// ==========================================
// 职责: client-credentials 换取 bearer token 并缓存
// 规则: 缓存到期时间 = 签发有效期 - 安全余量；过期后透明刷新
// ==========================================

use crate::config::RemoteSettings;
use crate::remote::error::{RemoteError, RemoteResult};
use crate::remote::models::TokenResponse;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 有效的访问令牌（必要时刷新）
    async fn access_token(&self) -> RemoteResult<String>;

    /// 丢弃缓存（下次调用强制刷新）
    async fn invalidate(&self);
}

struct CachedToken {
    access_token: String,
    refresh_after: Instant,
}

pub struct ClientCredentialsTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    safety_margin: Duration,
    cache: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsTokenProvider {
    pub fn new(http: reqwest::Client, settings: &RemoteSettings) -> RemoteResult<Self> {
        if settings.tenant_id.trim().is_empty() || settings.client_id.trim().is_empty() {
            return Err(RemoteError::Config(
                "tenant_id / client_id 未配置".to_string(),
            ));
        }
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            settings.authority_url.trim_end_matches('/'),
            settings.tenant_id.trim()
        );
        Ok(Self {
            http,
            token_url,
            client_id: settings.client_id.trim().to_string(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            safety_margin: Duration::from_secs(settings.token_safety_margin_secs),
            cache: Mutex::new(None),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    #[instrument(skip(self), fields(token_url = %self.token_url))]
    async fn request_token(&self) -> RemoteResult<TokenResponse> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self.http.post(&self.token_url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Auth(format!(
                "令牌接口返回 {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("令牌响应格式错误: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(RemoteError::InvalidResponse("令牌响应缺少 access_token".to_string()));
        }
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn access_token(&self) -> RemoteResult<String> {
        // 持锁刷新，避免并发调用重复换取令牌
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_after {
                return Ok(cached.access_token.clone());
            }
            debug!("访问令牌即将过期，刷新");
        }

        let token = self.request_token().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(self.safety_margin);
        info!(
            expires_in = token.expires_in,
            token_type = token.token_type.as_deref().unwrap_or("Bearer"),
            "已获取访问令牌"
        );

        let access_token = token.access_token.clone();
        *cache = Some(CachedToken {
            access_token: token.access_token,
            refresh_after: Instant::now() + lifetime,
        });
        Ok(access_token)
    }

    async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

/// 固定令牌（测试或外部已持有令牌时使用）
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> RemoteResult<String> {
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {}
}
