//! 系统令牌服务
//!
//! 令牌获取顺序：预置令牌 > 未过期的缓存令牌 > 使用系统凭据重新登录。
//! 缓存固定 12 分钟有效，与服务端返回的实际有效期无关。

use chrono::{DateTime, Duration, Utc};
use order_shared::config::OrderApiConfig;
use order_shared::error::Result;
use order_shared::observability::metrics;
use reqwest::Method;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::client::ApiClient;
use super::models::{ApiEnvelope, AuthData, SignInRequest};

/// 登录接口路径
pub const SIGN_IN_PATH: &str = "/api/v1/auth/signin";

/// 登录成功后令牌的缓存时长（分钟）
pub const TOKEN_CACHE_MINUTES: i64 = 12;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct SystemTokenService {
    config: OrderApiConfig,
    client: ApiClient,
    cache: Mutex<Option<CachedToken>>,
}

impl SystemTokenService {
    /// 登录请求只经过错误日志步骤，不经过认证步骤
    pub fn new(config: OrderApiConfig, client: ApiClient) -> Self {
        Self {
            config,
            client: client.without_authentication(),
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &OrderApiConfig) -> Result<Self> {
        Ok(Self::new(config.clone(), ApiClient::new(config)?))
    }

    /// 获取可用的系统令牌
    ///
    /// 持有缓存锁完成检查、登录和写入，并发调用最多触发一次登录。
    pub async fn get_token(&self) -> Option<String> {
        if let Some(token) = self.config.static_token() {
            debug!("使用预置的系统令牌");
            return Some(token.to_string());
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.is_valid_at(Utc::now())
        {
            debug!("使用缓存的系统令牌");
            return Some(cached.value.clone());
        }

        info!("通过认证获取新的系统令牌");
        self.authenticate_locked(&mut cache).await
    }

    /// 忽略缓存，直接使用系统凭据登录
    pub async fn authenticate(&self) -> Option<String> {
        let mut cache = self.cache.lock().await;
        self.authenticate_locked(&mut cache).await
    }

    /// 令牌被服务端拒绝后重新登录
    ///
    /// 被拒绝的令牌立即失效。并发请求同时收到 401 时，只有第一个拿到锁的请求重新登录；
    /// 其余请求发现缓存中已是另一个未过期的令牌，直接复用，不再登录。
    /// 复用的令牌若同样被拒绝，重试响应原样返回，不会再次刷新。
    pub async fn reauthenticate(&self, rejected: &str) -> Option<String> {
        let mut cache = self.cache.lock().await;
        match cache.as_ref() {
            Some(cached) if cached.value == rejected => *cache = None,
            Some(cached) if cached.is_valid_at(Utc::now()) => {
                debug!("令牌已被其他请求刷新");
                return Some(cached.value.clone());
            }
            _ => {}
        }

        self.authenticate_locked(&mut cache).await
    }

    async fn authenticate_locked(&self, cache: &mut Option<CachedToken>) -> Option<String> {
        let Some((email, password)) = self
            .config
            .system_credentials
            .as_ref()
            .and_then(|credentials| credentials.usable())
        else {
            error!("系统凭据未正确配置");
            metrics::record_token_refresh("missing_credentials");
            return None;
        };

        let request = self
            .client
            .request(Method::POST, SIGN_IN_PATH)
            .json(&SignInRequest { email, password });

        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "系统用户认证时发生意外错误");
                metrics::record_token_refresh("error");
                return None;
            }
        };

        if !response.is_success() {
            warn!(status = response.status.as_u16(), "系统用户认证失败");
            metrics::record_token_refresh("rejected");
            return None;
        }

        let envelope: ApiEnvelope<AuthData> = match response.json() {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "解析认证响应失败");
                metrics::record_token_refresh("invalid_response");
                return None;
            }
        };

        let token = envelope
            .data
            .as_ref()
            .filter(|_| envelope.is_succeeded())
            .and_then(|data| data.usable_token());
        let Some(token) = token else {
            error!(errors = %envelope.joined_errors(", "), "认证请求成功但响应格式无效");
            metrics::record_token_refresh("invalid_response");
            return None;
        };

        let token = token.to_string();
        *cache = Some(CachedToken {
            value: token.clone(),
            expires_at: Utc::now() + Duration::minutes(TOKEN_CACHE_MINUTES),
        });
        info!("成功获取系统令牌");
        metrics::record_token_refresh("success");

        Some(token)
    }

    #[cfg(test)]
    pub(crate) async fn seed_cache(&self, value: &str, expires_at: DateTime<Utc>) {
        *self.cache.lock().await = Some(CachedToken {
            value: value.to_string(),
            expires_at,
        });
    }

    #[cfg(test)]
    pub(crate) async fn cached_expiry(&self) -> Option<DateTime<Utc>> {
        self.cache.lock().await.as_ref().map(|cached| cached.expires_at)
    }
}
