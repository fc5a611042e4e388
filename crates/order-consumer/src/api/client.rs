//! 带认证与错误日志的 HTTP 客户端
//!
//! 每个请求依次经过两步：
//!
//! 1. 认证：附加系统令牌，收到 401 时强制重新认证并重试一次
//! 2. 错误日志：非 2xx 响应按状态码分级记录，并解析错误响应体
//!
//! 登录请求使用不带认证步骤的客户端，避免认证过程递归调用自身。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use order_shared::config::OrderApiConfig;
use order_shared::error::{Result, SharedError};
use order_shared::observability::metrics;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Request, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{Level, debug, error, info, warn};

use super::models::ErrorEnvelope;
use super::token::SystemTokenService;

/// 原始响应体日志的最大字符数
const MAX_LOGGED_BODY_CHARS: usize = 500;

/// 状态码对应的日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    /// 非成功响应的日志级别
    ///
    /// 404 可能是预期内的结果，记为 info；服务端错误记为 error；其余失败记为 warn。
    pub fn for_status(status: StatusCode) -> Self {
        match status.as_u16() {
            404 => Self::Info,
            400 | 401 | 403 | 409 | 422 | 429 => Self::Warn,
            code if code >= 500 => Self::Error,
            _ => Self::Warn,
        }
    }
}

/// 从错误响应体中提取可读的错误信息
///
/// 结构化的 `errors` 列表以 "; " 连接；无法解析时截断原始内容。
pub fn summarize_error_body(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope
            .errors
            .filter(|errors| !errors.is_empty())
            .map(|errors| errors.join("; ")),
        Err(_) => {
            if body.chars().count() > MAX_LOGGED_BODY_CHARS {
                let truncated: String = body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
                Some(format!("{truncated}... (truncated)"))
            } else {
                Some(body.to_string())
            }
        }
    }
}

/// 已读取完毕的 HTTP 响应
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// 订单 API 的 HTTP 客户端
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Option<Arc<SystemTokenService>>,
}

impl ApiClient {
    /// 创建不带认证步骤的客户端
    pub fn new(config: &OrderApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SharedError::Http(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            tokens: None,
        })
    }

    /// 启用认证步骤
    pub fn with_authentication(mut self, tokens: Arc<SystemTokenService>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn without_authentication(mut self) -> Self {
        self.tokens = None;
        self
    }

    /// 基于 base_url 构建请求，path 以 "/" 开头
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    /// 发送请求
    ///
    /// 只有传输层错误（连接失败、超时等）才返回 `Err`，非 2xx 响应作为正常结果返回。
    pub async fn send(&self, builder: RequestBuilder) -> Result<ApiResponse> {
        let request = builder
            .build()
            .map_err(|e| SharedError::Http(format!("构建请求失败: {e}")))?;

        match &self.tokens {
            Some(tokens) => Box::pin(self.send_authenticated(request, tokens)).await,
            None => self.send_logged(request).await,
        }
    }

    async fn send_authenticated(
        &self,
        mut request: Request,
        tokens: &SystemTokenService,
    ) -> Result<ApiResponse> {
        let token = tokens.get_token().await;
        match &token {
            Some(token) => {
                set_bearer(&mut request, token)?;
                debug!(method = %request.method(), url = %request.url(), "已附加认证头");
            }
            None => {
                warn!(method = %request.method(), url = %request.url(), "没有可用的系统令牌，以匿名方式发送请求");
            }
        }

        let retry = request.try_clone();
        let response = self.send_logged(request).await?;

        let Some(rejected) = token else {
            return Ok(response);
        };
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!("收到 401 响应，尝试刷新系统令牌");
        let Some(mut retry) = retry else {
            warn!("请求体不可复制，无法重试");
            return Ok(response);
        };
        let Some(fresh) = tokens.reauthenticate(&rejected).await else {
            return Ok(response);
        };

        set_bearer(&mut retry, &fresh)?;
        debug!(method = %retry.method(), url = %retry.url(), "使用新令牌重试请求");
        self.send_logged(retry).await
    }

    /// 发送请求并记录失败响应
    async fn send_logged(&self, request: Request) -> Result<ApiResponse> {
        let method = request.method().clone();
        let url = request.url().to_string();
        let request_headers = if tracing::enabled!(Level::DEBUG) {
            Some(header_dump(request.headers()))
        } else {
            None
        };

        let response = self.http.execute(request).await.map_err(|e| {
            error!(method = %method, url = %url, error = %e, "API 请求发送失败");
            metrics::record_api_request(method.as_str(), 0);
            SharedError::Http(e.to_string())
        })?;

        let status = response.status();
        let response_headers = request_headers
            .is_some()
            .then(|| header_dump(response.headers()));
        let body = response.text().await.unwrap_or_else(|e| {
            warn!(method = %method, url = %url, error = %e, "读取响应体失败");
            String::new()
        });

        metrics::record_api_request(method.as_str(), status.as_u16());

        if !status.is_success() {
            log_failure(&method, &url, status, summarize_error_body(&body));
        }
        if let (Some(request_headers), Some(response_headers)) = (request_headers, response_headers) {
            debug!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                request_headers = ?request_headers,
                response_headers = ?response_headers,
                "请求与响应头"
            );
        }

        Ok(ApiResponse { status, body })
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| SharedError::Http(format!("令牌包含非法字符: {e}")))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// 头部快照，认证头已脱敏
fn header_dump(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if name == AUTHORIZATION || value.is_sensitive() {
                "[REDACTED]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.to_string(), shown)
        })
        .collect()
}

fn log_failure(method: &Method, url: &str, status: StatusCode, details: Option<String>) {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let details = details.unwrap_or_default();
    let code = status.as_u16();

    match LogSeverity::for_status(status) {
        LogSeverity::Info => info!(method = %method, url, status = code, reason, details = %details, "API 请求失败"),
        LogSeverity::Warn => warn!(method = %method, url, status = code, reason, details = %details, "API 请求失败"),
        LogSeverity::Error => error!(method = %method, url, status = code, reason, details = %details, "API 请求失败"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::io;
    use std::sync::Mutex;

    /// 收集格式化后的日志输出
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn logged_failure(code: u16, details: Option<&str>) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(Level::TRACE)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            log_failure(
                &Method::GET,
                "http://orders.test/api/orders/7",
                StatusCode::from_u16(code).unwrap(),
                details.map(str::to_string),
            );
        });

        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn config(base_url: &str) -> OrderApiConfig {
        OrderApiConfig {
            base_url: base_url.to_string(),
            ..OrderApiConfig::default()
        }
    }

    #[test]
    fn test_severity_classification() {
        let cases = [
            (404, LogSeverity::Info),
            (400, LogSeverity::Warn),
            (401, LogSeverity::Warn),
            (403, LogSeverity::Warn),
            (409, LogSeverity::Warn),
            (422, LogSeverity::Warn),
            (429, LogSeverity::Warn),
            (500, LogSeverity::Error),
            (503, LogSeverity::Error),
            (418, LogSeverity::Warn),
            (302, LogSeverity::Warn),
        ];
        for (code, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(LogSeverity::for_status(status), expected, "status {code}");
        }
    }

    #[test]
    fn test_server_error_is_logged_at_error_level() {
        let output = logged_failure(500, Some("数据库不可用"));

        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("API 请求失败"));
        assert!(output.contains("status=500"));
        assert!(output.contains("Internal Server Error"));
        assert!(output.contains("数据库不可用"));
    }

    #[test]
    fn test_client_errors_are_logged_below_error_level() {
        let not_found = logged_failure(404, None);
        assert!(not_found.contains("INFO"), "{not_found}");
        assert!(!not_found.contains("WARN") && !not_found.contains("ERROR"));

        let invalid = logged_failure(422, Some("状态无效"));
        assert!(invalid.contains("WARN"), "{invalid}");
        assert!(!invalid.contains("ERROR"));
    }

    #[test]
    fn test_summarize_structured_errors() {
        let body = r#"{"errors":["订单不存在","请求无效"]}"#;
        assert_eq!(
            summarize_error_body(body).as_deref(),
            Some("订单不存在; 请求无效")
        );

        let pascal = r#"{"Errors":["a"]}"#;
        assert_eq!(summarize_error_body(pascal).as_deref(), Some("a"));
    }

    #[test]
    fn test_summarize_empty_or_unstructured() {
        assert_eq!(summarize_error_body(""), None);
        assert_eq!(summarize_error_body("   "), None);
        assert_eq!(summarize_error_body(r#"{"errors":[]}"#), None);
        assert_eq!(summarize_error_body(r#"{"title":"x"}"#), None);
        assert_eq!(
            summarize_error_body("Service Unavailable").as_deref(),
            Some("Service Unavailable")
        );
    }

    #[test]
    fn test_summarize_truncates_long_raw_body() {
        let body = "x".repeat(600);
        let summary = summarize_error_body(&body).unwrap();

        assert!(summary.ends_with("... (truncated)"));
        assert_eq!(summary.chars().count(), 500 + "... (truncated)".len());

        let exact = "y".repeat(500);
        assert_eq!(summarize_error_body(&exact), Some(exact.clone()));
    }

    #[test]
    fn test_header_dump_redacts_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let dump = header_dump(&headers);
        assert_eq!(dump["authorization"], "[REDACTED]");
        assert_eq!(dump["accept"], "application/json");
    }

    #[tokio::test]
    async fn test_unauthenticated_client_sends_accept_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/ping")
                .header("accept", "application/json");
            then.status(200).body("pong");
        });

        let client = ApiClient::new(&config(&server.base_url())).unwrap();
        let response = client
            .send(client.request(Method::GET, "/ping"))
            .await
            .unwrap();

        mock.assert();
        assert!(response.is_success());
        assert_eq!(response.body, "pong");
    }

    #[tokio::test]
    async fn test_error_response_is_returned_not_raised() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/broken");
            then.status(500)
                .header("content-type", "application/json")
                .body(r#"{"errors":["数据库不可用"]}"#);
        });

        let client = ApiClient::new(&config(&server.base_url())).unwrap();
        let response = client
            .send(client.request(Method::GET, "/broken"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_transport_failure_is_http_error() {
        let client = ApiClient::new(&config("http://127.0.0.1:1")).unwrap();
        let result = client.send(client.request(Method::GET, "/x")).await;

        assert!(matches!(result, Err(SharedError::Http(_))));
    }
}
