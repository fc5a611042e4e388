//! 订单 API 客户端

use std::sync::Arc;

use async_trait::async_trait;
use order_shared::config::OrderApiConfig;
use order_shared::error::Result;
use order_shared::events::OrderStatus;
use reqwest::Method;
use tracing::{debug, error, info, warn};

use super::client::ApiClient;
use super::models::{self, ApiEnvelope, OrderDetails, UpdateStatusRequest};
use super::token::SystemTokenService;

/// 订单 API
///
/// 失败（包括传输错误）不向调用方抛出，分别以 `None` 和 `false` 表示，且不会额外重试。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn get_order(&self, order_id: i32) -> Option<OrderDetails>;

    async fn update_order_status(&self, order_id: i32, status: OrderStatus) -> bool;
}

pub struct OrderApiClient {
    client: ApiClient,
}

impl OrderApiClient {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// 创建经过认证与错误日志两步的客户端
    pub fn from_config(config: &OrderApiConfig, tokens: Arc<SystemTokenService>) -> Result<Self> {
        Ok(Self::new(ApiClient::new(config)?.with_authentication(tokens)))
    }
}

#[async_trait]
impl OrderApi for OrderApiClient {
    async fn get_order(&self, order_id: i32) -> Option<OrderDetails> {
        let request = self
            .client
            .request(Method::GET, &format!("/api/v1/orders/{order_id}"));

        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(order_id, error = %e, "获取订单时发生意外错误");
                return None;
            }
        };

        if !response.is_success() {
            warn!(order_id, status = response.status.as_u16(), "获取订单失败");
            return None;
        }

        debug!(order_id, body = %response.body, "收到订单响应");
        parse_order_body(order_id, &response.body)
    }

    async fn update_order_status(&self, order_id: i32, status: OrderStatus) -> bool {
        let request = self
            .client
            .request(Method::PUT, &format!("/api/v1/orders/{order_id}/status"))
            .json(&UpdateStatusRequest { status });

        match self.client.send(request).await {
            Ok(response) if response.is_success() => {
                info!(order_id, status = %status, "订单状态更新成功");
                true
            }
            Ok(response) => {
                warn!(
                    order_id,
                    status = %status,
                    http_status = response.status.as_u16(),
                    "订单状态更新失败"
                );
                false
            }
            Err(e) => {
                error!(order_id, status = %status, error = %e, "更新订单状态时发生意外错误");
                false
            }
        }
    }
}

/// 解析订单响应体
///
/// 带包装字段的对象按包装格式解析，包装无效时回退为直接解析订单。
pub fn parse_order_body(order_id: i32, body: &str) -> Option<OrderDetails> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(order_id, error = %e, "订单响应不是合法的 JSON");
            return None;
        }
    };

    if models::is_wrapped(&value) {
        match serde_json::from_value::<ApiEnvelope<OrderDetails>>(value.clone()) {
            Ok(envelope) => {
                if !envelope.is_succeeded() || envelope.data.is_none() {
                    warn!(order_id, errors = %envelope.joined_errors(", "), "API 返回了失败响应");
                    return None;
                }
                info!(order_id, "已从 API 获取订单");
                return envelope.data;
            }
            Err(e) => debug!(order_id, error = %e, "包装格式解析失败，尝试直接解析"),
        }
    }

    match serde_json::from_value::<OrderDetails>(value) {
        Ok(order) => {
            info!(order_id, "已从 API 获取订单（未包装响应）");
            Some(order)
        }
        Err(e) => {
            warn!(order_id, error = %e, "订单响应反序列化失败");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use order_shared::config::SystemCredentials;
    use serde_json::json;

    use crate::api::token::SIGN_IN_PATH;

    fn order_json(id: i32) -> serde_json::Value {
        json!({
            "id": id,
            "orderDate": "2024-05-01T08:00:00Z",
            "totalAmount": 25.5,
            "status": 1,
            "orderItems": [
                {"id": 1, "productName": "Widget", "quantity": 1, "price": 25.5, "total": 25.5, "orderId": id}
            ]
        })
    }

    fn api_config(base_url: &str, token: Option<&str>) -> OrderApiConfig {
        OrderApiConfig {
            base_url: format!("{base_url}/"),
            system_token: token.map(str::to_string),
            system_credentials: Some(SystemCredentials {
                email: Some("system@example.com".to_string()),
                password: Some("secret".to_string()),
            }),
            ..OrderApiConfig::default()
        }
    }

    fn client_for(config: &OrderApiConfig) -> OrderApiClient {
        let tokens = Arc::new(SystemTokenService::from_config(config).unwrap());
        OrderApiClient::from_config(config, tokens).unwrap()
    }

    fn sign_in_ok(token: &str) -> String {
        json!({"succeeded": true, "data": {"accessToken": token}}).to_string()
    }

    #[test]
    fn test_parse_wrapped_and_raw_bodies() {
        let wrapped = json!({"succeeded": true, "data": order_json(42), "errors": null});
        let order = parse_order_body(42, &wrapped.to_string()).unwrap();
        assert_eq!(order.id, 42);

        let raw = parse_order_body(42, &order_json(42).to_string()).unwrap();
        assert_eq!(raw.order_items.len(), 1);

        let failed = json!({"succeeded": false, "errors": ["订单不存在"]});
        assert!(parse_order_body(42, &failed.to_string()).is_none());

        let no_data = json!({"succeeded": true});
        assert!(parse_order_body(42, &no_data.to_string()).is_none());

        assert!(parse_order_body(42, "<html>").is_none());
    }

    #[tokio::test]
    async fn test_get_order_with_bearer_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orders/42")
                .header("authorization", "Bearer static-token");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"succeeded": true, "data": order_json(42)}));
        });

        let client = client_for(&api_config(&server.base_url(), Some("static-token")));
        let order = client.get_order(42).await.unwrap();

        mock.assert();
        assert_eq!(order.id, 42);
    }

    #[tokio::test]
    async fn test_get_order_not_found_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/orders/404");
            then.status(404)
                .header("content-type", "application/json")
                .body(r#"{"errors":["订单不存在"]}"#);
        });

        let client = client_for(&api_config(&server.base_url(), Some("static-token")));
        assert!(client.get_order(404).await.is_none());
    }

    #[tokio::test]
    async fn test_update_status_server_error_returns_false() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/api/v1/orders/7/status")
                .json_body(json!({"Status": 3}));
            then.status(500).body("internal error");
        });

        let client = client_for(&api_config(&server.base_url(), Some("static-token")));
        assert!(!client.update_order_status(7, OrderStatus::Completed).await);
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_update_status_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/v1/orders/7/status");
            then.status(204);
        });

        let client = client_for(&api_config(&server.base_url(), Some("static-token")));
        assert!(client.update_order_status(7, OrderStatus::Completed).await);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_retries() {
        let server = MockServer::start();
        let sign_in = server.mock(|when, then| {
            when.method(POST).path(SIGN_IN_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .body(sign_in_ok("fresh"));
        });
        let rejected = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orders/42")
                .header("authorization", "Bearer stale");
            then.status(401);
        });
        let accepted = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/orders/42")
                .header("authorization", "Bearer fresh");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(order_json(42));
        });

        let config = api_config(&server.base_url(), None);
        let tokens = Arc::new(SystemTokenService::from_config(&config).unwrap());
        tokens
            .seed_cache("stale", chrono::Utc::now() + chrono::Duration::minutes(5))
            .await;
        let client = OrderApiClient::from_config(&config, tokens).unwrap();

        let order = client.get_order(42).await;

        assert!(order.is_some());
        assert_eq!(rejected.hits(), 1);
        assert_eq!(sign_in.hits(), 1);
        assert_eq!(accepted.hits(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_retry_failure_is_not_retried_again() {
        let server = MockServer::start();
        let sign_in = server.mock(|when, then| {
            when.method(POST).path(SIGN_IN_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .body(sign_in_ok("also-rejected"));
        });
        let orders = server.mock(|when, then| {
            when.method(GET).path("/api/v1/orders/42");
            then.status(401);
        });

        let client = client_for(&api_config(&server.base_url(), None));

        assert!(client.get_order(42).await.is_none());
        // 首次登录 + 401 后强制登录
        assert_eq!(sign_in.hits(), 2);
        assert_eq!(orders.hits(), 2);
    }

    #[tokio::test]
    async fn test_no_token_sends_unauthenticated_request() {
        let server = MockServer::start();
        let orders = server.mock(|when, then| {
            when.method(GET).path("/api/v1/orders/5");
            then.status(401);
        });

        let config = OrderApiConfig {
            base_url: server.base_url(),
            ..OrderApiConfig::default()
        };
        let client = client_for(&config);

        assert!(client.get_order(5).await.is_none());
        // 未附加令牌时不触发刷新重试
        assert_eq!(orders.hits(), 1);
    }
}
