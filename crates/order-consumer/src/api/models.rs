//! 订单 API 的请求与响应模型
//!
//! API 输出 camelCase 键名，同时兼容 PascalCase。

use chrono::{DateTime, Utc};
use order_shared::events::{OrderStatus, flexible_datetime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 统一响应包装 `{succeeded, data, errors}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    #[serde(default, alias = "Succeeded")]
    pub succeeded: Option<bool>,
    #[serde(default = "Option::default", alias = "Data")]
    pub data: Option<T>,
    #[serde(default, alias = "Errors")]
    pub errors: Option<Vec<String>>,
}

impl<T> ApiEnvelope<T> {
    /// 缺少 succeeded 字段时，以 errors 为空视为成功
    pub fn is_succeeded(&self) -> bool {
        self.succeeded
            .unwrap_or_else(|| self.errors.as_ref().is_none_or(|errors| errors.is_empty()))
    }

    /// 以指定分隔符拼接错误信息，没有错误时返回 "Unknown error"
    pub fn joined_errors(&self, separator: &str) -> String {
        match &self.errors {
            Some(errors) if !errors.is_empty() => errors.join(separator),
            _ => "Unknown error".to_string(),
        }
    }
}

/// 判断 JSON 值是否为带包装字段的对象
pub fn is_wrapped(value: &serde_json::Value) -> bool {
    const KEYS: [&str; 6] = ["succeeded", "Succeeded", "data", "Data", "errors", "Errors"];
    value
        .as_object()
        .is_some_and(|object| KEYS.iter().any(|key| object.contains_key(*key)))
}

/// 错误响应体 `{errors: [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(default, alias = "Errors")]
    pub errors: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// 认证
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignInRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    #[serde(default, alias = "AccessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "RefreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "UserId")]
    pub user_id: Option<String>,
}

impl AuthData {
    /// 非空白的访问令牌
    pub fn usable_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// 订单
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(alias = "Id")]
    pub id: i32,
    #[serde(alias = "OrderDate", deserialize_with = "flexible_datetime")]
    pub order_date: DateTime<Utc>,
    #[serde(alias = "TotalAmount")]
    pub total_amount: Decimal,
    #[serde(default, alias = "Status")]
    pub status: OrderStatus,
    #[serde(default, alias = "ShippingAddress")]
    pub shipping_address: Option<String>,
    #[serde(default, alias = "Street")]
    pub street: Option<String>,
    #[serde(default, alias = "City")]
    pub city: Option<String>,
    #[serde(default, alias = "Country")]
    pub country: Option<String>,
    #[serde(default, alias = "PostCode")]
    pub post_code: Option<String>,
    #[serde(default, alias = "OrderItems")]
    pub order_items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(alias = "Id")]
    pub id: i32,
    #[serde(default, alias = "ProductName")]
    pub product_name: String,
    #[serde(default, alias = "Quantity")]
    pub quantity: i32,
    #[serde(default, alias = "Price")]
    pub price: Decimal,
    #[serde(default, alias = "Total")]
    pub total: Decimal,
    #[serde(default, alias = "OrderId")]
    pub order_id: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[cfg(test)]
impl OrderDetails {
    pub(crate) fn sample(id: i32) -> Self {
        Self {
            id,
            order_date: Utc::now(),
            total_amount: Decimal::new(9995, 2),
            status: OrderStatus::Created,
            shipping_address: None,
            street: Some("1 Main St".to_string()),
            city: Some("Springfield".to_string()),
            country: None,
            post_code: None,
            order_items: Vec::new(),
        }
    }
}
