//! 订单事件模型
//!
//! 定义订单系统在 RabbitMQ 上传递的事件消息、路由键/队列命名约定以及订单状态枚举。
//! 消息体为 UTF-8 JSON，字段名采用 PascalCase（同时兼容 camelCase）。

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Topic / Queue 常量
// ---------------------------------------------------------------------------

/// 集中管理所有路由键（topic），防止字符串散落在各服务中导致拼写不一致
pub mod topics {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_STATUS_CHANGED: &str = "order.status.changed";
}

/// 每个 topic 对应一个持久化队列，命名规则为 `{topic}.queue`
pub mod queues {
    pub const ORDER_CREATED: &str = "order.created.queue";
    pub const ORDER_STATUS_CHANGED: &str = "order.status.changed.queue";
}

// ---------------------------------------------------------------------------
// OrderStatus — 订单状态
// ---------------------------------------------------------------------------

/// 订单状态
///
/// 线上格式为整数编码（Unknown=0 ... Cancelled=5）。反序列化时同时接受状态名称字符串。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "i32")]
pub enum OrderStatus {
    #[default]
    Unknown,
    Created,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        Self::Unknown,
        Self::Created,
        Self::Processing,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];

    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Created => 1,
            Self::Processing => 2,
            Self::Completed => 3,
            Self::Error => 4,
            Self::Cancelled => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Created => "Created",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<OrderStatus> for i32 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for OrderStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or_else(|| format!("未知的订单状态编码: {code}"))
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|status| status.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("未知的订单状态名称: {s}"))
    }
}

/// 状态的线上表示：整数编码或名称
#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRepr {
    Code(i32),
    Name(String),
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match StatusRepr::deserialize(deserializer)? {
            StatusRepr::Code(code) => Self::try_from(code),
            StatusRepr::Name(name) => name.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// 订单事件消息
// ---------------------------------------------------------------------------

/// 订单创建事件（order.created）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderCreatedMessage {
    #[serde(alias = "orderId")]
    pub order_id: i32,
}

/// 订单状态变更事件（order.status.changed）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderStatusChangedMessage {
    #[serde(alias = "orderId")]
    pub order_id: i32,
    #[serde(default, alias = "previousStatus")]
    pub previous_status: OrderStatus,
    #[serde(default, alias = "newStatus")]
    pub new_status: OrderStatus,
    /// 缺省时取当前时间
    #[serde(
        default = "Utc::now",
        alias = "occurredOn",
        deserialize_with = "flexible_datetime"
    )]
    pub occurred_on: DateTime<Utc>,
}

impl OrderStatusChangedMessage {
    pub fn new(order_id: i32, previous_status: OrderStatus, new_status: OrderStatus) -> Self {
        Self {
            order_id,
            previous_status,
            new_status,
            occurred_on: Utc::now(),
        }
    }
}

/// 同时接受 RFC 3339 与不带时区的时间戳，后者按 UTC 处理
pub fn flexible_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
