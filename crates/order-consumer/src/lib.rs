//! 订单事件消费服务
//!
//! 从 RabbitMQ 消费订单事件（order.created / order.status.changed），
//! 按 topic 分发到对应的消息处理器，处理器通过带系统令牌认证的 HTTP 客户端回查订单 API。
//! 每条消息在独立任务中处理，确认与拒绝统一经由单写者确认器写回通道。

pub mod api;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod processor;
pub mod registry;
pub mod scope;

#[cfg(test)]
mod test_support;
