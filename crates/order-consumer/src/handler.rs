//! 消息处理器 Trait 定义
//!
//! 提供按 topic 消费消息的统一抽象。每个处理器声明自己的 topic 与队列名，
//! 通用的解码、日志、确认/拒绝流程由 `handle` 默认实现完成，
//! 具体处理器只需实现 `process`。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use order_shared::amqp::Acknowledger;
use order_shared::observability::metrics;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use crate::error::ConsumerError;
use crate::scope::ServiceScope;

pub use order_shared::amqp::Delivery;

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// 处理成功，消息已确认
    Acked,
    /// 处理失败，消息已拒绝并重新入队
    Requeued,
}

/// 消息处理器 Trait
///
/// # 处理流程
///
/// 1. 将消息体按 UTF-8 解码并记录日志
/// 2. 调用 `process` 完成反序列化与业务处理
/// 3. 成功则 ack；任何错误都会 nack 并重新入队
///
/// 反序列化失败同样会重新入队，永远无法解析的消息需要配合投递次数上限才能退出循环。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// 处理器名称，用于日志和注册表排序
    fn name(&self) -> &'static str;

    /// 订阅的路由键
    fn topic(&self) -> &str;

    /// 绑定的队列名
    fn queue_name(&self) -> &str;

    /// 反序列化消息并执行业务处理
    async fn process(&self, body: &str) -> Result<(), ConsumerError>;

    /// 处理一条投递并回写确认结果
    ///
    /// 只有确认本身失败时才返回错误，业务失败体现为 `HandleOutcome::Requeued`。
    async fn handle(
        &self,
        delivery: &Delivery,
        acker: &dyn Acknowledger,
    ) -> Result<HandleOutcome, ConsumerError> {
        let body = delivery.body_text();
        info!(
            handler = self.name(),
            topic = self.topic(),
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            body = %body,
            "收到消息"
        );

        match self.process(&body).await {
            Ok(()) => {
                acker
                    .ack(delivery.delivery_tag)
                    .await
                    .map_err(|e| ConsumerError::Acknowledgement {
                        delivery_tag: delivery.delivery_tag,
                        reason: e.to_string(),
                    })?;
                metrics::record_ack(self.topic());
                Ok(HandleOutcome::Acked)
            }
            Err(e) => {
                error!(
                    handler = self.name(),
                    topic = self.topic(),
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "处理消息失败，消息将重新入队"
                );
                acker
                    .nack(delivery.delivery_tag, true)
                    .await
                    .map_err(|e| ConsumerError::Acknowledgement {
                        delivery_tag: delivery.delivery_tag,
                        reason: e.to_string(),
                    })?;
                metrics::record_nack(self.topic(), true);
                Ok(HandleOutcome::Requeued)
            }
        }
    }
}

/// 将消息文本反序列化为目标类型
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ConsumerError> {
    serde_json::from_str(body).map_err(|e| ConsumerError::Deserialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// HandlerDescriptor — 处理器构造描述
// ---------------------------------------------------------------------------

/// 处理器工厂：每次调用都基于给定作用域构造一个全新的处理器实例
pub type HandlerFactory =
    Arc<dyn Fn(&ServiceScope) -> Result<Box<dyn MessageHandler>, ConsumerError> + Send + Sync>;

/// 处理器描述
///
/// 以名称标识处理器，并持有构造它的工厂。注册表保存描述而非实例，
/// 分发循环对每条投递调用工厂，处理器状态不会在并发投递之间共享。
#[derive(Clone)]
pub struct HandlerDescriptor {
    name: &'static str,
    factory: HandlerFactory,
}

impl HandlerDescriptor {
    pub fn new<F>(name: &'static str, factory: F) -> Self
    where
        F: Fn(&ServiceScope) -> Result<Box<dyn MessageHandler>, ConsumerError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 在给定作用域中构造处理器实例
    pub fn resolve(&self, scope: &ServiceScope) -> Result<Box<dyn MessageHandler>, ConsumerError> {
        (self.factory)(scope)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
