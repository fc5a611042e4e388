//! 消费服务错误类型
//!
//! 区分处理器解析失败（消息直接丢弃）与处理失败（消息重新入队），
//! 便于分发循环根据错误类型决定确认策略。

use order_shared::error::SharedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("消息处理器解析失败: 处理器={handler}, 原因={reason}")]
    HandlerResolution { handler: String, reason: String },

    #[error("消息反序列化失败: {0}")]
    Deserialization(String),

    #[error("消息处理失败: {0}")]
    Processing(String),

    #[error("消息确认失败: delivery_tag={delivery_tag}, 原因={reason}")]
    Acknowledgement { delivery_tag: u64, reason: String },

    #[error(transparent)]
    Shared(#[from] SharedError),
}
