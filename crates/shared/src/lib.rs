//! 共享库
//!
//! 包含订单事件服务共用的配置、错误处理、RabbitMQ 连接与拓扑、事件定义、可观测性等基础设施代码。

pub mod amqp;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod redelivery;
