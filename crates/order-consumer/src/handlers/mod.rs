//! 订单事件处理器

mod order_created;
mod order_status_changed;

pub use order_created::OrderCreatedHandler;
pub use order_status_changed::OrderStatusChangedHandler;

use crate::handler::HandlerDescriptor;

/// 服务内置的全部处理器描述
pub fn default_descriptors() -> Vec<HandlerDescriptor> {
    vec![
        OrderCreatedHandler::descriptor(),
        OrderStatusChangedHandler::descriptor(),
    ]
}
