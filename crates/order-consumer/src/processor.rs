//! 订单业务处理服务
//!
//! 处理器只负责消息解码，具体的业务流程在这里完成。
//! 订单 API 的失败已经在客户端内转换为 `None` / `false` 并记录日志，
//! 因此业务处理不会因为下游不可用而让消息重新入队。

use std::sync::Arc;

use async_trait::async_trait;
use order_shared::events::{OrderCreatedMessage, OrderStatus, OrderStatusChangedMessage};
use tracing::{debug, error, info};

use crate::api::OrderApi;
use crate::error::ConsumerError;

/// 订单事件业务处理接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    async fn process_order_created(
        &self,
        message: &OrderCreatedMessage,
    ) -> Result<(), ConsumerError>;

    async fn process_order_status_changed(
        &self,
        message: &OrderStatusChangedMessage,
    ) -> Result<(), ConsumerError>;
}

/// 状态变更后需要执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    BeginProcessing,
    Complete,
    Cancel,
    HandleError,
    None,
}

impl StatusAction {
    pub fn for_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Processing => Self::BeginProcessing,
            OrderStatus::Completed => Self::Complete,
            OrderStatus::Cancelled => Self::Cancel,
            OrderStatus::Error => Self::HandleError,
            OrderStatus::Unknown | OrderStatus::Created => Self::None,
        }
    }
}

/// 基于订单 API 的业务处理实现
pub struct OrderProcessingService {
    order_api: Arc<dyn OrderApi>,
}

impl OrderProcessingService {
    pub fn new(order_api: Arc<dyn OrderApi>) -> Self {
        Self { order_api }
    }

    fn apply_status_action(&self, order_id: i32, status: OrderStatus) -> StatusAction {
        let action = StatusAction::for_status(status);
        match action {
            StatusAction::BeginProcessing => info!(order_id, "订单进入处理流程"),
            StatusAction::Complete => info!(order_id, "订单已完成"),
            StatusAction::Cancel => info!(order_id, "订单已取消"),
            StatusAction::HandleError => error!(order_id, "订单进入错误状态"),
            StatusAction::None => {
                info!(order_id, status = %status, "该状态无需特殊处理")
            }
        }
        action
    }
}

#[async_trait]
impl OrderProcessor for OrderProcessingService {
    async fn process_order_created(
        &self,
        message: &OrderCreatedMessage,
    ) -> Result<(), ConsumerError> {
        let order_id = message.order_id;
        info!(order_id, "处理订单创建事件");

        let Some(order) = self.order_api.get_order(order_id).await else {
            error!(order_id, "获取订单详情失败");
            return Ok(());
        };

        info!(
            order_id,
            total_amount = %order.total_amount,
            status = %order.status,
            items_count = order.order_items.len(),
            "已获取订单详情"
        );
        debug!(order_id, "执行订单创建业务逻辑");

        Ok(())
    }

    async fn process_order_status_changed(
        &self,
        message: &OrderStatusChangedMessage,
    ) -> Result<(), ConsumerError> {
        info!(
            order_id = message.order_id,
            previous_status = %message.previous_status,
            new_status = %message.new_status,
            "处理订单状态变更事件"
        );

        self.apply_status_action(message.order_id, message.new_status);
        Ok(())
    }
}
