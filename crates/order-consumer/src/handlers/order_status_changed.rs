//! order.status.changed 消息处理器

use std::sync::Arc;

use async_trait::async_trait;
use order_shared::events::{OrderStatusChangedMessage, queues, topics};

use crate::error::ConsumerError;
use crate::handler::{HandlerDescriptor, MessageHandler, decode};
use crate::processor::OrderProcessor;

pub struct OrderStatusChangedHandler {
    processor: Arc<dyn OrderProcessor>,
}

impl OrderStatusChangedHandler {
    pub const NAME: &'static str = "OrderStatusChangedHandler";

    pub fn new(processor: Arc<dyn OrderProcessor>) -> Self {
        Self { processor }
    }

    pub fn descriptor() -> HandlerDescriptor {
        HandlerDescriptor::new(Self::NAME, |scope| {
            let processor = scope
                .processor()
                .map_err(|e| ConsumerError::HandlerResolution {
                    handler: Self::NAME.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(Box::new(Self::new(processor)) as Box<dyn MessageHandler>)
        })
    }
}

#[async_trait]
impl MessageHandler for OrderStatusChangedHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn topic(&self) -> &str {
        topics::ORDER_STATUS_CHANGED
    }

    fn queue_name(&self) -> &str {
        queues::ORDER_STATUS_CHANGED
    }

    async fn process(&self, body: &str) -> Result<(), ConsumerError> {
        let message: OrderStatusChangedMessage = decode(body)?;
        self.processor.process_order_status_changed(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::MockOrderProcessor;
    use order_shared::events::OrderStatus;

    #[tokio::test]
    async fn test_process_forwards_decoded_message() {
        let mut processor = MockOrderProcessor::new();
        processor
            .expect_process_order_status_changed()
            .withf(|message| {
                message.order_id == 9
                    && message.previous_status == OrderStatus::Created
                    && message.new_status == OrderStatus::Completed
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = OrderStatusChangedHandler::new(Arc::new(processor));
        let body = r#"{"OrderId":9,"PreviousStatus":1,"NewStatus":3,"OccurredOn":"2024-05-01T08:00:00Z"}"#;

        assert!(handler.process(body).await.is_ok());
    }

    #[tokio::test]
    async fn test_processor_failure_propagates() {
        let mut processor = MockOrderProcessor::new();
        processor
            .expect_process_order_status_changed()
            .times(1)
            .returning(|_| Err(ConsumerError::Processing("下游不可用".to_string())));

        let handler = OrderStatusChangedHandler::new(Arc::new(processor));
        let result = handler.process(r#"{"OrderId":9,"NewStatus":2}"#).await;

        assert!(matches!(result, Err(ConsumerError::Processing(_))));
    }

    #[test]
    fn test_routing() {
        let handler = OrderStatusChangedHandler::new(Arc::new(MockOrderProcessor::new()));
        assert_eq!(handler.topic(), "order.status.changed");
        assert_eq!(handler.queue_name(), "order.status.changed.queue");
    }
}
