//! order.created 消息处理器

use std::sync::Arc;

use async_trait::async_trait;
use order_shared::events::{OrderCreatedMessage, queues, topics};

use crate::error::ConsumerError;
use crate::handler::{HandlerDescriptor, MessageHandler, decode};
use crate::processor::OrderProcessor;

pub struct OrderCreatedHandler {
    processor: Arc<dyn OrderProcessor>,
}

impl OrderCreatedHandler {
    pub const NAME: &'static str = "OrderCreatedHandler";

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
impl MessageHandler for OrderCreatedHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn topic(&self) -> &str {
        topics::ORDER_CREATED
    }

    fn queue_name(&self) -> &str {
        queues::ORDER_CREATED
    }

    async fn process(&self, body: &str) -> Result<(), ConsumerError> {
        let message: OrderCreatedMessage = decode(body)?;
        self.processor.process_order_created(&message).await
    }
}
