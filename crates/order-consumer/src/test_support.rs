//! 单元测试共享的 Mock 定义

use async_trait::async_trait;
use order_shared::amqp::Acknowledger;
use order_shared::error::Result;

mockall::mock! {
    pub Acker {}

    #[async_trait]
    impl Acknowledger for Acker {
        async fn ack(&self, delivery_tag: u64) -> Result<()>;
        async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
    }
}
