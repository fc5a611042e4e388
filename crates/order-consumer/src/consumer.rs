//! RabbitMQ 消费循环与消息分发
//!
//! 启动时建立连接、声明交换机，并为注册表中的每个绑定声明队列、开始消费。
//! 每条投递在独立任务中处理：构造全新的处理器实例，处理结果经由单写者确认器写回通道。
//! 收到关闭信号后停止消费，等待处理中的任务完成，再依次关闭通道和连接。

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{BoxStream, SelectAll, StreamExt};
use lapin::options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use order_shared::amqp::{
    Acknowledger, AmqpConnectionManager, ChannelAcknowledger, Delivery, QueueSetupService,
};
use order_shared::config::AppConfig;
use order_shared::error::SharedError;
use order_shared::observability::metrics;
use order_shared::redelivery::{RedeliveryPolicy, RedeliveryTracker};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ConsumerError;
use crate::handler::HandleOutcome;
use crate::registry::{ConsumerBinding, HandlerRegistry};
use crate::scope::ServiceScope;

/// 消费者生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Connected,
    TopologySet,
    Consuming,
    Stopping,
    Stopped,
}

/// 单条投递的最终去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 处理成功并已确认
    Acked,
    /// 处理失败，已重新入队
    Requeued,
    /// 处理器无法构造，消息被丢弃
    DroppedUnresolved,
    /// 投递次数已达上限，消息被丢弃
    DroppedExhausted,
    /// 确认或拒绝本身失败，消息状态由代理在通道关闭后决定
    AckFailed,
}

type TaggedDeliveryStream =
    BoxStream<'static, (Arc<ConsumerBinding>, lapin::Result<lapin::message::Delivery>)>;

/// 订单事件消费者
pub struct OrderEventConsumer {
    connections: AmqpConnectionManager,
    queue_setup: QueueSetupService,
    registry: HandlerRegistry,
    redelivery: Arc<RedeliveryTracker>,
    prefetch_count: u16,
    state: watch::Sender<ConsumerState>,
}

impl OrderEventConsumer {
    pub fn new(config: &AppConfig, registry: HandlerRegistry) -> Self {
        let (state, _) = watch::channel(ConsumerState::Starting);
        let policy = RedeliveryPolicy::from_config(&config.consumer);
        Self {
            connections: AmqpConnectionManager::new(
                config.rabbitmq.clone(),
                config.service_name.clone(),
            ),
            // 仲裁队列提供 x-delivery-count，投递上限才能跨消费者实例生效
            queue_setup: QueueSetupService::new()
                .with_quorum_queues(policy.is_capped())
                .with_dead_letter_exchange(config.consumer.dead_letter_exchange.clone()),
            registry,
            redelivery: Arc::new(RedeliveryTracker::new(policy)),
            prefetch_count: config.consumer.prefetch_count,
            state,
        }
    }

    /// 订阅生命周期状态变化
    pub fn state_watcher(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConsumerState) {
        self.state.send_replace(next);
        info!(state = ?next, "消费者状态变更");
    }

    /// 运行消费循环，直到收到关闭信号
    ///
    /// 连接、声明交换机或队列失败时立即返回错误，不做重试。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let connection = self.connections.connect().await?;
        self.transition(ConsumerState::Connected);

        let channel = AmqpConnectionManager::open_channel(&connection).await?;
        self.connections.declare_exchange(&channel).await?;
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| SharedError::Amqp(format!("设置预取数量失败: {e}")))?;

        let exchange = self.connections.config().exchange.clone();
        let mut streams: SelectAll<TaggedDeliveryStream> = SelectAll::new();
        let mut consumer_tags = Vec::with_capacity(self.registry.len());

        for binding in self.registry.bindings() {
            let queue = self
                .queue_setup
                .setup_queue(&channel, &exchange, &binding.queue_name, &binding.topic)
                .await?;

            let consumer_tag = format!("order-consumer-{}", Uuid::new_v4());
            let consumer = channel
                .basic_consume(
                    &queue,
                    &consumer_tag,
                    BasicConsumeOptions {
                        no_ack: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| SharedError::Amqp(format!("订阅队列 {queue} 失败: {e}")))?;

            info!(
                topic = %binding.topic,
                queue = %queue,
                handler = binding.handler.name(),
                consumer_tag = %consumer_tag,
                "开始消费队列"
            );

            let binding = Arc::new(binding.clone());
            streams.push(
                consumer
                    .map(move |delivery| (binding.clone(), delivery))
                    .boxed(),
            );
            consumer_tags.push(consumer_tag);
        }
        self.transition(ConsumerState::TopologySet);

        if streams.is_empty() {
            warn!("没有已注册的消息处理器，仅等待关闭信号");
        }

        let (acknowledger, writer) =
            ChannelAcknowledger::spawn(channel.clone(), usize::from(self.prefetch_count));
        let acknowledger: Arc<dyn Acknowledger> = Arc::new(acknowledger);
        let scope = self.registry.scope().clone();
        let mut tasks = JoinSet::new();
        let mut streams_ended = false;

        self.transition(ConsumerState::Consuming);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，停止消费");
                        break;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "消息处理任务异常退出");
                    }
                }

                next = streams.next(), if !streams.is_empty() => {
                    match next {
                        Some((binding, Ok(delivery))) => {
                            let delivery = Delivery::from_amqp(&delivery);
                            let scope = scope.clone();
                            let acknowledger = acknowledger.clone();
                            let redelivery = self.redelivery.clone();
                            tasks.spawn(async move {
                                dispatch_delivery(
                                    &binding,
                                    &scope,
                                    &delivery,
                                    acknowledger.as_ref(),
                                    &redelivery,
                                )
                                .await
                            });
                        }
                        Some((binding, Err(e))) => {
                            error!(topic = %binding.topic, error = %e, "接收消息失败");
                        }
                        None => {
                            error!("所有消费者均已停止，通道可能已被代理关闭");
                            streams_ended = true;
                            break;
                        }
                    }
                }
            }
        }

        self.transition(ConsumerState::Stopping);

        for consumer_tag in &consumer_tags {
            if let Err(e) = channel
                .basic_cancel(consumer_tag, BasicCancelOptions::default())
                .await
            {
                warn!(consumer_tag = %consumer_tag, error = %e, "取消消费者失败");
            }
        }
        drop(streams);

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "等待处理中的消息完成");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "消息处理任务异常退出");
            }
        }

        drop(acknowledger);
        if let Err(e) = writer.await {
            warn!(error = %e, "确认写入任务异常退出");
        }

        if let Err(e) = channel.close(200, "OK").await {
            warn!(error = %e, "关闭通道失败");
        }
        if let Err(e) = connection.close(200, "OK").await {
            warn!(error = %e, "关闭连接失败");
        }

        self.transition(ConsumerState::Stopped);

        if streams_ended {
            return Err(SharedError::Amqp("消费者流意外结束".to_string()).into());
        }
        Ok(())
    }
}

/// 处理单条投递
///
/// 拆分为独立函数，测试中可以直接传入 Mock 确认器而无需真实的代理连接。
/// 流程：投递次数检查 -> 构造处理器 -> 处理并确认
pub async fn dispatch_delivery(
    binding: &ConsumerBinding,
    scope: &ServiceScope,
    delivery: &Delivery,
    acknowledger: &dyn Acknowledger,
    redelivery: &RedeliveryTracker,
) -> DispatchOutcome {
    metrics::record_delivery(&binding.topic);
    let started = Instant::now();

    let outcome = dispatch(binding, scope, delivery, acknowledger, redelivery).await;
    match outcome {
        DispatchOutcome::Requeued => redelivery.record_failure(delivery),
        DispatchOutcome::Acked
        | DispatchOutcome::DroppedUnresolved
        | DispatchOutcome::DroppedExhausted => redelivery.forget(delivery),
        DispatchOutcome::AckFailed => {}
    }

    metrics::record_handle_duration(&binding.topic, started.elapsed().as_secs_f64());
    debug!(
        topic = %binding.topic,
        delivery_tag = delivery.delivery_tag,
        outcome = ?outcome,
        "投递处理完成"
    );
    outcome
}

async fn dispatch(
    binding: &ConsumerBinding,
    scope: &ServiceScope,
    delivery: &Delivery,
    acknowledger: &dyn Acknowledger,
    redelivery: &RedeliveryTracker,
) -> DispatchOutcome {
    if redelivery.is_exhausted(delivery) {
        error!(
            topic = %binding.topic,
            delivery_tag = delivery.delivery_tag,
            attempts = redelivery.attempts(delivery),
            max_attempts = ?redelivery.policy().max_delivery_attempts,
            "消息投递次数已达上限，丢弃"
        );
        return drop_delivery(binding, delivery, acknowledger, DispatchOutcome::DroppedExhausted)
            .await;
    }

    let handler = match binding.handler.resolve(scope) {
        Ok(handler) => handler,
        Err(e) => {
            error!(
                topic = %binding.topic,
                handler = binding.handler.name(),
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "无法构造消息处理器，丢弃消息"
            );
            return drop_delivery(binding, delivery, acknowledger, DispatchOutcome::DroppedUnresolved)
                .await;
        }
    };

    match handler.handle(delivery, acknowledger).await {
        Ok(HandleOutcome::Acked) => DispatchOutcome::Acked,
        Ok(HandleOutcome::Requeued) => DispatchOutcome::Requeued,
        Err(e) => {
            error!(
                topic = %binding.topic,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "回写消息确认结果失败"
            );
            DispatchOutcome::AckFailed
        }
    }
}

/// 以 requeue=false 拒绝消息
async fn drop_delivery(
    binding: &ConsumerBinding,
    delivery: &Delivery,
    acknowledger: &dyn Acknowledger,
    outcome: DispatchOutcome,
) -> DispatchOutcome {
    match acknowledger.nack(delivery.delivery_tag, false).await {
        Ok(()) => {
            metrics::record_nack(&binding.topic, false);
            outcome
        }
        Err(e) => {
            error!(
                topic = %binding.topic,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "拒绝消息失败"
            );
            DispatchOutcome::AckFailed
        }
    }
}
