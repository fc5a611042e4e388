//! 重新投递上限
//!
//! 处理失败的消息默认以 requeue=true 拒绝，会无限次回到队列。
//! 配置最大投递次数后，消费循环在调用处理器之前检查已投递次数，
//! 达到上限的消息以 requeue=false 拒绝，由队列上的死信交换机接收（如已配置）。
//!
//! 已投递次数优先取仲裁队列写入的 x-delivery-count 头。经典队列只提供 redelivered 标志，
//! 因此消费者在本地按消息指纹记录失败次数，两者取较大值。

use std::hash::{DefaultHasher, Hash, Hasher};

use dashmap::DashMap;
use tracing::warn;

use crate::amqp::Delivery;
use crate::config::ConsumerConfig;

/// 本地失败计数最多跟踪的消息数，超过后整体清空
const MAX_TRACKED_MESSAGES: usize = 10_000;

// ---------------------------------------------------------------------------
// RedeliveryPolicy — 重新投递策略
// ---------------------------------------------------------------------------

/// 重新投递策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedeliveryPolicy {
    /// 最大投递次数，None 表示不限制
    pub max_delivery_attempts: Option<u32>,
}

impl RedeliveryPolicy {
    /// 不限制投递次数
    pub fn unbounded() -> Self {
        Self {
            max_delivery_attempts: None,
        }
    }

    /// 最多投递 `max_attempts` 次；0 按 1 处理
    pub fn capped(max_attempts: u32) -> Self {
        Self {
            max_delivery_attempts: Some(max_attempts.max(1)),
        }
    }

    pub fn from_config(config: &ConsumerConfig) -> Self {
        match config.max_delivery_attempts {
            Some(max_attempts) => Self::capped(max_attempts),
            None => Self::unbounded(),
        }
    }

    pub fn is_capped(&self) -> bool {
        self.max_delivery_attempts.is_some()
    }
}

// ---------------------------------------------------------------------------
// RedeliveryTracker — 投递次数跟踪
// ---------------------------------------------------------------------------

/// 投递次数跟踪
///
/// 不限制投递次数时不记录任何状态。
#[derive(Debug, Default)]
pub struct RedeliveryTracker {
    policy: RedeliveryPolicy,
    failures: DashMap<u64, u64>,
}

impl RedeliveryTracker {
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self {
            policy,
            failures: DashMap::new(),
        }
    }

    pub fn policy(&self) -> RedeliveryPolicy {
        self.policy
    }

    /// 此前已投递的次数
    ///
    /// 取 x-delivery-count 头与本地失败计数中的较大值；
    /// 两者都缺失时，重新投递的消息至少计为 1 次。
    pub fn attempts(&self, delivery: &Delivery) -> u64 {
        let header = delivery.delivery_count.unwrap_or(0);
        if !delivery.redelivered {
            return header;
        }

        let observed = self
            .failures
            .get(&fingerprint(delivery))
            .map(|count| *count.value())
            .unwrap_or(0);
        header.max(observed).max(1)
    }

    /// 该消息是否已耗尽投递次数
    pub fn is_exhausted(&self, delivery: &Delivery) -> bool {
        match self.policy.max_delivery_attempts {
            Some(max_attempts) => self.attempts(delivery) >= u64::from(max_attempts),
            None => false,
        }
    }

    /// 记录一次以 requeue=true 拒绝的失败处理
    pub fn record_failure(&self, delivery: &Delivery) {
        if !self.policy.is_capped() {
            return;
        }

        if self.failures.len() >= MAX_TRACKED_MESSAGES {
            warn!(tracked = self.failures.len(), "本地投递计数过多，清空后重新计数");
            self.failures.clear();
        }

        let mut count = self.failures.entry(fingerprint(delivery)).or_insert(0);
        // 首次投递意味着这是一条新消息，此前相同内容的计数不再适用
        *count = if delivery.redelivered { *count + 1 } else { 1 };
    }

    /// 消息已确认或丢弃，不再跟踪
    pub fn forget(&self, delivery: &Delivery) {
        if self.policy.is_capped() {
            self.failures.remove(&fingerprint(delivery));
        }
    }
}

/// 经典队列上的消息没有稳定标识，以路由键和消息体作为指纹
fn fingerprint(delivery: &Delivery) -> u64 {
    let mut hasher = DefaultHasher::new();
    delivery.routing_key.hash(&mut hasher);
    delivery.body.hash(&mut hasher);
    hasher.finish()
}
