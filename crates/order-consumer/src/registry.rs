//! 消息处理器注册表
//!
//! 启动时逐个构造处理器读取其 topic 与队列名，按 topic 建立绑定。
//! 同一 topic 只保留第一个注册的处理器，后续注册被拒绝并记录警告。

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::handler::HandlerDescriptor;
use crate::handlers;
use crate::scope::ServiceScope;

/// topic 与队列、处理器之间的绑定，注册后不再变化
#[derive(Debug, Clone)]
pub struct ConsumerBinding {
    pub topic: String,
    pub queue_name: String,
    pub handler: HandlerDescriptor,
}

/// 单次注册的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// topic 已被其他处理器占用
    DuplicateTopic { existing: &'static str },
    /// 处理器构造失败，未产生绑定
    ConstructionFailed(String),
}

pub struct HandlerRegistry {
    scope: ServiceScope,
    bindings: BTreeMap<String, ConsumerBinding>,
}

impl HandlerRegistry {
    pub fn new(scope: ServiceScope) -> Self {
        Self {
            scope,
            bindings: BTreeMap::new(),
        }
    }

    /// 注册内置处理器
    ///
    /// 按处理器名称的字典序注册，topic 冲突时的胜出者因此是确定的。
    pub fn with_defaults(scope: ServiceScope) -> Self {
        let mut descriptors = handlers::default_descriptors();
        descriptors.sort_by_key(|d| d.name());

        let mut registry = Self::new(scope);
        info!(handler_count = descriptors.len(), "发现待注册的消息处理器");
        for descriptor in descriptors {
            registry.register(descriptor);
        }
        info!(binding_count = registry.len(), "消息处理器注册完成");

        registry
    }

    pub fn register(&mut self, descriptor: HandlerDescriptor) -> RegisterOutcome {
        let handler = match descriptor.resolve(&self.scope) {
            Ok(handler) => handler,
            Err(e) => {
                error!(handler = descriptor.name(), error = %e, "注册消息处理器失败");
                return RegisterOutcome::ConstructionFailed(e.to_string());
            }
        };

        let topic = handler.topic().to_string();
        if let Some(existing) = self.bindings.get(&topic) {
            warn!(
                topic = %topic,
                handler = descriptor.name(),
                existing = existing.handler.name(),
                "该 topic 已存在处理器，跳过注册"
            );
            return RegisterOutcome::DuplicateTopic {
                existing: existing.handler.name(),
            };
        }

        debug!(
            handler = descriptor.name(),
            topic = %topic,
            queue = handler.queue_name(),
            "已注册消息处理器"
        );
        self.bindings.insert(
            topic.clone(),
            ConsumerBinding {
                topic,
                queue_name: handler.queue_name().to_string(),
                handler: descriptor,
            },
        );
        RegisterOutcome::Registered
    }

    /// 全部绑定，按 topic 排序
    pub fn bindings(&self) -> impl Iterator<Item = &ConsumerBinding> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn scope(&self) -> &ServiceScope {
        &self.scope
    }
}
