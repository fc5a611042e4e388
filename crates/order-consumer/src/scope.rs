//! 服务作用域
//!
//! 每条投递都在独立的作用域中解析处理器，作用域负责提供处理器所需的依赖。

use std::fmt;
use std::sync::Arc;

use crate::api::OrderApi;
use crate::error::ConsumerError;
use crate::processor::{OrderProcessingService, OrderProcessor};

type ProcessorFactory = Arc<dyn Fn() -> Result<Arc<dyn OrderProcessor>, ConsumerError> + Send + Sync>;

/// 处理器依赖的提供者
///
/// 克隆开销很小，分发循环为每条投递克隆一份，在任务内构造处理器。
#[derive(Clone)]
pub struct ServiceScope {
    processor_factory: ProcessorFactory,
}

impl ServiceScope {
    /// 基于订单 API 构建作用域，每次解析都创建新的处理服务
    pub fn new(order_api: Arc<dyn OrderApi>) -> Self {
        Self::with_processor_factory(move || {
            Ok(Arc::new(OrderProcessingService::new(order_api.clone())) as Arc<dyn OrderProcessor>)
        })
    }

    pub fn with_processor_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn OrderProcessor>, ConsumerError> + Send + Sync + 'static,
    {
        Self {
            processor_factory: Arc::new(factory),
        }
    }

    /// 固定使用给定的处理服务实例
    pub fn with_processor(processor: Arc<dyn OrderProcessor>) -> Self {
        Self::with_processor_factory(move || Ok(processor.clone()))
    }

    /// 不提供任何依赖的作用域，所有解析都会失败
    pub fn unavailable() -> Self {
        Self::with_processor_factory(|| {
            Err(ConsumerError::HandlerResolution {
                handler: "OrderProcessor".to_string(),
                reason: "作用域中未注册订单处理服务".to_string(),
            })
        })
    }

    pub fn processor(&self) -> Result<Arc<dyn OrderProcessor>, ConsumerError> {
        (self.processor_factory)()
    }
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope").finish_non_exhaustive()
    }
}
