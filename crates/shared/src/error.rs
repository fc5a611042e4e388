//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 消息代理错误 ====================
    #[error("AMQP 错误: {0}")]
    Amqp(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 序列化错误 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 外部服务错误 ====================
    #[error("HTTP 调用错误: {0}")]
    Http(String),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl From<validator::ValidationErrors> for SharedError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}
