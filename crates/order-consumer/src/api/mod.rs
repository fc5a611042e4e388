//! 订单 API 访问层
//!
//! - [`token`]: 系统令牌的获取与缓存
//! - [`client`]: 认证 + 错误日志的请求管道
//! - [`orders`]: 订单查询与状态更新

pub mod client;
pub mod models;
pub mod orders;
pub mod token;

pub use client::{ApiClient, ApiResponse, LogSeverity, summarize_error_body};
pub use orders::{OrderApi, OrderApiClient};
pub use token::SystemTokenService;

#[cfg(test)]
pub use orders::MockOrderApi;
