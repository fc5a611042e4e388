//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig, service_name: &str) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "order_consumer_deliveries_total",
        "Total number of deliveries received per topic"
    );
    metrics::describe_counter!("order_consumer_acks_total", "Total number of acked deliveries");
    metrics::describe_counter!(
        "order_consumer_nacks_total",
        "Total number of nacked deliveries"
    );
    metrics::describe_histogram!(
        "order_consumer_handle_duration_seconds",
        "Delivery handling duration in seconds"
    );

    metrics::describe_counter!(
        "order_api_requests_total",
        "Total number of outbound order API requests"
    );
    metrics::describe_counter!(
        "order_api_token_refresh_total",
        "Total number of system token authentications"
    );

    // 记录服务启动
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录收到的投递
#[inline]
pub fn record_delivery(topic: &str) {
    metrics::counter!("order_consumer_deliveries_total", "topic" => topic.to_string())
        .increment(1);
}

/// 记录确认
#[inline]
pub fn record_ack(topic: &str) {
    metrics::counter!("order_consumer_acks_total", "topic" => topic.to_string()).increment(1);
}

/// 记录拒绝
#[inline]
pub fn record_nack(topic: &str, requeue: bool) {
    metrics::counter!(
        "order_consumer_nacks_total",
        "topic" => topic.to_string(),
        "requeue" => requeue.to_string()
    )
    .increment(1);
}

/// 记录一次投递处理耗时
#[inline]
pub fn record_handle_duration(topic: &str, duration_secs: f64) {
    metrics::histogram!(
        "order_consumer_handle_duration_seconds",
        "topic" => topic.to_string()
    )
    .record(duration_secs);
}

/// 记录订单 API 请求；status 为 0 表示请求未得到响应
#[inline]
pub fn record_api_request(method: &str, status: u16) {
    metrics::counter!(
        "order_api_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录系统令牌获取结果
#[inline]
pub fn record_token_refresh(outcome: &str) {
    metrics::counter!("order_api_token_refresh_total", "outcome" => outcome.to_string())
        .increment(1);
}
