//! 订单事件消费服务入口

use std::sync::Arc;

use anyhow::{Context, Result};
use order_consumer::api::{OrderApiClient, SystemTokenService};
use order_consumer::consumer::OrderEventConsumer;
use order_consumer::registry::HandlerRegistry;
use order_consumer::scope::ServiceScope;
use order_shared::{config::AppConfig, observability};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use validator::Validate;

const SERVICE_NAME: &str = "order-consumer";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置；此时日志尚未初始化，错误直接由 main 返回并输出到 stderr
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    config
        .rabbitmq
        .validate()
        .context("RabbitMQ 配置无效")?;

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.observability, &config.service_name).await?;

    info!("Starting order-consumer...");
    info!(
        environment = %config.environment,
        host = %config.rabbitmq.host_name,
        exchange = %config.rabbitmq.exchange,
        api_base_url = %config.order_api.base_url(),
        "Configuration loaded"
    );

    // 3. 订单 API：登录客户端只带错误日志，业务客户端带认证
    let tokens = Arc::new(SystemTokenService::from_config(&config.order_api)?);
    let order_api = Arc::new(OrderApiClient::from_config(&config.order_api, tokens)?);

    // 4. 注册处理器
    let registry = HandlerRegistry::with_defaults(ServiceScope::new(order_api));

    // 5. 关闭信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // 6. 运行消费循环，连接或拓扑声明失败即退出
    OrderEventConsumer::new(&config, registry)
        .run(shutdown_rx)
        .await
        .context("消费循环异常退出")?;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
