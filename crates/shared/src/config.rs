//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use validator::{Validate, ValidationError};

/// RabbitMQ 配置
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RabbitMqConfig {
    #[validate(custom(function = "not_blank", message = "RabbitMQ 主机名不能为空"))]
    pub host_name: String,
    #[validate(range(min = 1, message = "RabbitMQ 端口必须在 1 到 65535 之间"))]
    pub port: u16,
    #[validate(custom(function = "not_blank", message = "RabbitMQ 用户名不能为空"))]
    pub user_name: String,
    #[validate(custom(function = "not_blank", message = "RabbitMQ 密码不能为空"))]
    pub password: String,
    pub virtual_host: String,
    #[validate(custom(function = "not_blank", message = "RabbitMQ 交换机名称不能为空"))]
    pub exchange: String,
    /// 交换机类型：direct / fanout / topic / headers，其他取值按自定义类型处理
    #[validate(custom(function = "not_blank", message = "RabbitMQ 交换机类型不能为空"))]
    pub exchange_type: String,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            port: 5672,
            user_name: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            exchange: "orders_exchange".to_string(),
            exchange_type: "topic".to_string(),
        }
    }
}

/// 校验字符串非空且不全为空白
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// 系统用户凭据，用于换取访问令牌
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl SystemCredentials {
    /// 邮箱和密码均已配置（非空白）时返回二者
    pub fn usable(&self) -> Option<(&str, &str)> {
        let email = self.email.as_deref().filter(|v| !v.trim().is_empty())?;
        let password = self.password.as_deref().filter(|v| !v.trim().is_empty())?;
        Some((email, password))
    }
}

/// 订单 API 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderApiConfig {
    pub base_url: String,
    /// 预置的系统令牌，配置后直接使用，不经过缓存
    pub system_token: Option<String>,
    pub system_credentials: Option<SystemCredentials>,
    pub timeout_seconds: u64,
}

impl Default for OrderApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            system_token: None,
            system_credentials: None,
            timeout_seconds: 30,
        }
    }
}

impl OrderApiConfig {
    /// 去除尾部斜杠后的基础地址
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// 预置令牌（空白视为未配置）
    pub fn static_token(&self) -> Option<&str> {
        self.system_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

/// 消费者配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// 通道预取数量（basic.qos）
    pub prefetch_count: u16,
    /// 最大投递次数，None 表示失败消息无限重新入队
    pub max_delivery_attempts: Option<u32>,
    /// 队列死信交换机，配置后声明队列时附带 x-dead-letter-exchange 参数
    pub dead_letter_exchange: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch_count: 16,
            max_delivery_attempts: None,
            dead_letter_exchange: None,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub rabbitmq: RabbitMqConfig,
    pub order_api: OrderApiConfig,
    pub consumer: ConsumerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. .env 文件（仅写入进程环境变量）
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（ORDER__ 前缀，如 ORDER__RABBITMQ__HOST_NAME -> rabbitmq.host_name）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 不存在是正常情况
        let _ = dotenvy::dotenv();

        let env = std::env::var("ORDER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 双下划线分隔层级，字段名自身可以包含单下划线
            .add_source(
                Environment::with_prefix("ORDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
