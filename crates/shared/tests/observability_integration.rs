//! 可观测性模块集成测试
//!
//! 测试指标导出、日志过滤与投递重试策略的对外行为。

// ============================================================================
// 指标导出测试
// ============================================================================

mod metrics_tests {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use order_shared::observability::metrics::{
        record_ack, record_api_request, record_delivery, record_handle_duration, record_nack,
        record_token_refresh,
    };

    #[test]
    fn test_recorded_metrics_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_delivery("order.created");
            record_delivery("order.created");
            record_ack("order.created");
            record_nack("order.status.changed", true);
            record_nack("order.status.changed", false);
            record_handle_duration("order.created", 0.05);
            record_api_request("GET", 200);
            record_api_request("PUT", 0);
            record_token_refresh("success");
        });

        let rendered = handle.render();

        assert!(rendered.contains(r#"order_consumer_deliveries_total{topic="order.created"} 2"#));
        assert!(rendered.contains(r#"order_consumer_acks_total{topic="order.created"} 1"#));
        assert!(rendered.contains("order_consumer_nacks_total"));
        assert!(rendered.contains(r#"requeue="true""#));
        assert!(rendered.contains(r#"requeue="false""#));
        assert!(rendered.contains("order_consumer_handle_duration_seconds"));
        assert!(rendered.contains(r#"status="0""#));
        assert!(rendered.contains(r#"order_api_token_refresh_total{outcome="success"} 1"#));
    }
}

// ============================================================================
// 日志过滤测试
// ============================================================================

mod tracing_tests {
    use order_shared::config::ObservabilityConfig;
    use order_shared::observability::tracing::env_filter;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_env_filter_uses_configured_level() {
        // RUST_LOG 优先级更高，存在时跳过
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }

        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(env_filter(&config).max_level_hint(), Some(LevelFilter::DEBUG));

        let config = ObservabilityConfig {
            log_level: "warn".to_string(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(env_filter(&config).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_json_format_switch() {
        let mut config = ObservabilityConfig::default();
        assert!(!config.json_logs());

        config.log_format = "json".to_string();
        assert!(config.json_logs());
    }
}

// ============================================================================
// 重试策略测试
// ============================================================================

mod redelivery_tests {
    use order_shared::amqp::Delivery;
    use order_shared::config::ConsumerConfig;
    use order_shared::redelivery::{RedeliveryPolicy, RedeliveryTracker};

    fn delivery(redelivered: bool, delivery_count: Option<u64>) -> Delivery {
        Delivery {
            redelivered,
            delivery_count,
            ..Delivery::new(1, b"{}".to_vec())
        }
    }

    #[test]
    fn test_unbounded_policy_never_exhausts() {
        let tracker = RedeliveryTracker::new(RedeliveryPolicy::unbounded());
        assert!(!tracker.is_exhausted(&delivery(true, Some(1_000))));
    }

    #[test]
    fn test_policy_from_config() {
        let config = ConsumerConfig {
            max_delivery_attempts: Some(3),
            ..ConsumerConfig::default()
        };
        let tracker = RedeliveryTracker::new(RedeliveryPolicy::from_config(&config));

        assert!(!tracker.is_exhausted(&delivery(false, None)));
        assert!(!tracker.is_exhausted(&delivery(true, Some(2))));
        assert!(tracker.is_exhausted(&delivery(true, Some(3))));
    }

    #[test]
    fn test_classic_queue_redeliveries_reach_cap() {
        let tracker = RedeliveryTracker::new(RedeliveryPolicy::capped(2));

        tracker.record_failure(&delivery(false, None));
        assert!(!tracker.is_exhausted(&delivery(true, None)));

        tracker.record_failure(&delivery(true, None));
        assert!(tracker.is_exhausted(&delivery(true, None)));
    }
}
