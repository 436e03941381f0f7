use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use muse::{AuthScheme, GatewayConfig, GatewayError, Muse, RateLimiter};

const CONFIG: &str = r#"
[providers.local]
base_url = "http://127.0.0.1:8080"
max_requests = 5
window_secs = 10
auth = { scheme = "header", name = "x-token" }
endpoints = { generate = "/v1/chat/completions" }

[cache]
memory_max_entries = 50
compression_threshold = 4096
max_age_secs = 86400

[retry]
max_attempts = 5
initial_delay_ms = 250

[queue]
max_rate_limit_wait_secs = 5

[pricing.local.tiny]
prompt_per_1k = 0.1
completion_per_1k = 0.2
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_all_sections_from_file() {
    let file = write_config(CONFIG);
    let config = GatewayConfig::load(Some(file.path())).unwrap();

    let local = config.provider("local").unwrap();
    assert_eq!(local.max_requests, 5);
    assert_eq!(local.window(), Duration::from_secs(10));
    assert_eq!(
        local.auth,
        AuthScheme::Header {
            name: "x-token".into()
        }
    );
    assert!(config.provider("openai").is_ok());

    assert_eq!(config.cache.memory_max_entries, 50);
    assert_eq!(config.cache.max_age_secs, Some(86_400));
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_delay_ms, 250);
    assert_eq!(config.queue.max_rate_limit_wait(), Duration::from_secs(5));

    assert!((config.pricing.estimate("local", "tiny", 1000, 1000) - 0.3).abs() < 1e-9);
    // built-in prices survive alongside configured ones
    assert!(config.pricing.get("openai", "gpt-4").is_some());
}

#[test]
fn limiter_follows_configured_windows() {
    let config = GatewayConfig::from_toml_str(CONFIG).unwrap();
    let limiter = RateLimiter::from_config(&config);
    for _ in 0..5 {
        assert!(limiter.can_proceed("local"));
        limiter.record_attempt("local");
    }
    assert!(!limiter.can_proceed("local"));
}

#[test]
fn malformed_toml_is_configuration_error() {
    let file = write_config("[providers.broken\nbase_url = ");
    let err = GatewayConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));
}

#[test]
fn zero_attempts_rejected() {
    let err = GatewayConfig::from_toml_str("[retry]\nmax_attempts = 0").unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));
}

#[tokio::test]
async fn builder_reads_config_file() {
    let file = write_config(CONFIG);
    let gateway = Muse::builder()
        .config_file(file.path())
        .api_key("local", "t")
        .build()
        .await
        .unwrap();
    assert_eq!(gateway.config().provider("local").unwrap().max_requests, 5);
    assert!((gateway.estimate_cost("local", "tiny", 2000, 0) - 0.2).abs() < 1e-9);
}
