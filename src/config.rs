//! Server configuration loading from environment variables.
//!
//! All values are loaded from `TG_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TG_HTTP_PORT` | 8080 | HTTP listen port |
//! | `TG_WORKER_THREADS` | 0 | Inference workers (0 = CPU count) |
//! | `TG_PAYLOAD_LIMIT` | 16777216 | Max request payload (bytes) |
//! | `TG_READ_TIMEOUT` | 30 | Idle-read timeout (secs) |
//! | `TG_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown drain (secs) |
//! | `TG_MODELS_DIR` | models | Base directory for model binaries |
//! | `TG_TLS_PORT` | 8443 | HTTPS listen port (with cert + key set) |
//! | `TG_TLS_CERT` | unset | PEM certificate chain path |
//! | `TG_TLS_KEY` | unset | PEM private key path |
//! | `TG_LOG_FORMAT` | json | `json` or `pretty` |
//! | `TG_LOG_LEVEL` | info | tracing filter directive |

use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::{LogConfig, LogFormat};

/// TLS material and port for the encrypted listener.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Everything the serving core consumes; owned by the caller and passed in.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub worker_threads: usize,
    pub payload_limit: usize,
    pub read_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub models_dir: PathBuf,
    pub tls: Option<TlsSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            worker_threads: num_cpus::get().max(1),
            payload_limit: 16 * 1024 * 1024,
            read_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            models_dir: PathBuf::from("models"),
            tls: None,
        }
    }
}

/// Parse a `u16` env var, returning `default` on missing or invalid.
fn parse_u16(key: &str, default: u16) -> u16 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u16>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_tls() -> Option<TlsSettings> {
    let cert_path = std::env::var("TG_TLS_CERT").ok()?;
    let key_path = std::env::var("TG_TLS_KEY").ok()?;
    Some(TlsSettings {
        port: parse_u16("TG_TLS_PORT", 8443),
        cert_path: PathBuf::from(cert_path),
        key_path: PathBuf::from(key_path),
    })
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> ServerConfig {
    const DEFAULT_PAYLOAD: usize = 16 * 1024 * 1024; // 16 MiB
    const MIN_PAYLOAD: usize = 4096; // floor: 4 KiB

    let worker_threads = parse_usize("TG_WORKER_THREADS", 0);
    let worker_threads = if worker_threads == 0 {
        num_cpus::get().max(1)
    } else {
        worker_threads
    };

    let payload_limit = parse_usize("TG_PAYLOAD_LIMIT", DEFAULT_PAYLOAD).max(MIN_PAYLOAD);
    let read_secs = parse_u64("TG_READ_TIMEOUT", 30).max(1);
    let shutdown_secs = parse_u64("TG_SHUTDOWN_TIMEOUT", 30).max(1);

    ServerConfig {
        http_port: parse_u16("TG_HTTP_PORT", 8080),
        worker_threads,
        payload_limit,
        read_timeout: Duration::from_secs(read_secs),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        models_dir: PathBuf::from(
            std::env::var("TG_MODELS_DIR").unwrap_or_else(|_| "models".into()),
        ),
        tls: load_tls(),
    }
}

/// Logging configuration from environment.
pub fn log_config() -> LogConfig {
    let format = match std::env::var("TG_LOG_FORMAT").as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    LogConfig {
        format,
        level: std::env::var("TG_LOG_LEVEL").unwrap_or_else(|_| "info".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "TG_HTTP_PORT",
        "TG_WORKER_THREADS",
        "TG_PAYLOAD_LIMIT",
        "TG_READ_TIMEOUT",
        "TG_SHUTDOWN_TIMEOUT",
        "TG_MODELS_DIR",
        "TG_TLS_PORT",
        "TG_TLS_CERT",
        "TG_TLS_KEY",
        "TG_LOG_FORMAT",
        "TG_LOG_LEVEL",
    ];

    fn clear_env_vars() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.http_port, 8080);
        assert!(cfg.worker_threads >= 1);
        assert_eq!(cfg.payload_limit, 16 * 1024 * 1024);
        assert_eq!(cfg.read_timeout.as_secs(), 30);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 30);
        assert_eq!(cfg.models_dir, PathBuf::from("models"));
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TG_HTTP_PORT", "9000");
        std::env::set_var("TG_WORKER_THREADS", "3");
        std::env::set_var("TG_PAYLOAD_LIMIT", "1048576");
        std::env::set_var("TG_READ_TIMEOUT", "5");
        let cfg = load();
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.worker_threads, 3);
        assert_eq!(cfg.payload_limit, 1_048_576);
        assert_eq!(cfg.read_timeout.as_secs(), 5);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TG_HTTP_PORT", "not_a_port");
        std::env::set_var("TG_PAYLOAD_LIMIT", "abc");
        let cfg = load();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.payload_limit, 16 * 1024 * 1024);
        clear_env_vars();
    }

    #[test]
    fn test_payload_limit_floor() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TG_PAYLOAD_LIMIT", "0");
        let cfg = load();
        assert!(cfg.payload_limit >= 4096, "payload limit must have a floor");
        clear_env_vars();
    }

    #[test]
    fn test_worker_threads_zero_means_auto() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TG_WORKER_THREADS", "0");
        let cfg = load();
        assert!(cfg.worker_threads >= 1);
        clear_env_vars();
    }

    #[test]
    fn test_tls_requires_both_cert_and_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("TG_TLS_CERT", "/tmp/cert.pem");
        assert!(load().tls.is_none());

        std::env::set_var("TG_TLS_KEY", "/tmp/key.pem");
        let tls = load().tls.expect("tls settings");
        assert_eq!(tls.port, 8443);
        assert_eq!(tls.cert_path, PathBuf::from("/tmp/cert.pem"));
        clear_env_vars();
    }

    #[test]
    fn test_log_config_from_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        assert_eq!(log_config().format, LogFormat::Json);
        assert_eq!(log_config().level, "info");

        std::env::set_var("TG_LOG_FORMAT", "pretty");
        std::env::set_var("TG_LOG_LEVEL", "debug");
        assert_eq!(log_config().format, LogFormat::Pretty);
        assert_eq!(log_config().level, "debug");
        clear_env_vars();
    }
}
