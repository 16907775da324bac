//! tensorgate entry point.
//!
//! - `tensorgate` or `tensorgate serve` - run the HTTP(S) server (default)
//! - `tensorgate version` - show version information
//! - `tensorgate help` - show usage

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use tensorgate::config;
use tensorgate::engine::LinearBackend;
use tensorgate::models;
use tensorgate::telemetry;
use tensorgate::transport::http::{DrainResult, HttpServer};
use tensorgate::Runtime;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => run_serve().await,
        "version" | "--version" | "-V" => {
            println!("tensorgate {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run_serve() -> ExitCode {
    if let Err(e) = telemetry::init_logging(&config::log_config()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let config = config::load();
    let bin_getter = models::dir_bin_getter(config.models_dir.clone());
    let runtime = Runtime::new(config, Arc::new(LinearBackend), bin_getter);
    let ctx = runtime.serve_context();

    let http_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, runtime.config.http_port));
    let http = match HttpServer::bind(http_addr, Arc::clone(&ctx), runtime.config.shutdown_timeout)
        .await
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind http listener");
            return ExitCode::FAILURE;
        }
    };

    #[cfg(feature = "tls")]
    let https = match &runtime.config.tls {
        Some(settings) => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port));
            match tensorgate::transport::tls::HttpsServer::bind(
                addr,
                Arc::clone(&ctx),
                settings,
                runtime.config.shutdown_timeout,
            )
            .await
            {
                Ok(server) => Some(server),
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind https listener");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    tracing::info!(
        addr = %http.local_addr(),
        workers = runtime.config.worker_threads,
        payload_limit = runtime.config.payload_limit,
        "tensorgate ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return ExitCode::FAILURE;
    }
    tracing::info!("shutdown signal received");

    // Drop queued inference backlog, then drain connections and workers.
    runtime.worker_pool.flush();

    report_drain("http", http.shutdown().await);
    #[cfg(feature = "tls")]
    if let Some(server) = https {
        report_drain("https", server.shutdown().await);
    }

    runtime.worker_pool.join();
    tracing::info!("shutdown complete");
    ExitCode::SUCCESS
}

fn report_drain(listener: &str, result: DrainResult) {
    if let DrainResult::Timeout { remaining } = result {
        tracing::warn!(listener, remaining, "connections still open at shutdown");
    }
}

fn print_usage() {
    eprintln!(
        "tensorgate {} - model-serving front end

USAGE:
    tensorgate [COMMAND]

COMMANDS:
    serve        Run the HTTP(S) server (default when no command given)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    TG_HTTP_PORT         HTTP listen port (default: 8080)
    TG_WORKER_THREADS    Inference worker threads (default: CPU count)
    TG_PAYLOAD_LIMIT     Max request payload in bytes (default: 16 MiB)
    TG_READ_TIMEOUT      Idle-read timeout in seconds (default: 30)
    TG_SHUTDOWN_TIMEOUT  Graceful shutdown drain in seconds (default: 30)
    TG_MODELS_DIR        Base directory for model binaries (default: models)
    TG_TLS_CERT          PEM certificate chain (enables HTTPS with TG_TLS_KEY)
    TG_TLS_KEY           PEM private key
    TG_TLS_PORT          HTTPS listen port (default: 8443)
    TG_LOG_FORMAT        json | pretty (default: json)
    TG_LOG_LEVEL         tracing filter (default: info)",
        env!("CARGO_PKG_VERSION")
    );
}
