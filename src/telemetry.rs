use axum::{extract::Request, middleware::Next, response::Response};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};

const LOG_FILE_PREFIX: &str = "app";
const LOG_FILES_KEPT: usize = 7;

/// Logs to stdout and to a daily-rotated file under `log_dir`.
/// The returned guard flushes the file writer and must outlive the server.
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard, InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    Ok(guard)
}

// app.log.YYYY-MM-DD, rotated at midnight, last seven kept
fn file_appender(log_dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(log_dir)
}

/// One log line per request: method, path, status and duration.
pub async fn log_requests(req: Request, next: Next) -> Response {
    REQUEST_TOTAL.inc();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start_time = Instant::now();

    let response = next.run(req).await;

    let elapsed = start_time.elapsed();
    REQUEST_LATENCY.observe(elapsed.as_secs_f64());
    let status = response.status();
    if status.is_server_error() {
        warn!("{} {} {} {}ms", method, path, status.as_u16(), elapsed.as_millis());
    } else {
        info!("{} {} {} {}ms", method, path, status.as_u16(), elapsed.as_millis());
    }
    response
}
