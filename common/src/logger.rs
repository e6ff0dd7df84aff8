// Standard library imports
use std::path::Path;

// Third party imports
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Khởi tạo logging: layer stderr có màu + layer file xoay vòng theo ngày
/// không màu. Mức lọc lấy từ `level` (cú pháp EnvFilter), fallback "info".
/// Giữ `WorkerGuard` trả về sống đến hết tiến trình để flush log file.
pub fn init(level: &str, log_dir: &Path, file_prefix: &str, ansi: bool) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_ansi(ansi),
        )
        .with(
            fmt::Layer::new()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
        .context("tracing subscriber already initialized")?;

    Ok(guard)
}
