//! 可观测性：tracing 订阅器初始化
//!
//! TUI 占用终端时日志写入 `logs/murmur.log`，否则输出到 stderr。默认级别 info，`RUST_LOG` 覆盖。

use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化日志；`log_dir` 为 Some 时写文件，目录或文件无法创建时回退到 stderr
pub fn init(log_dir: Option<&Path>) {
    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("murmur.log"))
            .ok()
    });

    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match file {
        Some(file) => registry
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .try_init(),
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
