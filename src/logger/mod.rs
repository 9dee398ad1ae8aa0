//! 日志初始化
//!
//! 终端输出始终开启；配置了日志目录时额外按天滚动写入文件。

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogConfig;

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "rulex.log";

/// 构造过滤器：RUST_LOG 优先，否则使用配置中的级别
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(default_directives("debug")))
}

fn default_directives(level: &str) -> String {
    format!("rulex_rs={},axum=info,tower_http=info", level)
}

/// 初始化全局日志，返回的 guard 必须在进程退出前一直持有
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config.level);
    let console = fmt::layer().with_target(false);

    match config.dir.as_deref() {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let file = fmt::layer().with_ansi(false).with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init();
            None
        }
    }
}
