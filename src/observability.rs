//! 可观测性
//!
//! 日志走 stderr，stdout 留给批量生成的进度输出。级别由 RUST_LOG
//! 控制，缺省 info。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
