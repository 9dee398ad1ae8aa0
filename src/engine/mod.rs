//! 规则引擎模块
//!
//! 端点注册表、数据队列、钩子与插件管理

mod engine;

pub use engine::{DEFAULT_QUEUE_CAPACITY, Engine};
