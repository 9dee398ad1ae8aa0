//! 进程配置模块

mod app_config;

pub use app_config::{ApiConfig, AppConfig, EndpointConfig, EngineConfig, LogConfig};
