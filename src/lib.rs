//! rulex-rs：设备数据采集网关
//!
//! 输入资源按统一生命周期接入规则引擎，后台轮询设备并把数据推入引擎队列，
//! 引擎再经钩子分发给输出目标。

pub mod api;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod logger;
pub mod resource;
pub mod snmp;
pub mod target;

pub use error::{AppError, Result};
