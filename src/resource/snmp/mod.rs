//! SNMP 轮询资源
//!
//! 按配置周期轮询一组设备，读取系统描述、名称、内存、CPU 负载、接口 IP
//! 与物理地址，封装为 JSON 推入引擎队列。

pub mod config;
pub mod poller;
pub mod reader;
pub mod resource;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{SnmpConfig, SnmpTarget};
pub use reader::DeviceSnapshot;
pub use resource::SnmpResource;
