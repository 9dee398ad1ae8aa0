//! SNMP 协议模块
//!
//! 提供 OID、BER 编解码以及基于 UDP / TCP 的 v1/v2c 客户端。

pub mod client;
pub mod codec;
pub mod oid;

pub use client::{ConnectParams, NetConnector, NetSnmpClient, SnmpClient, SnmpConnector, Transport};
pub use codec::{SnmpValue, VarBind, Version};
pub use oid::Oid;
