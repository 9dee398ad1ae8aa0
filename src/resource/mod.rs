//! 输入资源实现

pub mod snmp;

pub use snmp::SnmpResource;
