//! 设备属性读取
//!
//! 每次轮询读取一组固定属性。单个属性读取失败（含超时）只记日志并取空值，
//! 不影响其他属性；值类型与预期不符时按缺失处理。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::snmp::{Oid, SnmpClient, SnmpValue, VarBind};

/// 遍历的总预算是单次读取期限的倍数，单次 GetNext 仍受客户端超时约束
const WALK_BUDGET_FACTOR: u32 = 6;

/// 轮询使用的 OID
pub mod oids {
    /// sysDescr.0
    pub const SYS_DESCR: &str = ".1.3.6.1.2.1.1.1.0";
    /// sysName.0
    pub const SYS_NAME: &str = ".1.3.6.1.2.1.1.5.0";
    /// hrMemorySize.0
    pub const HR_MEMORY_SIZE: &str = ".1.3.6.1.2.1.25.2.2.0";
    /// hrProcessorLoad
    pub const HR_PROCESSOR_LOAD: &str = ".1.3.6.1.2.1.25.3.3.1.2";
    /// ipAdEntIfIndex，行索引即接口地址
    pub const IP_AD_ENT_IF_INDEX: &str = ".1.3.6.1.2.1.4.20.1.2";
    /// ifPhysAddress
    pub const IF_PHYS_ADDRESS: &str = ".1.3.6.1.2.1.2.2.1.6";
}

/// 一次轮询得到的设备快照，即推送到队列的载荷
///
/// 字段顺序即序列化顺序，任何字段都不会缺省。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub description: String,
    pub name: String,
    pub memory: i64,
    pub cpus: BTreeMap<String, i64>,
    pub ips: Vec<String>,
    #[serde(rename = "netsMac")]
    pub nets_mac: Vec<String>,
}

/// 绑定到单个会话句柄的读取器
pub struct DeviceReader<'a> {
    client: &'a dyn SnmpClient,
    deadline: Duration,
    label: &'a str,
}

impl<'a> DeviceReader<'a> {
    pub fn new(client: &'a dyn SnmpClient, deadline: Duration, label: &'a str) -> Self {
        Self {
            client,
            deadline,
            label,
        }
    }

    /// 依次读取全部属性
    pub async fn snapshot(&self) -> DeviceSnapshot {
        let cpus = self.cpu_loads().await;
        let nets_mac = self.hardware_macs().await;
        let memory = self.total_memory().await;
        let ips = self.interface_ips().await;
        let name = self.host_name().await;
        let description = self.system_description().await;

        DeviceSnapshot {
            description,
            name,
            memory,
            cpus,
            ips,
            nets_mac,
        }
    }

    pub async fn system_description(&self) -> String {
        let value = self.get_one(oids::SYS_DESCR).await;
        self.recover("description", value.map(|v| v.as_ref().and_then(octets_to_string)))
    }

    pub async fn host_name(&self) -> String {
        let value = self.get_one(oids::SYS_NAME).await;
        self.recover("name", value.map(|v| v.as_ref().and_then(octets_to_string)))
    }

    pub async fn total_memory(&self) -> i64 {
        let value = self.get_one(oids::HR_MEMORY_SIZE).await;
        self.recover("memory", value.map(|v| v.and_then(|v| v.as_integer())))
    }

    pub async fn cpu_loads(&self) -> BTreeMap<String, i64> {
        let rows = self.walk_rows(oids::HR_PROCESSOR_LOAD).await;
        self.recover("cpus", rows.map(|(root, rows)| Some(collect_cpu_loads(&root, &rows))))
    }

    pub async fn interface_ips(&self) -> Vec<String> {
        let rows = self.walk_rows(oids::IP_AD_ENT_IF_INDEX).await;
        self.recover("ips", rows.map(|(root, rows)| Some(collect_interface_ips(&root, &rows))))
    }

    pub async fn hardware_macs(&self) -> Vec<String> {
        let rows = self.walk_rows(oids::IF_PHYS_ADDRESS).await;
        self.recover("netsMac", rows.map(|(_, rows)| Some(collect_hardware_macs(&rows))))
    }

    /// 读取失败时记录日志并返回空值
    fn recover<T: Default>(&self, attribute: &str, result: Result<Option<T>>) -> T {
        match result {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(target_addr = %self.label, attribute, "属性读取失败: {}", e);
                T::default()
            }
        }
    }

    async fn get_one(&self, key: &str) -> Result<Option<SnmpValue>> {
        let oid: Oid = key.parse()?;
        let varbinds = tokio::time::timeout(self.deadline, self.client.get(std::slice::from_ref(&oid)))
            .await
            .map_err(|_| AppError::Read(format!("读取 {} 超时 ({:?})", key, self.deadline)))??;

        Ok(varbinds
            .into_iter()
            .find(|vb| vb.oid == oid)
            .map(|vb| vb.value)
            .filter(|v| !v.is_exception()))
    }

    /// 超出预算或中途出错时，已读到的行照常返回
    async fn walk_rows(&self, root: &str) -> Result<(Oid, Vec<VarBind>)> {
        let oid: Oid = root.parse()?;
        let budget = self.deadline * WALK_BUDGET_FACTOR;
        let mut rows = Vec::new();
        let outcome = match tokio::time::timeout(budget, self.client.walk_into(&oid, &mut rows)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Read(format!("遍历 {} 超时 ({:?})", root, budget))),
        };

        match outcome {
            Ok(()) => Ok((oid, rows)),
            Err(e) if !rows.is_empty() => {
                warn!(target_addr = %self.label, root, rows = rows.len(), "遍历未完成，使用已读取的部分: {}", e);
                Ok((oid, rows))
            }
            Err(e) => Err(e),
        }
    }
}

fn octets_to_string(value: &SnmpValue) -> Option<String> {
    value
        .as_octets()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

/// 行索引 -> 整数负载，非整数行忽略
pub fn collect_cpu_loads(root: &Oid, rows: &[VarBind]) -> BTreeMap<String, i64> {
    rows.iter()
        .filter_map(|vb| {
            let load = vb.value.as_integer()?;
            let index = vb.oid.suffix(root)?;
            Some((index, load))
        })
        .collect()
}

/// 行索引即接口地址，排除回环地址
pub fn collect_interface_ips(root: &Oid, rows: &[VarBind]) -> Vec<String> {
    rows.iter()
        .filter(|vb| vb.value.as_integer().is_some())
        .filter_map(|vb| vb.oid.suffix(root))
        .filter(|ip| !is_loopback(ip))
        .collect()
}

/// 6 字节物理地址，格式化为 `xx-xx-xx-xx-xx-xx` 并按首次出现顺序去重
pub fn collect_hardware_macs(rows: &[VarBind]) -> Vec<String> {
    let mut macs: Vec<String> = Vec::new();
    for vb in rows {
        let Some(bytes) = vb.value.as_octets() else {
            continue;
        };
        if bytes.len() != 6 {
            continue;
        }
        let mac = bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join("-");
        if !macs.contains(&mac) {
            macs.push(mac);
        }
    }
    macs
}

fn is_loopback(addr: &str) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => addr == "127.0.0.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::snmp::mock::{MockClient, MockDevice, oid, sample_device};

    const DEADLINE: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_snapshot_of_sample_device() {
        let client = MockClient::new(sample_device());
        let reader = DeviceReader::new(&client, DEADLINE, "udp://mock:161");
        let snapshot = reader.snapshot().await;

        assert_eq!(snapshot.description, "SysA");
        assert_eq!(snapshot.name, "host1");
        assert_eq!(snapshot.memory, 2048);
        assert_eq!(snapshot.cpus.get("0"), Some(&10));
        assert_eq!(snapshot.cpus.get("1"), Some(&20));
        assert_eq!(snapshot.ips, vec!["10.0.0.1".to_string()]);
        assert_eq!(snapshot.nets_mac, vec!["de-ad-be-ef-00-01".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_cpu_walk_gives_empty_map() {
        let device = sample_device();
        device.set_walk(oids::HR_PROCESSOR_LOAD, vec![]);
        let client = MockClient::new(device);
        let snapshot = DeviceReader::new(&client, DEADLINE, "mock").snapshot().await;

        assert!(snapshot.cpus.is_empty());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["cpus"], serde_json::json!({}));
    }

    #[test]
    fn test_loopback_never_in_ips() {
        let root = oid(oids::IP_AD_ENT_IF_INDEX);
        let rows = vec![
            VarBind::new(oid(".1.3.6.1.2.1.4.20.1.2.127.0.0.1"), SnmpValue::Integer(1)),
            VarBind::new(oid(".1.3.6.1.2.1.4.20.1.2.192.168.1.5"), SnmpValue::Integer(3)),
            VarBind::new(oid(".1.3.6.1.2.1.4.20.1.2.127.0.0.1"), SnmpValue::Integer(1)),
        ];
        assert_eq!(collect_interface_ips(&root, &rows), vec!["192.168.1.5".to_string()]);
    }

    #[test]
    fn test_macs_deduplicated_and_padded() {
        let mac = SnmpValue::OctetString(vec![0x0a, 0x01, 0x02, 0x03, 0x04, 0x05]);
        let rows = vec![
            VarBind::new(oid(".1.3.6.1.2.1.2.2.1.6.1"), mac.clone()),
            VarBind::new(oid(".1.3.6.1.2.1.2.2.1.6.2"), SnmpValue::OctetString(vec![])),
            VarBind::new(oid(".1.3.6.1.2.1.2.2.1.6.3"), mac),
        ];
        assert_eq!(collect_hardware_macs(&rows), vec!["0a-01-02-03-04-05".to_string()]);
    }

    #[test]
    fn test_type_mismatch_is_absent() {
        let root = oid(oids::HR_PROCESSOR_LOAD);
        let rows = vec![
            VarBind::new(oid(".1.3.6.1.2.1.25.3.3.1.2.0"), SnmpValue::OctetString(b"10".to_vec())),
            VarBind::new(oid(".1.3.6.1.2.1.25.3.3.1.2.1"), SnmpValue::Integer(5)),
        ];
        let cpus = collect_cpu_loads(&root, &rows);
        assert_eq!(cpus.len(), 1);
        assert_eq!(cpus.get("1"), Some(&5));
    }

    #[tokio::test]
    async fn test_wrong_scalar_type_defaults() {
        let device = sample_device();
        device.set(oids::SYS_NAME, SnmpValue::Integer(42));
        device.set(oids::HR_MEMORY_SIZE, SnmpValue::OctetString(b"2048".to_vec()));
        let client = MockClient::new(device);
        let reader = DeviceReader::new(&client, DEADLINE, "mock");

        assert_eq!(reader.host_name().await, "");
        assert_eq!(reader.total_memory().await, 0);
        assert_eq!(reader.system_description().await, "SysA");
    }

    #[tokio::test]
    async fn test_single_failed_read_does_not_stop_others() {
        let device = sample_device();
        device.fail(oids::HR_MEMORY_SIZE);
        let client = MockClient::new(device);
        let snapshot = DeviceReader::new(&client, DEADLINE, "mock").snapshot().await;

        assert_eq!(snapshot.memory, 0);
        assert_eq!(snapshot.name, "host1");
        assert_eq!(snapshot.description, "SysA");
        assert_eq!(snapshot.cpus.len(), 2);
        assert_eq!(snapshot.ips.len(), 1);
        assert_eq!(snapshot.nets_mac.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_read_hits_deadline() {
        let device = MockDevice::new();
        device.set(oids::SYS_NAME, SnmpValue::OctetString(b"slow".to_vec()));
        device.hang(oids::IF_PHYS_ADDRESS);
        let client = MockClient::new(device);
        let snapshot = DeviceReader::new(&client, DEADLINE, "mock").snapshot().await;

        assert!(snapshot.nets_mac.is_empty());
        assert_eq!(snapshot.name, "slow");
    }

    fn cpu_rows(count: usize) -> Vec<(String, SnmpValue)> {
        (0..count)
            .map(|i| (format!("{}.{}", oids::HR_PROCESSOR_LOAD, i), SnmpValue::Integer(i as i64)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_walk_longer_than_deadline_completes() {
        // 10 行 * 500ms 超过单次期限，但在遍历预算之内
        let device = MockDevice::new();
        let rows = cpu_rows(10);
        device.set_walk(
            oids::HR_PROCESSOR_LOAD,
            rows.iter().map(|(o, v)| (o.as_str(), v.clone())).collect(),
        );
        device.set_row_delay(Duration::from_millis(500));
        let client = MockClient::new(device);

        let cpus = DeviceReader::new(&client, DEADLINE, "mock").cpu_loads().await;
        assert_eq!(cpus.len(), 10);
        assert_eq!(cpus.get("9"), Some(&9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_over_budget_keeps_partial_rows() {
        let device = MockDevice::new();
        let rows = cpu_rows(40);
        device.set_walk(
            oids::HR_PROCESSOR_LOAD,
            rows.iter().map(|(o, v)| (o.as_str(), v.clone())).collect(),
        );
        device.set_row_delay(Duration::from_millis(500));
        device.set(oids::SYS_NAME, SnmpValue::OctetString(b"big".to_vec()));
        let client = MockClient::new(device);

        let snapshot = DeviceReader::new(&client, DEADLINE, "mock").snapshot().await;
        assert!(!snapshot.cpus.is_empty());
        assert!(snapshot.cpus.len() < 40);
        assert_eq!(snapshot.cpus.get("0"), Some(&0));
        assert_eq!(snapshot.name, "big");
    }
}
