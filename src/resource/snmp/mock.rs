//! 测试用的模拟设备、客户端与连接器

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::resource::snmp::reader::oids;
use crate::snmp::{
    ConnectParams, Oid, SnmpClient, SnmpConnector, SnmpValue, Transport, VarBind, Version,
};

pub(crate) fn oid(s: &str) -> Oid {
    s.parse().expect("测试 OID 非法")
}

pub(crate) fn params(target: &str) -> ConnectParams {
    ConnectParams {
        target: target.to_string(),
        port: 161,
        transport: Transport::Udp,
        community: "public".to_string(),
        version: Version::V2c,
        timeout: Duration::from_secs(1),
    }
}

/// 模拟设备的 MIB 内容与故障注入
#[derive(Default)]
pub(crate) struct MockDevice {
    scalars: Mutex<HashMap<Oid, SnmpValue>>,
    walks: Mutex<HashMap<Oid, Vec<VarBind>>>,
    failing: Mutex<HashSet<Oid>>,
    hanging: Mutex<HashSet<Oid>>,
    panicking: Mutex<HashSet<Oid>>,
    row_delay: Mutex<Duration>,
    pub reads: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, key: &str, value: SnmpValue) {
        self.scalars.lock().unwrap().insert(oid(key), value);
    }

    pub fn set_walk(&self, root: &str, rows: Vec<(&str, SnmpValue)>) {
        let rows = rows
            .into_iter()
            .map(|(o, v)| VarBind::new(oid(o), v))
            .collect();
        self.walks.lock().unwrap().insert(oid(root), rows);
    }

    /// 遍历时每行之前等待的时长
    pub fn set_row_delay(&self, delay: Duration) {
        *self.row_delay.lock().unwrap() = delay;
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(oid(key));
    }

    pub fn hang(&self, key: &str) {
        self.hanging.lock().unwrap().insert(oid(key));
    }

    pub fn panic_on(&self, key: &str) {
        self.panicking.lock().unwrap().insert(oid(key));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.hanging.lock().unwrap().clear();
        self.panicking.lock().unwrap().clear();
    }

    async fn inject(&self, key: &Oid) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let panics = self.panicking.lock().unwrap().contains(key);
        let hangs = self.hanging.lock().unwrap().contains(key);
        let fails = self.failing.lock().unwrap().contains(key);
        if panics {
            panic!("模拟设备在 {} 上崩溃", key);
        }
        if hangs {
            std::future::pending::<()>().await;
        }
        if fails {
            return Err(AppError::Read(format!("模拟读取失败: {}", key)));
        }
        Ok(())
    }
}

/// 端到端场景使用的示例设备
pub(crate) fn sample_device() -> Arc<MockDevice> {
    let device = MockDevice::new();
    device.set(oids::SYS_DESCR, SnmpValue::OctetString(b"SysA".to_vec()));
    device.set(oids::SYS_NAME, SnmpValue::OctetString(b"host1".to_vec()));
    device.set(oids::HR_MEMORY_SIZE, SnmpValue::Integer(2048));
    device.set_walk(
        oids::HR_PROCESSOR_LOAD,
        vec![
            (".1.3.6.1.2.1.25.3.3.1.2.0", SnmpValue::Integer(10)),
            (".1.3.6.1.2.1.25.3.3.1.2.1", SnmpValue::Integer(20)),
        ],
    );
    device.set_walk(
        oids::IP_AD_ENT_IF_INDEX,
        vec![
            (".1.3.6.1.2.1.4.20.1.2.10.0.0.1", SnmpValue::Integer(2)),
            (".1.3.6.1.2.1.4.20.1.2.127.0.0.1", SnmpValue::Integer(1)),
        ],
    );
    let mac = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01];
    device.set_walk(
        oids::IF_PHYS_ADDRESS,
        vec![
            (".1.3.6.1.2.1.2.2.1.6.2", SnmpValue::OctetString(mac.clone())),
            (".1.3.6.1.2.1.2.2.1.6.3", SnmpValue::OctetString(mac)),
        ],
    );
    device
}

pub(crate) struct MockClient {
    device: Arc<MockDevice>,
    closed: AtomicBool,
}

impl MockClient {
    pub fn new(device: Arc<MockDevice>) -> Self {
        Self {
            device,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Read("连接已关闭".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnmpClient for MockClient {
    async fn get(&self, keys: &[Oid]) -> Result<Vec<VarBind>> {
        self.check_open()?;
        let mut out = Vec::new();
        for key in keys {
            self.device.inject(key).await?;
            let value = self
                .device
                .scalars
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .unwrap_or(SnmpValue::NoSuchObject);
            out.push(VarBind::new(key.clone(), value));
        }
        Ok(out)
    }

    async fn walk_into(&self, root: &Oid, rows: &mut Vec<VarBind>) -> Result<()> {
        self.check_open()?;
        self.device.inject(root).await?;
        let table = self
            .device
            .walks
            .lock()
            .unwrap()
            .get(root)
            .cloned()
            .unwrap_or_default();
        let delay = *self.device.row_delay.lock().unwrap();
        for row in table {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            rows.push(row);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 模拟连接器：按目标地址决定是否可达
#[derive(Default)]
pub(crate) struct MockConnector {
    devices: Mutex<HashMap<String, Arc<MockDevice>>>,
    unreachable: Mutex<HashSet<String>>,
    clients: Mutex<Vec<Arc<MockClient>>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_device(&self, target: &str, device: Arc<MockDevice>) {
        self.devices.lock().unwrap().insert(target.to_string(), device);
    }

    pub fn set_unreachable(&self, target: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(target.to_string());
        } else {
            set.remove(target);
        }
    }

    /// 建立到 target 的连接前等待 delay
    pub fn set_delay(&self, target: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(target.to_string(), delay);
    }

    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn open_clients(&self) -> usize {
        self.clients().iter().filter(|c| !c.is_closed()).count()
    }
}

#[async_trait]
impl SnmpConnector for MockConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn SnmpClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&params.target).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.lock().unwrap().contains(&params.target) {
            return Err(AppError::connect(params.label(), "模拟不可达"));
        }
        let device = self
            .devices
            .lock()
            .unwrap()
            .entry(params.target.clone())
            .or_insert_with(MockDevice::new)
            .clone();
        let client = Arc::new(MockClient::new(device));
        self.clients.lock().unwrap().push(Arc::clone(&client));
        let client: Arc<dyn SnmpClient> = client;
        Ok(client)
    }
}
