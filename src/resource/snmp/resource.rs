//! SNMP 轮询资源
//!
//! 每个配置目标对应一个会话和一个后台轮询任务。启动采用全有或全无：
//! 任一会话连接失败则释放已建立的连接，不启动任何任务。

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SnmpConfig;
use super::poller::{PollControl, PollTask};
use super::session::SessionPool;
use crate::core::{DataModel, InEnd, Resource, ResourceState, RuleEngine};
use crate::error::{AppError, Result};
use crate::snmp::{NetConnector, SnmpClient, SnmpConnector};

/// 停止时等待轮询任务自行退出的时间，超时后强制取消
const STOP_GRACE: Duration = Duration::from_secs(1);

pub struct SnmpResource {
    in_end_id: RwLock<String>,
    enabled: AtomicBool,
    engine: Arc<dyn RuleEngine>,
    connector: Arc<dyn SnmpConnector>,
    pool: Arc<SessionPool>,
    /// 运行中的轮询任务，同时作为生命周期操作的串行锁
    tasks: Mutex<Vec<JoinHandle<()>>>,
    control: watch::Sender<PollControl>,
    config: RwLock<Option<SnmpConfig>>,
}

impl SnmpResource {
    pub fn new(engine: Arc<dyn RuleEngine>, connector: Arc<dyn SnmpConnector>) -> Self {
        let (control, _) = watch::channel(PollControl::Stopped);
        Self {
            in_end_id: RwLock::new(String::new()),
            enabled: AtomicBool::new(true),
            engine,
            connector,
            pool: Arc::new(SessionPool::new()),
            tasks: Mutex::new(Vec::new()),
            control,
            config: RwLock::new(None),
        }
    }

    /// 使用真实网络连接器
    pub fn with_net(engine: Arc<dyn RuleEngine>) -> Self {
        Self::new(engine, Arc::new(NetConnector))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// 当前是否处于暂停
    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == PollControl::Paused
    }

    /// 运行中的轮询任务数
    pub async fn running_tasks(&self) -> usize {
        self.tasks.lock().await.len()
    }

    fn in_end_id(&self) -> String {
        self.in_end_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 从引擎中的端点读取并校验配置
    fn load_config(&self) -> Result<SnmpConfig> {
        let id = self.in_end_id();
        let in_end = self
            .engine
            .get_in_end(&id)
            .ok_or_else(|| AppError::NotFound(format!("输入端 {}", id)))?;
        SnmpConfig::from_value(&in_end.config)
    }

    async fn close_all(clients: Vec<Arc<dyn SnmpClient>>) {
        for client in clients {
            client.close().await;
        }
    }

    fn write_state(&self, state: ResourceState) {
        if let Some(in_end) = self.details() {
            in_end.set_state(state);
        }
    }
}

#[async_trait]
impl Resource for SnmpResource {
    async fn test(&self, in_end_id: &str) -> bool {
        let Some(in_end) = self.engine.get_in_end(in_end_id) else {
            warn!("探测失败，输入端不存在: {}", in_end_id);
            return false;
        };
        let config = match SnmpConfig::from_value(&in_end.config) {
            Ok(config) => config,
            Err(e) => {
                error!("探测失败，配置非法: {}", e);
                return false;
            }
        };

        let params = config.connect_params();
        let results = join_all(params.iter().map(|p| self.connector.connect(p))).await;
        let mut reachable = 0;
        for result in results {
            match result {
                Ok(client) => {
                    client.close().await;
                    reachable += 1;
                }
                Err(e) => warn!("探测连接失败: {}", e),
            }
        }
        reachable == params.len()
    }

    async fn register(&self, in_end_id: &str) -> Result<()> {
        *self
            .in_end_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = in_end_id.to_string();
        debug!("SNMP 资源绑定输入端: {}", in_end_id);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let id = self.in_end_id();
        if !tasks.is_empty() {
            return Err(AppError::AlreadyStarted(id));
        }

        let config = self.load_config()?;
        let params = config.connect_params();
        Self::close_all(self.pool.reset(params.clone()).await).await;

        // 第一阶段：全部会话建立连接
        for (i, p) in params.iter().enumerate() {
            match self.connector.connect(p).await {
                Ok(client) => {
                    self.pool.set_client(i, Some(client)).await;
                }
                Err(e) => {
                    error!(in_end = %id, "SNMP 会话 {} 连接失败，放弃启动: {}", i, e);
                    Self::close_all(self.pool.clear().await).await;
                    return Err(e);
                }
            }
        }

        // 第二阶段：每个会话一个轮询任务
        self.control.send_replace(PollControl::Running);
        for (i, p) in params.iter().enumerate() {
            let task = PollTask {
                index: i,
                label: p.label(),
                in_end_id: id.clone(),
                period: config.period(),
                deadline: config.call_timeout(),
                pool: Arc::clone(&self.pool),
                engine: Arc::clone(&self.engine),
                control: self.control.subscribe(),
            };
            tasks.push(task.spawn());
        }

        info!(
            in_end = %id,
            "SNMP 资源启动成功: {} 个会话，周期 {} 秒",
            params.len(),
            config.frequency
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn reload(&self) -> Result<()> {
        info!(in_end = %self.in_end_id(), "SNMP 资源重载");
        self.stop().await;
        self.start().await
    }

    async fn pause(&self) {
        let paused = self.control.send_if_modified(|state| {
            if *state == PollControl::Running {
                *state = PollControl::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            info!(in_end = %self.in_end_id(), "SNMP 资源暂停轮询");
        }
    }

    async fn resume(&self) {
        let resumed = self.control.send_if_modified(|state| {
            if *state == PollControl::Paused {
                *state = PollControl::Running;
                true
            } else {
                false
            }
        });
        if resumed {
            info!(in_end = %self.in_end_id(), "SNMP 资源恢复轮询");
        }
    }

    async fn status(&self) -> ResourceState {
        // 与 start / stop / reload 串行，句柄只会写回它所属的那一代会话
        let _lifecycle = self.tasks.lock().await;
        let params = self.pool.targets().await;
        if params.is_empty() {
            self.write_state(ResourceState::Down);
            return ResourceState::Down;
        }

        // 每个会话重新建立一次连接，成功则替换并关闭旧句柄
        let results = join_all(params.iter().map(|p| self.connector.connect(p))).await;
        let mut up = 0;
        let mut replaced = Vec::new();
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(client) => {
                    up += 1;
                    replaced.extend(self.pool.set_client(i, Some(client)).await);
                }
                Err(e) => error!("SNMP 会话 {} 状态检查失败: {}", i, e),
            }
        }
        Self::close_all(replaced).await;

        let state = if up == params.len() {
            ResourceState::Up
        } else {
            ResourceState::Down
        };
        self.write_state(state);
        state
    }

    async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        self.control.send_replace(PollControl::Stopped);

        let handles: Vec<JoinHandle<()>> = tasks.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(STOP_GRACE, join_all(handles))
            .await
            .is_err()
        {
            warn!("部分轮询任务未在 {:?} 内退出，强制取消", STOP_GRACE);
            for abort in aborts {
                abort.abort();
            }
        }

        Self::close_all(self.pool.clear().await).await;
        self.write_state(ResourceState::Down);
        info!(in_end = %self.in_end_id(), "SNMP 资源已停止");
    }

    fn details(&self) -> Option<Arc<InEnd>> {
        self.engine.get_in_end(&self.in_end_id())
    }

    fn data_models(&self) -> Vec<DataModel> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.data_models())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QueueData;
    use crate::engine::Engine;
    use crate::resource::snmp::mock::{MockConnector, sample_device};
    use crate::resource::snmp::reader::oids;
    use crate::snmp::SnmpValue;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn config(targets: &[&str]) -> serde_json::Value {
        let targets: Vec<_> = targets
            .iter()
            .map(|t| {
                json!({
                    "target": t,
                    "port": 161,
                    "transport": "udp",
                    "community": "public",
                    "version": 2,
                    "dataModels": []
                })
            })
            .collect();
        json!({ "frequency": 5, "timeout": 1, "targets": targets })
    }

    async fn setup(
        targets: &[&str],
    ) -> (
        Arc<Engine>,
        mpsc::Receiver<QueueData>,
        Arc<MockConnector>,
        SnmpResource,
    ) {
        let (engine, rx) = Engine::new(64);
        engine.add_in_end(Arc::new(InEnd::with_id(
            "INEND-SNMP",
            "SNMP",
            "switches",
            "",
            config(targets),
        )));
        let connector = MockConnector::new();
        for t in targets {
            connector.with_device(t, sample_device());
        }
        let resource = SnmpResource::new(
            Arc::clone(&engine) as Arc<dyn RuleEngine>,
            Arc::clone(&connector) as Arc<dyn SnmpConnector>,
        );
        resource.register("INEND-SNMP").await.unwrap();
        (engine, rx, connector, resource)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_each_session() {
        let (engine, mut rx, _connector, resource) = setup(&["10.0.0.1", "10.0.0.2"]).await;
        resource.start().await.unwrap();
        assert_eq!(resource.running_tasks().await, 2);

        // 首次采集在一个周期之后
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        for envelope in [a, b] {
            assert!(envelope.data.contains("\"netsMac\":[\"de-ad-be-ef-00-01\"]"));
            assert_eq!(
                envelope.in_end.as_ref().map(|e| e.id.clone()),
                Some("INEND-SNMP".to_string())
            );
        }
        assert!(engine.get_in_end("INEND-SNMP").is_some());
        resource.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_all_up_and_written_back() {
        let (engine, _rx, _connector, resource) = setup(&["10.0.0.1", "10.0.0.2"]).await;
        resource.start().await.unwrap();

        assert_eq!(resource.status().await, ResourceState::Up);
        let in_end = engine.get_in_end("INEND-SNMP").unwrap();
        assert_eq!(in_end.get_state(), ResourceState::Up);
        resource.stop().await;
        assert_eq!(in_end.get_state(), ResourceState::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_down_when_any_session_fails() {
        let (engine, _rx, connector, resource) = setup(&["10.0.0.1", "10.0.0.2"]).await;
        resource.start().await.unwrap();

        connector.set_unreachable("10.0.0.2", true);
        assert_eq!(resource.status().await, ResourceState::Down);
        assert_eq!(
            engine.get_in_end("INEND-SNMP").unwrap().get_state(),
            ResourceState::Down
        );

        connector.set_unreachable("10.0.0.2", false);
        assert_eq!(resource.status().await, ResourceState::Up);
        resource.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_closes_replaced_handles() {
        let (_engine, _rx, connector, resource) = setup(&["10.0.0.1", "10.0.0.2"]).await;
        resource.start().await.unwrap();

        assert_eq!(resource.status().await, ResourceState::Up);
        assert_eq!(resource.status().await, ResourceState::Up);
        assert_eq!(connector.clients().len(), 6);
        assert_eq!(connector.open_clients(), 2);
        resource.stop().await;
        assert_eq!(connector.open_clients(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_serialized_with_reload() {
        let (engine, mut rx, connector, resource) = setup(&["old"]).await;
        let old = sample_device();
        old.set(oids::SYS_NAME, SnmpValue::OctetString(b"OLD-DEVICE".to_vec()));
        let new = sample_device();
        new.set(oids::SYS_NAME, SnmpValue::OctetString(b"NEW-DEVICE".to_vec()));
        connector.with_device("old", old);
        connector.with_device("new", new);
        resource.start().await.unwrap();

        // 状态检查连接旧目标期间，配置被替换并重载
        connector.set_delay("old", Duration::from_millis(200));
        let resource = Arc::new(resource);
        let checking = tokio::spawn({
            let resource = Arc::clone(&resource);
            async move { resource.status().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.add_in_end(Arc::new(InEnd::with_id(
            "INEND-SNMP",
            "SNMP",
            "switches",
            "",
            config(&["new"]),
        )));
        resource.reload().await.unwrap();
        assert_eq!(checking.await.unwrap(), ResourceState::Up);

        let envelope = rx.recv().await.unwrap();
        assert!(envelope.data.contains("\"name\":\"NEW-DEVICE\""));
        assert_eq!(connector.open_clients(), 1);
        resource.stop().await;
    }

    #[tokio::test]
    async fn test_status_without_sessions_is_down() {
        let (_engine, _rx, _connector, resource) = setup(&["10.0.0.1"]).await;
        assert_eq!(resource.status().await, ResourceState::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_any_session_unreachable() {
        let (_engine, mut rx, connector, resource) = setup(&["10.0.0.1", "10.0.0.9"]).await;
        connector.set_unreachable("10.0.0.9", true);

        let err = resource.start().await.unwrap_err();
        assert!(matches!(err, AppError::Connect { .. }));
        assert_eq!(resource.running_tasks().await, 0);
        assert_eq!(connector.open_clients(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let (_engine, _rx, _connector, resource) = setup(&["10.0.0.1"]).await;
        resource.start().await.unwrap();
        let err = resource.start().await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyStarted(_)));
        assert_eq!(resource.running_tasks().await, 1);
        resource.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_clients_and_halts_pushes() {
        let (_engine, mut rx, connector, resource) = setup(&["10.0.0.1", "10.0.0.2"]).await;
        resource.start().await.unwrap();
        assert_eq!(connector.open_clients(), 2);

        resource.stop().await;
        assert_eq!(resource.running_tasks().await, 0);
        assert_eq!(connector.open_clients(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(resource.status().await, ResourceState::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_is_noop() {
        let (_engine, _rx, _connector, resource) = setup(&["10.0.0.1"]).await;
        resource.stop().await;
        resource.stop().await;
        assert_eq!(resource.running_tasks().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (_engine, mut rx, _connector, resource) = setup(&["10.0.0.1"]).await;
        resource.start().await.unwrap();
        resource.pause().await;
        assert!(resource.is_paused());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());

        resource.resume().await;
        assert!(!resource.is_paused());
        assert!(rx.recv().await.is_some());
        resource.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_reapplies_configuration() {
        let (engine, _rx, connector, resource) = setup(&["10.0.0.1"]).await;
        resource.start().await.unwrap();
        let before = connector.connects.load(Ordering::SeqCst);

        // 替换端点配置后重载，新增一个目标
        engine.add_in_end(Arc::new(InEnd::with_id(
            "INEND-SNMP",
            "SNMP",
            "switches",
            "",
            config(&["10.0.0.1", "10.0.0.3"]),
        )));
        resource.reload().await.unwrap();

        assert_eq!(resource.running_tasks().await, 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), before + 2);
        assert_eq!(connector.open_clients(), 2);
        resource.stop().await;
    }

    #[tokio::test]
    async fn test_connectivity_check_without_start() {
        let (_engine, _rx, connector, resource) = setup(&["10.0.0.1"]).await;
        assert!(resource.test("INEND-SNMP").await);
        assert_eq!(connector.open_clients(), 0);
        assert_eq!(resource.running_tasks().await, 0);

        connector.set_unreachable("10.0.0.1", true);
        assert!(!resource.test("INEND-SNMP").await);
        assert!(!resource.test("INEND-UNKNOWN").await);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_on_start() {
        let (engine, _rx, connector, resource) = setup(&["10.0.0.1"]).await;
        engine.add_in_end(Arc::new(InEnd::with_id(
            "INEND-SNMP",
            "SNMP",
            "switches",
            "",
            json!({ "frequency": 0, "targets": [] }),
        )));
        assert!(matches!(
            resource.start().await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enabled_defaults_true() {
        let (engine, _rx) = Engine::new(1);
        let resource = SnmpResource::new(engine as Arc<dyn RuleEngine>, MockConnector::new());
        assert!(resource.enabled());
        resource.set_enabled(false);
        assert!(!resource.enabled());
    }
}
