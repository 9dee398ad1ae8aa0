use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::{
    EndpointInfo, Hook, InEnd, OutEnd, Plugin, PluginEnv, PluginMetaInfo, QueueData, Resource,
    ResourceState, RuleEngine, Target,
};
use crate::error::{AppError, Result};

/// 默认队列容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// 已加载的插件
struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    env: PluginEnv,
    meta: PluginMetaInfo,
}

/// 规则引擎
///
/// 持有输入端、输出端、钩子与插件的注册表，以及一个有界数据队列。
/// 资源推送数据时队列满即失败，不阻塞轮询任务。
pub struct Engine {
    in_ends: RwLock<HashMap<String, Arc<InEnd>>>,
    out_ends: RwLock<HashMap<String, Arc<OutEnd>>>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
    plugins: Mutex<Vec<LoadedPlugin>>,
    queue: mpsc::Sender<QueueData>,
    shutdown: broadcast::Sender<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// 创建引擎，返回引擎与队列接收端（交给 run_dispatcher）
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<QueueData>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = broadcast::channel(1);
        let engine = Arc::new(Self {
            in_ends: RwLock::new(HashMap::new()),
            out_ends: RwLock::new(HashMap::new()),
            hooks: RwLock::new(Vec::new()),
            plugins: Mutex::new(Vec::new()),
            queue,
            shutdown,
            monitor: Mutex::new(None),
        });
        (engine, rx)
    }

    fn as_rule_engine(self: &Arc<Self>) -> Arc<dyn RuleEngine> {
        Arc::clone(self) as Arc<dyn RuleEngine>
    }

    /// 注册输入端（同 ID 覆盖）
    pub fn add_in_end(&self, in_end: Arc<InEnd>) {
        debug!("注册输入端: {} ({})", in_end.id, in_end.kind);
        self.in_ends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(in_end.id.clone(), in_end);
    }

    /// 注册输出端（同 ID 覆盖）
    pub fn add_out_end(&self, out_end: Arc<OutEnd>) {
        debug!("注册输出端: {} ({})", out_end.id, out_end.kind);
        self.out_ends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(out_end.id.clone(), out_end);
    }

    /// 所有输入端概要，按创建时间排序
    pub fn list_in_ends(&self) -> Vec<EndpointInfo> {
        let mut list: Vec<EndpointInfo> = self
            .in_ends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.to_info())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// 所有输出端概要，按创建时间排序
    pub fn list_out_ends(&self) -> Vec<EndpointInfo> {
        let mut list: Vec<EndpointInfo> = self
            .out_ends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.to_info())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    fn in_end_snapshot(&self) -> Vec<Arc<InEnd>> {
        self.in_ends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn out_end_snapshot(&self) -> Vec<Arc<OutEnd>> {
        self.out_ends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// 获取输入端绑定的资源
    pub fn resource(&self, in_end_id: &str) -> Result<Arc<dyn Resource>> {
        self.get_in_end(in_end_id)
            .and_then(|e| e.adapter())
            .ok_or_else(|| AppError::NotFound(format!("输入端 {}", in_end_id)))
    }

    /// 加载输入端：注册 → 探测 → 启动（若启用）→ 回写状态
    pub async fn load_in_end(
        &self,
        in_end: Arc<InEnd>,
        resource: Arc<dyn Resource>,
    ) -> Result<()> {
        let id = in_end.id.clone();
        self.add_in_end(Arc::clone(&in_end));
        in_end.bind(Arc::clone(&resource));

        resource.register(&id).await?;
        if !resource.test(&id).await {
            warn!("输入端 {} 探测未通过", id);
        }

        if resource.enabled() {
            if let Err(e) = resource.start().await {
                error!("输入端 {} 启动失败: {}", id, e);
                in_end.set_state(ResourceState::Down);
                return Err(e);
            }
        } else {
            info!("输入端 {} 未启用，跳过启动", id);
        }

        let state = resource.status().await;
        in_end.set_state(state);
        info!("输入端 {} 加载完成，状态 {}", id, state);
        Ok(())
    }

    /// 加载输出端，流程与输入端一致
    pub async fn load_out_end(
        &self,
        out_end: Arc<OutEnd>,
        target: Arc<dyn Target>,
    ) -> Result<()> {
        let id = out_end.id.clone();
        self.add_out_end(Arc::clone(&out_end));
        out_end.bind(Arc::clone(&target));

        target.register(&id).await?;
        if !target.test(&id).await {
            warn!("输出端 {} 探测未通过", id);
        }

        if target.enabled() {
            if let Err(e) = target.start().await {
                error!("输出端 {} 启动失败: {}", id, e);
                out_end.set_state(ResourceState::Down);
                return Err(e);
            }
        }

        let state = target.status().await;
        out_end.set_state(state);
        info!("输出端 {} 加载完成，状态 {}", id, state);
        Ok(())
    }

    /// 注册钩子，同名钩子被替换
    pub fn register_hook(&self, hook: Arc<dyn Hook>) {
        info!("注册钩子: {}", hook.name());
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        hooks.retain(|h| h.name() != hook.name());
        hooks.push(hook);
    }

    /// 加载插件：load → init → install → start
    pub async fn load_plugin(
        self: &Arc<Self>,
        plugin: Arc<dyn Plugin>,
    ) -> Result<PluginMetaInfo> {
        let env = plugin.load(self.as_rule_engine()).await;
        plugin.init(&env).await?;
        let meta = plugin.install(&env).await?;
        plugin.start(self.as_rule_engine(), &env).await?;
        info!("插件加载成功: {} {}", meta.name, meta.version);

        self.plugins.lock().await.push(LoadedPlugin {
            plugin,
            env,
            meta: meta.clone(),
        });
        Ok(meta)
    }

    /// 已加载插件的元信息
    pub async fn plugins(&self) -> Vec<PluginMetaInfo> {
        self.plugins
            .lock()
            .await
            .iter()
            .map(|p| p.meta.clone())
            .collect()
    }

    /// 消费队列：先经过所有钩子，再投递到输出端
    pub fn run_dispatcher(self: &Arc<Self>, mut rx: mpsc::Receiver<QueueData>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            info!("数据分发器已启动");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    item = rx.recv() => match item {
                        Some(item) => engine.dispatch(item).await,
                        None => break,
                    },
                }
            }
            info!("数据分发器已退出");
        })
    }

    async fn dispatch(&self, item: QueueData) {
        let source = item
            .in_end
            .as_ref()
            .map(|e| e.id.as_str())
            .unwrap_or("-");
        debug!("分发数据: from={} len={}", source, item.data.len());

        let hooks: Vec<Arc<dyn Hook>> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            if let Err(e) = hook.work(&item.data).await {
                error!("钩子 {} 执行失败: {}", hook.name(), e);
            }
        }

        // 指定了输出端时只投递到该输出端，否则广播到全部输出端
        let out_ends = match &item.out_end {
            Some(out_end) => vec![Arc::clone(out_end)],
            None => self.out_end_snapshot(),
        };
        for out_end in out_ends {
            let Some(target) = out_end.adapter() else {
                continue;
            };
            if !target.enabled() {
                continue;
            }
            if let Err(e) = target.to(&item.data).await {
                error!("输出端 {} 投递失败: {}", out_end.id, e);
            }
        }
    }

    /// 周期性刷新所有端点的状态
    pub async fn spawn_status_monitor(self: &Arc<Self>, interval: Duration) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => engine.refresh_status().await,
                }
            }
            debug!("状态监控已退出");
        });

        if let Some(old) = self.monitor.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// 重新计算所有已绑定端点的状态
    pub async fn refresh_status(&self) {
        for in_end in self.in_end_snapshot() {
            if let Some(resource) = in_end.adapter() {
                let state = resource.status().await;
                in_end.set_state(state);
                if state == ResourceState::Down {
                    warn!("输入端 {} 状态异常", in_end.id);
                }
            }
        }
        for out_end in self.out_end_snapshot() {
            if let Some(target) = out_end.adapter() {
                let state = target.status().await;
                out_end.set_state(state);
            }
        }
    }

    /// 停止引擎：停止所有适配器并解除绑定，卸载插件，关闭后台任务
    pub async fn stop(&self) {
        info!("正在停止规则引擎...");
        let _ = self.shutdown.send(());
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.abort();
        }

        for in_end in self.in_end_snapshot() {
            if let Some(resource) = in_end.unbind() {
                resource.stop().await;
            }
            in_end.set_state(ResourceState::Down);
        }
        for out_end in self.out_end_snapshot() {
            if let Some(target) = out_end.unbind() {
                target.stop().await;
            }
            out_end.set_state(ResourceState::Down);
        }

        let plugins: Vec<LoadedPlugin> = self.plugins.lock().await.drain(..).collect();
        for loaded in plugins {
            if let Err(e) = loaded.plugin.uninstall(&loaded.env).await {
                error!("插件 {} 卸载失败: {}", loaded.meta.name, e);
            }
            loaded.plugin.clean();
        }

        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("规则引擎已停止");
    }
}

#[async_trait]
impl RuleEngine for Engine {
    fn get_in_end(&self, id: &str) -> Option<Arc<InEnd>> {
        self.in_ends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn get_out_end(&self, id: &str) -> Option<Arc<OutEnd>> {
        self.out_ends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    async fn push_queue(&self, data: QueueData) -> Result<()> {
        self.queue.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AppError::Delivery("队列已满".to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Delivery("队列已关闭".to_string())
            }
        })
    }
}
