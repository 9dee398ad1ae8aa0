use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::state::{DataModel, InEnd, OutEnd, QueueData, ResourceState};
use crate::error::Result;

/// 规则引擎协作者：资源只通过它查找端点、投递数据
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// 按 ID 查找输入端
    fn get_in_end(&self, id: &str) -> Option<Arc<InEnd>>;

    /// 按 ID 查找输出端
    fn get_out_end(&self, id: &str) -> Option<Arc<OutEnd>>;

    /// 投递数据到队列，至多一次，失败不重试
    async fn push_queue(&self, data: QueueData) -> Result<()>;
}

/// 输入资源 trait，所有设备协议适配器实现同一套生命周期
#[async_trait]
pub trait Resource: Send + Sync {
    /// 探测连通性，不依赖 start
    async fn test(&self, in_end_id: &str) -> bool;

    /// 在 start 之前绑定端点 ID
    async fn register(&self, in_end_id: &str) -> Result<()>;

    /// 建立会话并启动后台轮询
    async fn start(&self) -> Result<()>;

    /// 是否启用
    fn enabled(&self) -> bool;

    /// 重新应用配置，任何时候调用都安全
    async fn reload(&self) -> Result<()>;

    /// 暂停调度，保留会话状态
    async fn pause(&self);

    /// 从暂停中恢复，未暂停时无效果
    async fn resume(&self);

    /// 同步聚合状态
    async fn status(&self) -> ResourceState;

    /// 释放所有连接并取消所有后台任务
    async fn stop(&self);

    /// 绑定的端点描述
    fn details(&self) -> Option<Arc<InEnd>>;

    /// 资源声明的数据模型
    fn data_models(&self) -> Vec<DataModel> {
        Vec::new()
    }

    /// 下行数据到达（双向资源使用）
    async fn on_stream_approached(&self, _data: &str) -> Result<()> {
        Ok(())
    }
}

/// 输出目标 trait，与 Resource 对称，额外提供投递操作
#[async_trait]
pub trait Target: Send + Sync {
    async fn test(&self, out_end_id: &str) -> bool;

    async fn register(&self, out_end_id: &str) -> Result<()>;

    async fn start(&self) -> Result<()>;

    fn enabled(&self) -> bool;

    async fn reload(&self) -> Result<()>;

    async fn pause(&self);

    async fn resume(&self);

    async fn status(&self) -> ResourceState;

    /// 投递数据，至多一次
    async fn to(&self, data: &str) -> Result<()>;

    async fn stop(&self);

    fn details(&self) -> Option<Arc<OutEnd>>;
}

/// 插件运行环境
#[derive(Debug, Clone, Default)]
pub struct PluginEnv {
    pub id: String,
    pub config: HashMap<String, serde_json::Value>,
}

/// 插件元信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMetaInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default, rename = "helpLink")]
    pub help_link: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub license: String,
}

/// 插件 trait：load → init → install → start，卸载时 uninstall → clean
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn load(&self, engine: Arc<dyn RuleEngine>) -> PluginEnv;

    async fn init(&self, env: &PluginEnv) -> Result<()>;

    async fn install(&self, env: &PluginEnv) -> Result<PluginMetaInfo>;

    async fn start(&self, engine: Arc<dyn RuleEngine>, env: &PluginEnv) -> Result<()>;

    async fn uninstall(&self, env: &PluginEnv) -> Result<()>;

    fn clean(&self);
}

/// 钩子 trait
#[async_trait]
pub trait Hook: Send + Sync {
    async fn work(&self, data: &str) -> Result<()>;

    fn name(&self) -> &str;
}
