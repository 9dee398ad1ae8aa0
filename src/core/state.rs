use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

use super::traits::{Resource, RuleEngine, Target};

/// 端点运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceState {
    Up,
    Down,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Up => write!(f, "UP"),
            ResourceState::Down => write!(f, "DOWN"),
        }
    }
}

/// 数据模型描述（配置中声明的数据形状）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// 生成带前缀的唯一 ID，例如 `INEND` + uuid
pub fn make_uuid(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

/// 端点描述（输入端与输出端共用）
///
/// 状态的读写都经过互斥锁；适配器绑定在加载时写入，停止时解除。
pub struct Endpoint<A: ?Sized> {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    state: Mutex<ResourceState>,
    adapter: RwLock<Option<Arc<A>>>,
}

/// 输入端：绑定一个 Resource
pub type InEnd = Endpoint<dyn Resource>;

/// 输出端：绑定一个 Target
pub type OutEnd = Endpoint<dyn Target>;

impl<A: ?Sized> Endpoint<A> {
    /// 使用指定 ID 创建端点，初始状态为 Down
    pub fn with_id(
        id: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            description: description.into(),
            config,
            created_at: Utc::now(),
            state: Mutex::new(ResourceState::Down),
            adapter: RwLock::new(None),
        }
    }

    /// 获取当前状态
    pub fn get_state(&self) -> ResourceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 设置状态
    pub fn set_state(&self, state: ResourceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// 绑定适配器
    pub fn bind(&self, adapter: Arc<A>) {
        *self.adapter.write().unwrap_or_else(PoisonError::into_inner) = Some(adapter);
    }

    /// 解除绑定，返回原适配器
    pub fn unbind(&self) -> Option<Arc<A>> {
        self.adapter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// 获取已绑定的适配器
    pub fn adapter(&self) -> Option<Arc<A>> {
        self.adapter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 转换为可序列化的概要信息
    pub fn to_info(&self) -> EndpointInfo {
        EndpointInfo {
            id: self.id.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            state: self.get_state(),
            created_at: self.created_at.timestamp(),
        }
    }
}

impl InEnd {
    /// 创建输入端
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self::with_id(make_uuid("INEND"), kind, name, description, config)
    }
}

impl OutEnd {
    /// 创建输出端
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self::with_id(make_uuid("OUTEND"), kind, name, description, config)
    }
}

impl<A: ?Sized> fmt::Debug for Endpoint<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("state", &self.get_state())
            .finish()
    }
}

/// 端点概要信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub state: ResourceState,
    pub created_at: i64,
}

/// 队列数据（资源交给引擎的信封）
///
/// 构造后不可变，push 时所有权转移给引擎。
pub struct QueueData {
    pub in_end: Option<Arc<InEnd>>,
    pub out_end: Option<Arc<OutEnd>>,
    pub engine: Arc<dyn RuleEngine>,
    pub data: String,
}

impl fmt::Debug for QueueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueData")
            .field("in_end", &self.in_end.as_ref().map(|e| e.id.as_str()))
            .field("out_end", &self.out_end.as_ref().map(|e| e.id.as_str()))
            .field("data", &self.data)
            .finish()
    }
}
