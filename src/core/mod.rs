//! 核心契约模块
//!
//! 定义资源、目标、插件、钩子的统一接口，以及端点、信封等共享数据结构。

pub mod state;
pub mod traits;

pub use state::{
    make_uuid, DataModel, Endpoint, EndpointInfo, InEnd, OutEnd, QueueData, ResourceState,
};
pub use traits::{Hook, Plugin, PluginEnv, PluginMetaInfo, Resource, RuleEngine, Target};
