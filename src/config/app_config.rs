use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::engine::DEFAULT_QUEUE_CAPACITY;
use crate::error::{AppError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 默认日志级别，可被 RUST_LOG 覆盖
    pub level: String,

    /// 日志文件目录，为空时只输出到终端
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            dir: None,
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 数据队列容量
    pub queue_capacity: usize,

    /// 状态刷新周期（秒），0 表示不启动状态监控
    pub status_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            status_interval: 30,
        }
    }
}

impl EngineConfig {
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval > 0).then(|| Duration::from_secs(self.status_interval))
    }
}

/// HTTP API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:2580".to_string(),
        }
    }
}

/// 输入端 / 输出端声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 适配器自己的配置，原样交给资源或目标解析
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// 完整的进程配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub inends: Vec<EndpointConfig>,

    #[serde(default)]
    pub outends: Vec<EndpointConfig>,
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// 从 TOML 文本解析
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| AppError::Config(format!("解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.queue_capacity == 0 {
            return Err(AppError::Config("engine.queue_capacity 不能为 0".to_string()));
        }
        for e in self.inends.iter().chain(self.outends.iter()) {
            if e.kind.trim().is_empty() {
                return Err(AppError::Config(format!("端点 {} 缺少 type", e.name)));
            }
        }
        Ok(())
    }
}
