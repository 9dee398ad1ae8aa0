use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::DataModel;
use crate::error::{AppError, Result};
use crate::snmp::{ConnectParams, Transport, Version};

/// 默认单次请求超时（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// 单个被轮询设备
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpTarget {
    pub target: String,
    pub port: u16,
    pub transport: Transport,
    pub community: String,
    pub version: u8,
    #[serde(rename = "dataModels")]
    pub data_models: Vec<DataModel>,
}

/// SNMP 资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpConfig {
    /// 轮询周期（秒），取值 1..=10000
    pub frequency: u64,

    /// 单次请求超时（秒），取值 1..=60
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    pub targets: Vec<SnmpTarget>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl SnmpConfig {
    /// 从端点配置中解析并校验
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: SnmpConfig = serde_json::from_value(value.clone())
            .map_err(|e| AppError::Validation(format!("SNMP 配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验必填字段与取值范围
    pub fn validate(&self) -> Result<()> {
        if !(1..=10000).contains(&self.frequency) {
            return Err(AppError::Validation(format!(
                "frequency 必须在 1..=10000 之间: {}",
                self.frequency
            )));
        }
        if !(1..=60).contains(&self.timeout) {
            return Err(AppError::Validation(format!(
                "timeout 必须在 1..=60 之间: {}",
                self.timeout
            )));
        }
        if self.targets.is_empty() {
            return Err(AppError::Validation("targets 不能为空".to_string()));
        }
        for (i, t) in self.targets.iter().enumerate() {
            if t.target.trim().is_empty() {
                return Err(AppError::Validation(format!("targets[{}].target 不能为空", i)));
            }
            if t.port == 0 {
                return Err(AppError::Validation(format!("targets[{}].port 不能为 0", i)));
            }
            if t.community.is_empty() {
                return Err(AppError::Validation(format!("targets[{}].community 不能为空", i)));
            }
            if Version::from_config(t.version).is_none() {
                return Err(AppError::Validation(format!(
                    "targets[{}].version 仅支持 1(v1) 或 2(v2c): {}",
                    i, t.version
                )));
            }
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.frequency)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// 生成每个会话的连接参数，需先通过 validate
    pub fn connect_params(&self) -> Vec<ConnectParams> {
        self.targets
            .iter()
            .map(|t| ConnectParams {
                target: t.target.clone(),
                port: t.port,
                transport: t.transport,
                community: t.community.clone(),
                version: Version::from_config(t.version).unwrap_or(Version::V2c),
                timeout: self.call_timeout(),
            })
            .collect()
    }

    /// 所有目标声明的数据模型
    pub fn data_models(&self) -> Vec<DataModel> {
        self.targets
            .iter()
            .flat_map(|t| t.data_models.iter().cloned())
            .collect()
    }
}
