use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::core::{OutEnd, ResourceState, RuleEngine, Target};
use crate::error::{AppError, Result};

/// HTTP 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTargetConfig {
    pub url: String,

    /// 请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// 附加请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> u64 {
    5
}

impl HttpTargetConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: HttpTargetConfig = serde_json::from_value(value.clone())
            .map_err(|e| AppError::Validation(format!("HTTP 配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| AppError::Validation(format!("url 非法 {}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "url 仅支持 http/https: {}",
                self.url
            )));
        }
        if !(1..=60).contains(&self.timeout) {
            return Err(AppError::Validation(format!(
                "timeout 必须在 1..=60 之间: {}",
                self.timeout
            )));
        }
        Ok(())
    }
}

struct Running {
    client: Client,
    config: HttpTargetConfig,
}

/// 将数据以 JSON 请求体 POST 到指定地址
pub struct HttpTarget {
    out_end_id: RwLock<String>,
    enabled: AtomicBool,
    paused: AtomicBool,
    engine: Arc<dyn RuleEngine>,
    running: RwLock<Option<Arc<Running>>>,
}

impl HttpTarget {
    pub fn new(engine: Arc<dyn RuleEngine>) -> Self {
        Self {
            out_end_id: RwLock::new(String::new()),
            enabled: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            engine,
            running: RwLock::new(None),
        }
    }

    fn out_end_id(&self) -> String {
        self.out_end_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn running(&self) -> Option<Arc<Running>> {
        self.running
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn load_config(&self, out_end_id: &str) -> Result<HttpTargetConfig> {
        let out_end = self
            .engine
            .get_out_end(out_end_id)
            .ok_or_else(|| AppError::NotFound(format!("输出端 {}", out_end_id)))?;
        HttpTargetConfig::from_value(&out_end.config)
    }
}

#[async_trait]
impl Target for HttpTarget {
    async fn test(&self, out_end_id: &str) -> bool {
        match self.load_config(out_end_id) {
            Ok(_) => true,
            Err(e) => {
                error!("HTTP 输出端探测失败: {}", e);
                false
            }
        }
    }

    async fn register(&self, out_end_id: &str) -> Result<()> {
        *self
            .out_end_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = out_end_id.to_string();
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let id = self.out_end_id();
        let config = self.load_config(&id)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| AppError::connect(config.url.clone(), format!("创建 HTTP 客户端失败: {}", e)))?;

        // 检查与写入在同一个写锁内完成
        let mut running = self.running.write().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(AppError::AlreadyStarted(id));
        }
        info!("HTTP 输出端 {} 启动: {}", id, config.url);
        *running = Some(Arc::new(Running { client, config }));
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn reload(&self) -> Result<()> {
        self.stop().await;
        self.start().await
    }

    async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn status(&self) -> ResourceState {
        let state = if self.running().is_some() {
            ResourceState::Up
        } else {
            ResourceState::Down
        };
        if let Some(out_end) = self.details() {
            out_end.set_state(state);
        }
        state
    }

    async fn to(&self, data: &str) -> Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            debug!("HTTP 输出端已暂停，丢弃数据");
            return Ok(());
        }
        let running = self
            .running()
            .ok_or_else(|| AppError::Delivery("HTTP 输出端未启动".to_string()))?;

        let mut request = running
            .client
            .post(&running.config.url)
            .header("Content-Type", "application/json");
        for (name, value) in &running.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(data.to_string())
            .send()
            .await
            .map_err(|e| AppError::Delivery(format!("发送请求失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Delivery(format!(
                "{} 返回 {}",
                running.config.url, status
            )));
        }
        debug!("HTTP 投递成功: {} ({} 字节)", running.config.url, data.len());
        Ok(())
    }

    async fn stop(&self) {
        if self
            .running
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("HTTP 输出端 {} 已停止", self.out_end_id());
        }
        if let Some(out_end) = self.details() {
            out_end.set_state(ResourceState::Down);
        }
    }

    fn details(&self) -> Option<Arc<OutEnd>> {
        self.engine.get_out_end(&self.out_end_id())
    }
}
