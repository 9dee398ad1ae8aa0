use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use rulex_rs::api::ApiServer;
use rulex_rs::config::{AppConfig, EndpointConfig};
use rulex_rs::core::{InEnd, OutEnd, Resource, RuleEngine, Target};
use rulex_rs::engine::Engine;
use rulex_rs::logger::init_logging;
use rulex_rs::resource::SnmpResource;
use rulex_rs::target::HttpTarget;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let exists = Path::new(&path).exists();
    let config = if exists {
        AppConfig::from_file(&path).with_context(|| format!("加载配置 {} 失败", path))?
    } else {
        AppConfig::default()
    };

    // 初始化日志系统，guard 持有到进程退出
    let _guard = init_logging(&config.log);
    if !exists {
        warn!("配置文件 {} 不存在，使用默认配置", path);
    }
    info!("启动 rulex 数据采集网关...");

    let (engine, rx) = Engine::new(config.engine.queue_capacity);
    let dispatcher = engine.run_dispatcher(rx);
    if let Some(interval) = config.engine.status_interval() {
        engine.spawn_status_monitor(interval).await;
    }

    for decl in &config.outends {
        load_out_end(&engine, decl).await;
    }
    for decl in &config.inends {
        load_in_end(&engine, decl).await;
    }

    let api_server = ApiServer::new(Arc::clone(&engine));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听退出信号失败: {}", e);
        }
        info!("收到退出信号，正在关闭...");
    };
    let served = api_server.run(&config.api.bind, shutdown).await;

    engine.stop().await;
    if let Err(e) = dispatcher.await {
        error!("数据分发器异常退出: {:?}", e);
    }
    served.context("API 服务器运行失败")?;
    info!("rulex 已退出");
    Ok(())
}

async fn load_in_end(engine: &Arc<Engine>, decl: &EndpointConfig) {
    let rule_engine = Arc::clone(engine) as Arc<dyn RuleEngine>;
    let resource: Arc<dyn Resource> = match decl.kind.to_uppercase().as_str() {
        "SNMP" => Arc::new(SnmpResource::with_net(rule_engine)),
        other => {
            warn!("不支持的输入端类型 {}，跳过 {}", other, decl.name);
            return;
        }
    };
    let in_end = Arc::new(InEnd::new(
        decl.kind.clone(),
        decl.name.clone(),
        decl.description.clone(),
        decl.config.clone(),
    ));
    if let Err(e) = engine.load_in_end(in_end, resource).await {
        error!("输入端 {} 加载失败: {}", decl.name, e);
    }
}

async fn load_out_end(engine: &Arc<Engine>, decl: &EndpointConfig) {
    let rule_engine = Arc::clone(engine) as Arc<dyn RuleEngine>;
    let target: Arc<dyn Target> = match decl.kind.to_uppercase().as_str() {
        "HTTP" => Arc::new(HttpTarget::new(rule_engine)),
        other => {
            warn!("不支持的输出端类型 {}，跳过 {}", other, decl.name);
            return;
        }
    };
    let out_end = Arc::new(OutEnd::new(
        decl.kind.clone(),
        decl.name.clone(),
        decl.description.clone(),
        decl.config.clone(),
    ));
    if let Err(e) = engine.load_out_end(out_end, target).await {
        error!("输出端 {} 加载失败: {}", decl.name, e);
    }
}
