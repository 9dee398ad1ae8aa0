use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::core::{EndpointInfo, ResourceState};
use crate::engine::Engine;
use crate::error::{AppError, Result};

/// API 响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                message: message.into(),
                data: Some(data),
            }),
        )
    }

    fn fail(err: &AppError) -> (StatusCode, Json<Self>) {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(Self {
                success: false,
                message: err.to_string(),
                data: None,
            }),
        )
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

/// 端点列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointsResponse {
    pub endpoints: Vec<EndpointInfo>,
    pub count: usize,
}

/// 端点状态响应
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: String,
    pub state: ResourceState,
}

pub struct ApiServer {
    pub app: Router,
}

impl ApiServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        let app = Router::new()
            .route("/hello", get(Self::hello))
            .route("/inends", get(Self::get_in_ends))
            .route("/inends/{id}/status", get(Self::get_in_end_status))
            .route("/inends/{id}/reload", post(Self::reload_in_end))
            .route("/inends/{id}/pause", post(Self::pause_in_end))
            .route("/inends/{id}/resume", post(Self::resume_in_end))
            .route("/outends", get(Self::get_out_ends))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(engine);
        ApiServer { app }
    }

    /// 启动 API 服务器，shutdown 完成后优雅退出
    pub async fn run<F>(self, bind: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("API 服务器监听: http://{}", listener.local_addr()?);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("API 服务器已退出");
        Ok(())
    }

    async fn hello() -> &'static str {
        "Hello, rulex!"
    }

    /// 获取输入端列表
    async fn get_in_ends(State(engine): State<Arc<Engine>>) -> Reply<EndpointsResponse> {
        let endpoints = engine.list_in_ends();
        let count = endpoints.len();
        debug!("获取输入端列表，共 {} 个", count);
        ApiResponse::ok("ok", EndpointsResponse { endpoints, count })
    }

    /// 获取输出端列表
    async fn get_out_ends(State(engine): State<Arc<Engine>>) -> Reply<EndpointsResponse> {
        let endpoints = engine.list_out_ends();
        let count = endpoints.len();
        ApiResponse::ok("ok", EndpointsResponse { endpoints, count })
    }

    /// 重新计算输入端状态
    async fn get_in_end_status(
        State(engine): State<Arc<Engine>>,
        Path(id): Path<String>,
    ) -> Reply<StatusResponse> {
        match engine.resource(&id) {
            Ok(resource) => {
                let state = resource.status().await;
                ApiResponse::ok(format!("输入端 {} 状态 {}", id, state), StatusResponse { id, state })
            }
            Err(e) => ApiResponse::fail(&e),
        }
    }

    /// 重载输入端
    async fn reload_in_end(
        State(engine): State<Arc<Engine>>,
        Path(id): Path<String>,
    ) -> Reply<StatusResponse> {
        let resource = match engine.resource(&id) {
            Ok(resource) => resource,
            Err(e) => return ApiResponse::fail(&e),
        };
        if let Err(e) = resource.reload().await {
            error!("输入端 {} 重载失败: {}", id, e);
            return ApiResponse::fail(&e);
        }
        let state = resource.status().await;
        info!("输入端 {} 重载成功", id);
        ApiResponse::ok(format!("输入端 {} 重载成功", id), StatusResponse { id, state })
    }

    /// 暂停输入端
    async fn pause_in_end(
        State(engine): State<Arc<Engine>>,
        Path(id): Path<String>,
    ) -> Reply<String> {
        match engine.resource(&id) {
            Ok(resource) => {
                resource.pause().await;
                ApiResponse::ok(format!("输入端 {} 已暂停", id), id)
            }
            Err(e) => ApiResponse::fail(&e),
        }
    }

    /// 恢复输入端，会话保持不变
    async fn resume_in_end(
        State(engine): State<Arc<Engine>>,
        Path(id): Path<String>,
    ) -> Reply<String> {
        match engine.resource(&id) {
            Ok(resource) => {
                resource.resume().await;
                ApiResponse::ok(format!("输入端 {} 已恢复", id), id)
            }
            Err(e) => ApiResponse::fail(&e),
        }
    }
}
