//! HTTP 管理接口

mod api;

pub use api::{ApiResponse, ApiServer, EndpointsResponse, StatusResponse};
