//! 输出目标实现

mod http_target;

pub use http_target::{HttpTarget, HttpTargetConfig};
