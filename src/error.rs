use thiserror::Error;

/// 应用程序统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置校验失败（启动前即拒绝）
    #[error("配置校验失败: {0}")]
    Validation(String),

    /// 会话连接失败
    #[error("连接失败 [{target}]: {reason}")]
    Connect { target: String, reason: String },

    /// 单个属性读取失败（包括超时）
    #[error("读取失败: {0}")]
    Read(String),

    /// 协议报文编解码错误
    #[error("协议编解码错误: {0}")]
    Codec(String),

    /// 载荷序列化错误
    #[error("载荷序列化错误: {0}")]
    Encode(#[from] serde_json::Error),

    /// 队列投递失败
    #[error("投递失败: {0}")]
    Delivery(String),

    /// 进程配置文件错误
    #[error("配置文件错误: {0}")]
    Config(String),

    /// 端点未找到
    #[error("端点未找到: {0}")]
    NotFound(String),

    /// 资源已在运行
    #[error("资源已启动: {0}")]
    AlreadyStarted(String),

    /// 插件错误
    #[error("插件错误: {0}")]
    Plugin(String),

    /// 钩子错误
    #[error("钩子错误: {0}")]
    Hook(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// AppError 的 Result 类型别名
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// 构造连接错误
    pub fn connect(target: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Connect {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// 将错误转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Config(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::AlreadyStarted(_) => 409,
            AppError::Connect { .. } => 502,
            AppError::Read(_) => 502,
            AppError::Codec(_) => 502,
            AppError::Delivery(_) => 503,
            AppError::Encode(_) => 500,
            AppError::Plugin(_) => 500,
            AppError::Hook(_) => 500,
            AppError::Io(_) => 500,
        }
    }
}
