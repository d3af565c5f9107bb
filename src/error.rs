use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 页面抓取错误
    #[error("抓取错误: {0}")]
    Fetch(#[from] FetchError),
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Store(#[from] StoreError),
    /// 资源池错误
    #[error("资源池错误: {0}")]
    Pool(#[from] PoolError),
    /// 截图任务错误
    #[error("任务错误: {0}")]
    Task(#[from] TaskError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 报表导出错误
    #[error("导出错误: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 页面抓取错误
///
/// 分两类：网络层的瞬时错误可以重试，结构性错误（解码、字段缺失）重试无意义。
#[derive(Debug, Error)]
pub enum FetchError {
    /// 请求超时
    #[error("请求超时: {message}")]
    Timeout { message: String },
    /// 连接失败（重置、拒绝、DNS）
    #[error("连接失败: {message}")]
    Connection { message: String },
    /// 协议层错误（HTTP/2 流被重置、响应体被截断等）
    #[error("协议错误: {message}")]
    Protocol { message: String },
    /// 服务端返回非 2xx 状态码
    #[error("HTTP 状态码 {status}")]
    HttpStatus { status: u16 },
    /// 浏览器内 fetch 失败
    #[error("浏览器请求失败: {message}")]
    Browser { message: String },
    /// 响应体无法解析为 JSON
    #[error("响应解码失败: {message}")]
    Decode { message: String },
    /// JSON 结构与预期不符
    #[error("响应结构异常: {message}")]
    Schema { message: String },
}

impl FetchError {
    /// 是否属于可重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. }
            | FetchError::Connection { .. }
            | FetchError::Protocol { .. }
            | FetchError::Browser { .. } => true,
            FetchError::HttpStatus { status } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            FetchError::Decode { .. } | FetchError::Schema { .. } => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_connect() {
            FetchError::Connection {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            FetchError::Decode {
                message: err.to_string(),
            }
        } else {
            FetchError::Protocol {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode {
            message: err.to_string(),
        }
    }
}

/// 数据库错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 无法打开数据库文件
    #[error("无法打开数据库 {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    /// SQL 执行失败
    #[error("SQL 执行失败: {0}")]
    Query(#[from] sqlx::Error),
    /// 数据库中出现未知的状态值
    #[error("未知的任务状态: {0}")]
    UnknownStatus(String),
}

/// 资源池错误
#[derive(Debug, Error)]
pub enum PoolError {
    /// 在限定时间内没有空闲资源
    #[error("等待空闲资源超时 ({waited_secs}s)")]
    AcquireTimeout { waited_secs: u64 },
    /// 资源池已关闭
    #[error("资源池已关闭")]
    Closed,
    /// 创建新资源失败
    #[error("创建资源失败: {0}")]
    CreateFailed(String),
}

/// 截图任务错误
#[derive(Debug, Error)]
pub enum TaskError {
    /// 可恢复的错误，资源仍可复用
    #[error("{0}")]
    Transient(String),
    /// 资源可能已损坏（崩溃、超时、断开），需要销毁重建
    #[error("资源异常: {0}")]
    Fatal(String),
    /// 订单缺少详情页地址，无法截图
    #[error("订单 {order_id} 缺少详情页地址")]
    MissingDetailUrl { order_id: String },
}

impl TaskError {
    /// 根据错误文本判断资源是否应该被销毁
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("crash")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("disconnected")
            || lower.contains("channel closed")
            || message.contains("超时")
            || message.contains("崩溃")
        {
            TaskError::Fatal(message)
        } else {
            TaskError::Transient(message)
        }
    }

    /// 是否需要销毁当前资源
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Fatal(_))
    }

    /// 重试能否解决问题
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::MissingDetailUrl { .. })
    }
}

impl From<chromiumoxide::error::CdpError> for TaskError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        TaskError::classify(err.to_string())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Transient(err.to_string())
    }
}

impl From<image::ImageError> for TaskError {
    fn from(err: image::ImageError) -> Self {
        TaskError::Transient(format!("图片处理失败: {}", err))
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填项缺失
    #[error("缺少必填配置项 {name}")]
    Missing { name: String },
    /// 配置值不合法
    #[error("配置项 {name} 的值不合法: {reason}")]
    Invalid { name: String, reason: String },
    /// 配置文件读取或解析失败
    #[error("无法读取配置文件 {path}: {reason}")]
    FileFailed { path: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Store(StoreError::Query(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Fetch(FetchError::from(err))
    }
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Task(TaskError::from(err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建必填配置缺失错误
    pub fn config_missing(name: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Missing { name: name.into() })
    }

    /// 创建配置值不合法错误
    pub fn config_invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Invalid {
            name: name.into(),
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
