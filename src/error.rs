use thiserror::Error;

/// 统一的中继层错误类型 / Unified relay-layer error type
///
/// 失败语义见各组件：总线与存储故障只记录日志，不重试（至多一次投递约定）。
/// Failure semantics per component: bus and store failures are logged, never
/// retried (at-most-once delivery contract).
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("lookup timed out for user {user_id}")]
    LookupTimedOut { user_id: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// 构造负载格式错误 / Build a malformed-payload error
    pub fn malformed<T: Into<String>>(message: T) -> Self {
        Self::MalformedPayload(message.into())
    }

    /// 构造总线不可用错误 / Build a bus-unavailable error
    pub fn bus<T: std::fmt::Display>(cause: T) -> Self {
        Self::BusUnavailable(cause.to_string())
    }

    /// 构造存储不可用错误 / Build a store-unavailable error
    pub fn store<T: std::fmt::Display>(cause: T) -> Self {
        Self::StoreUnavailable(cause.to_string())
    }
}
