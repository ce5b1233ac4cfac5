//! Error types for the DM driver
//!
//! This module defines all error types that can occur during DM database
//! operations, from frame-level protocol violations up to batch failures.
//! Every kind carries a stable integer code (see [`Error::code`]) and can be
//! rendered with a locale-selected template (see [`Error::localized`]).

use std::io;
use thiserror::Error;

use crate::constants::Locale;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// A single failing row reported by a batch execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Zero-based index of the row within the batch
    pub row: usize,
    /// Server error code for that row
    pub code: i32,
    /// Server error text for that row
    pub message: String,
}

/// Main error type for the DM driver
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Communication Errors
    // =========================================================================
    /// Socket read/write failure, unexpected EOF or TLS handshake failure
    #[error("communication error: {0}")]
    Communication(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // =========================================================================
    // Frame Errors
    // =========================================================================
    /// Message body exceeds the protocol maximum
    #[error("message too long: {length} bytes")]
    MsgTooLong { length: usize },

    /// Frame checksum mismatch
    #[error("message checksum error")]
    MsgCheck,

    /// Malformed frame or message body
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Buffer underflow - not enough data to read
    #[error("buffer underflow: need {needed} bytes but only {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    // =========================================================================
    // Session Lifecycle Errors
    // =========================================================================
    /// The session or connection has been closed
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection failed over to another endpoint; replay idempotent work
    #[error("connection switched to {endpoint}")]
    ConnectionSwitched { endpoint: String },

    /// The connection is unusable and should be discarded by a pool
    #[error("bad connection")]
    BadConnection,

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    /// No endpoint of the group accepted a connection
    #[error("no available endpoint: {0}")]
    NoAvailableEndpoint(String),

    /// Invalid DSN or service-name file
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    // =========================================================================
    // Authentication Errors
    // =========================================================================
    /// Invalid username or password
    #[error("invalid username or password")]
    BadCredentials,

    /// OS authentication type does not match the server configuration
    #[error("OS authentication type mismatch")]
    OsAuthMismatch,

    /// Username longer than the protocol allows
    #[error("username too long: {0} bytes (maximum 128)")]
    UsernameTooLong(usize),

    /// Password longer than the protocol allows
    #[error("password too long: {0} bytes (maximum 128)")]
    PasswordTooLong(usize),

    /// Server mode does not satisfy the login mode
    #[error("invalid server mode: {0}")]
    InvalidServerMode(String),

    /// Server product version is below the supported minimum
    #[error("server version {version} is too old (minimum {minimum})")]
    ServerVersionTooOld { version: String, minimum: String },

    // =========================================================================
    // Statement and Result Set Errors
    // =========================================================================
    #[error("statement handle is closed")]
    StatementHandleClosed,

    #[error("result set is closed")]
    ResultSetClosed,

    /// Destination slot cannot hold the scanned value
    #[error("cannot store value into a nil destination")]
    StoreInNilPointer,

    #[error("unsupported scan type: {0}")]
    UnsupportedScan(String),

    // =========================================================================
    // Binding Errors
    // =========================================================================
    #[error("parameter {0} is not bound")]
    UnboundedParameter(usize),

    #[error("unsupported IN parameter type: {0}")]
    UnsupportedInParamType(String),

    #[error("unsupported OUT parameter type: {0}")]
    UnsupportedOutParamType(String),

    /// Bound string or binary value exceeds the column precision
    #[error("string truncated: {length} bytes exceed precision {precision}")]
    StringCut { length: usize, precision: i32 },

    #[error("data too long: {0} bytes")]
    DataTooLong(usize),

    #[error("parameter count {count} exceeds limit {limit}")]
    ParamCountLimit { count: usize, limit: usize },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("invalid SQL type: {0}")]
    InvalidSqlType(i16),

    /// A query was passed to an exec-only entry point
    #[error("SQL is not an executable statement")]
    NotExecSql,

    /// A non-query was passed to a query entry point
    #[error("SQL is not a query")]
    NotQuerySql,

    /// Batch execution aborted on the first failing row
    #[error("batch error at row {row}: {source}")]
    BatchError {
        row: usize,
        #[source]
        source: Box<Error>,
    },

    /// Partial batch failure: failing rows carry `-3` in `update_counts`
    #[error("batch executed with errors: {}", format_row_errors(.details))]
    BpWithError {
        update_counts: Vec<i64>,
        details: Vec<RowError>,
    },

    /// Error reported by the server
    #[error("[{code}] {message}")]
    Server { code: i32, message: String },

    // =========================================================================
    // LOB Errors
    // =========================================================================
    #[error("invalid length or offset")]
    InvalidLengthOrOffset,

    #[error("result set is read-only")]
    ResultSetIsReadOnly,

    #[error("value is null")]
    IsNull,

    #[error("LOB has been freed")]
    LobFreed,

    // =========================================================================
    // Data Conversion Errors
    // =========================================================================
    #[error("invalid time interval: {0}")]
    InvalidTimeInterval(String),

    #[error("interval overflow")]
    IntervalOverflow,

    #[error("data conversion error: {0}")]
    DataConversion(String),

    #[error("invalid transaction isolation level: {0}")]
    InvalidTranIsolation(String),

    // =========================================================================
    // Security Errors
    // =========================================================================
    #[error("failed to initialize SSL: {0}")]
    InitSslFailed(String),

    #[error("failed to initialize third-party cipher: {0}")]
    ThirdPartCipherInitFailed(String),

    // =========================================================================
    // Wrapping
    // =========================================================================
    /// An error with an appended detail segment
    #[error("{source}{detail}")]
    WithDetail {
        #[source]
        source: Box<Error>,
        detail: String,
    },

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_row_errors(details: &[RowError]) -> String {
    details
        .iter()
        .map(|d| format!("row[{}]:{},{}", d.row, d.code, d.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error code of the server's "rows exceed rowset size" signal, which is tolerated
pub const EC_RN_EXCEED_ROWSET_SIZE: i32 = -7036;

/// Error code the server reports for a partially failed batch
pub const EC_BP_WITH_ERROR: i32 = 121;

impl Error {
    /// Create a server error
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Error::Server {
            code,
            message: message.into(),
        }
    }

    /// Create a communication error from anything displayable
    pub fn communication(reason: impl std::fmt::Display) -> Self {
        Error::Communication(reason.to_string())
    }

    /// Append a detail segment to this error
    pub fn add_detail(self, detail: impl AsRef<str>) -> Self {
        match self {
            Error::WithDetail { source, detail: mut existing } => {
                existing.push_str(detail.as_ref());
                Error::WithDetail {
                    source,
                    detail: existing,
                }
            }
            other => Error::WithDetail {
                source: Box::new(other),
                detail: detail.as_ref().to_string(),
            },
        }
    }

    /// Append a detail segment on its own line
    pub fn add_detailln(self, detail: impl AsRef<str>) -> Self {
        self.add_detail(format!("\n{}", detail.as_ref()))
    }

    /// The error with any detail wrappers removed
    pub fn kind(&self) -> &Error {
        match self {
            Error::WithDetail { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Stable integer code for this error
    pub fn code(&self) -> i32 {
        match self.kind() {
            Error::Communication(_) | Error::Io(_) => 6001,
            Error::MsgTooLong { .. } => 6002,
            Error::MsgCheck => 6003,
            Error::Protocol(_) | Error::BufferUnderflow { .. } => 6004,
            Error::ConnectionClosed => 6005,
            Error::ConnectionSwitched { .. } => 6006,
            Error::BadConnection => 6007,
            Error::ConnectionTimeout(_) => 6008,
            Error::NoAvailableEndpoint(_) => 6009,
            Error::InvalidConnectionString(_) => 6010,
            Error::BadCredentials => 6011,
            Error::OsAuthMismatch => 6012,
            Error::UsernameTooLong(_) => 6013,
            Error::PasswordTooLong(_) => 6014,
            Error::InvalidServerMode(_) => 6015,
            Error::ServerVersionTooOld { .. } => 6016,
            Error::StatementHandleClosed => 6017,
            Error::ResultSetClosed => 6018,
            Error::StoreInNilPointer => 6019,
            Error::UnsupportedScan(_) => 6020,
            Error::UnboundedParameter(_) => 6021,
            Error::UnsupportedInParamType(_) => 6022,
            Error::UnsupportedOutParamType(_) => 6023,
            Error::StringCut { .. } => 6024,
            Error::DataTooLong(_) => 6025,
            Error::ParamCountLimit { .. } => 6026,
            Error::InvalidSqlType(_) => 6027,
            Error::NotExecSql => 6028,
            Error::NotQuerySql => 6029,
            Error::BatchError { .. } => 6030,
            Error::BpWithError { .. } => 6031,
            Error::InvalidLengthOrOffset => 6032,
            Error::ResultSetIsReadOnly => 6033,
            Error::IsNull => 6034,
            Error::LobFreed => 6035,
            Error::InvalidTimeInterval(_) => 6036,
            Error::IntervalOverflow => 6037,
            Error::DataConversion(_) => 6038,
            Error::InvalidTranIsolation(_) => 6039,
            Error::InitSslFailed(_) => 6040,
            Error::ThirdPartCipherInitFailed(_) => 6041,
            Error::Internal(_) => 6099,
            Error::Server { code, .. } => *code,
            Error::WithDetail { source, .. } => source.code(),
        }
    }

    /// Socket-level failure that leaves the session unusable
    pub fn is_communication(&self) -> bool {
        matches!(self.kind(), Error::Communication(_) | Error::Io(_))
    }

    /// Check if this error reports a closed session
    pub fn is_connection_closed(&self) -> bool {
        matches!(self.kind(), Error::ConnectionClosed)
    }

    /// Check if a pool should discard the handle
    pub fn is_bad_connection(&self) -> bool {
        matches!(self.kind(), Error::BadConnection)
    }

    /// Check if this error is recoverable by reconnecting
    pub fn is_recoverable(&self) -> bool {
        self.is_communication() || self.is_connection_closed()
    }

    /// Check if this is the soft failover signal
    pub fn is_connection_switched(&self) -> bool {
        matches!(self.kind(), Error::ConnectionSwitched { .. })
    }

    /// Render the error with a locale-selected template.
    ///
    /// Server errors already arrive localized and are returned as-is.
    pub fn localized(&self, locale: Locale) -> String {
        let detail = match self {
            Error::WithDetail { detail, .. } => detail.as_str(),
            _ => "",
        };
        let base = match (locale, self.kind()) {
            (_, Error::Server { .. }) => self.kind().to_string(),
            (Locale::ZhCn | Locale::ZhHk, kind) => match zh_template(kind) {
                Some(text) => format!("[{}] {}", kind.code(), text),
                None => kind.to_string(),
            },
            (_, kind) => kind.to_string(),
        };
        format!("{base}{detail}")
    }
}

fn zh_template(kind: &Error) -> Option<&'static str> {
    Some(match kind {
        Error::Communication(_) | Error::Io(_) => "网络通信异常",
        Error::MsgTooLong { .. } => "消息长度超出限制",
        Error::MsgCheck => "消息校验异常",
        Error::ConnectionClosed => "连接已经关闭",
        Error::ConnectionSwitched { .. } => "连接已切换",
        Error::BadCredentials => "用户名或密码错误",
        Error::UsernameTooLong(_) => "用户名过长",
        Error::PasswordTooLong(_) => "密码过长",
        Error::ServerVersionTooOld { .. } => "服务器版本过低",
        Error::StatementHandleClosed => "语句句柄已经关闭",
        Error::ResultSetClosed => "结果集已经关闭",
        Error::StringCut { .. } => "字符串截断",
        Error::ParamCountLimit { .. } => "参数个数超出限制",
        Error::NotQuerySql => "非查询语句",
        Error::NotExecSql => "非执行语句",
        Error::InvalidLengthOrOffset => "无效的长度或偏移",
        Error::LobFreed => "大字段已经释放",
        Error::InitSslFailed(_) => "初始化SSL环境失败",
        Error::ThirdPartCipherInitFailed(_) => "第三方加密初始化失败",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = Error::server(-2501, "invalid username or password");
        assert_eq!(err.to_string(), "[-2501] invalid username or password");
        assert_eq!(err.code(), -2501);
    }

    #[test]
    fn test_add_detail_accumulates() {
        let err = Error::BatchError {
            row: 1,
            source: Box::new(Error::server(-6602, "dup")),
        }
        .add_detail(" first")
        .add_detailln("second");
        assert_eq!(err.code(), 6030);
        assert!(err.to_string().ends_with(" first\nsecond"));
    }

    #[test]
    fn test_predicates_see_through_detail() {
        let err = Error::ConnectionClosed.add_detail(": socket reset");
        assert!(err.is_connection_closed());
        assert!(err.is_recoverable());
        assert!(!Error::MsgCheck.is_recoverable());
        assert!(Error::communication("eof").is_communication());
    }

    #[test]
    fn test_bp_with_error_display() {
        let err = Error::BpWithError {
            update_counts: vec![1, -3, 1],
            details: vec![RowError {
                row: 1,
                code: -6602,
                message: "unique violation".into(),
            }],
        };
        assert!(err.to_string().contains("row[1]:-6602,unique violation"));
    }

    #[test]
    fn test_localized_templates() {
        let err = Error::ConnectionClosed.add_detail(" (primary)");
        assert_eq!(err.localized(Locale::En), "connection closed (primary)");
        assert_eq!(err.localized(Locale::ZhCn), "[6005] 连接已经关闭 (primary)");
    }
}
