//! DM wire protocol constants
//!
//! Frame layout offsets, message type codes, column type codes, server mode
//! and status codes, and the assorted limits shared by the client codecs and
//! the test servers.

// =============================================================================
// Frame Layout
// =============================================================================

/// Size of every frame header in bytes
pub const HEADER_SIZE: usize = 64;

/// Exclusive upper bound on a frame body length
pub const MAX_BODY_LEN: usize = 0x2000_0000;

/// Length of the CRC32 trailer in extended-checksum mode
pub const CRC_LEN: usize = 4;

/// Field offsets within the 64-byte frame header
#[allow(missing_docs)]
pub mod header {
    /// Statement id on requests, error code on responses
    pub const STMT_ID: usize = 0;
    pub const MSG_TYPE: usize = 4;
    pub const BODY_LEN: usize = 6;
    /// Server-attached misc word (varies by message)
    pub const MISC: usize = 10;
    pub const EXEC_ID: usize = 14;
    pub const ENCRYPTED: usize = 18;
    /// Request flag byte (message-specific)
    pub const FLAGS: usize = 19;
    pub const COMPRESSED: usize = 50;
    pub const CHECKSUM: usize = 51;
}

// =============================================================================
// Message Types
// =============================================================================

/// Logical message types (header offset 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Credential login
    Login = 1,
    /// Session logout
    Logout = 2,
    /// Allocate a server statement handle
    StmtAllocate = 3,
    /// Free a server statement handle
    StmtFree = 4,
    /// Prepare SQL text
    Prepare = 5,
    /// Execute (direct text or prepared)
    Execute = 6,
    /// Fetch a row window
    Fetch = 7,
    /// Commit the current transaction
    Commit = 8,
    /// Roll back the current transaction
    Rollback = 9,
    /// Set the transaction isolation level
    SetIsolation = 10,
    /// Switch the session read-only flag
    SetReadOnly = 11,
    /// Describe the next result set of a statement
    Describe = 12,
    /// Fetch parameter descriptors
    ParamDescribe = 13,
    /// Execute with N parameter rows
    BatchExecute = 14,
    /// Pre-execute to open off-row parameter handles
    PreExecute = 15,
    /// Append off-row parameter data
    PutData = 16,
    /// LOB sub-protocol operation
    LobOp = 17,
    /// Liveness check
    Ping = 18,
    /// Query table timestamps for result cache validation
    TableTs = 19,
    /// Constant-parameter optimization hint
    ConstParaOpt = 20,
    /// Execute with a full parameter descriptor block
    Execute2 = 90,
    /// Capability exchange (always sent on raw TCP)
    Startup = 200,
}

impl MessageType {
    /// Check if this message belongs to the handshake exchange
    pub fn is_handshake(&self) -> bool {
        matches!(self, MessageType::Startup)
    }
}

impl TryFrom<u16> for MessageType {
    type Error = crate::error::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageType::Login,
            2 => MessageType::Logout,
            3 => MessageType::StmtAllocate,
            4 => MessageType::StmtFree,
            5 => MessageType::Prepare,
            6 => MessageType::Execute,
            7 => MessageType::Fetch,
            8 => MessageType::Commit,
            9 => MessageType::Rollback,
            10 => MessageType::SetIsolation,
            11 => MessageType::SetReadOnly,
            12 => MessageType::Describe,
            13 => MessageType::ParamDescribe,
            14 => MessageType::BatchExecute,
            15 => MessageType::PreExecute,
            16 => MessageType::PutData,
            17 => MessageType::LobOp,
            18 => MessageType::Ping,
            19 => MessageType::TableTs,
            20 => MessageType::ConstParaOpt,
            90 => MessageType::Execute2,
            200 => MessageType::Startup,
            _ => {
                return Err(crate::error::Error::Protocol(format!(
                    "unknown message type: {value}"
                )))
            }
        })
    }
}

// =============================================================================
// Column Types
// =============================================================================

/// DM column type codes
#[allow(missing_docs)]
pub mod col_type {
    pub const CHAR: i32 = 0;
    pub const VARCHAR2: i32 = 1;
    pub const VARCHAR: i32 = 2;
    pub const BIT: i32 = 3;
    pub const TINYINT: i32 = 5;
    pub const SMALLINT: i32 = 6;
    pub const INT: i32 = 7;
    pub const BIGINT: i32 = 8;
    pub const DECIMAL: i32 = 9;
    pub const REAL: i32 = 10;
    pub const DOUBLE: i32 = 11;
    pub const BLOB: i32 = 12;
    pub const BOOLEAN: i32 = 13;
    pub const DATE: i32 = 14;
    pub const TIME: i32 = 15;
    pub const DATETIME: i32 = 16;
    pub const BINARY: i32 = 17;
    pub const VARBINARY: i32 = 18;
    pub const CLOB: i32 = 19;
    pub const INTERVAL_YM: i32 = 20;
    pub const INTERVAL_DT: i32 = 21;
    pub const TIME_TZ: i32 = 22;
    pub const DATETIME_TZ: i32 = 23;
    pub const NULL: i32 = 25;
    pub const DATETIME2: i32 = 26;
    pub const DATETIME2_TZ: i32 = 27;
    pub const ARRAY: i32 = 117;
    pub const CLASS: i32 = 119;
    pub const CURSOR: i32 = 120;

    /// Human-readable name of a type code
    pub fn name(code: i32) -> &'static str {
        match code {
            CHAR => "CHAR",
            VARCHAR2 => "VARCHAR2",
            VARCHAR => "VARCHAR",
            BIT => "BIT",
            TINYINT => "TINYINT",
            SMALLINT => "SMALLINT",
            INT => "INT",
            BIGINT => "BIGINT",
            DECIMAL => "DECIMAL",
            REAL => "REAL",
            DOUBLE => "DOUBLE",
            BLOB => "BLOB",
            BOOLEAN => "BOOLEAN",
            DATE => "DATE",
            TIME => "TIME",
            DATETIME => "DATETIME",
            BINARY => "BINARY",
            VARBINARY => "VARBINARY",
            CLOB => "CLOB",
            INTERVAL_YM => "INTERVAL YEAR TO MONTH",
            INTERVAL_DT => "INTERVAL DAY TO SECOND",
            TIME_TZ => "TIME WITH TIME ZONE",
            DATETIME_TZ => "DATETIME WITH TIME ZONE",
            NULL => "NULL",
            DATETIME2 => "DATETIME2",
            DATETIME2_TZ => "DATETIME2 WITH TIME ZONE",
            ARRAY => "ARRAY",
            CLASS => "CLASS",
            CURSOR => "CURSOR",
            _ => "UNKNOWN",
        }
    }

    /// Check if the type is character data
    pub fn is_character(code: i32) -> bool {
        matches!(code, CHAR | VARCHAR2 | VARCHAR | CLOB)
    }

    /// Check if the type is a LOB type
    pub fn is_lob(code: i32) -> bool {
        matches!(code, BLOB | CLOB)
    }

    /// Check if the type is one of the datetime family
    pub fn is_datetime(code: i32) -> bool {
        matches!(
            code,
            DATE | TIME | DATETIME | TIME_TZ | DATETIME_TZ | DATETIME2 | DATETIME2_TZ
        )
    }
}

/// Scale-mask bits carrying subtype information on descriptors
#[allow(missing_docs)]
pub mod scale_mask {
    pub const LOCAL_DATETIME: i32 = 0x1000;
    pub const ORACLE_DATE: i32 = 0x2000;
    pub const ORACLE_FLOAT: i32 = 0x4000;
    pub const BFILE: i32 = 0x8000;
    /// Bits holding the real scale
    pub const SCALE_BITS: i32 = 0x0FFF;
}

// =============================================================================
// Parameters and Values
// =============================================================================

/// Parameter direction as declared by the server or the binder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IoType {
    /// Input only
    #[default]
    In = 0,
    /// Output only
    Out = 1,
    /// Input and output
    InOut = 2,
    /// Direction not declared
    Unknown = 3,
}

impl From<u8> for IoType {
    fn from(value: u8) -> Self {
        match value {
            0 => IoType::In,
            1 => IoType::Out,
            2 => IoType::InOut,
            _ => IoType::Unknown,
        }
    }
}

impl IoType {
    /// Check if the server returns a value for this position
    pub fn has_output(&self) -> bool {
        matches!(self, IoType::Out | IoType::InOut)
    }
}

/// Cell length tags
#[allow(missing_docs)]
pub mod length {
    /// NULL cell
    pub const NULL: u16 = 0xFFFE;
    /// A 32-bit length follows
    pub const LONG: u16 = 0xFFFF;
    /// Values longer than this always use the long form
    pub const SHORT_MAX: usize = 0xFF00;
}

/// Binding limits
#[allow(missing_docs)]
pub mod limits {
    pub const VARCHAR_PREC: usize = 8188;
    pub const VARBINARY_PREC: usize = 8188;
    /// Largest count the 16-bit parameter count field carries
    pub const PARAM_COUNT_LIMIT: usize = u16::MAX as usize;
    pub const MAX_USERNAME_LEN: usize = 128;
    pub const MAX_PASSWORD_LEN: usize = 128;
    /// Bytes per off-row parameter chunk
    pub const PUT_DATA_CHUNK: usize = 16000;
    /// Bytes per LOB read request
    pub const LOB_READ_MAX: usize = 32000;
    /// Characters per CLOB read request
    pub const CLOB_READ_MAX: usize = 16000;
    /// Bytes per LOB write chunk
    pub const LOB_WRITE_CHUNK: usize = 16000;
    pub const PREFETCH_MIN: i32 = 32;
    pub const PREFETCH_MAX: i32 = 65536;
    pub const DEFAULT_FETCH_SIZE: i32 = 100;
    /// Bytes above which outbound bodies are compressed in auto mode
    pub const COMPRESS_THRESHOLD: usize = 8192;
}

/// Execute-type discriminants
#[allow(missing_docs)]
pub mod exec_type {
    pub const NO_PARAMS: u8 = 0;
    pub const PREPARED: u8 = 1;
    pub const PAGED: u8 = 2;
}

// =============================================================================
// Server State
// =============================================================================

/// Server mode advertised at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ServerMode {
    /// Standalone server
    #[default]
    Normal = 0,
    /// Primary of a guard group
    Primary = 1,
    /// Standby of a guard group
    Standby = 2,
}

impl From<i32> for ServerMode {
    fn from(value: i32) -> Self {
        match value {
            1 => ServerMode::Primary,
            2 => ServerMode::Standby,
            _ => ServerMode::Normal,
        }
    }
}

/// Server status advertised at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ServerStatus {
    /// Status not yet known
    #[default]
    Unknown = 0,
    /// Mounted, not open
    Mount = 3,
    /// Open for service
    Open = 4,
    /// Suspended
    Suspend = 5,
}

impl From<i32> for ServerStatus {
    fn from(value: i32) -> Self {
        match value {
            3 => ServerStatus::Mount,
            4 => ServerStatus::Open,
            5 => ServerStatus::Suspend,
            _ => ServerStatus::Unknown,
        }
    }
}

/// Transaction status bits returned in every execute envelope
#[allow(missing_docs)]
pub mod trx_status {
    pub const MASK: i32 = 0x0F;
    pub const NOT_START: i32 = 0;
    pub const ACTIVE: i32 = 1;
    pub const COMMITTED: i32 = 2;
    pub const ROLLBACKED: i32 = 3;

    /// Check if the masked status is one of the finish states
    pub fn is_finished(status: i32) -> bool {
        matches!(status & MASK, NOT_START | COMMITTED | ROLLBACKED)
    }
}

/// `retSqlType` codes in the execute envelope
#[allow(missing_docs)]
pub mod sql_type {
    pub const SELECT: i16 = 1;
    pub const INSERT: i16 = 2;
    pub const DELETE: i16 = 3;
    pub const UPDATE: i16 = 4;
    pub const DDL: i16 = 5;
    pub const COMMIT: i16 = 6;
    pub const ROLLBACK: i16 = 7;
    pub const SET_SCHEMA: i16 = 8;
    pub const SET_ISOLATION: i16 = 9;
    pub const SET_READONLY: i16 = 10;
    pub const SET_DATE_FORMAT: i16 = 11;
    pub const SET_TIME_FORMAT: i16 = 12;
    pub const SET_TIMESTAMP_FORMAT: i16 = 13;
    pub const EXPLAIN: i16 = 14;
    pub const CALL: i16 = 15;
    pub const MERGE: i16 = 16;
    pub const SET_OTHER: i16 = 17;

    /// Check if the statement produces a row count
    pub fn is_dml(code: i16) -> bool {
        matches!(code, INSERT | DELETE | UPDATE | MERGE)
    }

    /// Check if the statement alters session state
    pub fn is_session_setting(code: i16) -> bool {
        matches!(
            code,
            SET_SCHEMA
                | SET_ISOLATION
                | SET_READONLY
                | SET_DATE_FORMAT
                | SET_TIME_FORMAT
                | SET_TIMESTAMP_FORMAT
                | SET_OTHER
        )
    }
}

// =============================================================================
// Handshake Selectors
// =============================================================================

/// Server encryption modes from the capability exchange
#[allow(missing_docs)]
pub mod encrypt_mode {
    pub const NONE: i32 = 0;
    pub const ENCRYPT: i32 = 1;
    /// TLS retained together with the symmetric cipher
    pub const COMPAT: i32 = 2;
}

/// Checksum modes from the capability exchange
#[allow(missing_docs)]
pub mod checksum_mode {
    pub const XOR: u8 = 0;
    pub const CRC32: u8 = 1;
}

/// Client type sent at login
#[allow(missing_docs)]
pub mod client_type {
    pub const LEGACY: u8 = 2;
    pub const NEW: u8 = 5;
}

/// Client product version string
pub const CLIENT_VERSION: &str = "8.1.3.100";

/// Minimum server product version accepted
pub const MIN_SERVER_VERSION: &str = "7.0.0.9";

/// Protocol message version advertised by the client
pub const MSG_VERSION: i32 = 12;

/// LOB operation sub-codes
#[allow(missing_docs)]
pub mod lob_op {
    pub const GET_LENGTH: u8 = 1;
    pub const GET_DATA: u8 = 2;
    pub const SET_DATA: u8 = 3;
    pub const TRUNCATE: u8 = 4;
}

/// LOB handle disposition and write flags
#[allow(missing_docs)]
pub mod lob_flags {
    pub const IN_ROW: u8 = 1;
    pub const OFF_ROW: u8 = 2;
    pub const WRITE_FIRST: u8 = 0x01;
    pub const WRITE_LAST: u8 = 0x02;
}

// =============================================================================
// Session Options
// =============================================================================

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Dirty reads allowed
    ReadUncommitted,
    /// Default level
    #[default]
    ReadCommitted,
    /// Repeatable reads
    RepeatableRead,
    /// Full serializability
    Serializable,
}

impl IsolationLevel {
    /// Encode as the server's isolation code
    pub fn to_db(&self) -> i32 {
        match self {
            IsolationLevel::ReadUncommitted => 0,
            IsolationLevel::ReadCommitted => 1,
            IsolationLevel::RepeatableRead => 2,
            IsolationLevel::Serializable => 3,
        }
    }

    /// Decode the server's isolation code
    pub fn from_db(code: i32) -> crate::error::Result<Self> {
        Ok(match code {
            0 => IsolationLevel::ReadUncommitted,
            1 => IsolationLevel::ReadCommitted,
            2 => IsolationLevel::RepeatableRead,
            3 => IsolationLevel::Serializable,
            other => {
                return Err(crate::error::Error::InvalidTranIsolation(other.to_string()))
            }
        })
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "readuncommitted" | "0" => Ok(IsolationLevel::ReadUncommitted),
            "readcommitted" | "1" => Ok(IsolationLevel::ReadCommitted),
            "repeatableread" | "2" => Ok(IsolationLevel::RepeatableRead),
            "serializable" | "3" => Ok(IsolationLevel::Serializable),
            _ => Err(crate::error::Error::InvalidTranIsolation(s.to_string())),
        }
    }
}

/// Client locale, used for error text encoding and message templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    /// Simplified Chinese
    #[default]
    ZhCn,
    /// English
    En,
    /// Traditional Chinese (Hong Kong)
    ZhHk,
    /// Korean
    Kr,
}

impl Locale {
    /// Wire code sent at login
    pub fn code(&self) -> i32 {
        match self {
            Locale::ZhCn => 0,
            Locale::En => 1,
            Locale::ZhHk => 2,
            Locale::Kr => 3,
        }
    }
}

impl std::str::FromStr for Locale {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "cn" | "zh" | "zh_cn" | "zh-cn" => Ok(Locale::ZhCn),
            "1" | "en" | "en_us" | "en-us" => Ok(Locale::En),
            "2" | "hk" | "zh_hk" | "zh-hk" => Ok(Locale::ZhHk),
            "3" | "kr" | "ko_kr" | "ko-kr" => Ok(Locale::Kr),
            _ => Err(crate::error::Error::InvalidConnectionString(format!(
                "unknown locale: {s}"
            ))),
        }
    }
}
