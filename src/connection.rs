//! DM database connection
//!
//! This module provides the main `Connection` type. A connection owns a
//! primary session and, under read/write split, a standby session. Every
//! operation runs inside the same envelope: queued statement frees are
//! flushed first, the recovery check may move the connection back to a
//! preferred endpoint, and a broken socket afterwards either reconnects
//! (surfacing [`Error::ConnectionSwitched`]) or closes the connection
//! (surfacing [`Error::BadConnection`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use dm_rs::{Connection, Value};
//!
//! # async fn example() -> dm_rs::Result<()> {
//! let conn = Connection::connect("dm://SYSDBA:SYSDBA@localhost:5236").await?;
//!
//! let result = conn.query("SELECT id, name FROM users WHERE id > ?", &[Value::Integer(10)]).await?;
//! for row in &result {
//!     println!("{:?}", row.get_string(1));
//! }
//!
//! conn.execute("UPDATE users SET name = 'x' WHERE id = 1", &[]).await?;
//! conn.commit().await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::batch::{self, BatchBinds, BatchPlan, BatchResult, EXECUTE_FAILED};
use crate::buffer::{ByteBuffer, ChunkQueue};
use crate::compress::{CompressAlgorithm, CompressMode};
use crate::config::{ClusterMode, Config, DoSwitch, HostPort, LobMode};
use crate::constants::{
    client_type, encrypt_mode, limits, lob_flags, sql_type, trx_status, IsolationLevel, ServerMode,
    ServerStatus, CLIENT_VERSION, MIN_SERVER_VERSION, MSG_VERSION,
};
use crate::context::driver;
use crate::crypto::{build_cipher, DhKeyPair, HashType};
use crate::encoding::Encoding;
use crate::endpoint::{self, EndpointGroup};
use crate::error::{Error, Result, RowError};
use crate::messages::{
    BatchExecuteMessage, ColumnInfo, CommitMessage, DescribeMessage, ExecInfo, ExecPayload,
    ExecuteMessage, ExecuteOptions, ExecuteReply, FetchMessage, FetchReply, LobOp, LobOpMessage,
    LobReply, LoginMessage, LoginReply, LogoutMessage, ParamInfo, PingMessage, PrepareMessage,
    PrepareReply, PreExecuteMessage, PutDataMessage, ResultSegment, RollbackMessage,
    SetIsolationMessage, SetReadOnlyMessage, StartupMessage, StartupReply, StmtAllocateMessage,
    StmtFreeMessage, TableTsMessage, WireContext, version_at_least,
};
use crate::packet::ChecksumMode;
use crate::result_cache::{CacheKey, Lookup};
use crate::row::{decode_cell, CursorRef, DecodeContext, Row, Value};
use crate::rows::{Origin, Rows, RowsSettings};
use crate::session::{CancelGuard, Session};
use crate::statement::{bind_row, is_write_sql, BindParam, BoundRow, CallResult, Statement, StatementType, StmtOptions};
use crate::types::{LobData, LobLocator};

/// Global connection ID counter
static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Result set from a query
#[derive(Debug)]
pub struct QueryResult {
    /// Column information
    pub columns: Vec<ColumnInfo>,
    /// Rows returned
    pub rows: Vec<Row>,
    /// Number of rows affected; queries leave it at 0
    pub rows_affected: u64,
}

impl QueryResult {
    /// Create an empty query result
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
        }
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get a column by name
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get column index by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Iterate over rows
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// Get the first row
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Outcome of a non-query execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted
    pub rows_affected: u64,
    /// Row id of a single inserted row
    pub last_insert_id: Option<i64>,
    /// Statement type code reported by the server
    pub sql_type: i16,
    /// Explain or print output
    pub explain: Option<String>,
}

impl ExecResult {
    fn from_exec(info: &ExecInfo, payload: &ExecPayload) -> Self {
        let rows_affected = if sql_type::is_dml(info.ret_sql_type) {
            info.row_count.max(0) as u64
        } else {
            0
        };
        let last_insert_id = (info.ret_sql_type == sql_type::INSERT && info.row_count == 1 && info.rowid != 0)
            .then_some(info.rowid);
        let explain = match payload {
            ExecPayload::Explain(text) => Some(text.clone()),
            _ => info.print_msg.clone(),
        };
        Self {
            rows_affected,
            last_insert_id,
            sql_type: info.ret_sql_type,
            explain,
        }
    }
}

/// Server information obtained during login
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Server product version
    pub version: String,
    /// Instance name
    pub instance_name: String,
    /// Database name
    pub db_name: String,
    /// Database guid
    pub guid: String,
    /// Server session id
    pub session_id: i64,
    /// Server mode at login
    pub server_mode: ServerMode,
    /// Server status at login
    pub server_status: ServerStatus,
    /// Server character set
    pub encoding: Encoding,
    /// Negotiated message version
    pub msg_version: i32,
    /// Largest row the server accepts
    pub max_row_size: i32,
    /// Identifiers are case sensitive
    pub case_sensitive: bool,
    /// LOB handles carry the extended locator
    pub new_lob: bool,
    /// `host:port` of the primary session
    pub endpoint: String,
    /// `host:port` of the standby session under read/write split
    pub standby: Option<String>,
    /// Frame bodies are encrypted
    pub encrypted: bool,
    /// Transport is TLS
    pub tls: bool,
    /// Warnings returned at login
    pub warnings: Option<String>,
}

// =============================================================================
// Session Establishment
// =============================================================================

/// An authenticated session plus what the server told us about itself
struct Handshake {
    session: Arc<Session>,
    startup: StartupReply,
    login: LoginReply,
    encoding: Encoding,
    encrypted: bool,
    tls: bool,
}

impl Handshake {
    fn mode(&self) -> ServerMode {
        ServerMode::from(self.login.server_mode)
    }

    fn status(&self) -> ServerStatus {
        ServerStatus::from(self.login.server_status)
    }

    fn server_info(&self, standby: Option<String>) -> ServerInfo {
        ServerInfo {
            version: self.startup.server_version.clone(),
            instance_name: self.login.instance_name.clone(),
            db_name: self.login.db_name.clone(),
            guid: self.login.guid.clone(),
            session_id: self.login.session_id,
            server_mode: self.mode(),
            server_status: self.status(),
            encoding: self.encoding,
            msg_version: self.startup.msg_version.min(MSG_VERSION),
            max_row_size: self.login.max_row_size,
            case_sensitive: self.login.case_sensitive,
            new_lob: self.login.new_lob,
            endpoint: self.session.endpoint(),
            standby,
            encrypted: self.encrypted,
            tls: self.tls,
            warnings: (!self.login.warnings.is_empty()).then(|| self.login.warnings.clone()),
        }
    }
}

fn local_host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default()
}

fn is_local(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host.starts_with("127.") || host == "::1"
}

/// Dial `addr`, run the capability exchange and log in
async fn open_session(config: &Config, addr: &HostPort, rw_standby: bool) -> Result<Handshake> {
    let ctx = WireContext {
        locale: config.locale,
        server_is_local: is_local(&addr.host),
        ..WireContext::default()
    };
    let session = Arc::new(
        Session::connect(&addr.host, addr.port, config.connect_timeout, config.socket_timeout, ctx).await?,
    );
    debug!(session = session.id(), endpoint = %addr, "socket connected");

    let keys = (config.login_encrypt || config.login_cert.is_some()).then(DhKeyPair::generate);
    let mut startup = StartupMessage {
        client_version: CLIENT_VERSION.to_string(),
        encrypt: config.login_encrypt,
        compress: config.compress.code(),
        compress_id: config.compress_id.id(),
        cert: config.login_cert.is_some(),
        new_client: true,
        msg_version: MSG_VERSION,
        dh_public: keys.as_ref().map(DhKeyPair::public_bytes).unwrap_or_default(),
    };
    let reply = session.execute(&mut startup).await?;
    if !version_at_least(&reply.server_version, MIN_SERVER_VERSION) {
        return Err(Error::ServerVersionTooOld {
            version: reply.server_version,
            minimum: MIN_SERVER_VERSION.to_string(),
        });
    }
    let encoding = Encoding::from_code(reply.encoding)?;
    let compress_mode = CompressMode::from_code(reply.compress);
    let algorithm = if compress_mode == CompressMode::Off {
        CompressAlgorithm::default()
    } else {
        CompressAlgorithm::from_id(reply.compress_id)?
    };
    session
        .update_context(|ctx| {
            ctx.encoding = encoding;
            ctx.msg_version = reply.msg_version.min(MSG_VERSION);
            ctx.new_client = reply.new_client;
            ctx.bdta = reply.bdta;
            ctx.compress_mode = compress_mode;
        })
        .await;
    session
        .set_protocol(ChecksumMode::from_code(reply.checksum_mode), algorithm)
        .await;
    debug!(
        session = session.id(),
        server_version = %reply.server_version,
        encrypt_mode = reply.encrypt_mode,
        ssl = reply.ssl,
        ?compress_mode,
        "capability exchange complete"
    );

    if reply.ssl {
        let tls = config.tls.clone().unwrap_or_default();
        session.upgrade_tls(&config.username, &tls).await?;
    }

    let cert_login = reply.cert_login() && config.login_cert.is_some();
    let cipher = match &keys {
        Some(keys) if (reply.encryption_enabled() || cert_login) && !reply.dh_public.is_empty() => {
            let secret = keys.derive(&reply.dh_public)?;
            Some(build_cipher(
                reply.encrypt_type,
                HashType::from_id(reply.hash_type),
                &secret,
                config.cipher_path.as_deref(),
            )?)
        }
        _ => None,
    };

    let mut login = LoginMessage {
        client_type: if reply.new_client { client_type::NEW } else { client_type::LEGACY },
        isolation: config.isolation.to_db(),
        locale: config.locale.code(),
        time_zone: config.time_zone,
        read_only: config.read_only,
        session_timeout: config.session_timeout,
        mpp_local: config.mpp_local,
        rw_standby,
        new_lob: true,
        app_name: config.app_name.clone(),
        os_name: std::env::consts::OS.to_string(),
        host_name: local_host_name(),
        rw_flag: config.rw_separate as u8,
        ..LoginMessage::default()
    };
    {
        let seal = |plain: &[u8]| -> Result<Vec<u8>> {
            match &cipher {
                Some(c) => c.encrypt(plain, true),
                None => Ok(plain.to_vec()),
            }
        };
        let seal: &dyn Fn(&[u8]) -> Result<Vec<u8>> = &seal;
        let user = encoding.encode(&config.username).into_owned();
        match config.login_cert.as_deref().filter(|_| cert_login) {
            Some(path) => {
                if cipher.is_none() {
                    return Err(Error::InitSslFailed(
                        "certificate login requires a negotiated session key".to_string(),
                    ));
                }
                let cert = std::fs::read(path)
                    .map_err(|e| Error::InitSslFailed(format!("failed to read login cert {path}: {e}")))?;
                debug!(session = session.id(), path, "certificate login");
                login.set_certificate(&user, &cert, seal)?;
            }
            None => {
                let password = encoding.encode(config.password()).into_owned();
                login.set_credentials(&user, &password, cipher.is_some().then_some(seal))?;
            }
        }
    }
    let login_reply = session.execute(&mut login).await?;

    session.update_context(|ctx| ctx.new_lob = login_reply.new_lob).await;
    let mut encrypted = false;
    if reply.encrypt_mode == encrypt_mode::ENCRYPT || reply.encrypt_mode == encrypt_mode::COMPAT {
        if let Some(cipher) = cipher {
            session.enable_encryption(cipher).await;
            encrypted = true;
        }
    }
    if reply.ssl && reply.encrypt_mode == encrypt_mode::ENCRYPT {
        if encrypted {
            session.drop_tls().await?;
        } else {
            warn!(session = session.id(), "no session key for frame encryption, keeping tls");
        }
    }
    let tls = session.is_tls().await;
    info!(
        session = session.id(),
        endpoint = %addr,
        server_mode = login_reply.server_mode,
        schema = %login_reply.schema,
        rw_standby,
        "logged in"
    );
    Ok(Handshake {
        session,
        startup: reply,
        login: login_reply,
        encoding,
        encrypted,
        tls,
    })
}

async fn dial(config: &Config, addr: HostPort) -> Result<(Handshake, ServerMode, ServerStatus, bool)> {
    let hs = open_session(config, &addr, false).await?;
    let (mode, status, dsc) = (hs.mode(), hs.status(), hs.login.dsc_control);
    Ok((hs, mode, status, dsc))
}

// =============================================================================
// Session Helpers
// =============================================================================

async fn free_on(session: &Session, stmt_id: i32) {
    if let Err(e) = session.execute(&mut StmtFreeMessage { stmt_id }).await {
        debug!(session = session.id(), stmt_id, error = %e, "statement free failed");
    }
}

async fn prepare_on(session: &Session, sql: &str, read_base_col: bool) -> Result<PrepareReply> {
    let stmt_id = session.execute(&mut StmtAllocateMessage).await?;
    let mut msg = PrepareMessage {
        stmt_id,
        sql: sql.to_string(),
        read_base_col,
    };
    match session.execute(&mut msg).await {
        Ok(mut reply) => {
            if reply.stmt_id == 0 {
                reply.stmt_id = stmt_id;
            }
            Ok(reply)
        }
        Err(e) => {
            if !e.is_recoverable() {
                free_on(session, stmt_id).await;
            }
            Err(e)
        }
    }
}

/// Run SQL text on a throwaway handle
async fn exec_simple(session: &Session, sql: &str, options: ExecuteOptions) -> Result<ExecuteReply> {
    let stmt_id = session.execute(&mut StmtAllocateMessage).await?;
    let result = session.execute(&mut ExecuteMessage::direct(stmt_id, sql, options)).await;
    if !matches!(&result, Err(e) if e.is_recoverable()) {
        free_on(session, stmt_id).await;
    }
    result
}

fn set_schema_sql(schema: &str) -> String {
    format!("SET SCHEMA \"{}\"", schema.replace('"', "\"\""))
}

/// An executed parameter row
struct BoundExec {
    bound: BoundRow,
    reply: ExecuteReply,
    /// Parameter position and child statement of each cursor output
    children: Vec<(usize, i32)>,
}

async fn execute_bound(
    session: &Session,
    stmt_id: i32,
    server: &[ParamInfo],
    columns: &[ColumnInfo],
    read_base_col: bool,
    mut bound: BoundRow,
    options: ExecuteOptions,
) -> Result<BoundExec> {
    let mut children = Vec::with_capacity(bound.cursors.len());
    for &pos in &bound.cursors {
        let child = session.execute(&mut StmtAllocateMessage).await?;
        if let Some(cell) = bound.cells.get_mut(pos) {
            *cell = Some(child.to_be_bytes().to_vec());
        }
        children.push((pos, child));
    }
    if bound.needs_off_row() {
        session
            .execute(&mut PreExecuteMessage {
                stmt_id,
                params: bound.params.clone(),
            })
            .await?;
        for (index, data) in &bound.off_row {
            let mut staged = ChunkQueue::new();
            staged.push(data.clone());
            while !staged.is_empty() {
                let mut piece = ByteBuffer::with_capacity(limits::PUT_DATA_CHUNK);
                staged.read_into(&mut piece, limits::PUT_DATA_CHUNK);
                session
                    .execute(&mut PutDataMessage {
                        stmt_id,
                        param_index: *index as i16,
                        chunk: piece.into_vec(),
                    })
                    .await?;
            }
            trace!(stmt_id, param = index, bytes = data.len(), "streamed off-row parameter");
        }
    }
    let mut msg = ExecuteMessage::prepared(stmt_id, bound.params.clone(), bound.cells.clone(), options);
    msg.with_descriptors = bound.params.as_slice() != server;
    msg.columns = columns.to_vec();
    msg.read_base_col = read_base_col;
    let reply = session.execute(&mut msg).await?;
    Ok(BoundExec {
        bound,
        reply,
        children,
    })
}

fn decode_outputs(exec: &BoundExec, decode: DecodeContext) -> Result<Vec<Option<Value>>> {
    exec.bound
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if !p.io_type.has_output() {
                return Ok(None);
            }
            if let Some(&(_, child)) = exec.children.iter().find(|(pos, _)| *pos == i) {
                return Ok(Some(Value::Cursor(CursorRef { stmt_id: child })));
            }
            let cell = exec
                .reply
                .out_values
                .get(i)
                .and_then(Option::as_ref)
                .and_then(|v| v.as_deref());
            decode_cell(p.col_type, cell, decode).map(Some)
        })
        .collect()
}

// =============================================================================
// LOB Helpers
// =============================================================================

fn unexpected_lob_reply(reply: LobReply) -> Error {
    Error::Protocol(format!("unexpected LOB reply {reply:?}"))
}

async fn lob_length_on(session: &Session, lob: &LobLocator) -> Result<i64> {
    lob.check_live()?;
    if lob.in_row {
        return Ok(lob.length);
    }
    match session.execute(&mut LobOpMessage::new(lob, LobOp::GetLength)).await? {
        LobReply::Length(n) => Ok(n),
        other => Err(unexpected_lob_reply(other)),
    }
}

async fn lob_read_on(session: &Session, lob: &LobLocator, offset: i64, len: i64, encoding: Encoding) -> Result<Vec<u8>> {
    lob.check_live()?;
    if offset < 0 || len < 0 {
        return Err(Error::InvalidLengthOrOffset);
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    if let Some(data) = lob.inline_data() {
        if lob.is_clob {
            let text = encoding.decode(data)?;
            let slice: String = text.chars().skip(offset as usize).take(len as usize).collect();
            return Ok(encoding.encode(&slice).into_owned());
        }
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        return Ok(data[start..end].to_vec());
    }

    let cap = (if lob.is_clob { limits::CLOB_READ_MAX } else { limits::LOB_READ_MAX }) as i64;
    let mut out = Vec::new();
    let mut pos = offset;
    let mut left = len;
    while left > 0 {
        let want = left.min(cap) as i32;
        let op = LobOp::GetData { offset: pos, len: want };
        match session.execute(&mut LobOpMessage::new(lob, op)).await? {
            LobReply::Data {
                read_over,
                char_len,
                bytes,
            } => {
                let advanced = if lob.is_clob { char_len as i64 } else { bytes.len() as i64 };
                out.extend_from_slice(&bytes);
                pos += advanced;
                left -= advanced;
                if read_over || advanced <= 0 {
                    break;
                }
            }
            other => return Err(unexpected_lob_reply(other)),
        }
    }
    trace!(blob_id = lob.blob_id, offset, bytes = out.len(), "lob read");
    Ok(out)
}

async fn lob_write_on(session: &Session, lob: &LobLocator, offset: i64, data: &[u8]) -> Result<i64> {
    lob.check_live()?;
    if offset < 0 {
        return Err(Error::InvalidLengthOrOffset);
    }
    let mut staged = ChunkQueue::new();
    staged.push(Bytes::copy_from_slice(data));
    let mut written = 0i64;
    let mut pos = offset;
    let mut first = true;
    while !staged.is_empty() {
        let mut piece = ByteBuffer::with_capacity(limits::LOB_WRITE_CHUNK);
        staged.read_into(&mut piece, limits::LOB_WRITE_CHUNK);
        let mut flags = 0;
        if first {
            flags |= lob_flags::WRITE_FIRST;
            first = false;
        }
        if staged.is_empty() {
            flags |= lob_flags::WRITE_LAST;
        }
        let op = LobOp::SetData {
            flags,
            offset: pos,
            data: piece.into_vec(),
        };
        match session.execute(&mut LobOpMessage::new(lob, op)).await? {
            LobReply::Written(n) if n > 0 => {
                written += n as i64;
                pos += n as i64;
            }
            LobReply::Written(_) => break,
            other => return Err(unexpected_lob_reply(other)),
        }
    }
    trace!(blob_id = lob.blob_id, offset, written, "lob write");
    Ok(written)
}

async fn lob_truncate_on(session: &Session, lob: &LobLocator, new_len: i64) -> Result<i64> {
    lob.check_live()?;
    if new_len < 0 {
        return Err(Error::InvalidLengthOrOffset);
    }
    match session.execute(&mut LobOpMessage::new(lob, LobOp::Truncate { new_len })).await? {
        LobReply::Truncated(n) => Ok(n),
        other => Err(unexpected_lob_reply(other)),
    }
}

// =============================================================================
// Connection Core
// =============================================================================

/// One session as the connection uses it
#[derive(Debug, Clone)]
struct Link {
    session: Arc<Session>,
    decode: DecodeContext,
    bdta: bool,
    /// Index in the endpoint group, when dialed through it
    endpoint: Option<usize>,
}

impl Link {
    fn new(hs: &Handshake, endpoint: Option<usize>) -> Self {
        Self {
            session: hs.session.clone(),
            decode: DecodeContext {
                encoding: hs.encoding,
                new_lob: hs.login.new_lob,
            },
            bdta: hs.startup.bdta,
            endpoint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Primary,
    Standby,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::Primary => Side::Standby,
            Side::Standby => Side::Primary,
        }
    }
}

/// A prepared statement as the connection tracks it
#[derive(Debug)]
struct StmtEntry {
    server_id: i32,
    sql: String,
    stmt_type: StatementType,
    read_base_col: bool,
    params: Vec<ParamInfo>,
    columns: Vec<ColumnInfo>,
    /// Session generation the handle was prepared in
    generation: u64,
    /// Bumped on every execution; result sets of older executions are stale
    exec_seq: u64,
    /// Unopened cursor statements from the last execution
    children: Vec<i32>,
}

/// Statement handle release deferred to the next request
#[derive(Debug, Clone, Copy)]
enum PendingFree {
    Key(u64),
    Server { session: u32, stmt_id: i32 },
}

struct ConnectionInner {
    primary: Link,
    standby: Option<Link>,
    info: ServerInfo,
    group: Arc<EndpointGroup>,
    schema: String,
    auto_commit: bool,
    isolation: IsolationLevel,
    read_only: bool,
    trx_finish: bool,
    formats: Option<(String, String, String)>,
    buf_prefetch: i32,
    statements: HashMap<u64, StmtEntry>,
    next_key: u64,
    generation: u64,
    last_recovery_check: Instant,
}

impl ConnectionInner {
    fn link(&self, side: Side) -> Option<&Link> {
        match side {
            Side::Primary => Some(&self.primary),
            Side::Standby => self.standby.as_ref(),
        }
    }
}

/// What an execution produced
pub(crate) enum Outcome {
    Rows(Rows),
    Done(ExecResult),
}

impl Outcome {
    fn sql_type(&self) -> i16 {
        match self {
            Outcome::Rows(_) => sql_type::SELECT,
            Outcome::Done(r) => r.sql_type,
        }
    }
}

/// State shared between a connection and its statements and result sets
pub(crate) struct ConnCore {
    id: u32,
    config: Config,
    inner: Mutex<ConnectionInner>,
    pending: StdMutex<Vec<PendingFree>>,
    sessions: StdMutex<(Arc<Session>, Option<Arc<Session>>)>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnCore")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConnCore {
    async fn open(mut config: Config) -> Result<Arc<Self>> {
        let ctx = driver();
        ctx.prepare_config(&mut config)?;
        if config.endpoints.is_empty() {
            return Err(Error::InvalidConnectionString("no endpoint configured".to_string()));
        }
        let group = ctx.endpoint_group(&config);
        let (index, hs) = endpoint::connect_group(&group, &config, |_, addr| dial(&config, addr)).await?;

        let standby = if config.rw_separate {
            match hs.login.standby.clone().filter(|s| s.count > 0 && !s.host.is_empty()) {
                Some(sb) => {
                    let addr = HostPort::new(sb.host, sb.port);
                    match open_session(&config, &addr, true).await {
                        Ok(s) => Some(s),
                        Err(e) => {
                            warn!(endpoint = %addr, error = %e, "standby session unavailable, reads stay on primary");
                            None
                        }
                    }
                }
                None => None,
            }
        } else {
            None
        };

        let schema = if hs.login.schema.is_empty() {
            config.username.to_ascii_uppercase()
        } else {
            hs.login.schema.clone()
        };
        let buf_prefetch = if config.buf_prefetch > 0 {
            config.buf_prefetch
        } else {
            hs.login.buf_prefetch
        };
        let primary = Link::new(&hs, Some(index));
        let standby_link = standby.as_ref().map(|s| Link::new(s, None));
        let inner = ConnectionInner {
            info: hs.server_info(standby.as_ref().map(|s| s.session.endpoint())),
            primary,
            standby: standby_link,
            group,
            schema,
            auto_commit: config.auto_commit,
            isolation: config.isolation,
            read_only: config.read_only,
            trx_finish: true,
            formats: hs.login.formats.clone(),
            buf_prefetch,
            statements: HashMap::new(),
            next_key: 1,
            generation: 0,
            last_recovery_check: Instant::now(),
        };
        let core = Arc::new(ConnCore {
            id: CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            sessions: StdMutex::new((inner.primary.session.clone(), inner.standby.as_ref().map(|l| l.session.clone()))),
            inner: Mutex::new(inner),
            pending: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            config,
        });

        if let Some(schema) = core.config.schema.clone() {
            core.set_schema(&schema).await?;
        }
        debug!(connection = core.id, endpoint = %hs.session.endpoint(), "connection ready");
        Ok(core)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn default_options(&self) -> StmtOptions {
        StmtOptions {
            query_timeout: 0,
            fetch_size: if self.config.row_prefetch > 0 {
                self.config.row_prefetch
            } else {
                limits::DEFAULT_FETCH_SIZE
            },
            max_rows: self.config.max_rows,
        }
    }

    fn exec_options(&self, inner: &ConnectionInner, opts: StmtOptions, link: &Link) -> ExecuteOptions {
        ExecuteOptions {
            autocommit: inner.auto_commit,
            query_timeout: opts.query_timeout,
            max_rows: opts.max_rows,
            continue_batch_on_error: self.config.continue_batch_on_error,
            bdta: link.bdta,
            stmt_flags: 0,
            fetch_size: opts.fetch_size,
        }
    }

    fn settings(&self, inner: &ConnectionInner, link: &Link, opts: StmtOptions, standby: bool) -> RowsSettings {
        RowsSettings {
            fetch_size: opts.fetch_size.max(1),
            buf_prefetch: inner.buf_prefetch,
            max_rows: opts.max_rows,
            decode: link.decode,
            fetch_lobs: standby || self.config.lob_mode == LobMode::FetchAll,
            read_base_col: false,
        }
    }

    fn sync_sessions(&self, inner: &ConnectionInner) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        *sessions = (
            inner.primary.session.clone(),
            inner.standby.as_ref().map(|l| l.session.clone()),
        );
    }

    fn primary_session(&self) -> Arc<Session> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).0.clone()
    }

    /// Mark closed and abort in-flight exchanges on every session
    fn abort(&self) {
        self.closed.store(true, Ordering::Release);
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.0.hard_close();
        if let Some(standby) = &sessions.1 {
            standby.hard_close();
        }
    }

    // -------------------------------------------------------------------------
    // Request envelope
    // -------------------------------------------------------------------------

    async fn begin(&self) -> Result<MutexGuard<'_, ConnectionInner>> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        self.ensure_open()?;
        self.flush_pending(&mut inner).await;
        if let Err(e) = self.check_recovery(&mut inner).await {
            debug!(connection = self.id, error = %e, "recovery check failed");
        }
        Ok(inner)
    }

    async fn finish<T>(&self, inner: &mut ConnectionInner, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !err.is_recoverable() {
            return Err(err);
        }
        if inner.standby.as_ref().is_some_and(|l| l.session.is_closed()) {
            warn!(connection = self.id, "standby session lost");
            inner.standby = None;
            inner.info.standby = None;
            self.sync_sessions(inner);
        }
        if !inner.primary.session.is_closed() {
            return Err(err);
        }
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if !self.config.driver_reconnect {
            warn!(connection = self.id, error = %err, "connection broken");
            self.shutdown(inner).await;
            return Err(Error::BadConnection.add_detail(format!(": {err}")));
        }
        match self.reconnect(inner).await {
            Ok(endpoint) => Err(Error::ConnectionSwitched { endpoint }.add_detail(format!(": {err}"))),
            Err(e) => {
                warn!(connection = self.id, error = %e, "reconnect failed");
                self.shutdown(inner).await;
                Err(Error::BadConnection.add_detail(format!(": {e}")))
            }
        }
    }

    async fn shutdown(&self, inner: &mut ConnectionInner) {
        self.closed.store(true, Ordering::Release);
        inner.primary.session.close().await;
        if let Some(standby) = &inner.standby {
            standby.session.close().await;
        }
    }

    async fn flush_pending(&self, inner: &mut ConnectionInner) {
        let pending = {
            let mut queue = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *queue)
        };
        for item in pending {
            match item {
                PendingFree::Key(key) => {
                    let Some(entry) = inner.statements.remove(&key) else {
                        continue;
                    };
                    if entry.generation != inner.generation {
                        continue;
                    }
                    for id in entry.children.iter().copied().chain([entry.server_id]) {
                        free_on(&inner.primary.session, id).await;
                    }
                }
                PendingFree::Server { session, stmt_id } => {
                    let link = [Some(&inner.primary), inner.standby.as_ref()]
                        .into_iter()
                        .flatten()
                        .find(|l| l.session.id() == session);
                    if let Some(link) = link {
                        free_on(&link.session, stmt_id).await;
                    }
                }
            }
        }
    }

    pub(crate) fn queue_statement_free(&self, key: u64) {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push(PendingFree::Key(key));
    }

    pub(crate) fn queue_free(&self, session: u32, stmt_id: i32) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PendingFree::Server { session, stmt_id });
    }

    pub(crate) async fn free_statement(&self, session: &Session, stmt_id: i32) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let _inner = self.begin().await?;
        free_on(session, stmt_id).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // HA: reconnect and recovery
    // -------------------------------------------------------------------------

    async fn reconnect(&self, inner: &mut ConnectionInner) -> Result<String> {
        if let Some(ep) = inner.primary.endpoint.and_then(|i| inner.group.get(i)) {
            ep.mark_down();
        }
        let group = inner.group.clone();
        let (index, hs) = endpoint::connect_group(&group, &self.config, |_, addr| dial(&self.config, addr)).await?;
        let endpoint = hs.session.endpoint();
        warn!(connection = self.id, endpoint = %endpoint, "connection switched");
        self.install_primary(inner, hs, index).await;
        Ok(endpoint)
    }

    /// Replace the primary session and bring session state and statements over
    async fn install_primary(&self, inner: &mut ConnectionInner, hs: Handshake, index: usize) {
        let login_schema = hs.login.schema.clone();
        let old = std::mem::replace(&mut inner.primary, Link::new(&hs, Some(index)));
        let standby = inner.info.standby.take();
        inner.info = hs.server_info(standby);
        inner.generation += 1;
        inner.trx_finish = true;
        inner.last_recovery_check = Instant::now();
        self.sync_sessions(inner);
        old.session.close().await;

        self.restore_session(inner, &login_schema).await;
        self.reprepare_all(inner).await;
    }

    async fn restore_session(&self, inner: &mut ConnectionInner, login_schema: &str) {
        let session = inner.primary.session.clone();
        if inner.isolation != self.config.isolation {
            let level = inner.isolation.to_db();
            if let Err(e) = session.execute(&mut SetIsolationMessage { level }).await {
                warn!(connection = self.id, error = %e, "failed to restore isolation level");
            }
        }
        if inner.read_only != self.config.read_only {
            let read_only = inner.read_only;
            if let Err(e) = session.execute(&mut SetReadOnlyMessage { read_only }).await {
                warn!(connection = self.id, error = %e, "failed to restore read-only flag");
            }
        }
        if !inner.schema.is_empty() && !inner.schema.eq_ignore_ascii_case(login_schema) {
            let options = self.exec_options(inner, self.default_options(), &inner.primary);
            if let Err(e) = exec_simple(&session, &set_schema_sql(&inner.schema), options).await {
                warn!(connection = self.id, error = %e, "failed to restore schema");
            }
        }
    }

    async fn reprepare_all(&self, inner: &mut ConnectionInner) {
        let ConnectionInner {
            primary,
            statements,
            generation,
            ..
        } = inner;
        for (key, entry) in statements.iter_mut() {
            entry.children.clear();
            entry.exec_seq += 1;
            match prepare_on(&primary.session, &entry.sql, entry.read_base_col).await {
                Ok(reply) => {
                    entry.server_id = reply.stmt_id;
                    entry.params = reply.params;
                    entry.columns = reply.columns;
                    entry.generation = *generation;
                }
                Err(e) => {
                    warn!(connection = self.id, key, error = %e, "re-prepare failed, retrying on next use");
                }
            }
        }
    }

    /// Re-prepare a statement left behind by a reconnect
    async fn ensure_current(&self, inner: &mut ConnectionInner, key: u64) -> Result<()> {
        let generation = inner.generation;
        let entry = inner.statements.get_mut(&key).ok_or(Error::StatementHandleClosed)?;
        if entry.generation == generation {
            return Ok(());
        }
        let reply = prepare_on(&inner.primary.session, &entry.sql, entry.read_base_col).await?;
        entry.server_id = reply.stmt_id;
        entry.params = reply.params;
        entry.columns = reply.columns;
        entry.generation = generation;
        entry.children.clear();
        entry.exec_seq += 1;
        debug!(connection = self.id, key, "statement re-prepared");
        Ok(())
    }

    async fn check_recovery(&self, inner: &mut ConnectionInner) -> Result<()> {
        if self.config.do_switch != DoSwitch::WhenEpRecover || !inner.trx_finish {
            return Ok(());
        }
        let Some(current) = inner.primary.endpoint else {
            return Ok(());
        };
        if current == 0 || inner.last_recovery_check.elapsed() < self.config.switch_interval {
            return Ok(());
        }
        inner.last_recovery_check = Instant::now();

        let candidates = if self.config.cluster == ClusterMode::Dsc {
            self.dsc_recovered(inner, current).await?
        } else {
            (0..current).collect()
        };
        let group = inner.group.clone();
        for index in candidates {
            let Some(ep) = group.get(index) else { continue };
            match open_session(&self.config, &ep.addr, false).await {
                Ok(hs) => {
                    ep.record(hs.mode(), hs.status(), hs.login.dsc_control);
                    if endpoint::score(self.config.login_mode, hs.mode(), hs.status()).is_none() {
                        hs.session.close().await;
                        continue;
                    }
                    info!(connection = self.id, endpoint = %ep.addr, "switching back to recovered endpoint");
                    self.install_primary(inner, hs, index).await;
                    return Ok(());
                }
                Err(e) => {
                    debug!(endpoint = %ep.addr, error = %e, "endpoint still down");
                    ep.mark_down();
                }
            }
        }
        Ok(())
    }

    /// Group indexes before `current` that the cluster reports healthy
    async fn dsc_recovered(&self, inner: &ConnectionInner, current: usize) -> Result<Vec<usize>> {
        const SQL: &str = "SELECT EP_SEQNO, EP_STATUS FROM V$DSC_EP_INFO";
        let link = inner.primary.clone();
        let session = &link.session;
        let options = self.exec_options(inner, self.default_options(), &link);
        let stmt_id = session.execute(&mut StmtAllocateMessage).await?;
        let mut reply = session.execute(&mut ExecuteMessage::direct(stmt_id, SQL, options)).await?;
        let segment = reply.result.take().unwrap_or_default();
        let columns = segment.columns.unwrap_or_default();
        let mut raw = segment.rows;
        let total = reply.info.row_count;
        while total > raw.len() as i64 {
            let msg = &mut FetchMessage::new(stmt_id, raw.len() as i64, 100, limits::PREFETCH_MAX, columns.clone());
            let window = session.execute(msg).await?;
            if window.rows.is_empty() {
                break;
            }
            raw.extend(window.rows);
        }
        free_on(session, stmt_id).await;

        let mut healthy = Vec::new();
        for row in &raw {
            let cell = |i: usize| -> Result<Value> {
                let code = columns.get(i).map(|c| c.col_type).unwrap_or_default();
                decode_cell(code, row.cells.get(i).and_then(|c| c.as_deref()), link.decode)
            };
            let seq = cell(0)?.as_i64();
            let ok = cell(1)?.as_str().is_some_and(|s| s.trim().eq_ignore_ascii_case("OK"));
            if let Some(seq) = seq.filter(|s| *s >= 0) {
                if ok && (seq as usize) < current {
                    healthy.push(seq as usize);
                }
            }
        }
        healthy.sort_unstable();
        trace!(connection = self.id, ?healthy, "dsc endpoint scan");
        Ok(healthy)
    }

    // -------------------------------------------------------------------------
    // Execution effects
    // -------------------------------------------------------------------------

    fn apply_exec(&self, inner: &mut ConnectionInner, info: &ExecInfo, payload: &ExecPayload) {
        inner.trx_finish = trx_status::is_finished(info.trx_status & trx_status::MASK)
            || matches!(info.ret_sql_type, sql_type::COMMIT | sql_type::ROLLBACK);
        match payload {
            ExecPayload::Schema(schema) => inner.schema = schema.clone(),
            ExecPayload::Isolation(code) => {
                if let Ok(level) = IsolationLevel::from_db(*code) {
                    inner.isolation = level;
                }
            }
            ExecPayload::ReadOnly(read_only) => inner.read_only = *read_only,
            ExecPayload::Format(kind, format) => {
                let formats = inner.formats.get_or_insert_with(Default::default);
                match *kind {
                    sql_type::SET_DATE_FORMAT => formats.0 = format.clone(),
                    sql_type::SET_TIME_FORMAT => formats.1 = format.clone(),
                    _ => formats.2 = format.clone(),
                }
            }
            ExecPayload::None | ExecPayload::Explain(_) => {}
        }
    }

    fn drop_standby(&self, inner: &mut ConnectionInner) {
        if let Some(standby) = inner.standby.take() {
            standby.session.hard_close();
        }
        inner.info.standby = None;
        self.sync_sessions(inner);
    }

    /// Decide whether `sql` reads from the standby
    fn route_to_standby(&self, inner: &ConnectionInner, sql: &str) -> bool {
        if !self.config.rw_separate {
            return false;
        }
        let Some(standby) = &inner.standby else {
            return false;
        };
        if standby.session.is_closed() || is_write_sql(sql) {
            return false;
        }
        if !inner.trx_finish && inner.isolation == IsolationLevel::Serializable {
            return false;
        }
        if !self.config.rw_auto_distribute {
            return inner.read_only;
        }
        driver().next_count() % 100 >= u64::from(self.config.rw_percent)
    }

    async fn mirror(&self, inner: &ConnectionInner, side: Side, sql: &str) {
        let Some(link) = inner.link(side) else {
            return;
        };
        let options = self.exec_options(inner, self.default_options(), link);
        match exec_simple(&link.session, sql, options).await {
            Ok(_) => trace!(connection = self.id, ?side, "mirrored session setting"),
            Err(e) => debug!(connection = self.id, ?side, error = %e, "mirroring session setting failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Direct execution
    // -------------------------------------------------------------------------

    pub(crate) async fn run_direct(self: &Arc<Self>, sql: &str, opts: StmtOptions) -> Result<Outcome> {
        let mut inner = self.begin().await?;
        let result = self.direct_routed(&mut inner, sql, opts).await;
        self.finish(&mut inner, result).await
    }

    async fn direct_routed(self: &Arc<Self>, inner: &mut ConnectionInner, sql: &str, opts: StmtOptions) -> Result<Outcome> {
        let cacheable = self.config.en_rs_cache && StatementType::from_sql(sql) == StatementType::Query;
        if cacheable {
            if let Some(rows) = self.cache_lookup(inner, sql, opts).await? {
                return Ok(Outcome::Rows(rows));
            }
        }

        let (outcome, side) = if self.route_to_standby(inner, sql) {
            match self.direct_on(inner, Side::Standby, sql, opts, cacheable).await {
                Ok(Outcome::Rows(rows)) if self.config.rw_ha && rows.is_empty_result() => {
                    debug!(connection = self.id, "empty standby result, re-running on primary");
                    drop(rows);
                    (self.direct_on(inner, Side::Primary, sql, opts, cacheable).await?, Side::Primary)
                }
                Ok(outcome) => (outcome, Side::Standby),
                Err(e) if e.is_recoverable() => {
                    warn!(connection = self.id, error = %e, "standby failed, falling back to primary");
                    self.drop_standby(inner);
                    (self.direct_on(inner, Side::Primary, sql, opts, cacheable).await?, Side::Primary)
                }
                Err(e) => return Err(e),
            }
        } else {
            (self.direct_on(inner, Side::Primary, sql, opts, cacheable).await?, Side::Primary)
        };

        if sql_type::is_session_setting(outcome.sql_type()) {
            self.mirror(inner, side.other(), sql).await;
        }
        Ok(outcome)
    }

    async fn direct_on(
        self: &Arc<Self>,
        inner: &mut ConnectionInner,
        side: Side,
        sql: &str,
        opts: StmtOptions,
        cacheable: bool,
    ) -> Result<Outcome> {
        let link = inner.link(side).cloned().ok_or(Error::ConnectionClosed)?;
        let options = self.exec_options(inner, opts, &link);
        let stmt_id = link.session.execute(&mut StmtAllocateMessage).await?;
        let mut msg = ExecuteMessage::direct(stmt_id, sql, options);
        let reply = match link.session.execute(&mut msg).await {
            Ok(reply) => reply,
            Err(e) => {
                if !e.is_recoverable() {
                    free_on(&link.session, stmt_id).await;
                }
                return Err(e);
            }
        };
        self.apply_exec(inner, &reply.info, &reply.payload);
        let ExecuteReply {
            info,
            payload,
            result,
            table_ts,
            ..
        } = reply;

        if info.has_result_set || result.is_some() {
            let segment = result.unwrap_or_default();
            if cacheable {
                self.cache_store(inner, sql, &info, &segment, table_ts);
            }
            let settings = self.settings(inner, &link, opts, side == Side::Standby);
            let rows = Rows::open(
                Arc::downgrade(self),
                link.session.clone(),
                stmt_id,
                Origin::Direct,
                true,
                &info,
                segment,
                &[],
                settings,
            );
            return Ok(Outcome::Rows(rows));
        }
        free_on(&link.session, stmt_id).await;
        Ok(Outcome::Done(ExecResult::from_exec(&info, &payload)))
    }

    // -------------------------------------------------------------------------
    // Result cache
    // -------------------------------------------------------------------------

    fn cache_key(inner: &ConnectionInner, sql: &str) -> CacheKey {
        CacheKey {
            guid: inner.info.guid.clone(),
            schema: inner.schema.clone(),
            sql: sql.to_string(),
            param_count: 0,
        }
    }

    async fn cache_lookup(&self, inner: &mut ConnectionInner, sql: &str, opts: StmtOptions) -> Result<Option<Rows>> {
        let key = Self::cache_key(inner, sql);
        let cache = driver().result_cache(&self.config);
        let lookup = match cache.lock() {
            Ok(mut cache) => cache.lookup(&key),
            Err(_) => return Ok(None),
        };
        let hit = match lookup {
            Lookup::Miss => None,
            Lookup::Hit(result) => Some(result),
            Lookup::Verify(table_ids) => {
                let current = inner.primary.session.execute(&mut TableTsMessage { table_ids }).await?;
                cache.lock().ok().and_then(|mut cache| cache.confirm(&key, &current))
            }
        };
        let Some(hit) = hit else {
            return Ok(None);
        };
        trace!(connection = self.id, sql, "served from result cache");
        let link = inner.primary.clone();
        let settings = RowsSettings {
            fetch_lobs: false,
            ..self.settings(inner, &link, opts, false)
        };
        Ok(Some(Rows::buffered(hit.columns.to_vec(), hit.rows.to_vec(), settings)))
    }

    fn cache_store(
        &self,
        inner: &ConnectionInner,
        sql: &str,
        info: &ExecInfo,
        segment: &ResultSegment,
        tables: Vec<crate::messages::TableTimestamp>,
    ) {
        let complete = info.row_count >= 0 && segment.rows.len() as i64 >= info.row_count;
        if info.rs_cache_offset == 0 || tables.is_empty() || !complete {
            return;
        }
        let Some(columns) = segment.columns.clone() else {
            return;
        };
        if let Ok(mut cache) = driver().result_cache(&self.config).lock() {
            cache.put(Self::cache_key(inner, sql), columns, segment.rows.clone(), tables);
        }
    }

    // -------------------------------------------------------------------------
    // Prepared statements
    // -------------------------------------------------------------------------

    pub(crate) async fn prepare(self: &Arc<Self>, sql: &str) -> Result<Statement> {
        let mut inner = self.begin().await?;
        let result = prepare_on(&inner.primary.session, sql, false).await;
        let reply = self.finish(&mut inner, result).await?;
        let key = inner.next_key;
        inner.next_key += 1;
        let generation = inner.generation;
        debug!(
            connection = self.id,
            key,
            stmt_id = reply.stmt_id,
            params = reply.params.len(),
            "statement prepared"
        );
        inner.statements.insert(
            key,
            StmtEntry {
                server_id: reply.stmt_id,
                sql: sql.to_string(),
                stmt_type: StatementType::from_sql(sql),
                read_base_col: reply.read_base_col,
                params: reply.params.clone(),
                columns: reply.columns.clone(),
                generation,
                exec_seq: 0,
                children: Vec::new(),
            },
        );
        let opts = self.default_options();
        Ok(Statement::new(
            Arc::downgrade(self),
            key,
            sql,
            reply.params,
            reply.columns,
            opts.fetch_size,
            opts.max_rows,
        ))
    }

    async fn stmt_run(
        &self,
        inner: &mut ConnectionInner,
        key: u64,
        binds: &[BindParam],
        opts: StmtOptions,
    ) -> Result<StmtRun> {
        self.ensure_current(inner, key).await?;
        let link = inner.primary.clone();
        let entry = inner.statements.get_mut(&key).ok_or(Error::StatementHandleClosed)?;
        let stale = std::mem::take(&mut entry.children);
        let (server_id, params, columns, read_base_col) =
            (entry.server_id, entry.params.clone(), entry.columns.clone(), entry.read_base_col);
        for child in stale {
            free_on(&link.session, child).await;
        }

        let bound = bind_row(&params, binds, link.decode.encoding)?;
        let options = self.exec_options(inner, opts, &link);
        let exec = execute_bound(&link.session, server_id, &params, &columns, read_base_col, bound, options).await?;
        self.apply_exec(inner, &exec.reply.info, &exec.reply.payload);

        let entry = inner.statements.get_mut(&key).ok_or(Error::StatementHandleClosed)?;
        entry.exec_seq += 1;
        entry.children = exec.children.iter().map(|(_, id)| *id).collect();
        if let Some(cols) = exec.reply.result.as_ref().and_then(|s| s.columns.clone()) {
            entry.columns = cols;
        }
        Ok(StmtRun {
            server_id,
            columns: entry.columns.clone(),
            exec_seq: entry.exec_seq,
            link,
            exec,
        })
    }

    pub(crate) async fn stmt_execute(&self, key: u64, binds: Vec<BindParam>, opts: StmtOptions) -> Result<ExecResult> {
        let mut inner = self.begin().await?;
        let result = self
            .stmt_run(&mut inner, key, &binds, opts)
            .await
            .map(|run| ExecResult::from_exec(&run.exec.reply.info, &run.exec.reply.payload));
        self.finish(&mut inner, result).await
    }

    pub(crate) async fn stmt_query(self: &Arc<Self>, key: u64, binds: Vec<BindParam>, opts: StmtOptions) -> Result<Rows> {
        self.stmt_query_inner(key, binds, opts, false).await
    }

    /// Query and hand the server handle to the result set
    async fn stmt_query_detached(self: &Arc<Self>, key: u64, binds: Vec<BindParam>, opts: StmtOptions) -> Result<Rows> {
        self.stmt_query_inner(key, binds, opts, true).await
    }

    async fn stmt_query_inner(
        self: &Arc<Self>,
        key: u64,
        binds: Vec<BindParam>,
        opts: StmtOptions,
        detach: bool,
    ) -> Result<Rows> {
        let mut inner = self.begin().await?;
        let result = self.stmt_run(&mut inner, key, &binds, opts).await;
        let run = self.finish(&mut inner, result).await?;
        let origin = if detach {
            inner.statements.remove(&key);
            Origin::Direct
        } else {
            Origin::Statement {
                key,
                exec_seq: run.exec_seq,
            }
        };
        let settings = self.settings(&inner, &run.link, opts, false);
        let StmtRun {
            server_id,
            columns,
            link,
            exec,
            ..
        } = run;
        let segment = exec.reply.result.unwrap_or_default();
        Ok(Rows::open(
            Arc::downgrade(self),
            link.session,
            server_id,
            origin,
            detach,
            &exec.reply.info,
            segment,
            &columns,
            settings,
        ))
    }

    pub(crate) async fn stmt_call(&self, key: u64, binds: Vec<BindParam>, opts: StmtOptions) -> Result<CallResult> {
        let mut inner = self.begin().await?;
        let result = match self.stmt_run(&mut inner, key, &binds, opts).await {
            Ok(run) => decode_outputs(&run.exec, run.link.decode).map(|out_values| CallResult {
                out_values,
                rows_affected: run.exec.reply.info.row_count.max(0) as u64,
            }),
            Err(e) => Err(e),
        };
        self.finish(&mut inner, result).await
    }

    pub(crate) async fn stmt_batch(&self, key: u64, rows: &[Vec<Value>], opts: StmtOptions) -> Result<BatchResult> {
        let mut inner = self.begin().await?;
        let result = self.stmt_batch_inner(&mut inner, key, rows, opts).await;
        self.finish(&mut inner, result).await
    }

    async fn stmt_batch_inner(
        &self,
        inner: &mut ConnectionInner,
        key: u64,
        rows: &[Vec<Value>],
        opts: StmtOptions,
    ) -> Result<BatchResult> {
        self.ensure_current(inner, key).await?;
        let link = inner.primary.clone();
        let entry = inner.statements.get(&key).ok_or(Error::StatementHandleClosed)?;
        let (server_id, params, columns, read_base_col, stmt_type) = (
            entry.server_id,
            entry.params.clone(),
            entry.columns.clone(),
            entry.read_base_col,
            entry.stmt_type,
        );
        let bound = rows
            .iter()
            .map(|row| {
                let binds: Vec<BindParam> = row.iter().map(BindParam::from).collect();
                bind_row(&params, &binds, link.decode.encoding)
            })
            .collect::<Result<Vec<_>>>()?;
        let options = self.exec_options(inner, opts, &link);

        let outcome = match batch::plan(&bound, &params, &self.config, stmt_type) {
            BatchPlan::Bulk(merged) => {
                let count = bound.len();
                let mut msg = BatchExecuteMessage {
                    stmt_id: server_id,
                    with_descriptors: merged != params,
                    params: merged,
                    rows: bound.into_iter().map(|b| b.cells).collect(),
                    options,
                };
                let reply = link.session.execute(&mut msg).await?;
                self.apply_exec(inner, &reply.info, &ExecPayload::None);
                debug!(connection = self.id, rows = count, failed = reply.errors.len(), "bulk batch executed");
                BatchResult::finish(reply.update_counts, reply.errors)
            }
            BatchPlan::PerRow => {
                let mut counts = Vec::with_capacity(bound.len());
                let mut errors = Vec::new();
                for (i, row) in bound.into_iter().enumerate() {
                    let result =
                        execute_bound(&link.session, server_id, &params, &columns, read_base_col, row, options.clone())
                            .await;
                    match result {
                        Ok(exec) => {
                            self.apply_exec(inner, &exec.reply.info, &exec.reply.payload);
                            counts.push(exec.reply.info.row_count.max(0));
                            for (_, child) in exec.children {
                                free_on(&link.session, child).await;
                            }
                        }
                        Err(e) if e.is_recoverable() => return Err(e),
                        Err(e) if self.config.continue_batch_on_error => {
                            counts.push(EXECUTE_FAILED);
                            errors.push(RowError {
                                row: i,
                                code: e.code(),
                                message: e.to_string(),
                            });
                        }
                        Err(e) => {
                            return Err(Error::BatchError {
                                row: i,
                                source: Box::new(e),
                            })
                        }
                    }
                }
                debug!(connection = self.id, rows = counts.len(), failed = errors.len(), "per-row batch executed");
                BatchResult::finish(counts, errors)
            }
        };
        if let Some(entry) = inner.statements.get_mut(&key) {
            entry.exec_seq += 1;
        }
        outcome
    }

    pub(crate) async fn stmt_close(&self, key: u64) -> Result<()> {
        self.stmt_release(key, true).await
    }

    /// Drop a statement; with `with_children` unset, its cursor statements
    /// stay alive for whoever opens them
    async fn stmt_release(&self, key: u64, with_children: bool) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut inner = self.begin().await?;
        let Some(entry) = inner.statements.remove(&key) else {
            return Ok(());
        };
        if entry.generation != inner.generation {
            return Ok(());
        }
        let session = inner.primary.session.clone();
        if with_children {
            for child in &entry.children {
                free_on(&session, *child).await;
            }
        }
        free_on(&session, entry.server_id).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Result-set plumbing
    // -------------------------------------------------------------------------

    fn check_origin(inner: &ConnectionInner, origin: Origin) -> Result<()> {
        if let Origin::Statement { key, exec_seq } = origin {
            match inner.statements.get(&key) {
                Some(e) if e.exec_seq == exec_seq && e.generation == inner.generation => {}
                _ => return Err(Error::ResultSetClosed),
            }
        }
        Ok(())
    }

    pub(crate) async fn fetch_window(&self, session: &Session, origin: Origin, mut msg: FetchMessage) -> Result<FetchReply> {
        let mut inner = self.begin().await?;
        Self::check_origin(&inner, origin)?;
        let result = session.execute(&mut msg).await;
        self.finish(&mut inner, result).await
    }

    pub(crate) async fn describe_next(
        &self,
        session: &Session,
        origin: Origin,
        stmt_id: i32,
        read_base_col: bool,
    ) -> Result<Option<(ExecInfo, ResultSegment)>> {
        let mut inner = self.begin().await?;
        Self::check_origin(&inner, origin)?;
        let mut msg = DescribeMessage {
            stmt_id,
            next_index: 0,
            read_base_col,
        };
        let result = session.execute(&mut msg).await;
        let (info, segment) = self.finish(&mut inner, result).await?;
        if !info.has_result_set {
            return Ok(None);
        }
        Ok(Some((info, segment.unwrap_or_default())))
    }

    pub(crate) async fn open_cursor(self: &Arc<Self>, cursor: CursorRef) -> Result<Option<Rows>> {
        let mut inner = self.begin().await?;
        for entry in inner.statements.values_mut() {
            entry.children.retain(|c| *c != cursor.stmt_id);
        }
        let link = inner.primary.clone();
        let mut msg = DescribeMessage {
            stmt_id: cursor.stmt_id,
            next_index: 0,
            read_base_col: false,
        };
        let result = link.session.execute(&mut msg).await;
        let (info, segment) = self.finish(&mut inner, result).await?;
        if !info.has_result_set {
            free_on(&link.session, cursor.stmt_id).await;
            return Ok(None);
        }
        let settings = self.settings(&inner, &link, self.default_options(), false);
        Ok(Some(Rows::open(
            Arc::downgrade(self),
            link.session,
            cursor.stmt_id,
            Origin::Cursor,
            true,
            &info,
            segment.unwrap_or_default(),
            &[],
            settings,
        )))
    }

    /// Read out-of-row LOB values of `row` in full
    pub(crate) async fn materialize_lobs(&self, session: &Session, origin: Origin, row: &mut Row) -> Result<()> {
        let mut inner = self.begin().await?;
        Self::check_origin(&inner, origin)?;
        let result = async {
            let encoding = session.context().await.encoding;
            for value in row.values_mut() {
                let Value::Lob(lob) = value else { continue };
                if lob.inline_data().is_some() {
                    continue;
                }
                let len = lob_length_on(session, lob).await?;
                let data = lob_read_on(session, lob, 0, len, encoding).await?;
                lob.materialize(Bytes::from(data));
            }
            Ok(())
        }
        .await;
        self.finish(&mut inner, result).await
    }

    // -------------------------------------------------------------------------
    // Session settings and transactions
    // -------------------------------------------------------------------------

    async fn end_transaction(&self, commit: bool) -> Result<()> {
        let mut inner = self.begin().await?;
        let session = inner.primary.session.clone();
        let result = if commit {
            session.execute(&mut CommitMessage).await
        } else {
            session.execute(&mut RollbackMessage).await
        };
        let status = self.finish(&mut inner, result).await?;
        inner.trx_finish = trx_status::is_finished(status & trx_status::MASK);
        if let Some(standby) = inner.standby.clone() {
            let mirrored = if commit {
                standby.session.execute(&mut CommitMessage).await
            } else {
                standby.session.execute(&mut RollbackMessage).await
            };
            if let Err(e) = mirrored {
                debug!(connection = self.id, error = %e, "standby transaction end failed");
            }
        }
        debug!(connection = self.id, commit, status, "transaction ended");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut inner = self.begin().await?;
        let result = inner.primary.session.execute(&mut PingMessage).await;
        self.finish(&mut inner, result).await
    }

    async fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        let mut inner = self.begin().await?;
        let code = level.to_db();
        let result = inner.primary.session.execute(&mut SetIsolationMessage { level: code }).await;
        self.finish(&mut inner, result).await?;
        inner.isolation = level;
        if let Some(standby) = &inner.standby {
            if let Err(e) = standby.session.execute(&mut SetIsolationMessage { level: code }).await {
                debug!(connection = self.id, error = %e, "standby isolation change failed");
            }
        }
        Ok(())
    }

    async fn set_read_only(&self, read_only: bool) -> Result<()> {
        let mut inner = self.begin().await?;
        let result = inner.primary.session.execute(&mut SetReadOnlyMessage { read_only }).await;
        inner.read_only = self.finish(&mut inner, result).await?;
        if let Some(standby) = &inner.standby {
            if let Err(e) = standby.session.execute(&mut SetReadOnlyMessage { read_only }).await {
                debug!(connection = self.id, error = %e, "standby read-only change failed");
            }
        }
        Ok(())
    }

    async fn set_schema(&self, schema: &str) -> Result<()> {
        let sql = set_schema_sql(schema);
        let mut inner = self.begin().await?;
        let link = inner.primary.clone();
        let options = self.exec_options(&inner, self.default_options(), &link);
        let result = exec_simple(&link.session, &sql, options).await;
        let reply = self.finish(&mut inner, result).await?;
        self.apply_exec(&mut inner, &reply.info, &reply.payload);
        if !matches!(reply.payload, ExecPayload::Schema(_)) {
            inner.schema = schema.to_string();
        }
        self.mirror(&inner, Side::Standby, &sql).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let inner = self.inner.lock().await;
        for link in [Some(&inner.primary), inner.standby.as_ref()].into_iter().flatten() {
            if !link.session.is_closed() {
                if let Err(e) = link.session.execute(&mut LogoutMessage).await {
                    debug!(connection = self.id, error = %e, "logout failed");
                }
            }
            link.session.close().await;
        }
        debug!(connection = self.id, "connection closed");
        Ok(())
    }
}

/// A statement execution on the primary
struct StmtRun {
    server_id: i32,
    columns: Vec<ColumnInfo>,
    exec_seq: u64,
    link: Link,
    exec: BoundExec,
}

// =============================================================================
// Public Connection
// =============================================================================

/// A connection to a DM database
///
/// Calls on one connection are serialized. Statements and result sets keep
/// only a weak handle, so dropping the connection invalidates them.
pub struct Connection {
    core: Arc<ConnCore>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.core.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connect with a `dm://user:password@host:port?option=value` DSN
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn example() -> dm_rs::Result<()> {
    /// let conn = dm_rs::Connection::connect("dm://SYSDBA:SYSDBA@localhost:5236?autoCommit=false").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(dsn: &str) -> Result<Self> {
        let config: Config = dsn.parse()?;
        Self::connect_with_config(config).await
    }

    /// Connect using a [`Config`]
    ///
    /// A group name is resolved against the loaded service-name files, then
    /// the endpoint group is walked until a server with an acceptable mode
    /// answers.
    pub async fn connect_with_config(config: Config) -> Result<Self> {
        let core = ConnCore::open(config).await?;
        Ok(Self { core })
    }

    /// Get the connection ID
    pub fn id(&self) -> u32 {
        self.core.id
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Get server information
    pub async fn server_info(&self) -> ServerInfo {
        self.core.inner.lock().await.info.clone()
    }

    /// Current schema
    pub async fn schema(&self) -> String {
        self.core.inner.lock().await.schema.clone()
    }

    /// Current isolation level
    pub async fn isolation(&self) -> IsolationLevel {
        self.core.inner.lock().await.isolation
    }

    /// Check if the session is read-only
    pub async fn is_read_only(&self) -> bool {
        self.core.inner.lock().await.read_only
    }

    /// Check if statements commit automatically
    pub async fn auto_commit(&self) -> bool {
        self.core.inner.lock().await.auto_commit
    }

    /// Check if no transaction is open
    pub async fn transaction_finished(&self) -> bool {
        self.core.inner.lock().await.trx_finish
    }

    /// Date, time and timestamp formats the server reported
    pub async fn formats(&self) -> Option<(String, String, String)> {
        self.core.inner.lock().await.formats.clone()
    }

    /// Run a query and collect every row
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut rows = self.query_rows(sql, params).await?;
        let columns = rows.columns().to_vec();
        let collected = rows.collect().await;
        rows.close().await?;
        let rows = collected?;
        Ok(QueryResult {
            columns,
            rows,
            rows_affected: 0,
        })
    }

    /// Run a query and stream its rows
    pub async fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        if params.is_empty() {
            return match self.core.run_direct(sql, self.core.default_options()).await? {
                Outcome::Rows(rows) => Ok(rows),
                Outcome::Done(_) => Err(Error::NotQuerySql),
            };
        }
        let stmt = self.core.prepare(sql).await?;
        let binds = params.iter().map(BindParam::from).collect();
        self.core
            .stmt_query_detached(stmt.key(), binds, self.core.default_options())
            .await
    }

    /// Execute a non-query statement
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        if StatementType::from_sql(sql) == StatementType::Query {
            return Err(Error::NotExecSql);
        }
        if params.is_empty() {
            return match self.core.run_direct(sql, self.core.default_options()).await? {
                Outcome::Done(result) => Ok(result),
                Outcome::Rows(mut rows) => {
                    rows.close().await?;
                    Ok(ExecResult {
                        sql_type: sql_type::SELECT,
                        ..ExecResult::default()
                    })
                }
            };
        }
        let stmt = self.core.prepare(sql).await?;
        let result = stmt.execute(params).await;
        stmt.close().await?;
        result
    }

    /// Prepare a statement for repeated execution
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        self.core.prepare(sql).await
    }

    /// Execute one statement once per row of bind values
    ///
    /// Rows travel in one batch request when they bind inline; otherwise
    /// each row executes on its own. With `continueBatchOnError`, failing rows
    /// are reported together in [`Error::BpWithError`].
    pub async fn execute_batch(&self, batch: &BatchBinds) -> Result<BatchResult> {
        batch.validate()?;
        let stmt = self.core.prepare(batch.sql()).await?;
        let result = stmt.execute_batch(&batch.rows).await;
        stmt.close().await?;
        result
    }

    /// Call a procedure with IN, OUT and IN OUT parameters
    ///
    /// Cursors among the outputs stay open until opened with
    /// [`open_cursor`](Connection::open_cursor) and closed, or until the
    /// connection closes.
    pub async fn call(&self, sql: &str, params: &[BindParam]) -> Result<CallResult> {
        let stmt = self.core.prepare(sql).await?;
        let result = self
            .core
            .stmt_call(stmt.key(), params.to_vec(), self.core.default_options())
            .await;
        self.core.stmt_release(stmt.key(), false).await?;
        result
    }

    /// Open the result set behind a cursor output
    ///
    /// Returns `None` when the cursor produced no result set.
    pub async fn open_cursor(&self, cursor: CursorRef) -> Result<Option<Rows>> {
        self.core.open_cursor(cursor).await
    }

    /// Commit the current transaction
    pub async fn commit(&self) -> Result<()> {
        self.core.end_transaction(true).await
    }

    /// Roll back the current transaction
    pub async fn rollback(&self) -> Result<()> {
        self.core.end_transaction(false).await
    }

    /// Check that the server answers
    pub async fn ping(&self) -> Result<()> {
        self.core.ping().await
    }

    /// Change the transaction isolation level
    pub async fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.core.set_isolation(level).await
    }

    /// Switch the session read-only flag
    pub async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.core.set_read_only(read_only).await
    }

    /// Change the current schema
    pub async fn set_schema(&self, schema: &str) -> Result<()> {
        self.core.set_schema(schema).await
    }

    /// Turn auto-commit on or off for later statements
    pub async fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.core.ensure_open()?;
        self.core.inner.lock().await.auto_commit = enabled;
        Ok(())
    }

    /// Current length of a LOB (characters for CLOB, bytes for BLOB)
    pub async fn lob_length(&self, lob: &LobLocator) -> Result<i64> {
        let mut inner = self.core.begin().await?;
        let session = inner.primary.session.clone();
        let result = lob_length_on(&session, lob).await;
        self.core.finish(&mut inner, result).await
    }

    /// Read `len` units starting at `offset`
    ///
    /// A zero `len` returns immediately without a round trip.
    pub async fn read_lob(&self, lob: &LobLocator, offset: i64, len: i64) -> Result<Vec<u8>> {
        let mut inner = self.core.begin().await?;
        let link = inner.primary.clone();
        let result = lob_read_on(&link.session, lob, offset, len, link.decode.encoding).await;
        self.core.finish(&mut inner, result).await
    }

    /// Read a whole LOB: text for CLOB, bytes for BLOB
    pub async fn read_lob_all(&self, lob: &LobLocator) -> Result<LobData> {
        let mut inner = self.core.begin().await?;
        let link = inner.primary.clone();
        let encoding = link.decode.encoding;
        if let Some(value) = lob.inline_value(encoding)? {
            return Ok(value);
        }
        let result = async {
            let len = lob_length_on(&link.session, lob).await?;
            lob_read_on(&link.session, lob, 0, len, encoding).await
        }
        .await;
        let data = self.core.finish(&mut inner, result).await?;
        if lob.is_clob {
            Ok(LobData::String(encoding.decode(&data)?))
        } else {
            Ok(LobData::Bytes(Bytes::from(data)))
        }
    }

    /// Write bytes at `offset`; returns the number of bytes the server took
    pub async fn write_lob(&self, lob: &LobLocator, offset: i64, data: &[u8]) -> Result<i64> {
        let mut inner = self.core.begin().await?;
        let session = inner.primary.session.clone();
        let result = lob_write_on(&session, lob, offset, data).await;
        self.core.finish(&mut inner, result).await
    }

    /// Write text at `offset` in the server character set
    pub async fn write_clob(&self, lob: &LobLocator, offset: i64, text: &str) -> Result<i64> {
        let mut inner = self.core.begin().await?;
        let link = inner.primary.clone();
        let data = link.decode.encoding.encode(text);
        let result = lob_write_on(&link.session, lob, offset, &data).await;
        self.core.finish(&mut inner, result).await
    }

    /// Cut a LOB to `new_len`; returns the length after truncation
    pub async fn truncate_lob(&self, lob: &LobLocator, new_len: i64) -> Result<i64> {
        let mut inner = self.core.begin().await?;
        let session = inner.primary.session.clone();
        let result = lob_truncate_on(&session, lob, new_len).await;
        self.core.finish(&mut inner, result).await
    }

    /// Close the connection when `signal` completes
    ///
    /// In-flight requests fail and later calls return
    /// [`Error::ConnectionClosed`]. Dropping the returned guard disarms the
    /// watcher.
    ///
    /// ```rust,no_run
    /// # async fn example(conn: &dm_rs::Connection) {
    /// let guard = conn.cancel_on(tokio::time::sleep(std::time::Duration::from_secs(5)));
    /// let _ = conn.query("SELECT * FROM big_table", &[]).await;
    /// drop(guard);
    /// # }
    /// ```
    pub fn cancel_on<F>(&self, signal: F) -> CancelGuard
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.core);
        self.core.primary_session().watch(async move {
            signal.await;
            if let Some(core) = weak.upgrade() {
                warn!(connection = core.id, "connection cancelled");
                core.abort();
            }
        })
    }

    /// Close the connection; a second call is a no-op
    pub async fn close(&self) -> Result<()> {
        self.core.close().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Async logout is not possible here; sessions close when the core drops
        self.core.closed.store(true, Ordering::Release);
    }
}
