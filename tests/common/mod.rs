//! In-process DM server for integration tests
//!
//! Speaks the frame protocol with xor checksums. The handshake runs the DH
//! key exchange, TLS and frame encryption the profile advertises. Statement
//! allocation, transaction and session-option requests get canned replies;
//! a per-server script answers everything else. Every request is logged so
//! tests can check what went over the wire.

#![allow(dead_code)]

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use dm_rs::buffer::ByteBuffer;
use dm_rs::constants::{col_type, encrypt_mode, sql_type, MessageType, HEADER_SIZE};
use dm_rs::crypto::{build_cipher, Cipher, DhKeyPair, EncryptType, HashType};
use dm_rs::messages::{
    ColumnInfo, ExecInfo, ExecPayload, ExecuteMessage, ExecuteMode, ExecuteReply, LoginMessage,
    LoginReply, PrepareMessage, PrepareReply, RawRow, ResultSegment, StandbyInfo, StartupMessage,
    StartupReply, WireContext,
};
use dm_rs::packet::{FrameCodec, FrameHeader};
use dm_rs::{Config, ParamInfo};

/// One decoded request
#[derive(Debug, Clone)]
pub struct Request {
    /// Connection number on this server, in accept order
    pub conn: usize,
    pub msg_type: MessageType,
    pub stmt_id: i32,
    pub body: Vec<u8>,
    /// SQL text of prepare and direct execute requests
    pub sql: Option<String>,
    /// Arrived over TLS
    pub tls: bool,
    /// Body was encrypted with the session cipher
    pub encrypted: bool,
    /// Login request with its credentials decrypted
    pub login: Option<LoginMessage>,
}

impl Request {
    pub fn buffer(&self) -> ByteBuffer {
        ByteBuffer::from_vec(self.body.clone())
    }

    pub fn sql(&self) -> &str {
        self.sql.as_deref().unwrap_or("")
    }

    pub fn is(&self, msg_type: MessageType) -> bool {
        self.msg_type == msg_type
    }
}

/// What the server sends back
#[derive(Debug)]
pub enum Reply {
    /// Successful reply body
    Body(ByteBuffer),
    /// Body under a non-zero header code (batch partial failure)
    Coded(i32, ByteBuffer),
    /// Server error
    Error(i32, String),
    /// Drop the connection without answering
    Hangup,
    /// Never answer
    Stall,
}

/// Answers requests the canned handlers do not cover; `None` falls back to them
pub type Script = Arc<dyn Fn(&Request, &WireContext) -> Option<Reply> + Send + Sync>;

pub fn script(f: impl Fn(&Request, &WireContext) -> Option<Reply> + Send + Sync + 'static) -> Script {
    Arc::new(f)
}

/// What the server advertises at startup and login
#[derive(Debug, Clone)]
pub struct Profile {
    pub startup: StartupReply,
    pub login: LoginReply,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            startup: StartupReply {
                encoding: 1,
                msg_version: 12,
                server_version: "8.1.3.100".to_string(),
                new_client: true,
                ..Default::default()
            },
            login: LoginReply {
                max_row_size: 8000,
                isolation: 1,
                server_mode: 0,
                server_status: 4,
                instance_name: "DMSERVER".to_string(),
                schema: "SYSDBA".to_string(),
                guid: "0C7A1E2B".to_string(),
                db_name: "DAMENG".to_string(),
                session_id: 4242,
                ..Default::default()
            },
        }
    }
}

impl Profile {
    /// Advertise a standby for read/write split
    pub fn with_standby(mut self, addr: SocketAddr) -> Self {
        self.login.standby = Some(StandbyInfo {
            host: addr.ip().to_string(),
            port: addr.port(),
            count: 1,
        });
        self
    }

    pub fn with_mode(mut self, server_mode: i32) -> Self {
        self.login.server_mode = server_mode;
        self
    }

    /// Negotiate a session key and encrypt frames after login
    pub fn with_encryption(mut self, mode: i32, kind: EncryptType) -> Self {
        self.startup.encrypt_mode = mode;
        self.startup.encrypt_type = kind.id();
        self.startup.hash_type = HashType::default().id();
        self
    }

    /// Require TLS right after the capability exchange
    pub fn with_tls(mut self) -> Self {
        self.startup.ssl = true;
        self
    }

    /// Accept certificate login, keyed with `kind`
    pub fn with_cert_login(mut self, kind: EncryptType) -> Self {
        self.startup.login_cert_path = "/dm/cert".to_string();
        self.startup.encrypt_type = kind.id();
        self.startup.hash_type = HashType::default().id();
        self
    }
}

pub struct MockServer {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<Request>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockServer {
    pub async fn start(script: Script) -> Self {
        Self::with_profile(Profile::default(), script).await
    }

    /// A server that only runs the canned handlers
    pub async fn plain() -> Self {
        Self::start(Arc::new(|_, _| None)).await
    }

    pub async fn with_profile(profile: Profile, script: Script) -> Self {
        Self::on_port(0, profile, script).await
    }

    /// Listen on a fixed port, e.g. to bring a stopped server back
    pub async fn on_port(port: u16, profile: Profile, script: Script) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let log = Arc::new(Mutex::new(Vec::new()));
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_log = log.clone();
        let accept_tasks = tasks.clone();
        let accept = tokio::spawn(async move {
            let counter = AtomicUsize::new(0);
            while let Ok((stream, _)) = listener.accept().await {
                let conn = counter.fetch_add(1, Ordering::Relaxed);
                let handle = tokio::spawn(serve(
                    stream,
                    conn,
                    profile.clone(),
                    script.clone(),
                    accept_log.clone(),
                ));
                accept_tasks.lock().unwrap().push(handle);
            }
        });
        tasks.lock().unwrap().push(accept);
        Self { addr, log, tasks }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Config pointing at this server with reconnect off and plain login
    pub fn config(&self) -> Config {
        let mut config = Config::new("127.0.0.1", self.port(), "SYSDBA", "SYSDBA");
        config.login_encrypt = false;
        config
    }

    pub fn dsn(&self, options: &str) -> String {
        let sep = if options.is_empty() { "" } else { "?" };
        format!("dm://SYSDBA:SYSDBA@127.0.0.1:{}{sep}{options}", self.port())
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, msg_type: MessageType) -> usize {
        self.requests().iter().filter(|r| r.msg_type == msg_type).count()
    }

    /// Decrypted login requests, in arrival order
    pub fn logins(&self) -> Vec<LoginMessage> {
        self.requests().into_iter().filter_map(|r| r.login).collect()
    }

    /// SQL text of direct executes and prepares, in arrival order
    pub fn sql_log(&self) -> Vec<String> {
        self.requests().into_iter().filter_map(|r| r.sql).collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Stop listening and drop every open connection
    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Server side of the socket: plain until the profile asks for TLS
enum Wire {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Wire {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Wire::Plain(stream) => stream.read_exact(buf).await.map(|_| ()),
            Wire::Tls(stream) => stream.read_exact(buf).await.map(|_| ()),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Wire::Plain(stream) => stream.write_all(buf).await,
            Wire::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await
            }
        }
    }

    fn is_tls(&self) -> bool {
        matches!(self, Wire::Tls(_))
    }

    async fn accept_tls(self) -> Option<Self> {
        match self {
            Wire::Plain(tcp) => tls_acceptor().accept(tcp).await.ok().map(|s| Wire::Tls(Box::new(s))),
            tls => Some(tls),
        }
    }

    fn into_plain(self) -> Self {
        match self {
            Wire::Tls(stream) => Wire::Plain((*stream).into_inner().0),
            plain => plain,
        }
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data");
    let open = |name: &str| BufReader::new(File::open(format!("{dir}/{name}")).expect("open test tls material"));
    let certs = rustls_pemfile::certs(&mut open("server-cert.pem"))
        .collect::<Result<Vec<_>, _>>()
        .expect("parse server cert");
    let key = rustls_pemfile::private_key(&mut open("server-key.pem"))
        .expect("parse server key")
        .expect("server key present");
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server tls config");
    config.send_tls13_tickets = 0;
    TlsAcceptor::from(Arc::new(config))
}

/// Server half of the DH exchange: publish our value in `startup` and derive
/// one cipher for the credentials and one for the frame codec
fn key_exchange(startup: &mut StartupReply, request: &Request) -> Option<(Box<dyn Cipher>, Box<dyn Cipher>)> {
    let client = StartupMessage::read(&mut request.buffer()).ok()?;
    if client.dh_public.is_empty() || !(startup.encryption_enabled() || startup.cert_login()) {
        return None;
    }
    let keys = DhKeyPair::generate();
    startup.dh_public = keys.public_bytes();
    let secret = keys.derive(&client.dh_public).ok()?;
    let (kind, hash) = (startup.encrypt_type, HashType::from_id(startup.hash_type));
    let make = || build_cipher(kind, hash, &secret, None).ok();
    Some((make()?, make()?))
}

fn open_login(body: &[u8], ctx: &WireContext, cipher: Option<&dyn Cipher>) -> Option<LoginMessage> {
    let mut login = LoginMessage::read(&mut ByteBuffer::from_slice(body), ctx).ok()?;
    if let (true, Some(cipher)) = (login.encrypted, cipher) {
        for field in [Some(&mut login.user), Some(&mut login.password), login.cert.as_mut()]
            .into_iter()
            .flatten()
            .filter(|f| !f.bytes.is_empty())
        {
            field.bytes = cipher.decrypt(&field.bytes, true).ok()?;
        }
    }
    Some(login)
}

async fn read_frame(stream: &mut Wire, codec: &FrameCodec) -> Option<(FrameHeader, Vec<u8>)> {
    let mut raw_header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut raw_header).await.ok()?;
    let len = FrameHeader::parse(&raw_header).ok()?.body_len as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    codec.open(&raw_header, body).ok()
}

async fn write_frame(stream: &mut Wire, codec: &FrameCodec, msg_type: u16, code: i32, body: &[u8]) -> bool {
    let mut buf = ByteBuffer::new();
    buf.write_zeros(HEADER_SIZE);
    buf.write_bytes(body);
    let mut header = FrameHeader {
        stmt_id: code,
        msg_type,
        ..Default::default()
    };
    if codec.seal(&mut buf, &mut header, false).is_err() {
        return false;
    }
    stream.write_all(buf.as_slice()).await.is_ok()
}

fn decode_sql(msg_type: MessageType, body: &[u8], ctx: &WireContext) -> Option<String> {
    let mut buf = ByteBuffer::from_slice(body);
    match msg_type {
        MessageType::Prepare => PrepareMessage::read(&mut buf, ctx).ok().map(|m| m.sql),
        MessageType::Execute => ExecuteMessage::read(&mut buf, ctx, false)
            .ok()
            .filter(|m| m.mode == ExecuteMode::Direct)
            .map(|m| m.sql),
        _ => None,
    }
}

async fn serve(
    stream: TcpStream,
    conn: usize,
    mut profile: Profile,
    script: Script,
    log: Arc<Mutex<Vec<Request>>>,
) {
    let mut stream = Wire::Plain(stream);
    let mut codec = FrameCodec::new();
    let mut ctx = WireContext::default();
    let mut next_stmt = 100;
    let mut login_cipher: Option<Box<dyn Cipher>> = None;
    let mut frame_cipher: Option<Box<dyn Cipher>> = None;

    while let Some((header, body)) = read_frame(&mut stream, &codec).await {
        let Ok(msg_type) = header.message_type() else {
            return;
        };
        let login = (msg_type == MessageType::Login)
            .then(|| open_login(&body, &ctx, login_cipher.as_deref()))
            .flatten();
        let request = Request {
            conn,
            msg_type,
            stmt_id: header.stmt_id,
            sql: decode_sql(msg_type, &body, &ctx),
            body,
            tls: stream.is_tls(),
            encrypted: header.encrypted,
            login,
        };
        log.lock().unwrap().push(request.clone());
        if msg_type == MessageType::Startup {
            if let Some((credentials, frames)) = key_exchange(&mut profile.startup, &request) {
                login_cipher = Some(credentials);
                frame_cipher = Some(frames);
            }
        }

        let reply = match script(&request, &ctx) {
            Some(reply) => reply,
            None => canned(&request, &profile, &mut ctx, &mut next_stmt),
        };
        let sent = match reply {
            Reply::Body(body) => write_frame(&mut stream, &codec, header.msg_type, 0, body.as_slice()).await,
            Reply::Coded(code, body) => write_frame(&mut stream, &codec, header.msg_type, code, body.as_slice()).await,
            Reply::Error(code, text) => {
                let mut body = ByteBuffer::new();
                body.write_u32(text.len() as u32);
                body.write_bytes(text.as_bytes());
                write_frame(&mut stream, &codec, header.msg_type, code, body.as_slice()).await
            }
            Reply::Hangup => return,
            Reply::Stall => std::future::pending::<bool>().await,
        };
        if !sent || msg_type == MessageType::Logout {
            return;
        }
        match msg_type {
            MessageType::Startup if profile.startup.ssl => match stream.accept_tls().await {
                Some(tls) => stream = tls,
                None => return,
            },
            MessageType::Login => {
                let mode = profile.startup.encrypt_mode;
                if mode == encrypt_mode::ENCRYPT || mode == encrypt_mode::COMPAT {
                    if let Some(cipher) = frame_cipher.take() {
                        codec.enable_encryption(cipher);
                    }
                }
                if profile.startup.ssl && mode == encrypt_mode::ENCRYPT && codec.encryption_enabled() {
                    stream = stream.into_plain();
                }
            }
            _ => {}
        }
    }
}

fn canned(request: &Request, profile: &Profile, ctx: &mut WireContext, next_stmt: &mut i32) -> Reply {
    let mut out = ByteBuffer::new();
    match request.msg_type {
        MessageType::Startup => {
            profile.startup.write(&mut out);
            ctx.msg_version = profile.startup.msg_version.min(12);
            ctx.new_client = profile.startup.new_client;
            ctx.bdta = profile.startup.bdta;
        }
        MessageType::Login => {
            profile.login.write(&mut out, ctx);
            ctx.new_lob = profile.login.new_lob;
        }
        MessageType::StmtAllocate => {
            out.write_i32(*next_stmt);
            *next_stmt += 1;
        }
        MessageType::Commit | MessageType::Rollback => out.write_i32(0),
        MessageType::SetIsolation => {
            let mut body = request.buffer();
            out.write_i32(body.read_i32().unwrap_or(1));
        }
        MessageType::SetReadOnly => {
            let mut body = request.buffer();
            out.write_u8(body.read_u8().unwrap_or(0));
        }
        MessageType::Prepare => {
            prepared(request.stmt_id, vec![], vec![]).write(&mut out, ctx);
        }
        MessageType::Execute | MessageType::Execute2 => {
            let reply = if request.sql().trim_start().to_ascii_uppercase().starts_with("SET SCHEMA") {
                let schema = request.sql().split('"').nth(1).unwrap_or("SYSDBA").to_string();
                ExecuteReply {
                    info: exec_info(sql_type::SET_SCHEMA, 0),
                    payload: ExecPayload::Schema(schema),
                    ..Default::default()
                }
            } else {
                ExecuteReply {
                    info: exec_info(sql_type::DDL, 0),
                    ..Default::default()
                }
            };
            let _ = reply.write(&mut out, ctx, &[]);
        }
        MessageType::Describe | MessageType::PreExecute => ExecInfo::default().write(&mut out, ctx),
        MessageType::TableTs => dm_rs::messages::TableTimestamp::write_list(&mut out, &[]),
        MessageType::Fetch => {
            let _ = dm_rs::messages::FetchReply::default().write(&mut out, &[]);
        }
        MessageType::LobOp | MessageType::BatchExecute => {
            return Reply::Error(-6001, "request not scripted".to_string())
        }
        MessageType::StmtFree | MessageType::Ping | MessageType::Logout | MessageType::PutData => {}
        _ => {}
    }
    Reply::Body(out)
}

// =============================================================================
// Reply builders
// =============================================================================

pub fn exec_info(ret_sql_type: i16, row_count: i64) -> ExecInfo {
    ExecInfo {
        ret_sql_type,
        row_count,
        ..Default::default()
    }
}

pub fn prepared(stmt_id: i32, params: Vec<ParamInfo>, columns: Vec<ColumnInfo>) -> PrepareReply {
    PrepareReply {
        stmt_id,
        read_base_col: false,
        info: ExecInfo {
            ret_sql_type: if columns.is_empty() { sql_type::INSERT } else { sql_type::SELECT },
            row_count: -1,
            col_count: columns.len() as i16,
            param_count: params.len() as i16,
            ..Default::default()
        },
        params,
        columns,
    }
}

pub fn prepare_reply(request: &Request, ctx: &WireContext, params: Vec<ParamInfo>, columns: Vec<ColumnInfo>) -> Reply {
    let mut out = ByteBuffer::new();
    prepared(request.stmt_id, params, columns).write(&mut out, ctx);
    Reply::Body(out)
}

/// Result set reply carrying `first` rows out of `total`
pub fn rows_reply(ctx: &WireContext, columns: &[ColumnInfo], first: Vec<RawRow>, total: i64) -> Reply {
    let reply = ExecuteReply {
        info: ExecInfo {
            ret_sql_type: sql_type::SELECT,
            row_count: total,
            col_count: columns.len() as i16,
            has_result_set: true,
            ..Default::default()
        },
        result: Some(ResultSegment {
            columns: Some(columns.to_vec()),
            bdta: false,
            rows: first,
        }),
        ..Default::default()
    };
    let mut out = ByteBuffer::new();
    reply.write(&mut out, ctx, &[]).expect("encode result set");
    Reply::Body(out)
}

pub fn exec_reply(ctx: &WireContext, reply: ExecuteReply) -> Reply {
    let mut out = ByteBuffer::new();
    reply.write(&mut out, ctx, &[]).expect("encode execute reply");
    Reply::Body(out)
}

pub fn dml_reply(ctx: &WireContext, ret_sql_type: i16, row_count: i64) -> Reply {
    exec_reply(
        ctx,
        ExecuteReply {
            info: exec_info(ret_sql_type, row_count),
            ..Default::default()
        },
    )
}

pub fn fetch_reply(columns: &[ColumnInfo], rows: Vec<RawRow>, remaining: i64) -> Reply {
    let reply = dm_rs::messages::FetchReply {
        remaining,
        bdta: false,
        rows,
    };
    let mut out = ByteBuffer::new();
    reply.write(&mut out, columns).expect("encode fetch reply");
    Reply::Body(out)
}

pub fn int_col(name: &str) -> ColumnInfo {
    ColumnInfo::new(name, col_type::INT)
}

pub fn varchar_col(name: &str) -> ColumnInfo {
    ColumnInfo::new(name, col_type::VARCHAR)
}

pub fn int_cell(v: i32) -> Option<Vec<u8>> {
    Some(v.to_be_bytes().to_vec())
}

pub fn str_cell(s: &str) -> Option<Vec<u8>> {
    Some(s.as_bytes().to_vec())
}

pub fn row(rowid: i64, cells: Vec<Option<Vec<u8>>>) -> RawRow {
    RawRow { rowid, cells }
}

/// `(id INT, name VARCHAR)` rows numbered from `start`
pub fn numbered_rows(start: i32, count: i32) -> Vec<RawRow> {
    (start..start + count)
        .map(|i| row(i as i64, vec![int_cell(i), str_cell(&format!("name{i}"))]))
        .collect()
}

pub fn id_name_columns() -> Vec<ColumnInfo> {
    vec![int_col("ID"), varchar_col("NAME")]
}
