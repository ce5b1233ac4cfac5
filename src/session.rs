//! Single-socket request/response dispatcher
//!
//! A [`Session`] owns one transport, its frame codec and its send buffer.
//! [`Session::execute`] holds the session mutex across the whole
//! write → read → decode cycle, so requests on one socket never interleave.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::buffer::ByteBuffer;
use crate::compress::CompressAlgorithm;
use crate::constants::HEADER_SIZE;
use crate::crypto::Cipher;
use crate::encoding::Encoding;
use crate::error::{Error, Result, EC_BP_WITH_ERROR, EC_RN_EXCEED_ROWSET_SIZE};
use crate::messages::{Message, WireContext};
use crate::packet::{check_body_len, ChecksumMode, FrameCodec, FrameHeader};
use crate::transport::{DmStream, TlsConfig};

static SESSION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

struct SessionInner {
    stream: Option<DmStream>,
    codec: FrameCodec,
    out: ByteBuffer,
    ctx: WireContext,
}

/// One authenticated (or authenticating) socket to a DM server
pub struct Session {
    id: u32,
    host: String,
    port: u16,
    inner: Mutex<SessionInner>,
    closed: AtomicBool,
    shutdown: Notify,
    socket_timeout: Option<Duration>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &format_args!("{}:{}", self.host, self.port))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Dial an endpoint
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        socket_timeout: Option<Duration>,
        ctx: WireContext,
    ) -> Result<Self> {
        let stream = DmStream::connect(host, port, connect_timeout).await?;
        Ok(Self::from_stream(stream, host, port, socket_timeout, ctx))
    }

    /// Wrap an already-connected stream
    pub fn from_stream(
        stream: DmStream,
        host: &str,
        port: u16,
        socket_timeout: Option<Duration>,
        ctx: WireContext,
    ) -> Self {
        let id = SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            host: host.to_string(),
            port,
            inner: Mutex::new(SessionInner {
                stream: Some(stream),
                codec: FrameCodec::new(),
                out: ByteBuffer::new(),
                ctx,
            }),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            socket_timeout,
        }
    }

    /// Process-unique session id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Endpoint host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` of the endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if the session was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the negotiated wire properties
    pub async fn context(&self) -> WireContext {
        self.inner.lock().await.ctx.clone()
    }

    /// Mutate the negotiated wire properties
    pub async fn update_context(&self, f: impl FnOnce(&mut WireContext)) {
        f(&mut self.inner.lock().await.ctx);
    }

    /// Install the session cipher for frame bodies
    pub async fn enable_encryption(&self, cipher: Box<dyn Cipher>) {
        let mut inner = self.inner.lock().await;
        tracing::debug!(session = self.id, cipher = cipher.name(), "frame encryption enabled");
        inner.codec.enable_encryption(cipher);
    }

    /// Apply the checksum mode and compression algorithm from the capability exchange
    pub async fn set_protocol(&self, checksum: ChecksumMode, compress: CompressAlgorithm) {
        let mut inner = self.inner.lock().await;
        inner.codec.set_checksum_mode(checksum);
        inner.codec.set_compress_algorithm(compress);
    }

    /// Wrap the socket in TLS
    pub async fn upgrade_tls(&self, user: &str, config: &TlsConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stream = inner.stream.take().ok_or(Error::ConnectionClosed)?;
        match stream.upgrade(&self.host, user, config).await {
            Ok(tls) => {
                inner.stream = Some(tls);
                tracing::debug!(session = self.id, "tls established");
                Ok(())
            }
            Err(e) => {
                self.closed.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Continue on the raw socket once frame encryption took over from TLS
    pub async fn drop_tls(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stream = inner.stream.take().ok_or(Error::ConnectionClosed)?;
        inner.stream = Some(stream.downgrade());
        tracing::debug!(session = self.id, "tls released after login");
        Ok(())
    }

    /// Check if the transport is TLS
    pub async fn is_tls(&self) -> bool {
        self.inner
            .lock()
            .await
            .stream
            .as_ref()
            .map(DmStream::is_tls)
            .unwrap_or(false)
    }

    /// Send `msg` and decode its response
    pub async fn execute<M: Message>(&self, msg: &mut M) -> Result<M::Output> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        let mut guard = self.inner.lock().await;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let SessionInner { stream, codec, out, ctx } = &mut *guard;

        out.clear();
        out.write_zeros(HEADER_SIZE);
        msg.encode(out, ctx)?;

        let body_len = out.len() - HEADER_SIZE;
        let compress = msg.compressible()
            && ctx
                .compress_mode
                .should_compress(body_len, ctx.compress_threshold, ctx.server_is_local);
        let mut header = FrameHeader::new(msg.msg_type(), msg.stmt_id());
        codec.seal(out, &mut header, compress)?;

        let frame: &[u8] = out.as_slice();
        let exchange = async {
            let stream = stream.as_mut().ok_or(Error::ConnectionClosed)?;
            with_timeout(self.socket_timeout, stream.write_all(frame)).await?;
            with_timeout(self.socket_timeout, stream.flush()).await?;

            let mut raw_header = [0u8; HEADER_SIZE];
            with_timeout(self.socket_timeout, stream.read_exact(&mut raw_header)).await?;
            let announced = FrameHeader::parse(&raw_header)?.body_len as usize;
            check_body_len(announced)?;
            let mut raw_body = vec![0u8; announced];
            with_timeout(self.socket_timeout, stream.read_exact(&mut raw_body)).await?;
            Ok::<_, Error>((raw_header, raw_body))
        };

        let io_result = tokio::select! {
            r = exchange => r,
            _ = &mut shutdown => Err(Error::ConnectionClosed),
        };

        let (raw_header, raw_body) = match io_result {
            Ok(v) => v,
            Err(e) => {
                if e.is_communication() || e.is_connection_closed() || matches!(e, Error::MsgTooLong { .. }) {
                    self.closed.store(true, Ordering::Release);
                    *stream = None;
                    tracing::debug!(session = self.id, error = %e, "session closed after i/o failure");
                }
                return Err(e);
            }
        };

        let (header, body) = match codec.open(&raw_header, raw_body) {
            Ok(v) => v,
            Err(e) => {
                // A frame that fails verification leaves the stream position unknown
                self.closed.store(true, Ordering::Release);
                *stream = None;
                return Err(e);
            }
        };
        let mut body = ByteBuffer::from_vec(body);

        let code = header.error_code();
        if code != 0 && code != EC_RN_EXCEED_ROWSET_SIZE && code != EC_BP_WITH_ERROR {
            let encoding = Encoding::for_error_text(ctx.locale, ctx.encoding);
            let message = read_error_text(&mut body, encoding);
            tracing::debug!(session = self.id, code, message = %message, "server error");
            return Err(Error::server(code, message));
        }

        msg.decode(&header, &mut body, ctx)
    }

    /// Spawn a watcher that hard-closes the session when `signal` completes.
    ///
    /// Dropping the returned guard stops the watcher.
    pub fn watch<F>(self: &Arc<Self>, signal: F) -> CancelGuard
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let session = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            signal.await;
            if let Some(session) = session.upgrade() {
                tracing::debug!(session = session.id, "cancelled, closing session");
                session.hard_close();
            }
        });
        CancelGuard { handle: Some(handle) }
    }

    /// Mark the session closed and abort any in-flight exchange
    pub fn hard_close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    /// Close the socket. Safe to call more than once.
    pub async fn close(&self) {
        self.hard_close();
        let mut inner = self.inner.lock().await;
        if let Some(mut stream) = inner.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Stops a cancellation watcher when dropped
#[derive(Debug)]
pub struct CancelGuard {
    handle: Option<JoinHandle<()>>,
}

impl CancelGuard {
    /// Keep the watcher running after this guard is dropped
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T> {
    let result = match limit {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| Error::communication(format!("socket timeout after {d:?}")))?,
        None => fut.await,
    };
    result.map_err(Error::communication)
}

/// Error responses carry `[len:u32][text]`; short bodies yield an empty message
fn read_error_text(body: &mut ByteBuffer, encoding: Encoding) -> String {
    let Ok(len) = body.read_u32() else {
        return String::new();
    };
    let len = (len as usize).min(body.remaining());
    body.read_slice(len)
        .map(|b| encoding.decode_lossy(b))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_gb18030() {
        let mut buf = ByteBuffer::new();
        let text = Encoding::Gb18030.encode("违反唯一性约束");
        buf.write_bytes_with_u32_len(&text);
        assert_eq!(read_error_text(&mut buf, Encoding::Gb18030), "违反唯一性约束");
    }

    #[test]
    fn test_error_text_truncated_body() {
        let mut buf = ByteBuffer::from_slice(&[0, 0, 0, 9, b'x']);
        assert_eq!(read_error_text(&mut buf, Encoding::Utf8), "x");
        let mut empty = ByteBuffer::new();
        assert_eq!(read_error_text(&mut empty, Encoding::Utf8), "");
    }
}
