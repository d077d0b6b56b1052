pub mod h2;
pub mod tls;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};

use crate::addr::{ListenAddr, Network};
use crate::config::ListenerWrapperConfig;
use crate::error::{AppError, Result};

pub use tls::{TlsHandshakeInfo, TlsTerminator};

/// Byte stream of one accepted connection
pub trait ConnStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ConnStream for T {}

pub type BoxConn = Box<dyn ConnStream>;

/// One accepted connection as it leaves the listener chain
pub struct Accepted {
    pub stream: BoxConn,
    /// Transport peer; None on unix sockets
    pub peer: Option<SocketAddr>,
    /// Set by the TLS terminator once the (lazy) handshake completes.
    /// None on plaintext listeners.
    pub tls: Option<Arc<OnceLock<TlsHandshakeInfo>>>,
}

pub type AcceptFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Accepted>> + Send + 'a>>;

/// Capability surface of a bound listener. Wrappers compose by holding the
/// inner listener and transforming what `accept` yields.
pub trait Listener: Send {
    fn accept(&mut self) -> AcceptFuture<'_>;

    /// Bound address, when the transport has one
    fn local_addr(&self) -> Option<SocketAddr>;
}

pub type BoxListener = Box<dyn Listener>;

struct TcpStreamListener {
    inner: TcpListener,
}

impl Listener for TcpStreamListener {
    fn accept(&mut self) -> AcceptFuture<'_> {
        Box::pin(async move {
            let (stream, peer) = self.inner.accept().await?;
            Ok(Accepted { stream: Box::new(stream), peer: Some(peer), tls: None })
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().ok()
    }
}

struct UnixStreamListener {
    inner: UnixListener,
}

impl Listener for UnixStreamListener {
    fn accept(&mut self) -> AcceptFuture<'_> {
        Box::pin(async move {
            let (stream, _) = self.inner.accept().await?;
            Ok(Accepted { stream: Box::new(stream), peer: None, tls: None })
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Bind the stream listener for one concrete port of a listen address
pub async fn bind_stream(addr: &ListenAddr, offset: u32) -> Result<BoxListener> {
    let display = addr.at(offset).to_string();
    match addr.network {
        Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
            let sa = addr.socket_addr(offset)?;
            let socket = socket2::Socket::new(
                socket2::Domain::for_address(sa),
                socket2::Type::STREAM,
                Some(socket2::Protocol::TCP),
            )
            .map_err(|e| AppError::Bind { addr: display.clone(), source: e })?;
            socket
                .set_reuse_address(true)
                .map_err(|e| AppError::Bind { addr: display.clone(), source: e })?;
            socket
                .set_nonblocking(true)
                .map_err(|e| AppError::Bind { addr: display.clone(), source: e })?;
            socket
                .bind(&sa.into())
                .map_err(|e| AppError::Bind { addr: display.clone(), source: e })?;
            socket
                .listen(1024)
                .map_err(|e| AppError::Bind { addr: display.clone(), source: e })?;
            let listener = TcpListener::from_std(socket.into())
                .map_err(|e| AppError::Bind { addr: display, source: e })?;
            Ok(Box::new(TcpStreamListener { inner: listener }))
        }
        Network::Unix => {
            let listener = UnixListener::bind(&addr.host)
                .map_err(|e| AppError::Bind { addr: display, source: e })?;
            Ok(Box::new(UnixStreamListener { inner: listener }))
        }
        Network::Fd => Err(AppError::Bind {
            addr: display,
            source: io::Error::other("fd networks require descriptor inheritance, not supported"),
        }),
        _ => Err(AppError::Bind {
            addr: display,
            source: io::Error::other("not a stream network"),
        }),
    }
}

/// Applies read/write deadlines at the transport level. The read deadline
/// re-arms whenever bytes arrive, so it bounds idle time on a quiet
/// connection as well as stalled request reads.
pub struct IoTimeoutStream<S> {
    inner: S,
    read: Option<Deadline>,
    write: Option<Deadline>,
}

struct Deadline {
    timeout: std::time::Duration,
    sleep: Pin<Box<tokio::time::Sleep>>,
}

impl Deadline {
    fn new(timeout: std::time::Duration) -> Self {
        Self { timeout, sleep: Box::pin(tokio::time::sleep(timeout)) }
    }

    fn rearm(&mut self) {
        self.sleep
            .as_mut()
            .reset(tokio::time::Instant::now() + self.timeout);
    }

    fn poll_expired(&mut self, cx: &mut std::task::Context<'_>) -> bool {
        self.sleep.as_mut().poll(cx).is_ready()
    }
}

impl<S> IoTimeoutStream<S> {
    pub fn new(
        inner: S,
        read: Option<std::time::Duration>,
        write: Option<std::time::Duration>,
    ) -> Self {
        Self { inner, read: read.map(Deadline::new), write: write.map(Deadline::new) }
    }
}

impl<S: ConnStream> AsyncRead for IoTimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            std::task::Poll::Ready(res) => {
                if let Some(deadline) = &mut this.read {
                    deadline.rearm();
                }
                std::task::Poll::Ready(res)
            }
            std::task::Poll::Pending => {
                if let Some(deadline) = &mut this.read {
                    if deadline.poll_expired(cx) {
                        return std::task::Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "read timed out",
                        )));
                    }
                }
                std::task::Poll::Pending
            }
        }
    }
}

impl<S: ConnStream> AsyncWrite for IoTimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        data: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, data) {
            std::task::Poll::Ready(res) => {
                if let Some(deadline) = &mut this.write {
                    deadline.rearm();
                }
                std::task::Poll::Ready(res)
            }
            std::task::Poll::Pending => {
                if let Some(deadline) = &mut this.write {
                    if deadline.poll_expired(cx) {
                        return std::task::Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "write timed out",
                        )));
                    }
                }
                std::task::Poll::Pending
            }
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Transforms a listener into another listener, before or after TLS
/// termination depending on its position relative to the placeholder
pub trait ListenerWrapper: Send + Sync {
    fn name(&self) -> &'static str;

    fn wrap(&self, inner: BoxListener) -> BoxListener;
}

/// One position in a wrapper chain
#[derive(Clone)]
pub enum WrapperStage {
    /// Marks where TLS termination is inserted; carries no behavior
    TlsPlaceholder,
    Wrapper(Arc<dyn ListenerWrapper>),
}

impl WrapperStage {
    pub fn name(&self) -> &'static str {
        match self {
            WrapperStage::TlsPlaceholder => "tls",
            WrapperStage::Wrapper(w) => w.name(),
        }
    }
}

impl std::fmt::Debug for WrapperStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WrapperStage").field(&self.name()).finish()
    }
}

/// The materialized wrapper chain of one server
#[derive(Clone, Debug)]
pub struct WrapperPipeline {
    stages: Vec<WrapperStage>,
    placeholder_index: usize,
}

impl Default for WrapperPipeline {
    fn default() -> Self {
        Self::empty()
    }
}

impl WrapperPipeline {
    /// No wrappers configured: TLS terminates directly on the raw listener
    pub fn empty() -> Self {
        Self { stages: Vec::new(), placeholder_index: 0 }
    }

    pub fn from_config(cfgs: &[ListenerWrapperConfig]) -> Result<Self> {
        let stages = cfgs
            .iter()
            .map(|c| match c {
                ListenerWrapperConfig::Tls => WrapperStage::TlsPlaceholder,
            })
            .collect();
        Self::normalize(stages)
    }

    /// Normalization applied at provision time.
    ///
    /// An explicit placeholder at position 0 is redundant (that is already
    /// the default) and rejected; more than one placeholder is rejected;
    /// when wrappers are configured without a placeholder, one is prepended
    /// so user wrappers run on the terminated side.
    pub fn normalize(mut stages: Vec<WrapperStage>) -> Result<Self> {
        if stages.is_empty() {
            return Ok(Self::empty());
        }
        let placeholders: Vec<usize> = stages
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, WrapperStage::TlsPlaceholder))
            .map(|(i, _)| i)
            .collect();
        match placeholders.as_slice() {
            [] => {
                stages.insert(0, WrapperStage::TlsPlaceholder);
                Ok(Self { stages, placeholder_index: 0 })
            }
            [0] => Err(AppError::InvalidConfiguration(
                "a tls listener wrapper in the first position is redundant; remove it".to_string(),
            )),
            [i] => Ok(Self { placeholder_index: *i, stages }),
            _ => Err(AppError::InvalidConfiguration(
                "only one tls listener wrapper may be specified".to_string(),
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn placeholder_index(&self) -> usize {
        self.placeholder_index
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(WrapperStage::name).collect()
    }

    /// Wrappers before the placeholder; these see encrypted bytes
    pub fn wrap_before_tls(&self, mut listener: BoxListener) -> BoxListener {
        for stage in &self.stages[..self.placeholder_index] {
            if let WrapperStage::Wrapper(w) = stage {
                listener = w.wrap(listener);
            }
        }
        listener
    }

    /// Wrappers after the placeholder; these see plaintext streams
    pub fn wrap_after_tls(&self, mut listener: BoxListener) -> BoxListener {
        let start = if self.stages.is_empty() { 0 } else { self.placeholder_index + 1 };
        for stage in self.stages.iter().skip(start) {
            if let WrapperStage::Wrapper(w) = stage {
                listener = w.wrap(listener);
            }
        }
        listener
    }
}
