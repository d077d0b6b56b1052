use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::server::TlsStream;
use tokio_rustls::{Accept, TlsAcceptor};

use super::{Accepted, AcceptFuture, BoxListener, ConnStream, Listener};

/// Facts captured from a completed TLS handshake
#[derive(Debug, Clone, Default)]
pub struct TlsHandshakeInfo {
    /// SNI presented in the client hello
    pub sni: Option<String>,
    /// Negotiated ALPN protocol
    pub alpn: Option<Vec<u8>>,
}

/// Listener that terminates TLS on every accepted connection.
///
/// The handshake runs lazily on the first read or write of the returned
/// stream, so a slow handshake never stalls the accept loop. The
/// `Accepted::tls` cell is populated when the handshake completes; requests
/// can only arrive after that point.
pub struct TlsTerminator {
    inner: BoxListener,
    acceptor: TlsAcceptor,
}

impl TlsTerminator {
    pub fn new(inner: BoxListener, acceptor: TlsAcceptor) -> Self {
        Self { inner, acceptor }
    }
}

impl Listener for TlsTerminator {
    fn accept(&mut self) -> AcceptFuture<'_> {
        Box::pin(async move {
            let accepted = self.inner.accept().await?;
            let info = Arc::new(OnceLock::new());
            let stream = LazyTlsStream::new(self.acceptor.clone(), accepted.stream, info.clone());
            Ok(Accepted { stream: Box::new(stream), peer: accepted.peer, tls: Some(info) })
        })
    }

    fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.inner.local_addr()
    }
}

enum LazyState<S> {
    Handshaking(Accept<S>),
    Ready(TlsStream<S>),
    Failed,
}

/// Server-side TLS stream whose handshake is driven by the first I/O poll
pub struct LazyTlsStream<S> {
    state: LazyState<S>,
    info: Arc<OnceLock<TlsHandshakeInfo>>,
}

impl<S: ConnStream> LazyTlsStream<S> {
    pub fn new(acceptor: TlsAcceptor, stream: S, info: Arc<OnceLock<TlsHandshakeInfo>>) -> Self {
        Self { state: LazyState::Handshaking(acceptor.accept(stream)), info }
    }

    /// Drive the handshake until the stream is usable
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            match &mut self.state {
                LazyState::Ready(_) => return Poll::Ready(Ok(())),
                LazyState::Handshaking(accept) => match Pin::new(accept).poll(cx) {
                    Poll::Ready(Ok(stream)) => {
                        let (_, conn) = stream.get_ref();
                        let _ = self.info.set(TlsHandshakeInfo {
                            sni: conn.server_name().map(str::to_string),
                            alpn: conn.alpn_protocol().map(<[u8]>::to_vec),
                        });
                        self.state = LazyState::Ready(stream);
                    }
                    Poll::Ready(Err(e)) => {
                        self.state = LazyState::Failed;
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                LazyState::Failed => {
                    return Poll::Ready(Err(io::Error::other("tls handshake already failed")));
                }
            }
        }
    }
}

impl<S: ConnStream> AsyncRead for LazyTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_ready(cx) {
            Poll::Ready(Ok(())) => match &mut this.state {
                LazyState::Ready(stream) => Pin::new(stream).poll_read(cx, buf),
                _ => Poll::Ready(Err(io::Error::other("tls handshake already failed"))),
            },
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: ConnStream> AsyncWrite for LazyTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.poll_ready(cx) {
            Poll::Ready(Ok(())) => match &mut this.state {
                LazyState::Ready(stream) => Pin::new(stream).poll_write(cx, data),
                _ => Poll::Ready(Err(io::Error::other("tls handshake already failed"))),
            },
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.state {
            LazyState::Ready(stream) => Pin::new(stream).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.state {
            LazyState::Ready(stream) => Pin::new(stream).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}
