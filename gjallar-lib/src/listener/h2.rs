use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::{CONNECTION, UPGRADE};
use hyper::Request;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::{Accepted, AcceptFuture, BoxListener, ConnStream, Listener};
use crate::shutdown::{next_backoff, BACKOFF_START};

/// Listener wrapper that keeps a handle on every accepted connection so
/// shutdown can terminate HTTP/2 sessions the stream server would otherwise
/// consider active forever.
///
/// Cancelling the force-close token makes all tracked streams fail their
/// next read or write; the coordinator fires it when the grace deadline
/// expires.
pub struct H2TrackingListener {
    inner: BoxListener,
    force_close: CancellationToken,
}

impl H2TrackingListener {
    pub fn new(inner: BoxListener, force_close: CancellationToken) -> Self {
        Self { inner, force_close }
    }
}

impl Listener for H2TrackingListener {
    fn accept(&mut self) -> AcceptFuture<'_> {
        Box::pin(async move {
            let accepted = self.inner.accept().await?;
            let stream = TrackedStream::new(accepted.stream, self.force_close.clone());
            Ok(Accepted { stream: Box::new(stream), peer: accepted.peer, tls: accepted.tls })
        })
    }

    fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.inner.local_addr()
    }
}

/// Stream that aborts on its next I/O once the token is cancelled
pub struct TrackedStream<S> {
    inner: S,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> TrackedStream<S> {
    fn new(inner: S, token: CancellationToken) -> Self {
        Self { inner, cancelled: Box::pin(token.cancelled_owned()) }
    }

    fn poll_abort(&mut self, cx: &mut Context<'_>) -> Option<io::Error> {
        match self.cancelled.as_mut().poll(cx) {
            Poll::Ready(()) => Some(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed by server shutdown",
            )),
            Poll::Pending => None,
        }
    }
}

impl<S: ConnStream> AsyncRead for TrackedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = this.poll_abort(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: ConnStream> AsyncWrite for TrackedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = this.poll_abort(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Counts apparent H2C upgrade requests so shutdown can wait for pending
/// upgrades to settle before closing plaintext listeners.
#[derive(Clone, Default)]
pub struct H2cGate {
    pending: Arc<AtomicUsize>,
}

impl H2cGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Detects the two shapes an H2C upgrade arrives in: the prior-knowledge
    /// `PRI * HTTP/2.0` preface surfaced as a request with no headers, or an
    /// `Upgrade: h2c` paired with `Connection: HTTP2-Settings`.
    pub fn looks_like_h2c<B>(req: &Request<B>) -> bool {
        if req.method().as_str() == "PRI" && req.uri() == "*" && req.headers().is_empty() {
            return true;
        }
        let upgrade_h2c = req
            .headers()
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case("h2c")));
        let settings = req
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                v.split(',').any(|p| p.trim().eq_ignore_ascii_case("http2-settings"))
            });
        upgrade_h2c && settings
    }

    /// Counts the request for its duration when it looks like an upgrade
    pub fn track<B>(&self, req: &Request<B>) -> Option<H2cGuard> {
        if Self::looks_like_h2c(req) {
            self.pending.fetch_add(1, Ordering::Relaxed);
            Some(H2cGuard { pending: self.pending.clone() })
        } else {
            None
        }
    }

    /// Polls the pending counter with jittered exponential backoff until it
    /// reaches zero or the grace context is done. Returns without sleeping
    /// when nothing is pending.
    pub async fn shutdown(&self, grace: &CancellationToken) {
        if self.pending() == 0 {
            return;
        }
        let mut interval = BACKOFF_START;
        loop {
            tokio::select! {
                _ = grace.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if self.pending() == 0 {
                return;
            }
            interval = next_backoff(interval);
        }
    }
}

pub struct H2cGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for H2cGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
