use std::sync::Arc;

use bytes::{Buf, Bytes};
use futures_util::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{Request, Response};
use quinn::crypto::rustls::HandshakeData;
use tracing::{debug, info, warn};

use crate::addr::ListenAddr;
use crate::error::{AppError, Result};
use crate::handler::ReqBody;
use crate::listener::TlsHandshakeInfo;
use crate::registry::ListenerRegistry;
use crate::server::{Server, StartContext};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Bind the QUIC endpoint backing a server's H3 listener
pub(crate) fn bind_h3(
    server: &Arc<Server>,
    addr: &ListenAddr,
    ctx: &StartContext,
) -> Result<quinn::Endpoint> {
    let config = server.build_h3_config(ctx.cert_manager.clone())?;
    let socket_addr = addr.socket_addr(0)?;
    let endpoint = quinn::Endpoint::server(config, socket_addr).map_err(|e| AppError::Bind {
        addr: addr.to_string(),
        source: e,
    })?;
    if addr.start_port == 0 {
        if let Ok(local) = endpoint.local_addr() {
            info!(server = %server.name(), addr = %local, "h3 endpoint bound to OS-assigned port");
        }
    }
    Ok(endpoint)
}

/// Accept QUIC connections until the server's H3 token fires or the
/// endpoint closes, releasing the registry claim on exit
pub(crate) fn spawn_h3_server(
    endpoint: quinn::Endpoint,
    server: Arc<Server>,
    key: String,
    registry: Arc<ListenerRegistry>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = server.h3_cancel_token().cancelled() => break,
                incoming = endpoint.accept() => {
                    match incoming {
                        Some(incoming) => {
                            let server = server.clone();
                            tokio::spawn(serve_connection(incoming, server));
                        }
                        None => break,
                    }
                }
            }
        }
        registry.release(&key);
        debug!(server = %server.name(), listener = %key, "h3 accept loop stopped");
    });
}

async fn serve_connection(incoming: quinn::Incoming, server: Arc<Server>) {
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(e) => {
            // close race with a draining endpoint; transient by nature
            debug!(server = %server.name(), error = %e, "h3 connection attempt failed");
            return;
        }
    };
    let peer = connection.remote_address();
    let sni = connection
        .handshake_data()
        .and_then(|data| data.downcast::<HandshakeData>().ok())
        .and_then(|data| data.server_name);

    let mut h3_conn = match h3::server::Connection::new(h3_quinn::Connection::new(connection)).await
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!(server = %server.name(), ?peer, error = %e, "h3 connection setup failed");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = server.h3_cancel_token().cancelled() => {
                let _ = h3_conn.shutdown(0).await;
                return;
            }
            result = h3_conn.accept() => {
                match result {
                    Ok(Some(resolver)) => {
                        let server = server.clone();
                        let sni = sni.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_request(resolver, server.clone(), peer, sni).await {
                                debug!(server = %server.name(), ?peer, error = %e, "h3 request error");
                            }
                        });
                    }
                    Ok(None) => return,
                    Err(e) => {
                        if !e.is_h3_no_error() {
                            debug!(server = %server.name(), ?peer, error = %e, "h3 accept error");
                        }
                        return;
                    }
                }
            }
        }
    }
}

async fn serve_request(
    resolver: h3::server::RequestResolver<h3_quinn::Connection, Bytes>,
    server: Arc<Server>,
    peer: std::net::SocketAddr,
    sni: Option<String>,
) -> std::result::Result<(), BoxError> {
    let (request, stream) = resolver.resolve_request().await?;
    let (mut send, receive) = stream.split();

    let body_stream = stream::unfold((receive, false), |(mut receive, mut trailing)| async move {
        loop {
            if !trailing {
                match receive.recv_data().await {
                    Ok(Some(mut data)) => {
                        let frame = Frame::data(data.copy_to_bytes(data.remaining()));
                        return Some((Ok(frame), (receive, false)));
                    }
                    Ok(None) => trailing = true,
                    Err(e) => return Some((Err(Box::new(e) as BoxError), (receive, true))),
                }
            } else {
                match receive.recv_trailers().await {
                    Ok(Some(trailers)) => {
                        return Some((Ok(Frame::trailers(trailers)), (receive, true)));
                    }
                    Ok(None) => return None,
                    Err(e) => return Some((Err(Box::new(e) as BoxError), (receive, true))),
                }
            }
        }
    });
    let body: ReqBody = BodyExt::boxed(StreamBody::new(body_stream));

    let (parts, _) = request.into_parts();
    let request = Request::from_parts(parts, body);

    let tls = TlsHandshakeInfo { sni, alpn: Some(b"h3".to_vec()) };
    let response = server.process_request(request, Some(peer), Some(tls)).await;

    let (parts, mut body) = response.into_parts();
    send.send_response(Response::from_parts(parts, ())).await?;

    let mut sent_trailers = false;
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(never) => match never {},
        };
        if frame.is_data() {
            let data = frame
                .into_data()
                .map_err(|_| "frame claimed to be data but was not")?;
            send.send_data(data).await?;
        } else if frame.is_trailers() {
            let trailers = frame
                .into_trailers()
                .map_err(|_| "frame claimed to be trailers but was not")?;
            send.send_trailers(trailers).await?;
            sent_trailers = true;
        }
    }
    if !sent_trailers {
        send.finish().await?;
    }
    Ok(())
}
