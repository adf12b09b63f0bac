//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a
//! [`RouterService`]. Connections are persistent (keep-alive) unless the
//! client asks otherwise, and each one is served by its own task.

use std::future::Future;
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::RouterService;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) buffered before answering `413`.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// The geopin HTTP server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections already being served are left to finish on their own
    /// tasks; only the accept loop stops.
    pub async fn serve<S>(self, service: RouterService, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        info!(address = %self.local_addr, "geopin listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let service = service.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, service).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }

    /// Serves forever.
    pub async fn run(self, service: RouterService) -> Result<(), ServerError> {
        self.serve(service, std::future::pending()).await
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    service: RouterService,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered; only read when the
        // buffer does not hold a complete one.
        let parsed = match Request::parse(&buf) {
            Ok((request, body_offset)) => {
                let declared = request.content_length().unwrap_or(0);
                let Some(total) = body_offset
                    .checked_add(declared)
                    .filter(|&total| total <= MAX_REQUEST_SIZE)
                else {
                    warn!(peer = %peer_addr, declared, "declared body too large, sending 413");
                    return reject(&mut stream, payload_too_large()).await;
                };
                (buf.len() >= total).then_some((request, total))
            }
            Err(RequestError::Incomplete) => None,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response =
                    Response::text(StatusCode::BadRequest, format!("Bad Request: {e}"));
                return reject(&mut stream, response).await;
            }
        };

        let Some((request, total)) = parsed else {
            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large, sending 413");
                return reject(&mut stream, payload_too_large()).await;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            continue;
        };

        // Bodies are not used by any route; skip past them.
        buf.advance(total);
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = service.route(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            break;
        }
    }

    Ok(())
}

fn payload_too_large() -> Response {
    Response::text(StatusCode::PayloadTooLarge, "Request entity too large")
}

/// Sends `response` and closes the connection.
async fn reject(stream: &mut TcpStream, response: Response) -> Result<(), std::io::Error> {
    stream.write_all(&response.keep_alive(false).into_bytes()).await?;
    stream.flush().await
}
