//! WebSocket upgrade path.
//!
//! # Responsibilities
//! - Validate the handshake and answer `101 Switching Protocols`
//! - Hand the callback a connection scoped to its own execution
//! - Close the connection on every exit path, panics included
//!
//! # Data Flow
//! ```text
//! GET + Upgrade: websocket
//!     → accept (validate headers, write 101 on the raw writer)
//!     → await hyper upgrade → WebSocketStream (server role)
//!     → callback(WebSocketContext { ctx, conn })
//!     → close frame (1000 / error code / 1011) → handle released
//! ```
//!
//! # Design Decisions
//! - A failed handshake is returned as an `HttpError`; the callback never runs
//! - The handle is shared: a clone kept past the callback observes
//!   `ConnectionError::Closed` instead of a dangling socket
//! - The request lifetime token is cancelled once the peer is gone

use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{
    panic_message, ConnectionError, HttpError, UpgradeError, WebSocketError, INTERNAL_CLOSE_REASON,
};
use crate::handler::{handler_fn, HandlerFunc, HandlerResult};

type Socket = WebSocketStream<TokioIo<Upgraded>>;

/// Upper bound on delivering the final close frame to a peer that stopped reading.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback run once per accepted connection.
pub type WebSocketFunc =
    Arc<dyn for<'a> Fn(WebSocketContext<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync>;

/// Box a closure as a [`WebSocketFunc`].
pub fn websocket_fn<F>(f: F) -> WebSocketFunc
where
    F: for<'a> Fn(WebSocketContext<'a>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The request Context plus the accepted connection.
///
/// Dereferences to [`Context`].
pub struct WebSocketContext<'a> {
    ctx: &'a mut Context,
    conn: WebSocketConn,
}

impl WebSocketContext<'_> {
    pub fn conn(&self) -> &WebSocketConn {
        &self.conn
    }

    pub fn context(&mut self) -> &mut Context {
        &mut *self.ctx
    }
}

impl Deref for WebSocketContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &*self.ctx
    }
}

impl DerefMut for WebSocketContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        &mut *self.ctx
    }
}

struct ConnInner {
    closed: AtomicBool,
    // Fires on release; parked `send`/`recv` calls on retained clones give up
    // their half of the socket.
    shutdown: CancellationToken,
    sink: Mutex<Option<SplitSink<Socket, Message>>>,
    stream: Mutex<Option<SplitStream<Socket>>>,
    lifetime: CancellationToken,
}

/// Handle to an upgraded connection.
///
/// Valid while the callback runs; afterwards every operation fails with
/// [`ConnectionError::Closed`].
#[derive(Clone)]
pub struct WebSocketConn {
    inner: Arc<ConnInner>,
}

impl WebSocketConn {
    fn new(socket: Socket, lifetime: CancellationToken) -> Self {
        let (sink, stream) = socket.split();
        Self {
            inner: Arc::new(ConnInner {
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                sink: Mutex::new(Some(sink)),
                stream: Mutex::new(Some(stream)),
                lifetime,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub async fn send(&self, message: impl Into<Message>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let shutdown = &self.inner.shutdown;
        let mut sink = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(ConnectionError::Closed),
            sink = self.inner.sink.lock() => sink,
        };
        let sink = sink.as_mut().ok_or(ConnectionError::Closed)?;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ConnectionError::Closed),
            sent = sink.send(message.into()) => Ok(sent?),
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.send(Message::text(text.into())).await
    }

    /// Next data message. `Ok(None)` once the peer has closed.
    ///
    /// Control frames are answered internally and skipped.
    pub async fn recv(&self) -> Result<Option<Message>, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let shutdown = &self.inner.shutdown;
        let mut stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(ConnectionError::Closed),
            stream = self.inner.stream.lock() => stream,
        };
        let stream = stream.as_mut().ok_or(ConnectionError::Closed)?;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(ConnectionError::Closed),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "Peer closed websocket");
                    self.inner.lifetime.cancel();
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(message)) => return Ok(Some(message)),
                Some(Err(e)) => {
                    self.inner.lifetime.cancel();
                    return Err(e.into());
                }
                None => {
                    self.inner.lifetime.cancel();
                    return Ok(None);
                }
            }
        }
    }

    /// Send a close frame and release the handle.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<(), ConnectionError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::Closed);
        }
        let sent = self.send_close(code, reason).await;
        self.drop_socket().await;
        sent
    }

    /// Drop the connection without a closing handshake.
    pub async fn close_now(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.drop_socket().await;
    }

    /// Close with `code` unless the callback already did, then release.
    async fn release(&self, code: CloseCode, reason: &str) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, self.send_close(code, reason)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Close frame not delivered"),
                Err(_) => tracing::debug!("Close frame timed out"),
            }
        }
        self.drop_socket().await;
    }

    async fn send_close(&self, code: CloseCode, reason: &str) -> Result<(), ConnectionError> {
        let mut sink = self.inner.sink.lock().await;
        let sink = sink.as_mut().ok_or(ConnectionError::Closed)?;
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        sink.send(Message::Close(Some(frame))).await?;
        Ok(())
    }

    /// Both halves must be dropped for the upgraded IO to close.
    async fn drop_socket(&self) {
        self.inner.shutdown.cancel();
        self.inner.sink.lock().await.take();
        self.inner.stream.lock().await.take();
    }
}

impl std::fmt::Debug for WebSocketConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConn")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Wrap `callback` into a handler that performs the upgrade.
pub(crate) fn endpoint(callback: WebSocketFunc) -> HandlerFunc {
    handler_fn(move |ctx| {
        let callback = Arc::clone(&callback);
        Box::pin(async move {
            let on_upgrade = match accept(ctx) {
                Ok(on_upgrade) => on_upgrade,
                Err(err) => {
                    tracing::debug!(
                        path = %ctx.original_uri().path(),
                        error = %err,
                        "WebSocket handshake rejected"
                    );
                    if matches!(err, UpgradeError::UnsupportedVersion) {
                        ctx.response()
                            .headers_mut()
                            .insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
                    }
                    return Err(HttpError::from(err).into());
                }
            };

            let upgraded = on_upgrade
                .await
                .map_err(|e| HttpError::from(UpgradeError::from(e)))?;
            let socket =
                WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
            let conn = WebSocketConn::new(socket, ctx.lifetime().clone());

            let path = ctx.original_uri().path().to_string();
            tracing::debug!(path = %path, "WebSocket connection established");

            let wctx = WebSocketContext {
                ctx: &mut *ctx,
                conn: conn.clone(),
            };
            let outcome = AssertUnwindSafe(async move { callback(wctx).await })
                .catch_unwind()
                .await;

            let (code, reason) = match outcome {
                Ok(Ok(())) => (CloseCode::Normal, String::new()),
                Ok(Err(err)) => match err.downcast_ref::<WebSocketError>() {
                    Some(ws) => (ws.code(), ws.message().to_string()),
                    None => {
                        tracing::warn!(path = %path, error = %err, "WebSocket callback failed");
                        (CloseCode::Error, INTERNAL_CLOSE_REASON.to_string())
                    }
                },
                Err(panic) => {
                    tracing::error!(
                        path = %path,
                        panic = %panic_message(panic.as_ref()),
                        "WebSocket callback panicked"
                    );
                    (CloseCode::Error, INTERNAL_CLOSE_REASON.to_string())
                }
            };

            conn.release(code, &reason).await;
            tracing::debug!(path = %path, code = %u16::from(code), "WebSocket connection released");
            Ok(())
        })
    })
}

/// Validate the handshake and commit the `101` head.
fn accept(ctx: &mut Context) -> Result<OnUpgrade, UpgradeError> {
    let request = ctx.request();
    if request.method() != Method::GET {
        return Err(UpgradeError::MethodNotGet);
    }

    let headers = request.headers();
    if !header_has_token(headers, header::CONNECTION, "upgrade") {
        return Err(UpgradeError::InvalidHeader("connection"));
    }
    if !header_has_token(headers, header::UPGRADE, "websocket") {
        return Err(UpgradeError::InvalidHeader("upgrade"));
    }
    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(HeaderValue::as_bytes)
        != Some(b"13".as_slice())
    {
        return Err(UpgradeError::UnsupportedVersion);
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(UpgradeError::InvalidHeader("sec-websocket-key"))?;
    let accept = HeaderValue::from_str(&derive_accept_key(key.as_bytes()))
        .map_err(|_| UpgradeError::InvalidHeader("sec-websocket-key"))?;

    let on_upgrade = ctx
        .request_mut()
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(UpgradeError::NotUpgradable)?;

    ctx.set_status(StatusCode::SWITCHING_PROTOCOLS);
    let writer = ctx.response();
    let headers = writer.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    writer.write_header(StatusCode::SWITCHING_PROTOCOLS);

    Ok(on_upgrade)
}

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}
