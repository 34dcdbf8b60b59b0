//! WebSocket sessions against a real listener.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http_mux::{ConnectionError, Mux, WebSocketConn, WebSocketError};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

mod common;
use common::{client, spawn_server};

type ClientStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read until the server's close frame arrives.
async fn close_frame(ws: &mut ClientStream) -> Option<CloseFrame> {
    let wait = async {
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Close(frame)) => return frame,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no close frame")
}

#[tokio::test]
async fn test_echo_then_normal_close() {
    let mux = Mux::new();
    mux.websocket("/ws", |ws| {
        Box::pin(async move {
            let conn = ws.conn().clone();
            if let Some(message) = conn.recv().await? {
                conn.send(message).await?;
            }
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    let (mut ws, response) = connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::text("hi")).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "hi");

    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_retained_handle_is_closed_after_callback() {
    let slot: Arc<Mutex<Option<WebSocketConn>>> = Arc::new(Mutex::new(None));
    let retained = Arc::clone(&slot);

    let mux = Mux::new();
    mux.websocket("/ws", move |ws| {
        let slot = Arc::clone(&retained);
        Box::pin(async move {
            let conn = ws.conn().clone();
            assert!(!conn.is_closed());
            slot.lock().unwrap().replace(conn);
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);

    let conn = slot.lock().unwrap().take().expect("handle retained");
    assert!(conn.is_closed());
    assert!(matches!(conn.send_text("late").await, Err(ConnectionError::Closed)));
    assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_panicking_callback_closes_with_1011() {
    let mux = Mux::new();
    mux.websocket("/ws", |_ws| {
        Box::pin(async move {
            if true {
                panic!("callback bug");
            }
            Ok(())
        })
    });
    mux.handle("GET /alive", |ctx| {
        Box::pin(async move {
            ctx.response().write("yes")?;
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Error);
    assert_eq!(frame.reason.as_str(), "internal error");

    let res = client().get(server.url("/alive")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "yes");

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_websocket_error_sets_close_code() {
    let mux = Mux::new();
    mux.websocket("/ws", |_ws| {
        Box::pin(async move { Err(WebSocketError::new(CloseCode::Policy, "go away").into()) })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Policy);
    assert_eq!(frame.reason.as_str(), "go away");

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_plain_error_closes_with_internal_error() {
    let mux = Mux::new();
    mux.websocket("/ws", |_ws| {
        Box::pin(async move { Err(std::io::Error::other("lost the database").into()) })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Error);
    assert_eq!(frame.reason.as_str(), "internal error");

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_upgrade_failure_never_invokes_callback() {
    let invoked = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&invoked);

    let mux = Mux::new();
    mux.websocket("/ws", move |_ws| {
        *flag.lock().unwrap() = true;
        Box::pin(async move { Ok(()) })
    });
    let server = spawn_server(mux).await;

    let res = client().get(server.url("/ws")).send().await.unwrap();
    assert_eq!(res.status(), 400);
    assert!(!*invoked.lock().unwrap());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_peer_close_cancels_lifetime() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = Mutex::new(Some(tx));

    let mux = Mux::new();
    mux.websocket("/ws", move |ws| {
        let tx = tx.lock().unwrap().take();
        Box::pin(async move {
            let conn = ws.conn().clone();
            let lifetime = ws.lifetime().clone();
            while conn.recv().await?.is_some() {}
            if lifetime.is_cancelled() {
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            }
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    ws.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("callback never saw the peer close")
        .unwrap();

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_release_unblocks_parked_reader() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));

    let mux = Mux::new();
    mux.websocket("/ws", move |ws| {
        let tx = tx.lock().unwrap().take();
        Box::pin(async move {
            let reader = ws.conn().clone();
            tokio::spawn(async move {
                let result = reader.recv().await;
                if let Some(tx) = tx {
                    let _ = tx.send(result);
                }
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    // The client stays silent until the server has released the connection.
    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let parked = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("retained reader never returned")
        .unwrap();
    assert!(matches!(parked, Err(ConnectionError::Closed)));

    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);
    let after = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("server kept the socket open");
    assert!(!matches!(after, Some(Ok(_))));

    server.shutdown.trigger();
}

async fn assert_retained_handle_closed(slot: &Mutex<Option<WebSocketConn>>) {
    let conn = slot.lock().unwrap().take().expect("handle retained");
    assert!(conn.is_closed());
    assert!(matches!(conn.send_text("late").await, Err(ConnectionError::Closed)));
    assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));
}

#[tokio::test]
async fn test_retained_handle_is_closed_after_panic() {
    let slot: Arc<Mutex<Option<WebSocketConn>>> = Arc::new(Mutex::new(None));
    let retained = Arc::clone(&slot);

    let mux = Mux::new();
    mux.websocket("/ws", move |ws| {
        let slot = Arc::clone(&retained);
        Box::pin(async move {
            slot.lock().unwrap().replace(ws.conn().clone());
            if true {
                panic!("callback bug");
            }
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Error);
    assert_eq!(frame.reason.as_str(), "internal error");
    assert_retained_handle_closed(&slot).await;

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_callback_panicking_before_its_future_closes_with_1011() {
    let slot: Arc<Mutex<Option<WebSocketConn>>> = Arc::new(Mutex::new(None));
    let retained = Arc::clone(&slot);

    let mux = Mux::new();
    mux.websocket("/ws", move |ws| {
        retained.lock().unwrap().replace(ws.conn().clone());
        if true {
            panic!("callback bug before the future");
        }
        Box::pin(async move { Ok(()) })
    });
    mux.handle("GET /alive", |ctx| {
        Box::pin(async move {
            ctx.response().write("yes")?;
            Ok(())
        })
    });
    let server = spawn_server(mux).await;

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    let frame = close_frame(&mut ws).await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Error);
    assert_eq!(frame.reason.as_str(), "internal error");
    assert_retained_handle_closed(&slot).await;

    let res = client().get(server.url("/alive")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "yes");

    server.shutdown.trigger();
}
