//! mux-server: a small service built on http-mux.
//!
//! # Route Tree
//!
//! ```text
//! Mux (recover → request_id → logger)
//! ├── GET /version     crate version
//! ├── GET /healthz     liveness
//! ├── /api/            (no-store)
//! │   ├── GET  /time   JSON clock
//! │   └── POST /echo   JSON echo, 400 on invalid JSON
//! ├── /ws              websocket echo
//! └── <static_prefix>/ static files, when assets.static_root is set
//! ```

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{header, HeaderValue, StatusCode};
use clap::Parser;
use tokio::net::TcpListener;

use http_mux::config::{load_config, validate_config, ConfigError, ServerConfig};
use http_mux::lifecycle::{wait_for_signal, Shutdown};
use http_mux::observability::init_logging;
use http_mux::{handler_fn, middleware, middleware_fn, Context, HttpError, HttpServer, Mux};

const MAX_ECHO_BYTES: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "mux-server")]
#[command(about = "Demo HTTP server built on http-mux", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mux-server starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        static_root = ?config.assets.static_root,
        "Configuration loaded"
    );

    let mux = build_mux(&config);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    HttpServer::new(mux, &config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_mux(config: &ServerConfig) -> Mux {
    let mux = Mux::new();
    mux.use_middleware(middleware::recover());
    mux.use_middleware(middleware::request_id());
    mux.use_middleware(middleware::logger());

    mux.handle("GET /version", |ctx| {
        Box::pin(async move {
            write_text(ctx, env!("CARGO_PKG_VERSION"))?;
            Ok(())
        })
    });

    mux.handle("GET /healthz", |ctx| {
        Box::pin(async move {
            write_text(ctx, "ok")?;
            Ok(())
        })
    });

    mux.route("/api", |api| {
        api.use_middleware(middleware_fn(|next| {
            handler_fn(move |ctx| {
                let next = next.clone();
                Box::pin(async move {
                    ctx.response()
                        .headers_mut()
                        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                    next(ctx).await
                })
            })
        }));

        api.handle("GET /time", |ctx| {
            Box::pin(async move {
                let unix = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(HttpError::internal)?
                    .as_secs();
                write_json(ctx, &serde_json::json!({ "unix": unix }))?;
                Ok(())
            })
        });

        api.handle("POST /echo", |ctx| {
            Box::pin(async move {
                let body = axum::body::to_bytes(ctx.take_body(), MAX_ECHO_BYTES)
                    .await
                    .map_err(|e| {
                        HttpError::new(StatusCode::PAYLOAD_TOO_LARGE, "body too large")
                            .with_internal(e)
                    })?;
                let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
                    HttpError::new(StatusCode::BAD_REQUEST, "invalid JSON").with_internal(e)
                })?;
                write_json(ctx, &value)?;
                Ok(())
            })
        });
    });

    mux.websocket("/ws", |ws| {
        Box::pin(async move {
            let conn = ws.conn().clone();
            while let Some(message) = conn.recv().await? {
                conn.send(message).await?;
            }
            Ok(())
        })
    });

    if let Some(root) = &config.assets.static_root {
        mux.static_dir(&config.assets.static_prefix, root);
    }

    mux
}

fn write_text(ctx: &mut Context, text: &'static str) -> std::io::Result<usize> {
    let writer = ctx.response();
    writer.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    writer.write(text)
}

fn write_json(ctx: &mut Context, value: &serde_json::Value) -> Result<(), http_mux::BoxError> {
    let body = serde_json::to_vec(value).map_err(HttpError::internal)?;
    let writer = ctx.response();
    writer
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    writer.write(body)?;
    Ok(())
}
