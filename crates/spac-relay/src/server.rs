//! HTTP surface of the relay: a liveness banner and the invoke endpoint.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Html;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::RelayError;
use crate::mux::SessionMux;

const BANNER: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8"/>
  <title>spac relay</title>
</head>
<body>
  <h1>spac relay</h1>
  <p>This endpoint tunnels TCP streams for spac agents. Point your agent's
  relay transport at <code>/invoke</code>.</p>
</body>
</html>
"#;

/// Build the relay router over a shared multiplexer.
pub fn router(mux: Arc<SessionMux>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/invoke", post(invoke))
        .with_state(mux)
}

/// Serve until the shutdown token fires.
pub async fn serve(
    listener: TcpListener,
    mux: Arc<SessionMux>,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "relay listening");
    axum::serve(listener, router(mux))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("relay stopped");
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(BANNER)
}

/// `POST /invoke`: one event batch in, one bounded batch out.
///
/// The user identity is the opaque `UserToken` header; a missing header
/// maps to the anonymous user. The response is length-delimited by
/// `Content-Length` and arrives within the long-poll window even when no
/// outbound work exists.
async fn invoke(
    State(mux): State<Arc<SessionMux>>,
    headers: HeaderMap,
    body: Bytes,
) -> Bytes {
    let user = headers
        .get("UserToken")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    mux.handle_invoke(user, body).await
}
