//! Request dispatch: status endpoint, route resolution, authentication,
//! then the static or proxy handler.

use std::net::SocketAddr;

use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use xserver_config::{AuthKind, RouteTarget};
use xserver_http::response::{build_response, error_page, error_page_with_detail};
use xserver_http::{Method, Request};
use xserver_proxy::{build_upstream_request, forward};

use super::routing;
use crate::server::Worker;

const DEFAULT_CHARSET: &str = "utf-8";
const STATUS_PATH: &str = "/x-server/status";

/// Returns the status code sent to the client, for accounting.
pub(crate) async fn handle_request(
    stream: &mut TcpStream,
    req: &Request,
    peer: SocketAddr,
    worker: &Worker,
) -> anyhow::Result<u16> {
    if req.path == STATUS_PATH {
        return status_endpoint(stream, req, peer, worker).await;
    }

    let Some(route) = routing::resolve(&worker.cfg.routes, &req.path) else {
        debug!(target: "xserver::router", path = %req.path, "No route matched");
        stream
            .write_all(&error_page(StatusCode::NOT_FOUND, DEFAULT_CHARSET))
            .await?;
        return Ok(404);
    };

    if route.auth == AuthKind::OAuthHmac {
        // Sub-reason goes to the log inside validate(); the client only
        // sees the redacted 403 page.
        if xserver_auth::validate(&worker.credentials, req).is_err() {
            stream
                .write_all(&error_page(StatusCode::FORBIDDEN, &route.charset))
                .await?;
            return Ok(403);
        }
    }

    match &route.target {
        RouteTarget::Static { local_root } => {
            let rel = routing::relative_path(&route.prefix, &req.path);
            xserver_static::serve(stream, local_root, &route.charset, req, rel, &worker.cache)
                .await
        }
        RouteTarget::Proxy { host, port } => {
            let outbound = build_upstream_request(req, &route.prefix, &peer.ip().to_string());
            match forward(stream, &outbound, host, *port).await {
                Ok(outcome) => Ok(outcome.status.unwrap_or(200)),
                Err(err) => {
                    warn!(
                        target: "xserver::proxy",
                        host = %host,
                        port,
                        error = %err,
                        "Upstream exchange failed"
                    );
                    let page = error_page_with_detail(
                        err.status(),
                        err.title(),
                        &format!("Upstream: {host}:{port}"),
                        &route.charset,
                    );
                    // The client may already be gone; the close path handles it.
                    let _ = stream.write_all(&page).await;
                    Ok(err.status().as_u16())
                }
            }
        }
    }
}

/// Loopback-only JSON statistics view.
async fn status_endpoint(
    stream: &mut TcpStream,
    req: &Request,
    peer: SocketAddr,
    worker: &Worker,
) -> anyhow::Result<u16> {
    if !peer.ip().is_loopback() {
        stream
            .write_all(&error_page(StatusCode::NOT_FOUND, DEFAULT_CHARSET))
            .await?;
        return Ok(404);
    }
    if req.method != Method::Get && req.method != Method::Head {
        stream
            .write_all(&error_page(StatusCode::METHOD_NOT_ALLOWED, DEFAULT_CHARSET))
            .await?;
        return Ok(405);
    }

    let snapshot = worker.stats.snapshot(&worker.cache, &worker.limiter);
    let body = serde_json::to_vec(&snapshot)?;
    let payload: &[u8] = if req.method == Method::Head { b"" } else { &body };
    let resp = build_response(
        StatusCode::OK,
        "application/json; charset=utf-8",
        payload,
        &[],
    );
    stream.write_all(&resp).await?;
    Ok(200)
}
