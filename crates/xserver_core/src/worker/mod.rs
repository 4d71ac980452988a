//! Per-connection lifecycle: read pump, incremental parse, dispatch, close.
//!
//! One request per connection: `Connection: close` is advertised on every
//! response and the socket is torn down after the cycle. The keep-alive
//! timeout in the configuration applies once connection reuse is enabled.

mod dispatch;
mod routing;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};

use xserver_http::response::error_page;
use xserver_http::{MAX_REQUEST_BYTES, ParseStatus, RequestParser};

use crate::server::Worker;

const READ_CHUNK_BYTES: usize = 8 * 1024;

pub(crate) enum ReadOutcome {
    Read(usize),
    Timeout,
}

pub(crate) async fn read_more(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    timeout_dur: Duration,
) -> anyhow::Result<ReadOutcome> {
    let mut tmp = [0u8; READ_CHUNK_BYTES];
    match timeout(timeout_dur, stream.read(&mut tmp)).await {
        Ok(res) => {
            let n = res?;
            if n > 0 {
                buf.extend_from_slice(&tmp[..n]);
            }
            Ok(ReadOutcome::Read(n))
        }
        Err(_) => Ok(ReadOutcome::Timeout),
    }
}

#[instrument(skip(stream, worker), fields(client = %peer))]
pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    worker: &Worker,
) -> anyhow::Result<()> {
    let cfg = &worker.cfg;
    let idle = Duration::from_secs(cfg.idle_timeout_secs.max(1));
    let started = Instant::now();

    let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES);
    let mut parser = RequestParser::new(cfg.max_body_bytes);

    let req = loop {
        match parser.parse(&buf) {
            Ok(ParseStatus::Complete(consumed)) => {
                debug!(
                    target: "xserver::worker",
                    bytes = consumed,
                    "Request parsed"
                );
                match parser.take_request() {
                    Some(req) => break req,
                    None => return Ok(()),
                }
            }
            Ok(ParseStatus::NeedMore) => {
                if buf.len() as u64 >= MAX_REQUEST_BYTES {
                    warn!(target: "xserver::worker", "Request exceeds buffer cap");
                    let _ = stream
                        .write_all(&error_page(http::StatusCode::PAYLOAD_TOO_LARGE, "utf-8"))
                        .await;
                    worker
                        .stats
                        .record_request(413, started.elapsed().as_micros() as u64);
                    return Ok(());
                }
                match read_more(&mut stream, &mut buf, idle).await? {
                    ReadOutcome::Timeout => {
                        debug!(target: "xserver::worker", "Idle timeout; closing");
                        return Ok(());
                    }
                    ReadOutcome::Read(0) => return Ok(()),
                    ReadOutcome::Read(_) => {}
                }
            }
            Err(err) => {
                if err.is_smuggling() {
                    warn!(
                        target: "xserver::worker",
                        error = %err,
                        "Rejected request (smuggling defense)"
                    );
                } else {
                    debug!(target: "xserver::worker", error = %err, "Rejected request");
                }
                let status = err.status();
                // The client may already be gone; the error page write is
                // best-effort.
                let _ = stream.write_all(&error_page(status, "utf-8")).await;
                worker
                    .stats
                    .record_request(status.as_u16(), started.elapsed().as_micros() as u64);
                return Ok(());
            }
        }
    };

    let method = req.method.as_str();
    let target = req.target();
    let status = dispatch::handle_request(&mut stream, &req, peer, worker).await?;
    let elapsed = started.elapsed();
    worker
        .stats
        .record_request(status, elapsed.as_micros() as u64);

    // The single access-log write for the request.
    info!(
        target: "xserver::access",
        client = %peer.ip(),
        method,
        path = %target,
        status,
        request_bytes = req.body_len(),
        duration_ms = elapsed.as_millis() as u64,
        "Request complete"
    );

    let _ = stream.shutdown().await;
    Ok(())
}
