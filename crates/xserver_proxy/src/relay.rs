//! Upstream connect and bidirectional relay.

use std::time::Duration;

use memchr::memmem;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::UpstreamError;

/// Per-address connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the whole proxied exchange.
const OVERALL_DEADLINE: Duration = Duration::from_secs(30);
/// At most this much of the upstream response head is buffered for
/// status/length extraction.
const MAX_HEAD_CAPTURE: usize = 16 * 1024;

/// What the relay observed, for the access log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProxyOutcome {
    pub status: Option<u16>,
    pub content_length: Option<u64>,
    pub bytes_relayed: u64,
}

/// Resolve and connect, trying addresses in resolution order; the first
/// successful connect wins.
async fn connect_upstream(host: &str, port: u16) -> Result<TcpStream, UpstreamError> {
    let addrs = lookup_host((host, port)).await.map_err(|err| {
        warn!(target: "xserver::proxy", host, port, error = %err, "DNS resolution failed");
        UpstreamError::DnsFailed
    })?;

    let mut attempted = false;
    for addr in addrs {
        attempted = true;
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!(target: "xserver::proxy", %addr, "Connected to upstream");
                return Ok(stream);
            }
            Ok(Err(err)) => {
                debug!(target: "xserver::proxy", %addr, error = %err, "Connect failed");
            }
            Err(_) => {
                debug!(target: "xserver::proxy", %addr, "Connect timed out");
            }
        }
    }

    warn!(target: "xserver::proxy", host, port, "No upstream address accepted the connection");
    Err(if attempted {
        UpstreamError::ConnectFailed
    } else {
        UpstreamError::DnsFailed
    })
}

/// Pull status code and Content-Length out of the captured response head.
fn parse_response_head(head: &[u8], outcome: &mut ProxyOutcome) {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut resp = httparse::Response::new(&mut header_storage);
    if resp.parse(head).is_err() {
        return;
    }
    outcome.status = resp.code;
    for h in resp.headers.iter() {
        if h.name.eq_ignore_ascii_case("content-length") {
            outcome.content_length = std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse().ok());
        }
    }
}

/// Send the rewritten request upstream and relay the response bytes to the
/// client as they arrive, until either side closes or the overall deadline
/// fires. Once response bytes have reached the client the stream is
/// truncated rather than re-written on failure.
pub async fn forward(
    client: &mut TcpStream,
    request_bytes: &[u8],
    host: &str,
    port: u16,
) -> Result<ProxyOutcome, UpstreamError> {
    let deadline = Instant::now() + OVERALL_DEADLINE;
    let mut upstream = connect_upstream(host, port).await?;

    match timeout_at(deadline, upstream.write_all(request_bytes)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(target: "xserver::proxy", host, port, error = %err, "Failed to write request upstream");
            return Err(UpstreamError::WriteFailed);
        }
        Err(_) => return Err(UpstreamError::Timeout),
    }

    let mut outcome = ProxyOutcome::default();
    let mut head: Vec<u8> = Vec::new();
    let mut head_done = false;

    let (mut client_rd, mut client_wr) = client.split();
    let mut ubuf = [0u8; 8192];
    let mut cbuf = [0u8; 1024];

    loop {
        tokio::select! {
            res = timeout_at(deadline, upstream.read(&mut ubuf)) => {
                match res {
                    Err(_) => {
                        // Overall deadline. Nothing sent yet maps to a clean
                        // 504; a started response is truncated as-is.
                        if outcome.bytes_relayed == 0 {
                            return Err(UpstreamError::Timeout);
                        }
                        warn!(target: "xserver::proxy", host, port, "Deadline hit mid-response; truncating");
                        break;
                    }
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        if !head_done {
                            let room = MAX_HEAD_CAPTURE.saturating_sub(head.len());
                            head.extend_from_slice(&ubuf[..n.min(room)]);
                            if memmem::find(&head, b"\r\n\r\n").is_some() || head.len() >= MAX_HEAD_CAPTURE {
                                parse_response_head(&head, &mut outcome);
                                head_done = true;
                                head = Vec::new();
                            }
                        }
                        if client_wr.write_all(&ubuf[..n]).await.is_err() {
                            debug!(target: "xserver::proxy", "Client went away mid-relay");
                            break;
                        }
                        outcome.bytes_relayed += n as u64;
                    }
                    Ok(Err(err)) => {
                        if outcome.bytes_relayed == 0 {
                            warn!(target: "xserver::proxy", host, port, error = %err, "Upstream read failed before any response bytes");
                            return Err(UpstreamError::ReadFailed);
                        }
                        warn!(target: "xserver::proxy", host, port, error = %err, "Upstream read failed; truncating");
                        break;
                    }
                }
            }
            res = client_rd.read(&mut cbuf) => {
                match res {
                    // Client closed or errored: stop relaying.
                    Ok(0) | Err(_) => break,
                    // Stray bytes from the client mid-response are ignored.
                    Ok(_) => {}
                }
            }
        }
    }

    info!(
        target: "xserver::proxy",
        host,
        port,
        status = outcome.status.unwrap_or(0),
        bytes = outcome.bytes_relayed,
        "Proxy exchange finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal scripted upstream: reads until the blank line, then writes a
    /// canned response and closes.
    async fn scripted_upstream(response: &'static [u8]) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if memmem::find(&seen, b"\r\n\r\n").is_some() {
                    break;
                }
            }
            sock.write_all(response).await.unwrap();
            sock.shutdown().await.unwrap();
            seen
        });
        (addr, handle)
    }

    /// Socket pair standing in for the downstream client.
    async fn client_pair() -> (TcpStream, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut out = Vec::new();
            sock.read_to_end(&mut out).await.unwrap();
            out
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        (stream, reader)
    }

    #[tokio::test]
    async fn relays_the_upstream_response_unchanged() {
        const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nproxied";
        let (addr, upstream) = scripted_upstream(RESPONSE).await;
        let (mut client, client_read) = client_pair().await;

        let request = b"GET /v1/x HTTP/1.1\r\nX-Forwarded-For: 1.2.3.4\r\nConnection: close\r\n\r\n";
        let outcome = forward(&mut client, request, "127.0.0.1", addr.port())
            .await
            .expect("forward should succeed");
        drop(client);

        assert_eq!(outcome.status, Some(200));
        assert_eq!(outcome.content_length, Some(7));
        assert_eq!(outcome.bytes_relayed as usize, RESPONSE.len());

        let upstream_saw = upstream.await.unwrap();
        assert!(upstream_saw.starts_with(b"GET /v1/x HTTP/1.1\r\n"));

        let client_saw = client_read.await.unwrap();
        assert_eq!(client_saw, RESPONSE);
    }

    #[tokio::test]
    async fn refused_connect_classifies_as_connect_failed() {
        // Bind and immediately drop to find a port with no listener.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let (mut client, reader) = client_pair().await;
        let err = forward(&mut client, b"GET / HTTP/1.1\r\n\r\n", "127.0.0.1", port)
            .await
            .expect_err("connect must fail");
        assert_eq!(err, UpstreamError::ConnectFailed);
        drop(client);
        let _ = reader.await;
    }

    #[tokio::test]
    async fn unresolvable_host_classifies_as_dns_failed() {
        let (mut client, reader) = client_pair().await;
        let err = forward(
            &mut client,
            b"GET / HTTP/1.1\r\n\r\n",
            "host.that-cannot-resolve.invalid",
            80,
        )
        .await
        .expect_err("resolution must fail");
        assert_eq!(err, UpstreamError::DnsFailed);
        drop(client);
        let _ = reader.await;
    }

    #[tokio::test]
    async fn partial_response_is_streamed_then_truncated() {
        // Upstream closes right after the head; the client keeps what
        // arrived and the observed status stands.
        const RESPONSE: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 100\r\n\r\npartial";
        let (addr, _upstream) = scripted_upstream(RESPONSE).await;
        let (mut client, client_read) = client_pair().await;

        let outcome = forward(&mut client, b"GET / HTTP/1.1\r\n\r\n", "127.0.0.1", addr.port())
            .await
            .expect("truncated stream still succeeds");
        drop(client);

        assert_eq!(outcome.status, Some(502));
        assert_eq!(client_read.await.unwrap(), RESPONSE);
    }
}
