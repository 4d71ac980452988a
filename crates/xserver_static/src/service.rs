//! Static file responder.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use xserver_cache::FileCache;
use xserver_http::response::{SECURITY_HEADERS, build_response, error_page, response_head};
use xserver_http::{Method, Request};

use crate::listing::render_listing;
use crate::mime::content_type_for;
use crate::sendfile::{SENDFILE_MAX_BYTES, buffered_copy, mmap_to, sendfile_to};

/// Serve `req` from `local_root`. `rel_path` is the request path with the
/// route prefix already stripped (empty for the root itself). Returns the
/// status code that went to the client, for the access log.
pub async fn serve(
    stream: &mut TcpStream,
    local_root: &Path,
    charset: &str,
    req: &Request,
    rel_path: &str,
    cache: &FileCache,
) -> anyhow::Result<u16> {
    if req.method != Method::Get && req.method != Method::Head {
        stream
            .write_all(&error_page(StatusCode::METHOD_NOT_ALLOWED, charset))
            .await?;
        return Ok(405);
    }

    // Canonicalize the root and the candidate; the candidate must stay
    // inside the root once both are resolved (symlinks included).
    let root = match tokio::fs::canonicalize(local_root).await {
        Ok(p) => p,
        Err(_) => {
            warn!(
                target: "xserver::static",
                root = %local_root.display(),
                "Document root does not resolve"
            );
            stream
                .write_all(&error_page(StatusCode::NOT_FOUND, charset))
                .await?;
            return Ok(404);
        }
    };

    let candidate: PathBuf = if rel_path.is_empty() {
        root.clone()
    } else {
        root.join(rel_path)
    };
    let resolved = match tokio::fs::canonicalize(&candidate).await {
        Ok(p) => p,
        Err(_) => {
            stream
                .write_all(&error_page(StatusCode::NOT_FOUND, charset))
                .await?;
            return Ok(404);
        }
    };

    if !resolved.starts_with(&root) {
        warn!(
            target: "xserver::static",
            requested = %req.path,
            resolved = %resolved.display(),
            "Resolved path escapes document root"
        );
        stream
            .write_all(&error_page(StatusCode::FORBIDDEN, charset))
            .await?;
        return Ok(403);
    }

    let metadata = match tokio::fs::metadata(&resolved).await {
        Ok(m) => m,
        Err(_) => {
            stream
                .write_all(&error_page(StatusCode::NOT_FOUND, charset))
                .await?;
            return Ok(404);
        }
    };

    if metadata.is_dir() {
        let index = resolved.join("index.html");
        match tokio::fs::metadata(&index).await {
            Ok(index_meta) if index_meta.is_file() => {
                serve_file(stream, &index, &index_meta, charset, req, cache).await
            }
            _ => serve_listing(stream, &resolved, charset, req).await,
        }
    } else {
        serve_file(stream, &resolved, &metadata, charset, req, cache).await
    }
}

async fn serve_listing(
    stream: &mut TcpStream,
    dir: &Path,
    charset: &str,
    req: &Request,
) -> anyhow::Result<u16> {
    let page = match render_listing(dir, &req.path, charset).await {
        Ok(page) => page,
        Err(err) => {
            warn!(
                target: "xserver::static",
                dir = %dir.display(),
                error = %err,
                "Failed to read directory for listing"
            );
            stream
                .write_all(&error_page(StatusCode::INTERNAL_SERVER_ERROR, charset))
                .await?;
            return Ok(500);
        }
    };

    let content_type = format!("text/html; charset={charset}");
    if req.method == Method::Head {
        let head = response_head(
            StatusCode::OK,
            &content_type,
            page.len() as u64,
            &SECURITY_HEADERS,
        );
        stream.write_all(&head).await?;
    } else {
        let resp = build_response(
            StatusCode::OK,
            &content_type,
            page.as_bytes(),
            &SECURITY_HEADERS,
        );
        stream.write_all(&resp).await?;
    }
    Ok(200)
}

async fn serve_file(
    stream: &mut TcpStream,
    path: &Path,
    metadata: &std::fs::Metadata,
    charset: &str,
    req: &Request,
    cache: &FileCache,
) -> anyhow::Result<u16> {
    let len = metadata.len();
    let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
    let content_type = content_type_for(path, charset);

    let head = response_head(StatusCode::OK, &content_type, len, &[]);
    stream.write_all(&head).await?;

    if req.method == Method::Head {
        return Ok(200);
    }

    send_file_body(stream, path, len, mtime, cache).await?;
    Ok(200)
}

fn is_client_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Transmission decision tree: cached bytes beat re-opening the file;
/// small files go through `sendfile`; large files are mmapped; a hard
/// error before any byte went out falls back to a buffered copy.
async fn send_file_body(
    stream: &mut TcpStream,
    path: &Path,
    len: u64,
    mtime: SystemTime,
    cache: &FileCache,
) -> anyhow::Result<()> {
    if let Some(hit) = cache.get(path, mtime) {
        debug!(target: "xserver::static", path = %path.display(), "Serving from cache");
        stream.write_all(&hit.bytes).await?;
        return Ok(());
    }

    let mut sent = 0u64;

    if len <= SENDFILE_MAX_BYTES {
        let file = tokio::fs::File::open(path).await?;
        match sendfile_to(stream, &file, len, &mut sent).await {
            Ok(()) => {}
            Err(err) if sent == 0 && !is_client_gone(&err) => {
                debug!(
                    target: "xserver::static",
                    path = %path.display(),
                    error = %err,
                    "sendfile unavailable; copying"
                );
                buffered_copy(stream, path, &mut sent).await?;
            }
            Err(err) => return Err(err.into()),
        }

        // Warm the cache so the next request skips the filesystem.
        if len <= cache.max_file_bytes() {
            if let Ok(bytes) = tokio::fs::read(path).await {
                cache.put(path, bytes, mtime);
            }
        }
        return Ok(());
    }

    let file = std::fs::File::open(path)?;
    let map_result = {
        let mut sent_map = 0u64;
        let res = mmap_to(stream, &file, &mut sent_map).await;
        sent += sent_map;
        res
    };
    match map_result {
        Ok(()) => Ok(()),
        Err(err) if sent == 0 && !is_client_gone(&err) => {
            debug!(
                target: "xserver::static",
                path = %path.display(),
                error = %err,
                "mmap unavailable; copying"
            );
            buffered_copy(stream, path, &mut sent).await?;
            Ok(())
        }
        Err(err) => {
            warn!(
                target: "xserver::static",
                path = %path.display(),
                sent,
                total = len,
                error = %err,
                "File transmission truncated"
            );
            Err(err.into())
        }
    }
}
