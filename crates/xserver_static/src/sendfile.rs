//! File-to-socket transmission paths.
//!
//! Three mechanisms in descending preference for uncached files:
//! kernel `sendfile` for small files, a read-only `mmap` written in chunks
//! for large ones, and a plain buffered copy as the fallback when either
//! reports a hard error. `EAGAIN` waits for socket writability; `EINTR`
//! retries immediately.

use std::io;

use memmap2::Mmap;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Files at or under this size go through `sendfile`.
pub const SENDFILE_MAX_BYTES: u64 = 1024 * 1024;

const MMAP_WRITE_CHUNK: usize = 256 * 1024;
const COPY_BUF_BYTES: usize = 64 * 1024;

#[cfg(target_os = "linux")]
pub async fn sendfile_to(
    stream: &mut TcpStream,
    file: &tokio::fs::File,
    len: u64,
    sent: &mut u64,
) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    use tokio::io::Interest;

    let in_fd = file.as_raw_fd();
    let mut offset: libc::off_t = 0;

    while *sent < len {
        stream.writable().await?;
        let out_fd = stream.as_raw_fd();
        let remaining = (len - *sent) as usize;
        let res = stream.try_io(Interest::WRITABLE, || {
            let n = unsafe { libc::sendfile(out_fd, in_fd, &mut offset, remaining) };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as u64)
            }
        });
        match res {
            // Offset reached EOF early (file shrank underneath us).
            Ok(0) => break,
            Ok(n) => *sent += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub async fn sendfile_to(
    _stream: &mut TcpStream,
    _file: &tokio::fs::File,
    _len: u64,
    _sent: &mut u64,
) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "sendfile not available on this platform",
    ))
}

/// Map the file read-only and write it to the socket in bounded chunks.
/// `tokio`'s `write_all` absorbs partial writes and socket backpressure.
pub async fn mmap_to(stream: &mut TcpStream, file: &std::fs::File, sent: &mut u64) -> io::Result<()> {
    // The mapping is read-only; a concurrent truncation of the underlying
    // file would fault, which matches the truncate-and-close policy for
    // files changing mid-response.
    let map = unsafe { Mmap::map(file)? };
    let mut off = 0usize;
    while off < map.len() {
        let end = (off + MMAP_WRITE_CHUNK).min(map.len());
        stream.write_all(&map[off..end]).await?;
        *sent += (end - off) as u64;
        off = end;
    }
    Ok(())
}

/// Plain read/write copy used when the zero-copy paths report hard errors.
pub async fn buffered_copy(
    stream: &mut TcpStream,
    path: &std::path::Path,
    sent: &mut u64,
) -> io::Result<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; COPY_BUF_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        *sent += n as u64;
    }
    Ok(())
}
