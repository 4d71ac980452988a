//! Upstream forwarder.
//!
//! Connects to the route's upstream, rewrites the buffered client request
//! (prefix strip, header hygiene, forwarding headers), relays the response
//! to the client as it arrives, and classifies failures into the status
//! code the client sees.

mod headers;
mod relay;

use http::StatusCode;
use thiserror::Error;

pub use headers::{build_upstream_request, rewrite_path};
pub use relay::{ProxyOutcome, forward};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream dns resolution failed")]
    DnsFailed,
    #[error("upstream connect failed")]
    ConnectFailed,
    #[error("upstream exchange timed out")]
    Timeout,
    #[error("upstream read failed")]
    ReadFailed,
    #[error("upstream write failed")]
    WriteFailed,
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Title line for the client-facing error page.
    pub fn title(&self) -> &'static str {
        match self {
            Self::DnsFailed => "Bad Gateway - DNS Resolution Failed",
            Self::ConnectFailed => "Bad Gateway - Connection Failed",
            Self::Timeout => "Gateway Timeout",
            Self::ReadFailed | Self::WriteFailed => "Bad Gateway",
        }
    }
}
