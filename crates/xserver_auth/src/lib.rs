//! OAuth-style request validation.
//!
//! Clients sign each request with four headers (`oauth-app-key`,
//! `oauth-token`, `oauth-time`, `oauth-random`); the token is the lowercase
//! hex MD5 of `app_key || app_secret || time || random`. MD5 is kept for
//! wire compatibility with existing clients; it is not a modern MAC, and the
//! operator documentation flags it as such.

mod digest;
mod store;

use thiserror::Error;
use tracing::warn;

use xserver_http::Request;

pub use digest::{compute_token, constant_time_eq};
pub use store::{Credential, CredentialStore};

/// Validation window for `oauth-time`, in seconds either side of now.
const TIME_WINDOW_SECS: i64 = 300;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authentication parameters")]
    MissingParameters,
    #[error("unknown application key")]
    UnknownApp,
    #[error("authentication timestamp expired")]
    TimestampExpired,
    #[error("authentication token mismatch")]
    TokenMismatch,
    #[error("url not allowed for this application")]
    UrlNotAllowed,
}

/// Validate the OAuth headers on `req` against the credential store.
pub fn validate(store: &CredentialStore, req: &Request) -> Result<(), AuthError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    validate_at(store, req, now)
}

fn validate_at(store: &CredentialStore, req: &Request, now: i64) -> Result<(), AuthError> {
    let app_key = req.header("oauth-app-key");
    let token = req.header("oauth-token");
    let time = req.header("oauth-time");
    let random = req.header("oauth-random");

    let (Some(app_key), Some(token), Some(time), Some(random)) = (app_key, token, time, random)
    else {
        warn!(
            target: "xserver::auth",
            path = %req.path,
            "Validation failed: missing oauth headers"
        );
        return Err(AuthError::MissingParameters);
    };

    // Clone the matched credential out of the store so the lock is not held
    // across the digest work.
    let Some(credential) = store.lookup(app_key) else {
        warn!(target: "xserver::auth", app_key, "Validation failed: unknown app key");
        return Err(AuthError::UnknownApp);
    };

    let Ok(req_time) = time.parse::<i64>() else {
        warn!(target: "xserver::auth", app_key, time, "Validation failed: unparsable timestamp");
        return Err(AuthError::TimestampExpired);
    };
    if (now - req_time).abs() > TIME_WINDOW_SECS {
        warn!(
            target: "xserver::auth",
            app_key,
            req_time,
            now,
            "Validation failed: timestamp outside window"
        );
        return Err(AuthError::TimestampExpired);
    }

    let expected = compute_token(app_key, &credential.app_secret, time, random);
    if !constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        warn!(target: "xserver::auth", app_key, "Validation failed: token mismatch");
        return Err(AuthError::TokenMismatch);
    }

    if !credential.allows_url(&req.path) {
        warn!(
            target: "xserver::auth",
            app_key,
            path = %req.path,
            "Validation failed: url not in allow-list"
        );
        return Err(AuthError::UrlNotAllowed);
    }

    Ok(())
}
