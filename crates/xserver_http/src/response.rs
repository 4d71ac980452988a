//! Raw HTTP/1.1 response assembly.
//!
//! Every response carries `Server`, `Date`, `Content-Type`, `Content-Length`
//! and `Connection: close`. Error responses add a strict security header set
//! and a small styled HTML body with a redacted message.

use std::time::SystemTime;

use http::StatusCode;
use httpdate::fmt_http_date;

pub const SERVER_NAME: &str = "X-Server";

/// Header set attached to every error page.
pub const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("X-Frame-Options", "DENY"),
    ("X-Content-Type-Options", "nosniff"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    (
        "Content-Security-Policy",
        "default-src 'self'; style-src 'self' 'unsafe-inline'",
    ),
];

pub fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Error")
}

/// Headers only; the caller streams the body separately.
pub fn response_head(
    status: StatusCode,
    content_type: &str,
    content_length: u64,
    extra: &[(&str, &str)],
) -> Vec<u8> {
    let mut head = String::with_capacity(256);
    head.push_str(&format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason(status)));
    head.push_str(&format!("Server: {SERVER_NAME}\r\n"));
    head.push_str(&format!("Content-Type: {content_type}\r\n"));
    head.push_str(&format!("Content-Length: {content_length}\r\n"));
    head.push_str(&format!("Date: {}\r\n", fmt_http_date(SystemTime::now())));
    for (name, value) in extra {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");
    head.into_bytes()
}

/// Full response: head plus body.
pub fn build_response(
    status: StatusCode,
    content_type: &str,
    body: &[u8],
    extra: &[(&str, &str)],
) -> Vec<u8> {
    let mut out = response_head(status, content_type, body.len() as u64, extra);
    out.extend_from_slice(body);
    out
}

/// Client-facing message, deliberately vaguer than the log line.
fn redacted_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "Request format error",
        401 => "Authentication required",
        403 => "Access denied",
        404 => "Requested resource not found",
        405 => "Request method not allowed",
        413 => "Request body too large",
        414 => "Request URI too long",
        500 => "Internal server error",
        502 => "Gateway error",
        504 => "Gateway timeout",
        _ => "Server error",
    }
}

pub fn error_body(status: StatusCode, title: &str, detail: &str) -> String {
    let code = status.as_u16();
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
             <title>{code} {title}</title>\n\
             <style>\n\
                 body {{ font-family: Arial, sans-serif; margin: 40px; background: #f5f5f5; }}\n\
                 .error-container {{ max-width: 500px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }}\n\
                 .error-code {{ font-size: 48px; font-weight: bold; color: #dc3545; margin-bottom: 20px; text-align: center; }}\n\
                 .error-message {{ font-size: 18px; margin-bottom: 20px; text-align: center; color: #333; }}\n\
                 .error-details {{ color: #666; font-size: 14px; text-align: center; }}\n\
             </style>\n\
         </head>\n\
         <body>\n\
             <div class=\"error-container\">\n\
                 <div class=\"error-code\">{code}</div>\n\
                 <div class=\"error-message\">{title}</div>\n\
                 <div class=\"error-details\">{detail}</div>\n\
             </div>\n\
         </body>\n\
         </html>"
    )
}

/// Standard error page for a status code.
pub fn error_page(status: StatusCode, charset: &str) -> Vec<u8> {
    error_page_with_detail(status, reason(status), redacted_message(status), charset)
}

/// Error page with an explicit title and detail line (used by the proxy for
/// upstream failure classification).
pub fn error_page_with_detail(
    status: StatusCode,
    title: &str,
    detail: &str,
    charset: &str,
) -> Vec<u8> {
    let body = error_body(status, title, detail);
    let content_type = format!("text/html; charset={charset}");
    build_response(status, &content_type, body.as_bytes(), &SECURITY_HEADERS)
}

/// Minimal HTML escaping for text interpolated into listings and pages.
pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
