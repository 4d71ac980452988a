//! Outbound request assembly: prefix strip, header hygiene, forwarding
//! headers, body passthrough.

use tracing::warn;

use xserver_http::{Request, valid_header_name, valid_header_value};

/// Headers never copied toward the upstream.
const DROPPED_HEADERS: [&str; 4] = [
    "connection",
    "transfer-encoding",
    "content-encoding",
    "upgrade",
];

/// Headers the forwarder itself appends, so client-sent copies are skipped.
const APPENDED_HEADERS: [&str; 2] = ["x-forwarded-for", "x-forwarded-host"];

/// Strip the route prefix from the request path, keeping the result rooted.
pub fn rewrite_path(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

/// Build the complete upstream request: rewritten request line, hygienic
/// header copy, forwarding headers, `Connection: close`, then the buffered
/// body verbatim.
pub fn build_upstream_request(req: &Request, prefix: &str, client_ip: &str) -> Vec<u8> {
    let path = rewrite_path(&req.path, prefix);
    let target = match &req.query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };

    let mut out = Vec::with_capacity(256 + req.body.len());
    out.extend_from_slice(
        format!("{} {} {}\r\n", req.method.as_str(), target, req.version.as_str()).as_bytes(),
    );

    for (name, value) in &req.headers {
        let lower = name.to_ascii_lowercase();
        if DROPPED_HEADERS.contains(&lower.as_str()) || APPENDED_HEADERS.contains(&lower.as_str())
        {
            continue;
        }
        // Re-check the lexical rules on the way out; nothing malformed may
        // reach the upstream even if a parser change ever lets it through.
        if !valid_header_name(name) || !valid_header_value(value) {
            warn!(target: "xserver::proxy", header = %name, "Dropping malformed header");
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }

    let forwarded_for = req.header("x-forwarded-for").unwrap_or(client_ip);
    out.extend_from_slice(format!("X-Forwarded-For: {forwarded_for}\r\n").as_bytes());
    if let Some(host) = req.header("host") {
        out.extend_from_slice(format!("X-Forwarded-Host: {host}\r\n").as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(&req.body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xserver_http::{ParseStatus, RequestParser};

    fn request(raw: &str) -> Request {
        let mut parser = RequestParser::new(1024 * 1024);
        match parser.parse(raw.as_bytes()) {
            Ok(ParseStatus::Complete(_)) => parser.take_request().unwrap(),
            other => panic!("fixture request failed: {other:?}"),
        }
    }

    #[test]
    fn prefix_is_stripped_from_the_request_line() {
        assert_eq!(rewrite_path("/api/v1/x", "/api"), "/v1/x");
        assert_eq!(rewrite_path("/api", "/api"), "/");
        assert_eq!(rewrite_path("/x", "/"), "/x");
        assert_eq!(rewrite_path("/other", "/api"), "/other");
    }

    #[test]
    fn rewritten_line_keeps_query_and_version() {
        let req = request("GET /api/v1/x?q=1 HTTP/1.0\r\nHost: h\r\n\r\n");
        let out = build_upstream_request(&req, "/api", "1.2.3.4");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("GET /v1/x?q=1 HTTP/1.0\r\n"));
    }

    #[test]
    fn forwarding_headers_are_appended() {
        let req = request("GET /api/v1/x HTTP/1.1\r\nHost: site.example\r\n\r\n");
        let text = String::from_utf8(build_upstream_request(&req, "/api", "9.8.7.6")).unwrap();
        assert!(text.contains("X-Forwarded-For: 9.8.7.6\r\n"));
        assert!(text.contains("X-Forwarded-Host: site.example\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        // Exactly one Connection header survives.
        assert_eq!(text.matches("Connection:").count(), 1);
    }

    #[test]
    fn prior_forwarded_for_value_is_preserved() {
        let req = request(
            "GET /api/x HTTP/1.1\r\nHost: h\r\nX-Forwarded-For: 10.0.0.1\r\n\r\n",
        );
        let text = String::from_utf8(build_upstream_request(&req, "/api", "9.8.7.6")).unwrap();
        assert!(text.contains("X-Forwarded-For: 10.0.0.1\r\n"));
        assert!(!text.contains("9.8.7.6"));
        assert_eq!(text.matches("X-Forwarded-For:").count(), 1);
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let req = request(
            "GET /api/x HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\nContent-Encoding: br\r\nUpgrade: h2c\r\nAccept: */*\r\n\r\n",
        );
        let text = String::from_utf8(build_upstream_request(&req, "/api", "1.1.1.1")).unwrap();
        assert!(!text.contains("keep-alive"));
        assert!(!text.contains("Content-Encoding"));
        assert!(!text.contains("Upgrade"));
        assert!(text.contains("Accept: */*\r\n"));
    }

    #[test]
    fn auth_headers_pass_through() {
        let req = request(
            "GET /api/x HTTP/1.1\r\nHost: h\r\noauth-app-key: k\r\noauth-token: t\r\noauth-time: 1\r\noauth-random: r\r\n\r\n",
        );
        let text = String::from_utf8(build_upstream_request(&req, "/api", "1.1.1.1")).unwrap();
        assert!(text.contains("oauth-app-key: k\r\n"));
        assert!(text.contains("oauth-token: t\r\n"));
    }

    #[test]
    fn body_is_forwarded_verbatim() {
        let req = request(
            "POST /api/x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello",
        );
        let out = build_upstream_request(&req, "/api", "1.1.1.1");
        assert!(out.ends_with(b"\r\n\r\nhello"));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
    }
}
