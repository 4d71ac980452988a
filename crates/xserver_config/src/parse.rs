use std::path::PathBuf;

use thiserror::Error;

use crate::route::{AuthKind, RouteConfig, RouteTarget};
use crate::server::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config line {line}: {message}")]
    Syntax { line: usize, message: String },
}

fn syntax(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::Syntax {
        line,
        message: message.into(),
    }
}

/// Parse a size value with optional K/M/G suffix into bytes.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, mult) = match value.as_bytes()[value.len() - 1] {
        b'k' | b'K' => (&value[..value.len() - 1], 1024u64),
        b'm' | b'M' => (&value[..value.len() - 1], 1024 * 1024),
        b'g' | b'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(mult)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "on" | "1" | "true" | "yes" => Some(true),
        "off" | "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Apply the directives in `text` on top of `cfg`.
///
/// Grammar: `#` comments, `key value;` directives, and
/// `route <static|proxy> <prefix> <target> [auth] [charset];`.
pub(crate) fn parse_config(text: &str, cfg: &mut ServerConfig) -> Result<(), ConfigError> {
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_suffix(';').unwrap_or(line).trim_end();

        let mut tokens = line.split_whitespace();
        let key = match tokens.next() {
            Some(k) => k,
            None => continue,
        };

        if key == "route" {
            let route = parse_route(lineno, tokens)?;
            cfg.routes.push(route);
            continue;
        }

        let value = tokens
            .next()
            .ok_or_else(|| syntax(lineno, format!("directive '{key}' is missing a value")))?;

        apply_directive(cfg, lineno, key, value)?;
    }
    Ok(())
}

fn parse_route<'a>(
    lineno: usize,
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<RouteConfig, ConfigError> {
    let kind = tokens
        .next()
        .ok_or_else(|| syntax(lineno, "route is missing a kind (static|proxy)"))?;
    let prefix = tokens
        .next()
        .ok_or_else(|| syntax(lineno, "route is missing a prefix"))?;
    let target = tokens
        .next()
        .ok_or_else(|| syntax(lineno, "route is missing a target"))?;

    let target = match kind {
        "static" => RouteTarget::Static {
            local_root: PathBuf::from(target),
        },
        "proxy" => {
            let (host, port) = match target.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| syntax(lineno, format!("invalid proxy port '{port}'")))?;
                    (host.to_string(), port)
                }
                None => (target.to_string(), 80),
            };
            RouteTarget::Proxy { host, port }
        }
        other => return Err(syntax(lineno, format!("unknown route kind '{other}'"))),
    };

    let mut auth = AuthKind::None;
    let mut charset = "utf-8".to_string();
    for extra in tokens {
        match extra {
            "oauth" | "auth:oauth" => auth = AuthKind::OAuthHmac,
            "none" | "auth:none" => auth = AuthKind::None,
            other => charset = other.to_string(),
        }
    }

    Ok(RouteConfig {
        prefix: prefix.to_string(),
        target,
        auth,
        charset,
    })
}

fn apply_directive(
    cfg: &mut ServerConfig,
    lineno: usize,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let bad_number = || syntax(lineno, format!("directive '{key}' has invalid value '{value}'"));

    match key {
        "worker_processes" => cfg.workers = value.parse().map_err(|_| bad_number())?,
        "listen_port" => cfg.listen_port = value.parse().map_err(|_| bad_number())?,
        "max_connections" | "worker_connections" => {
            cfg.max_connections = value.parse().map_err(|_| bad_number())?
        }
        "keepalive_timeout" => cfg.keepalive_secs = value.parse().map_err(|_| bad_number())?,
        "client_max_body_size" => {
            cfg.max_body_bytes = parse_size(value).ok_or_else(bad_number)?
        }
        "read_timeout" | "client_header_timeout" => {
            cfg.read_timeout_secs = value.parse().map_err(|_| bad_number())?
        }
        "send_timeout" => cfg.write_timeout_secs = value.parse().map_err(|_| bad_number())?,
        "connection_timeout" => {
            cfg.idle_timeout_secs = value.parse().map_err(|_| bad_number())?
        }
        "memory_pool_size" => {
            cfg.memory_pool_bytes = parse_size(value).ok_or_else(bad_number)?
        }
        "event_loop_batch_size" => cfg.accept_batch = value.parse().map_err(|_| bad_number())?,
        "event_loop_timeout" => cfg.tick_millis = value.parse().map_err(|_| bad_number())?,
        "connection_limit_per_ip" => {
            cfg.limits.max_conn_per_ip = value.parse().map_err(|_| bad_number())?
        }
        "rate_limit_per_second" => {
            cfg.limits.rps_limit = value.parse().map_err(|_| bad_number())?
        }
        "rate_limit_burst" => cfg.limits.burst_limit = value.parse().map_err(|_| bad_number())?,
        "limit_cleanup_interval" => {
            cfg.limits.cleanup_interval_secs = value.parse().map_err(|_| bad_number())?
        }
        "cache_max_file_size" => {
            cfg.cache.max_file_bytes = parse_size(value).ok_or_else(bad_number)?
        }
        "cache_size" => cfg.cache.max_total_bytes = parse_size(value).ok_or_else(bad_number)?,
        "cache_cleanup_interval" => {
            cfg.cache.cleanup_interval_secs = value.parse().map_err(|_| bad_number())?
        }
        "cache_idle_expiry" => {
            cfg.cache.idle_expiry_secs = value.parse().map_err(|_| bad_number())?
        }
        "log_path" => cfg.log.path = value.to_string(),
        "log_level" => cfg.log.level = value.to_string(),
        "log_daily" => cfg.log.daily = parse_bool(value).ok_or_else(bad_number)?,
        "api_auth_config" => cfg.credentials_file = value.to_string(),
        // Unknown directives are tolerated so configs can carry options
        // understood by other deployments of the same file.
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{AuthKind, RouteTarget};
    use crate::server::ServerConfig;

    #[test]
    fn parse_size_understands_suffixes() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("8K"), Some(8 * 1024));
        assert_eq!(parse_size("10m"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("x"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn parses_directives_and_routes() {
        let text = "\
# demo config
worker_processes 2;
listen_port 9090;
client_max_body_size 2M;
connection_limit_per_ip 5;

route static / ./public
route proxy /api upstream:8080 oauth
route static /docs ./docs none gbk
";
        let cfg = ServerConfig::from_str(text).expect("config should parse");
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.listen_port, 9090);
        assert_eq!(cfg.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.limits.max_conn_per_ip, 5);
        assert_eq!(cfg.routes.len(), 3);

        assert_eq!(cfg.routes[0].prefix, "/");
        assert!(cfg.routes[0].is_static());

        assert_eq!(cfg.routes[1].prefix, "/api");
        assert_eq!(cfg.routes[1].auth, AuthKind::OAuthHmac);
        match &cfg.routes[1].target {
            RouteTarget::Proxy { host, port } => {
                assert_eq!(host, "upstream");
                assert_eq!(*port, 8080);
            }
            other => panic!("expected proxy target, got {other:?}"),
        }

        assert_eq!(cfg.routes[2].charset, "gbk");
        assert_eq!(cfg.routes[2].auth, AuthKind::None);
    }

    #[test]
    fn proxy_route_without_port_defaults_to_80() {
        let cfg = ServerConfig::from_str("route proxy /api backend\n").unwrap();
        match &cfg.routes[0].target {
            RouteTarget::Proxy { host, port } => {
                assert_eq!(host, "backend");
                assert_eq!(*port, 80);
            }
            other => panic!("expected proxy target, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ServerConfig::from_str("listen_port many;\n").is_err());
        assert!(ServerConfig::from_str("route static /only\n").is_err());
        assert!(ServerConfig::from_str("route teleport / ./public\n").is_err());
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let cfg = ServerConfig::from_str("tcp_fastopen on;\nlisten_port 81;\n").unwrap();
        assert_eq!(cfg.listen_port, 81);
    }
}
