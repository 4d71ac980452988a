use tracing::debug;

use xserver_config::RouteConfig;

/// Select the route whose prefix is the longest string prefix of `path`.
/// Identical prefixes are rejected at config load, so ties cannot occur.
pub(crate) fn resolve<'a>(routes: &'a [RouteConfig], path: &str) -> Option<&'a RouteConfig> {
    let route = routes
        .iter()
        .filter(|r| path.starts_with(&r.prefix))
        .max_by_key(|r| r.prefix.len())?;

    debug!(
        target: "xserver::router",
        request_path = %path,
        matched_prefix = %route.prefix,
        "Matched route by longest prefix"
    );
    Some(route)
}

/// The path below the matched prefix, without a leading slash. A bare `/`
/// prefix maps the whole path minus its leading slash.
pub(crate) fn relative_path<'a>(prefix: &str, path: &'a str) -> &'a str {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    rest.strip_prefix('/').unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use xserver_config::{AuthKind, RouteTarget};

    fn static_route(prefix: &str) -> RouteConfig {
        RouteConfig {
            prefix: prefix.to_string(),
            target: RouteTarget::Static {
                local_root: PathBuf::from("./public"),
            },
            auth: AuthKind::None,
            charset: "utf-8".into(),
        }
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let routes = vec![static_route("/"), static_route("/api/v1"), static_route("/api")];
        assert_eq!(resolve(&routes, "/api/v1/users").unwrap().prefix, "/api/v1");
        assert_eq!(resolve(&routes, "/api/other").unwrap().prefix, "/api");
        assert_eq!(resolve(&routes, "/index.html").unwrap().prefix, "/");
    }

    #[test]
    fn no_match_yields_none() {
        let routes = vec![static_route("/api")];
        assert!(resolve(&routes, "/other").is_none());
        assert!(resolve(&[], "/anything").is_none());
    }

    #[test]
    fn root_route_matches_everything() {
        let routes = vec![static_route("/")];
        assert!(resolve(&routes, "/").is_some());
        assert!(resolve(&routes, "/deep/path/file.txt").is_some());
    }

    #[test]
    fn relative_path_strips_prefix_and_slash() {
        assert_eq!(relative_path("/", "/index.html"), "index.html");
        assert_eq!(relative_path("/", "/"), "");
        assert_eq!(relative_path("/static", "/static/css/app.css"), "css/app.css");
        assert_eq!(relative_path("/static", "/static"), "");
        assert_eq!(relative_path("/api", "/api/v1/x"), "v1/x");
    }
}
