use std::path::PathBuf;

// =======================================================
// ROUTE KIND (closed variant set)
// =======================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Static,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthKind {
    #[default]
    None,
    OAuthHmac,
}

/// Per-variant route target. Static routes map to a filesystem root,
/// proxy routes to an upstream host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Static { local_root: PathBuf },
    Proxy { host: String, port: u16 },
}

// =======================================================
// ROUTE CONFIG
// =======================================================
//
// Immutable after config load. Selected by longest-prefix match,
// never by file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub prefix: String,
    pub target: RouteTarget,
    pub auth: AuthKind,
    pub charset: String,
}

impl RouteConfig {
    pub fn kind(&self) -> RouteKind {
        match self.target {
            RouteTarget::Static { .. } => RouteKind::Static,
            RouteTarget::Proxy { .. } => RouteKind::Proxy,
        }
    }

    pub fn is_static(&self) -> bool {
        self.kind() == RouteKind::Static
    }
}
