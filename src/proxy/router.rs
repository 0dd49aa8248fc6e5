use crate::http::request::Request;
use crate::proxy::routes::{Route, RouteTable};

/// A selected route and what is left of the path after its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    /// Decoded bytes after the prefix. May be empty; the forwarder turns
    /// that into `/`.
    pub residual: &'a [u8],
}

/// Picks the route for an inbound request.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    table: RouteTable,
}

impl RequestRouter {
    pub fn new(table: RouteTable) -> Self {
        Self { table }
    }

    /// Returns `None` when no prefix applies; the request is then left to
    /// the inbound server's default handling.
    pub fn route<'a>(&'a self, request: &'a Request) -> Option<RouteMatch<'a>> {
        self.match_path(&request.path)
    }

    /// First entry, in table order, whose prefix starts `path`.
    pub fn match_path<'a>(&'a self, path: &'a [u8]) -> Option<RouteMatch<'a>> {
        self.table.entries().iter().find_map(|route| {
            path.strip_prefix(route.prefix.as_bytes())
                .map(|residual| RouteMatch { route, residual })
        })
    }
}
