//! Prefix → backend port mappings.
//!
//! The table is loaded once at startup from a flat JSON object such as
//! `{"/api/": "8080", "/static": 9000}` and never changes afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// A configured path-prefix rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Non-empty literal path prefix
    pub prefix: String,
    /// Backend port, kept as text exactly as configured
    pub target_port: String,
}

impl Route {
    pub fn new(prefix: impl Into<String>, target_port: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target_port: target_port.into(),
        }
    }
}

/// Which route wins when several prefixes match the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MatchPolicy {
    /// The longest matching prefix wins; equal lengths fall back to byte order.
    #[default]
    LongestPrefix,
    /// Prefixes are scanned in byte order and the first match wins.
    Lexicographic,
}

#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mapping is not a flat object of prefix to port: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A port identifier as it may appear in the mapping file.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Text(String),
    Number(serde_json::Number),
}

impl PortValue {
    fn into_text(self) -> String {
        match self {
            PortValue::Text(text) => text,
            PortValue::Number(number) => number.to_string(),
        }
    }
}

/// Read-only, ordered set of routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    policy: MatchPolicy,
}

impl RouteTable {
    /// Loads routes from a JSON mapping file.
    ///
    /// Never fails: an unreadable or malformed file is logged and yields an
    /// empty table, so the proxy still starts and simply routes nothing.
    pub fn load(path: impl AsRef<Path>, policy: MatchPolicy) -> Self {
        let path = path.as_ref();
        match Self::try_load(path, policy) {
            Ok(table) => {
                tracing::info!(
                    file = %path.display(),
                    routes = table.len(),
                    "Route table loaded"
                );
                table
            }
            Err(e) => {
                tracing::error!(
                    file = %path.display(),
                    error = %e,
                    "Error reading route mapping, serving with no routes"
                );
                Self::empty(policy)
            }
        }
    }

    pub fn try_load(path: &Path, policy: MatchPolicy) -> Result<Self, RouteTableError> {
        let text = std::fs::read_to_string(path).map_err(|source| RouteTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, policy)
    }

    /// Parses a flat JSON object. A repeated key keeps its last value.
    pub fn from_json_str(text: &str, policy: MatchPolicy) -> Result<Self, RouteTableError> {
        let mappings: BTreeMap<String, PortValue> = serde_json::from_str(text)?;
        Ok(Self::from_routes(
            mappings
                .into_iter()
                .map(|(prefix, port)| Route::new(prefix, port.into_text())),
            policy,
        ))
    }

    /// Builds a table from routes in any order. Later duplicates replace
    /// earlier ones and empty prefixes are discarded.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>, policy: MatchPolicy) -> Self {
        let mut by_prefix = BTreeMap::new();
        for route in routes {
            if route.prefix.is_empty() {
                tracing::warn!(port = %route.target_port, "Ignoring route with empty prefix");
                continue;
            }
            by_prefix.insert(route.prefix.clone(), route);
        }

        // BTreeMap iteration is byte order already.
        let mut routes: Vec<Route> = by_prefix.into_values().collect();
        if policy == MatchPolicy::LongestPrefix {
            routes.sort_by(|a, b| {
                b.prefix
                    .len()
                    .cmp(&a.prefix.len())
                    .then_with(|| a.prefix.cmp(&b.prefix))
            });
        }

        for route in &routes {
            tracing::info!(prefix = %route.prefix, port = %route.target_port, "Route");
        }

        Self { routes, policy }
    }

    pub fn empty(policy: MatchPolicy) -> Self {
        Self {
            routes: Vec::new(),
            policy,
        }
    }

    /// Routes in the order they are tried.
    pub fn entries(&self) -> &[Route] {
        &self.routes
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
