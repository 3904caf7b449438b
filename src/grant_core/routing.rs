//! Route definitions, preprocessing and the compiled route table.
//!
//! Routing proper belongs to the proxy. This module holds the small surface
//! the grant filters need from it: definitions naming filters, a pass that
//! rewrites definitions before activation, and exact-path lookup.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::filter::{FilterChain, FilterRegistry};

/// Id of the route added for the callback path.
pub const GRANT_CALLBACK_ROUTE_ID: &str = "__oauth2_grant_callback";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route `{route}` references unknown filter `{filter}`")]
    UnknownFilter { route: String, filter: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches exactly this path.
    Literal(String),
    /// Matches every path.
    AnyPath,
}

impl PathPattern {
    pub fn literal_path<T: Into<String>>(path: T) -> Self {
        Self::Literal(path.into())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Literal(p) => p == path,
            PathPattern::AnyPath => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDef {
    /// Answered by the filters alone.
    Shunt,
    Network(String),
}

/// Route as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub id: String,
    pub path: PathPattern,
    pub filters: Vec<String>,
    pub backend: BackendDef,
}

impl RouteDef {
    pub fn new<I: Into<String>>(id: I, path: PathPattern, backend: BackendDef) -> Self {
        RouteDef { id: id.into(), path, filters: Vec::new(), backend }
    }

    pub fn filter<S: Into<String>>(mut self, name: S) -> Self {
        self.filters.push(name.into());
        self
    }

    fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f == name)
    }
}

/// Rewrites the route set once before it is activated.
pub trait PreProcessor: Send + Sync {
    fn process(&self, routes: Vec<RouteDef>) -> Vec<RouteDef>;
}

/// Makes sure the callback path is served by the callback filter.
///
/// A user route counts only if it matches the callback path literally and
/// carries the callback filter. Otherwise the synthetic route goes first, so
/// no user route can shadow it. Running the pass again yields the same set.
#[derive(Debug, Clone)]
pub struct GrantPreprocessor {
    callback_path: String,
    callback_filter: &'static str,
}

impl GrantPreprocessor {
    pub fn new(callback_path: impl Into<String>, callback_filter: &'static str) -> Self {
        GrantPreprocessor { callback_path: callback_path.into(), callback_filter }
    }

    fn serves_callback(&self, route: &RouteDef) -> bool {
        route.path == PathPattern::Literal(self.callback_path.clone()) && route.has_filter(self.callback_filter)
    }
}

impl PreProcessor for GrantPreprocessor {
    fn process(&self, routes: Vec<RouteDef>) -> Vec<RouteDef> {
        let mut user_routes: Vec<RouteDef> = routes
            .into_iter()
            .filter(|r| r.id != GRANT_CALLBACK_ROUTE_ID)
            .collect();
        if user_routes.iter().any(|r| self.serves_callback(r)) {
            debug!(path = %self.callback_path, "callback path already routed");
            return user_routes;
        }
        let callback = RouteDef::new(
            GRANT_CALLBACK_ROUTE_ID,
            PathPattern::literal_path(self.callback_path.clone()),
            BackendDef::Shunt,
        )
        .filter(self.callback_filter);
        user_routes.insert(0, callback);
        user_routes
    }
}

/// A definition compiled against the filter registry.
#[derive(Clone)]
pub struct Route {
    pub id: String,
    pub path: PathPattern,
    pub chain: FilterChain,
    pub backend: BackendDef,
}

/// Activated routes.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn build(
        defs: Vec<RouteDef>,
        preprocessors: &[Arc<dyn PreProcessor>],
        registry: &FilterRegistry,
    ) -> Result<Self, RouteError> {
        let defs = preprocessors.iter().fold(defs, |defs, p| p.process(defs));
        let mut routes = Vec::with_capacity(defs.len());
        for def in defs {
            let mut filters = Vec::with_capacity(def.filters.len());
            for name in &def.filters {
                let filter = registry.get(name).ok_or_else(|| RouteError::UnknownFilter {
                    route: def.id.clone(),
                    filter: name.clone(),
                })?;
                filters.push(filter);
            }
            routes.push(Route {
                id: def.id,
                path: def.path,
                chain: FilterChain::new(filters),
                backend: def.backend,
            });
        }
        Ok(RouteTable { routes })
    }

    /// First literal match, then the first catch-all.
    pub fn lookup(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| matches!(&r.path, PathPattern::Literal(p) if p == path))
            .or_else(|| self.routes.iter().find(|r| r.path.matches(path)))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
