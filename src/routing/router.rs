//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in a segment tree
//! - Look up the route for `(method, path)` and extract path parameters
//! - Return an explicit `RouteNotFound` / `MethodNotAllowed` rather than a default
//!
//! # Design Decisions
//! - Immutable after `RouterBuilder::build` (thread-safe without locks)
//! - O(1) literal child lookup per segment via HashMap
//! - Duplicate `(method, shape)` registration fails the build
//! - `HEAD` falls back to the `GET` route when no `HEAD` route exists

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::http::Method;

use crate::error::{ApiError, StartupError};
use crate::routing::pattern::{split_path, Pattern, Segment};

/// Path parameters extracted from a match, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A registered route.
#[derive(Debug)]
struct Route<T> {
    pattern: Pattern,
    value: T,
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'r, T> {
    pub value: &'r T,
    pub pattern: &'r str,
    pub params: PathParams,
}

#[derive(Debug)]
struct Node<T> {
    literals: HashMap<String, Node<T>>,
    param: Option<Box<Node<T>>>,
    routes: Vec<(Method, Arc<Route<T>>)>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            literals: HashMap::new(),
            param: None,
            routes: Vec::new(),
        }
    }

    fn insert(&mut self, segments: &[Segment], method: Method, route: Arc<Route<T>>) {
        match segments.split_first() {
            None => self.routes.push((method, route)),
            Some((Segment::Literal(lit), rest)) => self
                .literals
                .entry(lit.clone())
                .or_insert_with(Node::new)
                .insert(rest, method, route),
            Some((Segment::Param(_), rest)) => self
                .param
                .get_or_insert_with(|| Box::new(Node::new()))
                .insert(rest, method, route),
        }
    }

    fn route_for(&self, method: &Method) -> Option<&Arc<Route<T>>> {
        let exact = self
            .routes
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, route)| route);
        if exact.is_some() || *method != Method::HEAD {
            return exact;
        }
        self.routes
            .iter()
            .find(|(m, _)| *m == Method::GET)
            .map(|(_, route)| route)
    }

    /// Depth-first search, literals before parameters.
    ///
    /// `values` collects parameter values along the current branch.
    /// `path_only` collects every node whose path matched but whose methods
    /// did not, for 405 reporting.
    fn search<'n, 'p>(
        &'n self,
        segments: &[&'p str],
        method: &Method,
        values: &mut Vec<&'p str>,
        path_only: &mut Vec<&'n Node<T>>,
    ) -> Option<&'n Arc<Route<T>>> {
        let Some((head, rest)) = segments.split_first() else {
            if self.routes.is_empty() {
                return None;
            }
            let found = self.route_for(method);
            if found.is_none() {
                path_only.push(self);
            }
            return found;
        };

        if let Some(child) = self.literals.get(*head) {
            if let Some(route) = child.search(rest, method, values, path_only) {
                return Some(route);
            }
        }

        if let Some(child) = self.param.as_deref() {
            if !head.is_empty() {
                values.push(head);
                if let Some(route) = child.search(rest, method, values, path_only) {
                    return Some(route);
                }
                values.pop();
            }
        }

        None
    }
}

/// Union of the methods routable on any of `nodes`, literal branches first.
fn allowed_methods<T>(nodes: &[&Node<T>]) -> Vec<Method> {
    let mut methods: Vec<Method> = Vec::new();
    for (method, _) in nodes.iter().flat_map(|node| node.routes.iter()) {
        if !methods.contains(method) {
            methods.push(method.clone());
        }
    }
    if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
        methods.push(Method::HEAD);
    }
    methods
}

/// Collects routes at startup.
#[derive(Debug)]
pub struct RouterBuilder<T> {
    routes: Vec<(Method, Pattern, T)>,
}

impl<T> Default for RouterBuilder<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> RouterBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Pattern errors surface immediately; duplicates at `build`.
    pub fn route(&mut self, method: Method, pattern: &str, value: T) -> Result<&mut Self, StartupError> {
        let pattern = Pattern::parse(pattern)?;
        self.routes.push((method, pattern, value));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freeze the table.
    pub fn build(self) -> Result<Router<T>, StartupError> {
        let mut seen = HashSet::new();
        let mut root = Node::new();
        let mut count = 0;

        for (method, pattern, value) in self.routes {
            if !seen.insert((method.clone(), pattern.shape())) {
                return Err(StartupError::DuplicateRoute {
                    method,
                    pattern: pattern.as_str().to_string(),
                });
            }
            tracing::debug!(method = %method, pattern = %pattern, "Route registered");
            let segments = pattern.segments().to_vec();
            root.insert(&segments, method, Arc::new(Route { pattern, value }));
            count += 1;
        }

        Ok(Router { root, count })
    }
}

/// Immutable route table.
#[derive(Debug)]
pub struct Router<T> {
    root: Node<T>,
    count: usize,
}

impl<T> Router<T> {
    pub fn builder() -> RouterBuilder<T> {
        RouterBuilder::new()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Resolve a request path.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch<'_, T>, ApiError> {
        let segments: Vec<&str> = split_path(path).collect();
        let mut values = Vec::with_capacity(segments.len());
        let mut path_only = Vec::new();

        match self.root.search(&segments, method, &mut values, &mut path_only) {
            Some(route) => {
                let mut params = PathParams::new();
                for (name, raw) in route.pattern.param_names().into_iter().zip(values) {
                    let value = urlencoding::decode(raw)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| raw.to_string());
                    params.insert(name, value);
                }
                Ok(RouteMatch {
                    value: &route.value,
                    pattern: route.pattern.as_str(),
                    params,
                })
            }
            None if path_only.is_empty() => Err(ApiError::RouteNotFound(path.to_string())),
            None => Err(ApiError::MethodNotAllowed {
                method: method.clone(),
                path: path.to_string(),
                allowed: allowed_methods(&path_only),
            }),
        }
    }
}
