//! HTTP request handlers and routing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error};
use tokio::task::JoinHandle;

use crate::parser::{percent_decode, BodyKind, HttpRequest, Method};
use crate::server::error::Error;
use crate::server::response::{HttpResponse, StatusCode};

/// Type alias for a boxed future that returns a Result<HttpResponse, Error>.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Type alias for a handler function that takes an HttpRequest and returns a HandlerFuture.
pub type HandlerFn = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

/// A parsed route pattern such as `/books/:id` or `/static/*path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid = |why: &str| Error::InvalidPattern(raw.to_string(), why.to_string());
        let rest = raw.strip_prefix('/').ok_or_else(|| invalid("must start with '/'"))?;

        let mut segments = Vec::new();
        if !rest.is_empty() {
            let parts: Vec<&str> = rest.split('/').collect();
            for (i, part) in parts.iter().enumerate() {
                let segment = if let Some(name) = part.strip_prefix(':') {
                    if name.is_empty() {
                        return Err(invalid("parameter without a name"));
                    }
                    Segment::Param(name.to_string())
                } else if let Some(name) = part.strip_prefix('*') {
                    if i + 1 != parts.len() {
                        return Err(invalid("wildcard must be the last segment"));
                    }
                    Segment::Wildcard(name.to_string())
                } else {
                    Segment::Static(part.to_string())
                };
                segments.push(segment);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A pattern without parameters or wildcards.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Static(_)))
    }

    /// Length of the literal text before the first parameter or wildcard.
    pub fn static_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Static(_)))
            .map(|s| match s {
                Segment::Static(text) => text.len() + 1,
                _ => 0,
            })
            .sum()
    }

    /// Match the still percent-encoded `path`, returning decoded captures.
    ///
    /// Each segment is decoded on its own, so an encoded `/` can neither
    /// split a segment nor appear in a capture.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<String> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').map(decode_segment).collect::<Option<_>>()?
        };

        let mut params = HashMap::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Static(text) => {
                    if parts.get(i) != Some(text) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i).filter(|v| !v.is_empty())?;
                    params.insert(name.clone(), value.clone());
                }
                Segment::Wildcard(name) => {
                    let tail: &[String] = parts.get(i..).unwrap_or_default();
                    // Only the last segment of a tail may be empty.
                    if tail.iter().rev().skip(1).any(|s| s.is_empty()) {
                        return None;
                    }
                    if !name.is_empty() {
                        params.insert(name.clone(), tail.join("/"));
                    }
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn decode_segment(raw: &str) -> Option<String> {
    percent_decode(raw, false).ok().filter(|segment| !segment.contains('/'))
}

/// Represents a route in the HTTP server.
pub struct Route {
    /// The HTTP method to match.
    pub method: Method,
    /// The path pattern to match.
    pub pattern: Pattern,
    /// How the request body is read before the handler runs.
    pub body_kind: BodyKind,
    /// The handler function.
    pub handler: HandlerFn,
}

/// The outcome of looking up a route.
pub enum Resolution<'a> {
    Matched {
        route: &'a Route,
        params: HashMap<String, String>,
    },
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// The route table.
///
/// Routes are registered before serving starts; afterwards the table is
/// shared read-only between connections.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` and `pattern`, reading the body
    /// according to its content type.
    pub fn register<F, Fut>(&mut self, method: Method, pattern: &str, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.register_with_body(method, pattern, BodyKind::Auto, handler)
    }

    /// Register `handler` with an explicit body kind.
    ///
    /// A second registration of the same method and pattern is rejected and
    /// leaves the first one in place.
    pub fn register_with_body<F, Fut>(&mut self, method: Method, pattern: &str, body_kind: BodyKind, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        let pattern = Pattern::parse(pattern)?;
        if self.routes.iter().any(|r| r.method == method && r.pattern == pattern) {
            return Err(Error::DuplicateRoute(method, pattern.raw));
        }

        let handler: HandlerFn = Arc::new(move |req: HttpRequest| -> HandlerFuture { Box::pin(handler(req)) });
        self.routes.push(Route {
            method,
            pattern,
            body_kind,
            handler,
        });
        Ok(())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Find the route for `method` and the encoded request `path`.
    pub fn resolve(&self, method: Method, path: &str) -> Resolution<'_> {
        let candidates: Vec<(&Route, HashMap<String, String>)> = self
            .routes
            .iter()
            .filter_map(|route| route.pattern.matches(path).map(|params| (route, params)))
            .collect();
        if candidates.is_empty() {
            return Resolution::NotFound;
        }

        let for_method = |m: Method| candidates.iter().filter(move |(route, _)| route.method == m);
        let mut matching: Vec<&(&Route, HashMap<String, String>)> = for_method(method).collect();
        if matching.is_empty() && method == Method::HEAD {
            matching = for_method(Method::GET).collect();
        }

        // Exact first, then longest static prefix; `min_by_key` keeps the
        // earliest registration among equals.
        let best = matching
            .into_iter()
            .min_by_key(|(route, _)| (!route.pattern.is_exact(), usize::MAX - route.pattern.static_prefix_len()));

        match best {
            Some((route, params)) => Resolution::Matched {
                route: *route,
                params: params.clone(),
            },
            None => {
                let mut allowed: Vec<Method> = Vec::new();
                for (route, _) in &candidates {
                    if !allowed.contains(&route.method) {
                        allowed.push(route.method);
                    }
                }
                if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
                    allowed.push(Method::HEAD);
                }
                Resolution::MethodNotAllowed(allowed)
            }
        }
    }

    /// Resolve and run the handler for `request`.
    ///
    /// Always produces a response: unmatched requests get a 404 or 405, and
    /// handler failures are turned into error responses.
    pub async fn dispatch(&self, mut request: HttpRequest) -> HttpResponse {
        match self.resolve(request.method, &request.raw_path) {
            Resolution::Matched { route, params } => {
                request.params = params;
                self.invoke(route, request).await
            }
            Resolution::MethodNotAllowed(allowed) => HttpResponse::from(&Error::MethodNotAllowed {
                method: request.method,
                path: request.path,
                allowed,
            }),
            Resolution::NotFound => HttpResponse::from(&Error::NotFound(request.path)),
        }
    }

    /// Run `route`'s handler on `request`.
    ///
    /// The handler runs in its own task so that a panic is contained, and that
    /// task is aborted if the caller is cancelled.
    pub async fn invoke(&self, route: &Route, request: HttpRequest) -> HttpResponse {
        let method = request.method;
        let path = request.path.clone();
        let task = AbortOnDrop(tokio::spawn((route.handler)(request)));

        match task.join().await {
            Ok(Ok(response)) => {
                debug!("{method} {path} -> {}", response.status.as_u16());
                response
            }
            Ok(Err(e)) => {
                let status = e.status_code();
                if status == StatusCode::InternalServerError {
                    error!("Handler for {method} {path} failed: {e}");
                } else {
                    debug!("Handler for {method} {path} rejected the request: {e}");
                }
                HttpResponse::from(&e)
            }
            Err(join_error) => {
                error!("Handler for {method} {path} panicked: {join_error}");
                HttpResponse::from(&Error::HandlerFailure(format!("handler for {path} panicked")))
            }
        }
    }
}

/// Aborts the wrapped task when dropped before completion.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
