//! Filter capability shared by the grant filters, and the minimal chain
//! runner that drives them.
//!
//! A filter sees each request once on the way in and once on the way out.
//! Serving a response from `request` short-circuits the rest of the chain
//! and the backend; `response` still runs, in reverse order, for every
//! filter whose `request` ran.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::LOCATION;
use http::{Extensions, HeaderValue, Request, Response, StatusCode};

use super::types::GrantError;

pub type Body = Vec<u8>;

/// Per-request state handed through the filter chain.
pub struct FilterContext {
    request: Request<Body>,
    response: Option<Response<Body>>,
    served: bool,
    state_bag: Extensions,
}

impl FilterContext {
    pub fn new(request: Request<Body>) -> Self {
        FilterContext {
            request,
            response: None,
            served: false,
            state_bag: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// Answer the request from a filter. The backend is not called.
    pub fn serve(&mut self, response: Response<Body>) {
        self.response = Some(response);
        self.served = true;
    }

    pub fn is_served(&self) -> bool {
        self.served
    }

    /// Store the backend's response.
    pub fn set_response(&mut self, response: Response<Body>) {
        self.response = Some(response);
    }

    pub fn response(&self) -> Option<&Response<Body>> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response<Body>> {
        self.response.as_mut()
    }

    /// Typed values passed from a filter's `request` to its `response`.
    pub fn state_bag(&self) -> &Extensions {
        &self.state_bag
    }

    pub fn state_bag_mut(&mut self) -> &mut Extensions {
        &mut self.state_bag
    }

    pub fn into_response(self) -> Response<Body> {
        self.response.unwrap_or_else(|| return_status(StatusCode::NOT_FOUND))
    }
}

/// One kind of request filter.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    /// Name under which routes refer to this filter.
    fn name(&self) -> &'static str;

    async fn request(&self, ctx: &mut FilterContext);

    async fn response(&self, _ctx: &mut FilterContext) {}
}

/// Where an unserved request goes after the request filters.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn forward(&self, request: &Request<Body>) -> Response<Body>;
}

/// Ordered list of filters attached to one route.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        FilterChain { filters }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub async fn run(&self, ctx: &mut FilterContext, backend: &dyn Backend) {
        let mut ran = 0;
        for filter in &self.filters {
            filter.request(ctx).await;
            ran += 1;
            if ctx.is_served() {
                break;
            }
        }
        if !ctx.is_served() {
            let response = backend.forward(ctx.request()).await;
            ctx.set_response(response);
        }
        for filter in self.filters[..ran].iter().rev() {
            filter.response(ctx).await;
        }
    }
}

/// Filters known to the proxy, by name.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<&'static str, Arc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filter: Arc<dyn Filter>) {
        self.filters.insert(filter.name(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(name).cloned()
    }
}

/// Empty response with the given status.
pub fn return_status(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::new());
    *response.status_mut() = status;
    response
}

/// Redirect response pointing at `location`.
pub fn redirect_response(status: StatusCode, location: &str) -> Result<Response<Body>, GrantError> {
    let location = HeaderValue::from_str(location)
        .map_err(|e| GrantError::Internal(format!("invalid redirect location: {e}")))?;
    let mut response = return_status(status);
    response.headers_mut().insert(LOCATION, location);
    Ok(response)
}
