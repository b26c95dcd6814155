//! Per-request execution scope.
//!
//! A [`RequestScope`] pairs the issued [`RequestId`] with the OpenTelemetry
//! [`Context`] holding the active span. Each concern has its own type, so
//! identity and span never share a key. Scopes are cheap to clone and are
//! passed explicitly down the call chain.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use opentelemetry::trace::{Span, SpanContext, SpanRef, TraceContextExt};
use opentelemetry::Context;

use crate::http::request::RequestId;

#[derive(Debug, Clone)]
pub struct RequestScope {
    request_id: RequestId,
    cx: Context,
}

impl RequestScope {
    /// Scope with an identity and no active span.
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            cx: Context::new(),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// The active span. A no-op span when none was started.
    pub fn span(&self) -> SpanRef<'_> {
        self.cx.span()
    }

    /// Span context of the active span, if it is valid.
    pub fn span_context(&self) -> Option<SpanContext> {
        let span = self.cx.span();
        let sc = span.span_context();
        sc.is_valid().then(|| sc.clone())
    }

    /// Child scope carrying `span` as the active span.
    pub(crate) fn with_span<S>(&self, span: S) -> Self
    where
        S: Span + Send + Sync + 'static,
    {
        Self {
            request_id: self.request_id.clone(),
            cx: self.cx.with_span(span),
        }
    }

    /// Scope whose parent is a remote context extracted from headers.
    pub(crate) fn with_context(&self, cx: Context) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cx,
        }
    }
}

impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(scope) = parts.extensions.get::<RequestScope>() {
            return Ok(scope.clone());
        }
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_default();
        Ok(RequestScope::new(request_id))
    }
}
