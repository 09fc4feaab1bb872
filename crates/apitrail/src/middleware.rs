//! Middleware chain with the capture interception points.
//!
//! The chain exposes three extension points: pre-handler and post-handler
//! capture in [`AuditLayer`], and fallback capture in
//! [`FallbackCaptureLayer`], which must sit outermost so it observes
//! responses produced by short-circuiting layers between it and the audit
//! layer.

use crate::capture::{CapturePipeline, CorrelationToken};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// An inbound request with a pre-buffered body.
pub type Request = http::Request<Bytes>;

/// An outbound response with a buffered body.
pub type Response = http::Response<Full<Bytes>>;

/// A boxed next function for middleware chains.
pub type BoxedNext =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> + Send + Sync>;

/// Trait for middleware applied to the request pipeline.
pub trait MiddlewareLayer: Send + Sync + 'static {
    /// Apply this middleware to a request, calling `next` to continue the
    /// chain.
    fn call(
        &self,
        req: Request,
        next: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

    /// Clone this middleware into a boxed trait object.
    fn clone_box(&self) -> Box<dyn MiddlewareLayer>;
}

impl Clone for Box<dyn MiddlewareLayer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An ordered stack of middleware layers.
#[derive(Clone, Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn MiddlewareLayer>>,
}

impl LayerStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer. Layers execute in the order they are added (outermost
    /// first).
    pub fn push(&mut self, layer: Box<dyn MiddlewareLayer>) {
        self.layers.push(layer);
    }

    /// Add a layer at the front of the stack, making it the outermost.
    pub fn prepend(&mut self, layer: Box<dyn MiddlewareLayer>) {
        self.layers.insert(0, layer);
    }

    /// Number of layers in the stack.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run a request through the stack into a final handler.
    pub fn execute(
        &self,
        req: Request,
        handler: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> {
        if self.layers.is_empty() {
            return handler(req);
        }

        let mut next = handler;

        for layer in self.layers.iter().rev() {
            let layer = layer.clone_box();
            let current_next = next;
            next = Arc::new(move |req: Request| {
                let layer = layer.clone_box();
                let next = current_next.clone();
                Box::pin(async move { layer.call(req, next).await })
                    as Pin<Box<dyn Future<Output = Response> + Send + 'static>>
            });
        }

        next(req)
    }
}

/// Buffer a response body, yielding the rebuilt response and the body text.
async fn buffer_response(response: Response) -> (Response, String) {
    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let text = String::from_utf8_lossy(&bytes).into_owned();
    (http::Response::from_parts(parts, Full::new(bytes)), text)
}

/// Primary capture middleware: pre-handler snapshot, post-handler completion.
#[derive(Clone)]
pub struct AuditLayer {
    pipeline: Arc<CapturePipeline>,
}

impl AuditLayer {
    /// Wrap a capture pipeline.
    pub fn new(pipeline: Arc<CapturePipeline>) -> Self {
        Self { pipeline }
    }
}

impl MiddlewareLayer for AuditLayer {
    fn call(
        &self,
        mut req: Request,
        next: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> {
        let pipeline = self.pipeline.clone();

        Box::pin(async move {
            let token = CorrelationToken::attach(&mut req);
            let observed = pipeline.observe_request(token, &req).await;

            let response = next(req).await;

            if !observed {
                return response;
            }

            let status = response.status().as_u16();
            let (response, body) = buffer_response(response).await;
            pipeline.complete(token, status, Some(body));
            response
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Fallback capture middleware for responses that bypass [`AuditLayer`].
///
/// Place this outermost: a layer between it and the audit layer that
/// short-circuits (auth guard, rate limiter) produces a response the audit
/// layer never sees, and this layer records it instead. Inert unless
/// extended capture is enabled.
#[derive(Clone)]
pub struct FallbackCaptureLayer {
    pipeline: Arc<CapturePipeline>,
}

impl FallbackCaptureLayer {
    /// Wrap a capture pipeline.
    pub fn new(pipeline: Arc<CapturePipeline>) -> Self {
        Self { pipeline }
    }
}

impl MiddlewareLayer for FallbackCaptureLayer {
    fn call(
        &self,
        mut req: Request,
        next: BoxedNext,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'static>> {
        let pipeline = self.pipeline.clone();

        Box::pin(async move {
            if !pipeline.extended_capture_enabled() {
                return next(req).await;
            }

            let token = CorrelationToken::attach(&mut req);

            // Keep a probe copy for snapshot synthesis; the body is a
            // refcounted buffer so this is cheap.
            let mut probe = http::Request::new(req.body().clone());
            *probe.method_mut() = req.method().clone();
            *probe.uri_mut() = req.uri().clone();
            *probe.headers_mut() = req.headers().clone();

            let response = next(req).await;

            let status = response.status().as_u16();
            let (response, body) = buffer_response(response).await;
            pipeline
                .complete_fallback(token, &probe, status, Some(body))
                .await;
            response
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}
