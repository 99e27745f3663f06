use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// HTTP header name for trace ID
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

tokio::task_local! {
    static CURRENT_TRACE_ID: String;
}

/// Trace ID of the request being handled on this task, if any
pub fn current_trace_id() -> Option<String> {
    CURRENT_TRACE_ID.try_with(|id| id.clone()).ok()
}

/// Middleware that assigns each request a trace ID.
///
/// The ID is stored in request extensions, scoped for error responses,
/// attached to the request span and echoed in the `X-Trace-Id` header.
pub async fn trace_id_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = Uuid::new_v4().to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %request.method(),
        uri = %request.uri().path(),
    );

    tracing::info!(parent: &span, "Request started");

    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let response = CURRENT_TRACE_ID
        .scope(
            trace_id.clone(),
            async move {
                let response = next.run(request).await;
                tracing::info!(status = %response.status(), "Request completed");
                response
            }
            .instrument(span),
        )
        .await;

    let (mut parts, body) = response.into_parts();
    parts.headers.insert(
        TRACE_ID_HEADER,
        HeaderValue::from_str(&trace_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );

    Response::from_parts(parts, body)
}

/// Extension type for storing trace ID in request extensions
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
