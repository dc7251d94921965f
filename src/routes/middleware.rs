//! Router middleware: caller resolution and CORS / security headers.

use crate::{
    errors::AppError,
    services::{auth_service, resource_service::ResourceService},
};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; frame-ancestors 'none'; base-uri 'none';";

/// Resolve the caller from the request credentials and stash it in the
/// request extensions for the handlers.
pub async fn authenticate(
    State(service): State<ResourceService>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let caller = auth_service::authenticate(&*service.backend, req.headers()).await?;
    tracing::debug!(caller = %caller.id, "resolved caller");
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

/// Any origin may call the API; preflights are cached for `max_age` seconds.
pub fn cors_layer(max_age: u64) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any)
        .expose_headers(Any)
        .max_age(Duration::from_secs(max_age))
}

pub fn content_security_policy() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    )
}

pub fn no_sniff() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    )
}
