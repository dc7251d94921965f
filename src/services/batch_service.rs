//! Batch dispatcher.
//!
//! A batch is validated as a whole (size, recursion, every method and path)
//! before the first sub-request runs. Sub-requests then run one after the
//! other through the regular API router, so each sees the effects of the
//! previous ones and fails or succeeds on its own.

use crate::{
    errors::{AppError, Location},
    routes::API_PREFIX,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, header},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tower::ServiceExt;
use tracing::debug;

const ALLOWED_METHODS: [&str; 6] = ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"];

/// Parent headers that describe the outer transfer, not the sub-request.
static SKIPPED_HEADERS: [HeaderName; 7] = [
    header::ACCEPT_ENCODING,
    header::CONNECTION,
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubRequest {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl SubRequest {
    /// Fill unset fields from `defaults`; headers are overlaid key by key.
    fn with_defaults(mut self, defaults: &SubRequest) -> Self {
        if self.method.is_none() {
            self.method = defaults.method.clone();
        }
        if self.path.is_none() {
            self.path = defaults.path.clone();
        }
        if self.body.is_none() {
            self.body = defaults.body.clone();
        }
        if let Some(base) = &defaults.headers {
            let mut merged = base.clone();
            merged.extend(self.headers.take().unwrap_or_default());
            self.headers = Some(merged);
        }
        self
    }

    /// The sub-request's own headers as a typed map, or the first name that
    /// cannot be sent.
    fn header_map(&self) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers.iter().flatten() {
            let parsed = HeaderName::from_bytes(name.as_bytes())
                .ok()
                .zip(HeaderValue::from_str(value).ok());
            let Some((header_name, header_value)) = parsed else {
                return Err(name.clone());
            };
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    fn method(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .trim()
            .to_ascii_uppercase()
    }

    /// Path without the API prefix.
    fn route(&self) -> &str {
        let raw = self.path.as_deref().unwrap_or_default();
        match raw.strip_prefix(API_PREFIX) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => rest,
            _ => raw,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchPayload {
    #[serde(default)]
    pub defaults: Option<SubRequest>,
    #[serde(default)]
    pub requests: Option<Vec<SubRequest>>,
}

/// Parse and validate a batch body, applying defaults to every sub-request.
pub fn prepare(body: &[u8], max_requests: usize) -> Result<Vec<SubRequest>, AppError> {
    let payload: BatchPayload = serde_json::from_slice(body).map_err(|_| {
        AppError::invalid_params(Location::Body, None, "Invalid JSON")
    })?;
    let defaults = payload.defaults.unwrap_or_default();
    let Some(requests) = payload.requests else {
        return Err(AppError::invalid_body("requests", "Required"));
    };
    if requests.is_empty() {
        return Err(AppError::invalid_body("requests", "Required"));
    }
    if requests.len() > max_requests {
        return Err(AppError::invalid_body(
            "requests",
            &format!("Number of requests is limited to {max_requests}"),
        ));
    }

    let requests: Vec<SubRequest> = requests
        .into_iter()
        .map(|sub| sub.with_defaults(&defaults))
        .collect();

    if requests.iter().any(|sub| is_recursive(sub.route())) {
        return Err(AppError::invalid_body(
            "requests",
            "Recursive call on /batch endpoint is forbidden.",
        ));
    }

    for (idx, sub) in requests.iter().enumerate() {
        let name = format!("requests.{idx}");
        let method = sub.method();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(AppError::invalid_body(
                &name,
                &format!("invalid method \"{method}\""),
            ));
        }
        let path = sub.route();
        if !path.starts_with('/') || path.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AppError::invalid_body(
                &name,
                &format!("invalid path \"{}\"", sub.path.as_deref().unwrap_or_default()),
            ));
        }
        if let Err(header) = sub.header_map() {
            return Err(AppError::invalid_body(
                &name,
                &format!("invalid header \"{header}\""),
            ));
        }
    }
    Ok(requests)
}

fn is_recursive(route: &str) -> bool {
    route == "/batch" || route.starts_with("/batch/") || route.starts_with("/batch?")
}

/// Run validated sub-requests in order and collect their envelopes. A
/// sub-request that cannot be dispatched gets an error envelope of its own.
pub async fn execute(
    router: Router,
    parent_headers: &HeaderMap,
    requests: Vec<SubRequest>,
) -> Vec<Value> {
    let mut responses = Vec::with_capacity(requests.len());
    for sub in requests {
        let response = match build_request(parent_headers, &sub) {
            Ok(request) => {
                debug!(method = %request.method(), uri = %request.uri(), "batch sub-request");
                // Router's error type is Infallible.
                let Ok(response) = router.clone().oneshot(request).await;
                response
            }
            Err(err) => err.into_response(),
        };
        let status = response.status().as_u16();
        let headers = canonical_headers(response.headers());
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();

        let mut envelope = Map::new();
        envelope.insert("status".into(), json!(status));
        envelope.insert("path".into(), json!(format!("{API_PREFIX}{}", sub.route())));
        if !bytes.is_empty() {
            let body = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            envelope.insert("body".into(), body);
        }
        envelope.insert("headers".into(), json!(headers));
        responses.push(Value::Object(envelope));
    }
    responses
}

fn build_request(parent: &HeaderMap, sub: &SubRequest) -> Result<Request<Body>, AppError> {
    let method = Method::from_bytes(sub.method().as_bytes())
        .map_err(|_| AppError::invalid_body("requests", "invalid method"))?;
    let uri = format!("{API_PREFIX}{}", sub.route());

    let mut headers = HeaderMap::new();
    for (name, value) in parent {
        if !SKIPPED_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    let own = sub
        .header_map()
        .map_err(|name| AppError::invalid_body("requests", &format!("invalid header \"{name}\"")))?;
    for (name, value) in own {
        if let Some(name) = name {
            headers.insert(name, value);
        }
    }

    let body = match &sub.body {
        Some(value) => {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            Body::from(serde_json::to_vec(value).map_err(|err| AppError::internal(err.to_string()))?)
        }
        None => Body::empty(),
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .map_err(|_| AppError::invalid_body("requests", "invalid path"))?;
    *request.headers_mut() = headers;
    Ok(request)
}

/// `content-type` -> `Content-Type`, `etag` -> `Etag`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn canonical_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.insert(canonical_name(name.as_str()), value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let requests = prepare(
            &body(json!({
                "defaults": {"method": "PUT", "headers": {"If-None-Match": "*"}},
                "requests": [{"path": "/buckets/a"}, {"path": "/v1/buckets/b", "method": "get"}],
            })),
            25,
        )
        .unwrap();
        assert_eq!(requests[0].method(), "PUT");
        assert_eq!(requests[0].headers.as_ref().unwrap()["If-None-Match"], "*");
        assert_eq!(requests[1].method(), "GET");
        assert_eq!(requests[1].route(), "/buckets/b");
    }

    #[test]
    fn rejects_recursion_and_oversized_batches() {
        let err = prepare(&body(json!({"requests": [{"path": "/v1/batch"}]})), 25).unwrap_err();
        assert_eq!(
            err.message.as_deref(),
            Some("requests in body: Recursive call on /batch endpoint is forbidden.")
        );

        let many: Vec<Value> = (0..3).map(|_| json!({"path": "/buckets"})).collect();
        let err = prepare(&body(json!({ "requests": many })), 2).unwrap_err();
        assert_eq!(
            err.message.as_deref(),
            Some("requests in body: Number of requests is limited to 2")
        );
    }

    #[test]
    fn validates_each_method_and_path() {
        let err = prepare(
            &body(json!({"requests": [{"path": "/buckets"}, {"method": "BAD", "path": "/buckets"}]})),
            25,
        )
        .unwrap_err();
        assert_eq!(err.message.as_deref(), Some("requests.1 in body: invalid method \"BAD\""));

        let err = prepare(&body(json!({"requests": [{"path": "buckets x"}]})), 25).unwrap_err();
        assert_eq!(
            err.message.as_deref(),
            Some("requests.0 in body: invalid path \"buckets x\"")
        );

        let err = prepare(
            &body(json!({"requests": [
                {"method": "PUT", "path": "/buckets/a"},
                {"path": "/buckets/a", "headers": {"bad header": "x"}},
            ]})),
            25,
        )
        .unwrap_err();
        assert_eq!(
            err.message.as_deref(),
            Some("requests.1 in body: invalid header \"bad header\"")
        );
    }

    #[test]
    fn header_names_are_canonicalized() {
        assert_eq!(canonical_name("content-type"), "Content-Type");
        assert_eq!(canonical_name("etag"), "Etag");
        assert_eq!(canonical_name("next-page"), "Next-Page");
    }
}
