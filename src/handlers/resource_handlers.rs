//! Handlers for listings and single objects of every resource kind.
//!
//! The resource path is rebuilt from the request URI, so one set of handlers
//! serves buckets, collections, records, groups and accounts alike.

use crate::{
    errors::{AppError, Location},
    models::path::{NODE_ID, ResourcePath},
    routes::API_PREFIX,
    services::{
        auth_service::Caller,
        resource_service::{Payload, Reply, ResourceRequest, ResourceService},
    },
};
use axum::{
    Extension,
    extract::{Query, State},
    http::{HeaderMap, Method, Uri, header},
};
use bytes::Bytes;

/// Decode the URI path into a resource path; `node` appends the listing
/// marker.
fn resource_path(uri: &Uri, node: bool) -> Result<ResourcePath, AppError> {
    let raw = uri.path().strip_prefix(API_PREFIX).unwrap_or(uri.path());
    let mut decoded = String::with_capacity(raw.len() + 2);
    for segment in raw.trim_matches('/').split('/') {
        let segment =
            urlencoding::decode(segment).map_err(|_| AppError::invalid_path("Invalid object id"))?;
        if segment.contains('/') {
            return Err(AppError::invalid_path("Invalid object id"));
        }
        decoded.push('/');
        decoded.push_str(&segment);
    }
    if node {
        decoded.push('/');
        decoded.push_str(NODE_ID);
    }
    ResourcePath::parse(&decoded).ok_or_else(AppError::not_found)
}

/// Absolute URL of the request path as the client addressed it.
fn absolute_url(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}{}", uri.path())
}

fn build(
    caller: Caller,
    method: Method,
    headers: HeaderMap,
    uri: &Uri,
    node: bool,
) -> Result<ResourceRequest, AppError> {
    let path = resource_path(uri, node)?;
    let Query(query) = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map_err(|_| AppError::invalid_params(Location::Querystring, None, "Invalid query string"))?;
    let url = absolute_url(&headers, uri);
    Ok(ResourceRequest {
        caller,
        method,
        headers,
        path,
        query,
        url,
    })
}

/// `GET /v1/{...}/{plural}`
pub async fn list_objects(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, true)?;
    service.list(&req).await
}

/// `HEAD /v1/{...}/{plural}`
pub async fn count_objects(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, true)?;
    service.count(&req).await
}

/// `POST /v1/{...}/{plural}`
pub async fn create_object(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, true)?;
    let payload = Payload::parse(&body)?;
    service.create(&req, payload).await
}

/// `DELETE /v1/{...}/{plural}`
pub async fn delete_objects(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, true)?;
    service.delete_list(&req).await
}

/// `GET /v1/{...}/{plural}/{id}`
pub async fn get_object(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, false)?;
    service.get(&req).await
}

/// `PUT /v1/{...}/{plural}/{id}`
pub async fn put_object(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, false)?;
    let payload = Payload::parse(&body)?;
    service.update(&req, payload).await
}

/// `PATCH /v1/{...}/{plural}/{id}`
pub async fn patch_object(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, false)?;
    let payload = Payload::parse(&body)?;
    service.patch(&req, payload).await
}

/// `DELETE /v1/{...}/{plural}/{id}`
pub async fn delete_object(
    State(service): State<ResourceService>,
    Extension(caller): Extension<Caller>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Reply, AppError> {
    let req = build(caller, method, headers, &uri, false)?;
    service.delete(&req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuilds_resource_paths_from_uris() {
        let uri: Uri = "/v1/buckets/b/collections?_limit=2".parse().unwrap();
        assert_eq!(
            resource_path(&uri, true).unwrap().as_str(),
            "/buckets/b/collections/*"
        );
        let uri: Uri = "/v1/buckets/b/groups/%7Bweird%7D".parse().unwrap();
        assert_eq!(
            resource_path(&uri, false).unwrap().as_str(),
            "/buckets/b/groups/{weird}"
        );
        let uri: Uri = "/v1/buckets/a%2Fb".parse().unwrap();
        assert!(resource_path(&uri, false).is_err());
    }

    #[test]
    fn absolute_url_uses_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "api.example.com:8888".parse().unwrap());
        let uri: Uri = "/v1/buckets?_sort=id".parse().unwrap();
        assert_eq!(
            absolute_url(&headers, &uri),
            "http://api.example.com:8888/v1/buckets"
        );
    }
}
