//! Conditional requests and cache validators.
//!
//! `If-Match` / `If-Unmodified-Since` guard writes, `If-None-Match` /
//! `If-Modified-Since` short-circuit reads with 304. `current` is the
//! version of the addressed resource or listing, `None` when it does not
//! exist yet.

use crate::{
    errors::AppError,
    models::{epoch::Epoch, object::Object},
};
use axum::http::{HeaderMap, HeaderValue, Method, header};

pub const CACHE_CONTROL_NO_CACHE: &str =
    "no-cache, no-store, no-transform, must-revalidate, private, max-age=0";

fn is_read(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// True when `raw` is `*` or lists `etag`.
fn etag_matches(raw: &str, current: Option<Epoch>) -> bool {
    raw.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return current.is_some();
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        current.is_some_and(|ts| candidate == ts.etag())
    })
}

pub fn check(
    method: &Method,
    headers: &HeaderMap,
    current: Option<Epoch>,
    existing: Option<&Object>,
) -> Result<(), AppError> {
    if let Some(raw) = header_str(headers, header::IF_MATCH) {
        if !etag_matches(raw, current) {
            return Err(AppError::modified_meanwhile(existing));
        }
    } else if let Some(raw) = header_str(headers, header::IF_UNMODIFIED_SINCE) {
        if let (Some(since), Some(ts)) = (Epoch::from_http_date(raw), current) {
            if ts.seconds() > since.seconds() {
                return Err(AppError::modified_meanwhile(existing));
            }
        }
    }

    if let Some(raw) = header_str(headers, header::IF_NONE_MATCH) {
        if etag_matches(raw, current) {
            return Err(match (is_read(method), current) {
                (true, Some(ts)) => AppError::not_modified(ts),
                _ => AppError::modified_meanwhile(existing),
            });
        }
    } else if is_read(method) {
        if let Some(raw) = header_str(headers, header::IF_MODIFIED_SINCE) {
            if let (Some(since), Some(ts)) = (Epoch::from_http_date(raw), current) {
                if ts.seconds() <= since.seconds() {
                    return Err(AppError::not_modified(ts));
                }
            }
        }
    }
    Ok(())
}

/// Set `ETag` and `Last-Modified`, plus `Cache-Control` on reads.
pub fn set_validators(headers: &mut HeaderMap, method: &Method, ts: Epoch) {
    if let Ok(value) = HeaderValue::from_str(&ts.etag()) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ts.http_date()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if is_read(method) {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_CACHE),
        );
    }
}
