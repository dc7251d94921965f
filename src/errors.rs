use crate::{
    models::{epoch::Epoch, object::Object, path::ResourcePath},
    storage::StorageError,
};
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::fmt;

/// Stable numeric error codes exposed as `errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized = 104,
    InvalidParameters = 107,
    InvalidResource = 110,
    MissingResource = 111,
    ModifiedMeanwhile = 114,
    MethodNotAllowed = 115,
    Forbidden = 121,
    Backend = 999,
}

/// Where an invalid parameter was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Body,
    Path,
    Querystring,
    Header,
}

impl Location {
    fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Path => "path",
            Self::Querystring => "querystring",
            Self::Header => "header",
        }
    }
}

/// An error rendered as `{code, errno, error, message?, details?}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub errno: ErrorCode,
    pub message: Option<String>,
    pub details: Option<Value>,
    /// Extra response headers (validators on 304).
    pub headers: HeaderMap,
}

impl AppError {
    pub fn new(status: StatusCode, errno: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            errno,
            message: Some(msg.into()),
            details: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Shortcut for a 500 backend failure.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Backend,
            msg,
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized,
            "Please authenticate yourself to use this endpoint.",
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            ErrorCode::Forbidden,
            "This user cannot access this resource.",
        )
    }

    /// Unknown route.
    pub fn not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ErrorCode::MissingResource,
            "The resource you are looking for could not be found.",
        )
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::MethodNotAllowed,
            "Method not allowed on this endpoint.",
        )
    }

    /// The container addressed by a request does not exist.
    pub fn missing_resource(path: &ResourcePath) -> Self {
        Self::resource_error(path, ErrorCode::MissingResource)
    }

    /// The addressed object itself does not exist.
    pub fn invalid_resource(path: &ResourcePath) -> Self {
        Self::resource_error(path, ErrorCode::InvalidResource)
    }

    fn resource_error(path: &ResourcePath, errno: ErrorCode) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            errno,
            message: None,
            details: Some(json!({
                "id": path.object_id(),
                "resource_name": path.resource_name(),
            })),
            headers: HeaderMap::new(),
        }
    }

    /// A request parameter failed validation.
    pub fn invalid_params(location: Location, name: Option<&str>, description: &str) -> Self {
        let location = location.as_str();
        let message = match name {
            Some(name) => format!("{name} in {location}: {description}"),
            None => format!("{location}: {description}"),
        };
        let mut detail = Map::new();
        detail.insert("location".into(), Value::from(location));
        if let Some(name) = name {
            detail.insert("name".into(), Value::from(name));
        }
        detail.insert("description".into(), Value::from(description));

        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidParameters, message)
            .with_details(Value::Array(vec![Value::Object(detail)]))
    }

    pub fn invalid_body(name: &str, description: &str) -> Self {
        Self::invalid_params(Location::Body, Some(name), description)
    }

    pub fn invalid_path(description: &str) -> Self {
        Self::invalid_params(Location::Path, None, description)
    }

    pub fn invalid_query(name: &str, description: &str) -> Self {
        Self::invalid_params(Location::Querystring, Some(name), description)
    }

    /// A precondition header did not hold.
    pub fn modified_meanwhile(existing: Option<&Object>) -> Self {
        let err = Self::new(
            StatusCode::PRECONDITION_FAILED,
            ErrorCode::ModifiedMeanwhile,
            "Resource was modified meanwhile",
        );
        match existing {
            Some(obj) => err.with_details(json!({ "existing": obj })),
            None => err,
        }
    }

    /// Conditional read short-circuit: empty body, validators kept.
    pub fn not_modified(current: Epoch) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&current.etag()) {
            headers.insert(header::ETAG, value);
        }
        if let Ok(value) = HeaderValue::from_str(&current.http_date()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
        Self {
            status: StatusCode::NOT_MODIFIED,
            errno: ErrorCode::ModifiedMeanwhile,
            message: None,
            details: None,
            headers,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({}): {}", self.status, self.errno as u16, message),
            None => write!(f, "{} ({})", self.status, self.errno as u16),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status == StatusCode::NOT_MODIFIED {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = self.status;
            *response.headers_mut() = self.headers;
            return response;
        }

        let mut body = Map::new();
        body.insert("code".into(), Value::from(self.status.as_u16()));
        body.insert("errno".into(), Value::from(self.errno as u16));
        body.insert(
            "error".into(),
            Value::from(self.status.canonical_reason().unwrap_or("Unknown")),
        );
        if let Some(message) = self.message {
            body.insert("message".into(), Value::from(message));
        }
        if let Some(details) = self.details {
            body.insert("details".into(), details);
        }

        let mut response = (self.status, Json(Value::Object(body))).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => AppError::invalid_resource(&path),
            StorageError::Conflict { .. } => AppError::modified_meanwhile(None),
            other => {
                tracing::error!(error = %other, "storage failure");
                AppError::internal(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
