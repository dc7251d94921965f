//! src/services/resource_service.rs
//!
//! ResourceService is the engine behind every object endpoint. It walks the
//! same pipeline for each kind of object: validate the id, check
//! permissions over the path and its ancestors, make sure the parent
//! container exists, evaluate preconditions, then read or write through the
//! [`Backend`]. Kind specific rules (group members, account passwords)
//! hook in at the validation and post-write steps.

use crate::{
    config::ApiSettings,
    errors::{AppError, Location},
    listing::{self, ListQuery},
    models::{
        epoch::Epoch,
        group::normalize_members,
        object::Object,
        path::{ResourceKind, ResourcePath, is_valid_id},
        permissions::{Ace, Permissions, READ, WRITE, traversal_aces},
    },
    services::{
        auth_service::{Caller, PASSWORD_FIELD, hash_password},
        authz::{Authorizer, denied},
        conditional,
    },
    storage::{Backend, StorageError},
};
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const NEXT_PAGE: HeaderName = HeaderName::from_static("next-page");
const TOTAL_OBJECTS: HeaderName = HeaderName::from_static("total-objects");
const TOTAL_RECORDS: HeaderName = HeaderName::from_static("total-records");

/// One request against an object or listing path.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub caller: Caller,
    pub method: Method,
    pub headers: HeaderMap,
    /// Object path, or listing path ending in `*`.
    pub path: ResourcePath,
    /// Decoded query pairs in order.
    pub query: Vec<(String, String)>,
    /// Absolute URL of the request path without its query, used for `Next-Page`.
    pub url: String,
}

/// `{data, permissions}` request body.
#[derive(Debug, Default)]
pub struct Payload {
    pub data: Option<Map<String, Value>>,
    pub permissions: Option<Permissions>,
}

impl Payload {
    /// Parse a request body; an empty body is an empty payload.
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|_| AppError::invalid_params(Location::Body, None, "Invalid JSON"))?;
        let Value::Object(mut root) = value else {
            return Err(AppError::invalid_params(Location::Body, None, "Invalid JSON"));
        };

        let data = match root.remove("data") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => return Err(AppError::invalid_body("data", "Invalid type")),
        };
        let permissions = match root.remove("permissions") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|_| AppError::invalid_body("permissions", "Invalid type"))?,
            ),
        };
        Ok(Self { data, permissions })
    }
}

/// A successful response: status, headers and optional JSON body.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl Reply {
    fn new(status: StatusCode, headers: HeaderMap, body: Value) -> Self {
        Self {
            status,
            headers,
            body: Some(body),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = self.status;
                response
            }
        };
        response.headers_mut().extend(self.headers);
        response
    }
}

#[derive(Clone)]
pub struct ResourceService {
    /// Objects, ACLs and memberships.
    pub backend: Arc<dyn Backend>,

    /// Permission resolver with the configured static grants.
    pub authz: Arc<Authorizer>,

    /// Public settings (limits, project metadata).
    pub settings: Arc<ApiSettings>,
}

impl ResourceService {
    pub fn new(backend: Arc<dyn Backend>, settings: ApiSettings) -> Self {
        let authz = Authorizer::new(settings.static_grants());
        Self {
            backend,
            authz: Arc::new(authz),
            settings: Arc::new(settings),
        }
    }

    fn store(&self) -> &dyn Backend {
        &*self.backend
    }

    // ---------------------------------------------------------------------
    // Listings
    // ---------------------------------------------------------------------

    /// `GET` on a listing path.
    pub async fn list(&self, req: &ResourceRequest) -> Result<Reply, AppError> {
        let (query, objects, mod_time) = self.prepare_listing(req, &[READ, WRITE]).await?;
        let page = listing::paginate(objects, &query);
        if page.objects.is_empty() && req.caller.is_anonymous() {
            return Err(AppError::unauthorized());
        }

        let mut headers = HeaderMap::new();
        conditional::set_validators(&mut headers, &req.method, mod_time);
        self.set_next_page(&mut headers, req, &query, page.next_token.as_deref());
        Ok(Reply::new(StatusCode::OK, headers, json!({ "data": page.objects })))
    }

    /// `HEAD` on a listing path: totals only.
    pub async fn count(&self, req: &ResourceRequest) -> Result<Reply, AppError> {
        let (query, objects, mod_time) = self.prepare_listing(req, &[READ, WRITE]).await?;
        let total = listing::count(&objects, &query).to_string();

        let mut headers = HeaderMap::new();
        conditional::set_validators(&mut headers, &req.method, mod_time);
        if let Ok(value) = HeaderValue::from_str(&total) {
            headers.insert(TOTAL_OBJECTS, value.clone());
            headers.insert(TOTAL_RECORDS, value);
        }
        Ok(Reply {
            status: StatusCode::OK,
            headers,
            body: None,
        })
    }

    /// `DELETE` on a listing path: delete every matching object the caller
    /// may write, one page at a time.
    pub async fn delete_list(&self, req: &ResourceRequest) -> Result<Reply, AppError> {
        let (query, objects, _) = self.prepare_listing(req, &[WRITE]).await?;
        let page = listing::paginate(objects, &query);

        let mut deleted = Vec::with_capacity(page.objects.len());
        for obj in page.objects {
            let path = req.path.with_object_id(&obj.id);
            match self.store().delete(&path, obj.last_modified).await {
                Ok(tomb) => deleted.push(tomb),
                Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        info!(path = %req.path, count = deleted.len(), "bulk delete");

        let mut headers = HeaderMap::new();
        let mod_time = self.store().mod_time(&req.path).await?;
        conditional::set_validators(&mut headers, &req.method, mod_time);
        self.set_next_page(&mut headers, req, &query, page.next_token.as_deref());
        Ok(Reply::new(StatusCode::OK, headers, json!({ "data": deleted })))
    }

    /// Shared listing steps: visibility, parent existence, preconditions,
    /// query parsing, candidate fetch.
    async fn prepare_listing(
        &self,
        req: &ResourceRequest,
        perms: &[&str],
    ) -> Result<(ListQuery, Vec<Object>, Epoch), AppError> {
        let node = &req.path;
        let parent = node.parent();
        let inherited = self
            .authz
            .inherits(self.store(), &req.caller, &parent, perms)
            .await?;
        let visible = if inherited {
            None
        } else {
            let ids = self
                .authz
                .accessible_ids(self.store(), &req.caller, node, perms)
                .await?;
            if ids.is_empty() && !parent.is_root() {
                return Err(denied(&req.caller));
            }
            Some(ids)
        };
        self.check_parent(node).await?;
        let mod_time = self.store().mod_time(node).await?;
        conditional::check(&req.method, &req.headers, Some(mod_time), None)?;

        let query = ListQuery::parse(&req.query, self.settings.max_limit)
            .map_err(|err| AppError::invalid_query(&err.name, &err.description))?;
        let mut objects = self.store().list(node, query.include_deleted).await?;
        if let Some(ids) = visible {
            objects.retain(|obj| ids.contains(&obj.id));
        }
        Ok((query, objects, mod_time))
    }

    fn set_next_page(
        &self,
        headers: &mut HeaderMap,
        req: &ResourceRequest,
        query: &ListQuery,
        token: Option<&str>,
    ) {
        let Some(token) = token else { return };
        let url = listing::next_page_url(&req.url, &req.query, query.limit, token);
        if let Ok(value) = HeaderValue::from_str(&url) {
            headers.insert(NEXT_PAGE, value);
        }
    }

    // ---------------------------------------------------------------------
    // Single objects
    // ---------------------------------------------------------------------

    /// `GET` on an object path.
    pub async fn get(&self, req: &ResourceRequest) -> Result<Reply, AppError> {
        self.read(req, &req.path, StatusCode::OK).await
    }

    async fn read(
        &self,
        req: &ResourceRequest,
        path: &ResourcePath,
        status: StatusCode,
    ) -> Result<Reply, AppError> {
        validate_object_id(path)?;
        self.authz
            .check(self.store(), &req.caller, path, &[READ, WRITE])
            .await?;
        self.check_parent(path).await?;
        let obj = self.store().get(path).await?;
        conditional::check(&req.method, &req.headers, Some(obj.last_modified), Some(&obj))?;
        self.render(req, path, obj, status).await
    }

    /// `POST` on a listing path.
    pub async fn create(&self, req: &ResourceRequest, payload: Payload) -> Result<Reply, AppError> {
        let mut data = payload.data.unwrap_or_default();
        let explicit = match data.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if is_valid_id(&id) => Some(id),
            Some(_) => return Err(AppError::invalid_body("data.id", "Invalid object id")),
        };
        if explicit.is_none() && req.path.kind() == Some(ResourceKind::Account) {
            return Err(AppError::invalid_body("data.id", "Required"));
        }
        self.create_or_get(req, &req.path, explicit, data, payload.permissions)
            .await
    }

    /// Create under `node`, or return the existing object when an explicit
    /// id is already taken.
    async fn create_or_get(
        &self,
        req: &ResourceRequest,
        node: &ResourcePath,
        explicit: Option<String>,
        mut data: Map<String, Value>,
        permissions: Option<Permissions>,
    ) -> Result<Reply, AppError> {
        let kind = node.kind().ok_or_else(AppError::not_found)?;
        let parent = node.parent();
        let mut aces = vec![Ace::new(format!("{}:create", kind.name()), parent.clone())];
        aces.extend(traversal_aces(&parent, &[WRITE]));
        self.authz.require(self.store(), &req.caller, &aces).await?;
        self.check_parent(node).await?;

        let id = explicit
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let path = node.with_object_id(&id);
        if explicit.is_some() && self.store().exists(&path).await? {
            return self.read(req, &path, StatusCode::OK).await;
        }

        let permissions = validate_permissions(kind, permissions)?;
        prepare_full(kind, &req.caller, &id, &mut data)?;

        let created = match self.store().create(node, Object::from_data(&id, data)).await {
            Ok(obj) => obj,
            Err(StorageError::AlreadyExists(_)) => {
                return self.read(req, &path, StatusCode::OK).await;
            }
            Err(err) => return Err(err.into()),
        };

        let mut acl = Permissions::new();
        if let Some(permissions) = permissions {
            acl.merge(permissions);
        }
        grant_owner(kind, &req.caller, &id, &mut acl);
        acl.normalize();
        self.store().set_permissions(&path, &acl).await?;
        self.after_write(kind, &path, &created).await?;

        info!(path = %path, version = %created.last_modified, "created");
        self.render(req, &path, created, StatusCode::CREATED).await
    }

    /// `PUT` on an object path: replace, or create when absent.
    pub async fn update(&self, req: &ResourceRequest, payload: Payload) -> Result<Reply, AppError> {
        let path = &req.path;
        validate_object_id(path)?;
        let mut data = payload.data.unwrap_or_default();
        check_body_id(path, &data)?;
        data.remove("id");

        // Either replacing (write) or creating (`{kind}:create` on the parent).
        let kind = path.kind().ok_or_else(AppError::not_found)?;
        let mut aces = traversal_aces(path, &[WRITE]);
        aces.push(Ace::new(format!("{}:create", kind.name()), path.parent()));
        self.authz.require(self.store(), &req.caller, &aces).await?;
        self.check_parent(path).await?;

        let existing = match self.store().get(path).await {
            Ok(obj) => obj,
            Err(StorageError::NotFound(_)) => {
                conditional::check(&req.method, &req.headers, None, None)?;
                let id = path.object_id().to_string();
                return self
                    .create_or_get(req, &path.node(), Some(id), data, payload.permissions)
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        self.authz
            .check(self.store(), &req.caller, path, &[WRITE])
            .await?;
        conditional::check(
            &req.method,
            &req.headers,
            Some(existing.last_modified),
            Some(&existing),
        )?;

        let permissions = validate_permissions(kind, payload.permissions)?;
        prepare_full(kind, &req.caller, path.object_id(), &mut data)?;
        let updated = self
            .store()
            .update(
                path,
                Object::from_data(path.object_id(), data),
                existing.last_modified,
            )
            .await?;
        self.merge_permissions(kind, req, path, permissions).await?;
        self.after_write(kind, path, &updated).await?;

        info!(path = %path, version = %updated.last_modified, "replaced");
        self.render(req, path, updated, StatusCode::OK).await
    }

    /// `PATCH` on an object path: merge attributes and permissions.
    pub async fn patch(&self, req: &ResourceRequest, payload: Payload) -> Result<Reply, AppError> {
        let path = &req.path;
        validate_object_id(path)?;
        if payload.data.is_none() && payload.permissions.is_none() {
            return Err(AppError::invalid_params(
                Location::Body,
                None,
                "Provide at least one of data or permissions",
            ));
        }
        if let Some(data) = &payload.data {
            check_body_id(path, data)?;
        }

        let kind = path.kind().ok_or_else(AppError::not_found)?;
        self.authz
            .check(self.store(), &req.caller, path, &[WRITE])
            .await?;
        self.check_parent(path).await?;
        let existing = self.store().get(path).await?;
        conditional::check(
            &req.method,
            &req.headers,
            Some(existing.last_modified),
            Some(&existing),
        )?;

        let permissions = validate_permissions(kind, payload.permissions)?;
        let mut obj = existing.clone();
        if let Some(mut changes) = payload.data {
            prepare_patch(kind, &req.caller, path.object_id(), &mut changes)?;
            obj.apply_patch(changes);
        }
        if kind == ResourceKind::Group && normalize_members(&mut obj.data).is_none() {
            return Err(AppError::invalid_body("data.members", "Invalid type"));
        }

        let updated = self
            .store()
            .update(path, obj, existing.last_modified)
            .await?;
        self.merge_permissions(kind, req, path, permissions).await?;
        self.after_write(kind, path, &updated).await?;

        info!(path = %path, version = %updated.last_modified, "patched");
        self.render(req, path, updated, StatusCode::OK).await
    }

    /// `DELETE` on an object path. Children, ACLs and memberships beneath
    /// it go too.
    pub async fn delete(&self, req: &ResourceRequest) -> Result<Reply, AppError> {
        let path = &req.path;
        validate_object_id(path)?;
        self.authz
            .check(self.store(), &req.caller, path, &[WRITE])
            .await?;
        self.check_parent(path).await?;
        let existing = self.store().get(path).await?;
        conditional::check(
            &req.method,
            &req.headers,
            Some(existing.last_modified),
            Some(&existing),
        )?;

        let tomb = self.store().delete(path, existing.last_modified).await?;
        info!(path = %path, version = %tomb.last_modified, "deleted");

        let mut headers = HeaderMap::new();
        conditional::set_validators(&mut headers, &req.method, tomb.last_modified);
        Ok(Reply::new(StatusCode::OK, headers, json!({ "data": tomb })))
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Every container above `path` must exist.
    async fn check_parent(&self, path: &ResourcePath) -> Result<(), AppError> {
        let parent = path.parent();
        if parent.is_root() {
            return Ok(());
        }
        for ancestor in parent.traverse().into_iter().rev() {
            if !self.store().exists(&ancestor).await? {
                return Err(AppError::missing_resource(&ancestor));
            }
        }
        Ok(())
    }

    async fn merge_permissions(
        &self,
        kind: ResourceKind,
        req: &ResourceRequest,
        path: &ResourcePath,
        permissions: Option<Permissions>,
    ) -> Result<(), AppError> {
        let Some(permissions) = permissions else {
            return Ok(());
        };
        let mut acl = self.store().permissions(path).await?;
        acl.merge(permissions);
        grant_owner(kind, &req.caller, path.object_id(), &mut acl);
        acl.normalize();
        self.store().set_permissions(path, &acl).await?;
        Ok(())
    }

    /// Refresh group memberships after a group write.
    async fn after_write(
        &self,
        kind: ResourceKind,
        path: &ResourcePath,
        obj: &Object,
    ) -> Result<(), AppError> {
        if kind != ResourceKind::Group {
            return Ok(());
        }
        let members: Vec<String> = obj
            .data
            .get("members")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        self.store().remove_membership(path.as_str()).await?;
        self.store().add_membership(path.as_str(), &members).await?;
        Ok(())
    }

    async fn render(
        &self,
        req: &ResourceRequest,
        path: &ResourcePath,
        obj: Object,
        status: StatusCode,
    ) -> Result<Reply, AppError> {
        let permissions = self.store().permissions(path).await?;
        let mut headers = HeaderMap::new();
        conditional::set_validators(&mut headers, &req.method, obj.last_modified);
        let mut body = json!({ "data": obj });
        if !permissions.is_empty() {
            body["permissions"] = serde_json::to_value(&permissions)
                .map_err(|err| AppError::internal(err.to_string()))?;
        }
        Ok(Reply::new(status, headers, body))
    }
}

fn validate_object_id(path: &ResourcePath) -> Result<(), AppError> {
    if is_valid_id(path.object_id()) {
        Ok(())
    } else {
        Err(AppError::invalid_path("Invalid object id"))
    }
}

fn check_body_id(path: &ResourcePath, data: &Map<String, Value>) -> Result<(), AppError> {
    match data.get("id") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(id)) if id == path.object_id() => Ok(()),
        Some(_) => Err(AppError::invalid_body(
            "data.id",
            "Does not match requested object",
        )),
    }
}

fn validate_permissions(
    kind: ResourceKind,
    permissions: Option<Permissions>,
) -> Result<Option<Permissions>, AppError> {
    let Some(permissions) = permissions else {
        return Ok(None);
    };
    let allowed = kind.permission_kinds();
    if let Some(bad) = permissions.kinds().find(|k| !allowed.contains(k)) {
        return Err(AppError::invalid_body(
            "permissions",
            &format!("Invalid permission type \"{bad}\""),
        ));
    }
    Ok(Some(permissions))
}

/// The acting account keeps `write`; accounts also own themselves.
fn grant_owner(kind: ResourceKind, caller: &Caller, id: &str, acl: &mut Permissions) {
    if !caller.is_anonymous() {
        acl.grant(WRITE, &caller.id);
    }
    if kind == ResourceKind::Account {
        acl.grant(WRITE, &Caller::account_principal(id));
    }
}

/// Validate and transform the attributes of a create or full replace.
fn prepare_full(
    kind: ResourceKind,
    caller: &Caller,
    id: &str,
    data: &mut Map<String, Value>,
) -> Result<(), AppError> {
    match kind {
        ResourceKind::Group => {
            normalize_members(data)
                .ok_or_else(|| AppError::invalid_body("data.members", "Invalid type"))?;
        }
        ResourceKind::Account => {
            check_account_owner(caller, id)?;
            let password = match data.get(PASSWORD_FIELD) {
                Some(Value::String(p)) if !p.is_empty() => hash_password(p)
                    .map_err(|err| AppError::internal(err.to_string()))?,
                _ => return Err(AppError::invalid_body("data.password", "Required")),
            };
            data.insert(PASSWORD_FIELD.into(), Value::String(password));
        }
        _ => {}
    }
    Ok(())
}

fn prepare_patch(
    kind: ResourceKind,
    caller: &Caller,
    id: &str,
    changes: &mut Map<String, Value>,
) -> Result<(), AppError> {
    if kind != ResourceKind::Account {
        return Ok(());
    }
    check_account_owner(caller, id)?;
    match changes.get(PASSWORD_FIELD) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(p)) if !p.is_empty() => {
            let hashed = hash_password(p).map_err(|err| AppError::internal(err.to_string()))?;
            changes.insert(PASSWORD_FIELD.into(), Value::String(hashed));
            Ok(())
        }
        Some(_) => Err(AppError::invalid_body("data.password", "Invalid type")),
    }
}

/// Authenticated callers may only manage their own account.
fn check_account_owner(caller: &Caller, id: &str) -> Result<(), AppError> {
    if caller.is_anonymous() || caller.id == Caller::account_principal(id) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_parsing() {
        let p = Payload::parse(b"").unwrap();
        assert!(p.data.is_none() && p.permissions.is_none());

        let p = Payload::parse(br#"{"data": {"a": 1}, "permissions": {"read": ["x"]}}"#).unwrap();
        assert_eq!(p.data.unwrap()["a"], json!(1));
        assert!(p.permissions.unwrap().get("read").unwrap().contains("x"));

        let err = Payload::parse(b"{not json").unwrap_err();
        assert_eq!(err.message.as_deref(), Some("body: Invalid JSON"));
        assert!(Payload::parse(br#"{"data": [1]}"#).is_err());
        assert!(Payload::parse(br#"{"permissions": {"read": "x"}}"#).is_err());
    }

    #[test]
    fn body_id_must_match_path() {
        let path = ResourcePath::parse("/buckets/b").unwrap();
        let same = json!({"id": "b"}).as_object().cloned().unwrap();
        let other = json!({"id": "c"}).as_object().cloned().unwrap();
        assert!(check_body_id(&path, &same).is_ok());
        let err = check_body_id(&path, &other).unwrap_err();
        assert_eq!(
            err.message.as_deref(),
            Some("data.id in body: Does not match requested object")
        );
    }

    #[test]
    fn permission_kinds_are_checked_per_resource() {
        let perms: Permissions =
            serde_json::from_value(json!({"record:create": ["x"]})).unwrap();
        assert!(validate_permissions(ResourceKind::Collection, Some(perms.clone())).is_ok());
        assert!(validate_permissions(ResourceKind::Bucket, Some(perms)).is_err());
    }

    #[test]
    fn accounts_need_passwords_and_ownership() {
        let anon = Caller::anonymous();
        let mut data = Map::new();
        let err = prepare_full(ResourceKind::Account, &anon, "alice", &mut data).unwrap_err();
        assert_eq!(err.message.as_deref(), Some("data.password in body: Required"));

        data.insert("password".into(), json!("pw"));
        prepare_full(ResourceKind::Account, &anon, "alice", &mut data).unwrap();
        assert_ne!(data["password"], json!("pw"));

        let bob = Caller {
            id: "account:bob".into(),
            principals: vec![],
        };
        let mut data = json!({"password": "pw"}).as_object().cloned().unwrap();
        let err = prepare_full(ResourceKind::Account, &bob, "alice", &mut data).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}
