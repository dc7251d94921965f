//! Caller identity: Basic credentials checked against stored accounts,
//! expanded into the full principal set used by permission checks.

use crate::{
    models::{
        path::{ResourcePath, is_valid_id},
        permissions::{AUTHENTICATED, EVERYONE},
    },
    storage::{Backend, StorageError, StorageResult},
};
use argon2::{
    Argon2,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const PASSWORD_FIELD: &str = "password";

/// The identity a request runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// `account:<id>` or [`EVERYONE`].
    pub id: String,
    /// Own id, system principals and group memberships.
    pub principals: Vec<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            id: EVERYONE.to_string(),
            principals: vec![EVERYONE.to_string()],
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == EVERYONE
    }

    /// Principal string for an account id.
    pub fn account_principal(account_id: &str) -> String {
        format!("account:{account_id}")
    }
}

/// Resolve the caller from an `Authorization: Basic` header. Missing,
/// malformed or wrong credentials resolve to the anonymous caller.
pub async fn authenticate(backend: &dyn Backend, headers: &HeaderMap) -> StorageResult<Caller> {
    let Some((user, password)) = basic_credentials(headers) else {
        return Ok(Caller::anonymous());
    };
    if !is_valid_id(&user) {
        return Ok(Caller::anonymous());
    }
    let Some(path) = ResourcePath::parse(&format!("/accounts/{user}")) else {
        return Ok(Caller::anonymous());
    };

    let account = match backend.get(&path).await {
        Ok(account) => account,
        Err(StorageError::NotFound(_)) => return Ok(Caller::anonymous()),
        Err(err) => return Err(err),
    };
    let stored = account
        .data
        .get(PASSWORD_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    // Argon2 is CPU bound; keep it off the async workers.
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .unwrap_or(false);
    if !verified {
        tracing::debug!(user = %user, "rejected credentials");
        return Ok(Caller::anonymous());
    }

    let id = Caller::account_principal(&user);
    let principals = resolve_principals(backend, &id).await?;
    Ok(Caller { id, principals })
}

/// Own id plus system principals plus groups, following group-in-group
/// membership one level deep.
pub async fn resolve_principals(backend: &dyn Backend, user_id: &str) -> StorageResult<Vec<String>> {
    let mut direct = vec![EVERYONE.to_string()];
    if user_id != EVERYONE {
        direct.push(user_id.to_string());
        direct.push(AUTHENTICATED.to_string());
    }

    let groups = backend.memberships(&direct).await?;
    let nested = backend
        .memberships(&groups.iter().cloned().collect::<Vec<_>>())
        .await?;

    let mut all: BTreeSet<String> = direct.into_iter().collect();
    all.extend(groups);
    all.extend(nested);
    Ok(all.into_iter().collect())
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Argon2id PHC string with a random salt.
pub fn hash_password(plain: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())?;
    let hashed = Argon2::default().hash_password(plain.as_bytes(), &salt)?;
    Ok(hashed.to_string())
}

pub fn verify_password(plain: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::object::Object, storage::memory::MemoryBackend};
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let a = hash_password("s3cret").unwrap();
        let b = hash_password("s3cret").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password("s3cret", &a));
        assert!(!verify_password("wrong", &a));
        assert!(!verify_password("s3cret", "plain"));
    }

    #[tokio::test]
    async fn resolves_account_callers() {
        let backend = MemoryBackend::new();
        let data = json!({"password": hash_password("pw").unwrap()});
        backend
            .create(
                &ResourcePath::parse("/accounts/*").unwrap(),
                Object::from_data("alice", data.as_object().cloned().unwrap()),
            )
            .await
            .unwrap();
        backend
            .add_membership("/buckets/b/groups/g", &["account:alice".to_string()])
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("alice:pw");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        let caller = authenticate(&backend, &headers).await.unwrap();
        assert_eq!(caller.id, "account:alice");
        assert!(caller.principals.contains(&AUTHENTICATED.to_string()));
        assert!(caller.principals.contains(&"/buckets/b/groups/g".to_string()));

        let encoded = STANDARD.encode("alice:nope");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert!(authenticate(&backend, &headers).await.unwrap().is_anonymous());
    }
}
