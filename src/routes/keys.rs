//! Key management for the calling user. Mounted behind the `admin` guard.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;
use chrono::Utc;
use serde_json::{json, Value};

use crate::api_keys::{generate_api_key, ApiCredential, KeySummary};
use crate::gate::response::api_success;
use crate::gate::{ApiError, ApiErrorKind, AuthenticatedKey, Permission};
use crate::validation::validate_expires_at;
use crate::AppState;

/// `GET /api/v1/keys`: the caller's keys, newest first, without hashes.
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedKey>,
) -> Result<Response, ApiError> {
    let keys: Vec<KeySummary> = state
        .credentials
        .list_for_user(&caller.user_id)
        .await?
        .iter()
        .map(ApiCredential::summary)
        .collect();
    Ok(api_success(keys))
}

/// Validated `POST /api/v1/keys` body.
#[derive(Debug, PartialEq)]
pub struct NewKeyRequest {
    pub name: String,
    pub permissions: Vec<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

impl NewKeyRequest {
    pub fn from_json(body: &Value, now: chrono::DateTime<Utc>) -> Result<Self, ApiError> {
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::bad_request("Field 'name' is required and must be non-empty"))?;

        let permissions = match body.get("permissions") {
            None | Some(Value::Null) => vec![Permission::Read.as_str().to_string()],
            Some(Value::Array(items)) => {
                let mut granted = Vec::with_capacity(items.len());
                for item in items {
                    let raw = item.as_str().ok_or_else(|| {
                        ApiError::bad_request("Field 'permissions' must be an array of strings")
                    })?;
                    let permission: Permission = raw.parse().map_err(|_| {
                        ApiError::bad_request(format!(
                            "Field 'permissions' contains unknown permission '{}'",
                            raw
                        ))
                    })?;
                    let permission = permission.as_str().to_string();
                    if !granted.contains(&permission) {
                        granted.push(permission);
                    }
                }
                granted
            }
            Some(_) => {
                return Err(ApiError::bad_request(
                    "Field 'permissions' must be an array of strings",
                ))
            }
        };

        let expires_at = validate_expires_at(body.get("expires_at"), now).map_err(ApiError::bad_request)?;

        Ok(Self {
            name: name.to_string(),
            permissions,
            expires_at,
        })
    }
}

/// `POST /api/v1/keys`: issue a key. The raw value is returned only here.
pub async fn create_key(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedKey>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: Value = super::parse_body(&body)?;
    let request = NewKeyRequest::from_json(&body, Utc::now())?;

    let key = generate_api_key();
    let credential = ApiCredential::new(
        &caller.user_id,
        &request.name,
        key.hash,
        request.permissions,
        request.expires_at,
    );
    state.credentials.insert(credential.clone()).await?;

    log::info!(
        "AUDIT key={} action=api_key.created new_key={} permissions={:?}",
        caller.key_id, credential.id, credential.permissions
    );

    Ok(api_success(json!({
        "id": credential.id,
        "name": credential.name,
        "key": key.raw,
        "permissions": credential.permissions,
        "created_at": credential.created_at,
        "expires_at": credential.expires_at,
    })))
}

/// `DELETE /api/v1/keys` with `{key_id}` in the body or `?key_id=`.
pub async fn delete_key(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedKey>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let from_body = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("key_id").and_then(Value::as_str).map(str::to_string));
    let key_id = from_body
        .or_else(|| query.get("key_id").cloned())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Field 'key_id' is required"))?;

    if key_id == caller.key_id {
        return Err(ApiError::bad_request("Cannot delete the API key currently in use"));
    }

    if !state.credentials.delete_for_user(&key_id, &caller.user_id).await? {
        return Err(ApiError::new(ApiErrorKind::NotFound));
    }

    log::info!("AUDIT key={} action=api_key.deleted target={}", caller.key_id, key_id);
    Ok(api_success(json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn detail(result: Result<NewKeyRequest, ApiError>) -> String {
        result.unwrap_err().detail.unwrap_or_default()
    }

    #[test]
    fn defaults_to_read_only() {
        let req = NewKeyRequest::from_json(&json!({"name": "  ci bot  "}), now()).unwrap();
        assert_eq!(
            req,
            NewKeyRequest {
                name: "ci bot".into(),
                permissions: vec!["read".into()],
                expires_at: None,
            }
        );
    }

    #[test]
    fn name_is_required() {
        let msg = "Field 'name' is required and must be non-empty";
        assert_eq!(detail(NewKeyRequest::from_json(&json!({}), now())), msg);
        assert_eq!(detail(NewKeyRequest::from_json(&json!({"name": "   "}), now())), msg);
        assert_eq!(detail(NewKeyRequest::from_json(&json!({"name": 3}), now())), msg);
    }

    #[test]
    fn permissions_are_checked_and_deduplicated() {
        let req = NewKeyRequest::from_json(
            &json!({"name": "k", "permissions": ["write", "read", "write"]}),
            now(),
        )
        .unwrap();
        assert_eq!(req.permissions, vec!["write".to_string(), "read".to_string()]);

        assert_eq!(
            detail(NewKeyRequest::from_json(&json!({"name": "k", "permissions": ["root"]}), now())),
            "Field 'permissions' contains unknown permission 'root'"
        );
        assert_eq!(
            detail(NewKeyRequest::from_json(&json!({"name": "k", "permissions": "admin"}), now())),
            "Field 'permissions' must be an array of strings"
        );
        assert_eq!(
            detail(NewKeyRequest::from_json(&json!({"name": "k", "permissions": [1]}), now())),
            "Field 'permissions' must be an array of strings"
        );
    }

    #[test]
    fn expiry_is_validated() {
        let future = (now() + Duration::days(7)).to_rfc3339();
        let req = NewKeyRequest::from_json(&json!({"name": "k", "expires_at": future}), now()).unwrap();
        assert_eq!(req.expires_at, Some(now() + Duration::days(7)));

        assert_eq!(
            detail(NewKeyRequest::from_json(&json!({"name": "k", "expires_at": "2001-01-01"}), now())),
            "Field 'expires_at' must be a future date"
        );
    }
}
