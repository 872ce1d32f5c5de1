use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use super::permissions::{has_all_permissions, Permission};
use super::rate_limit::client_address;
use super::response::{with_rate_limit_headers, with_security_headers, ApiError, ApiErrorKind};
use super::ApiGate;

/// Middleware state for one group of routes: the shared gate plus the
/// capabilities those routes require.
#[derive(Clone)]
pub struct RouteGuard {
    gate: Arc<ApiGate>,
    required: Arc<[String]>,
}

impl RouteGuard {
    pub fn new(gate: Arc<ApiGate>, required: &[Permission]) -> Self {
        Self {
            gate,
            required: required.iter().map(|p| p.as_str().to_string()).collect(),
        }
    }
}

/// Axum middleware that fronts every gated API route.
///
/// On success the handler finds [`super::AuthenticatedKey`] and the per-key
/// [`super::RateLimitStatus`] in request extensions. Every response leaving
/// this middleware carries the rate-limit headers of the last tier evaluated
/// and the security headers, including extractor rejections from the handler.
pub async fn api_gate_middleware(
    State(guard): State<RouteGuard>,
    req: Request,
    next: Next,
) -> Response {
    with_security_headers(gate_request(&guard, req, next).await)
}

async fn gate_request(guard: &RouteGuard, mut req: Request, next: Next) -> Response {
    let gate = &guard.gate;
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let address = client_address(req.headers());
    let pre_auth = gate.pre_auth.check(&format!("ip:{}", address));
    if !pre_auth.allowed {
        log::warn!("Rate limited (pre-auth) ip={} method={} path={}", address, method, path);
        return with_rate_limit_headers(
            ApiError::new(ApiErrorKind::RateLimited).into_response(),
            &pre_auth,
        );
    }

    let Some(identity) = gate.authenticator.authenticate(req.headers()).await else {
        log::info!("AUDIT DENIED ip={} method={} path={} reason=unauthenticated", address, method, path);
        return with_rate_limit_headers(
            ApiError::new(ApiErrorKind::Unauthorized).into_response(),
            &pre_auth,
        );
    };

    if !has_all_permissions(&guard.required[..], &identity.permissions) {
        log::warn!(
            "AUDIT DENIED key={} method={} path={} reason=missing_permission required={:?}",
            identity.key_id, method, path, guard.required
        );
        return with_rate_limit_headers(
            ApiError::new(ApiErrorKind::Forbidden).into_response(),
            &pre_auth,
        );
    }

    let quota = gate.per_key.check(&format!("key:{}", identity.key_id));
    if !quota.allowed {
        log::warn!("Rate limited key={} method={} path={}", identity.key_id, method, path);
        return with_rate_limit_headers(
            ApiError::new(ApiErrorKind::RateLimited).into_response(),
            &quota,
        );
    }

    let key_id = identity.key_id.clone();
    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(quota);

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            log::error!(
                "Unhandled panic in API handler key={} method={} path={}: {}",
                key_id, method, path, panic_message(panic.as_ref())
            );
            ApiError::internal().into_response()
        }
    };

    log::info!(
        "AUDIT key={} method={} path={} status={}",
        key_id, method, path, response.status().as_u16()
    );

    with_rate_limit_headers(response, &quota)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_keys::{generate_api_key, ApiCredential, CredentialStore, InMemoryCredentialStore};
    use crate::config::GatewayConfig;
    use crate::gate::response::{api_success, HEADER_RATE_LIMIT_REMAINING};
    use crate::gate::AuthenticatedKey;
    use crate::usage::UsageWriter;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Extension, Router};
    use tower::ServiceExt;

    async fn whoami(Extension(key): Extension<AuthenticatedKey>) -> Response {
        api_success(serde_json::json!({ "user_id": key.user_id }))
    }

    async fn explode() -> Response {
        panic!("handler blew up");
    }

    async fn plain_text() -> (StatusCode, &'static str) {
        (StatusCode::BAD_REQUEST, "Failed to deserialize query string")
    }

    async fn setup(perms: &[&str]) -> (Router, String) {
        let store = Arc::new(InMemoryCredentialStore::new());
        let key = generate_api_key();
        store
            .insert(ApiCredential::new(
                "user-9",
                "test",
                key.hash,
                perms.iter().map(|p| p.to_string()).collect(),
                None,
            ))
            .await
            .unwrap();
        let (usage, _rx) = UsageWriter::channel();
        let gate = Arc::new(ApiGate::new(&GatewayConfig::default(), store, usage));
        let guard = RouteGuard::new(gate, &[Permission::Read]);
        let router = Router::new()
            .route("/whoami", get(whoami))
            .route("/explode", get(explode))
            .route("/plain", get(plain_text))
            .route_layer(from_fn_with_state(guard, api_gate_middleware));
        (router, key.raw)
    }

    fn request(uri: &str, token: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {}", t));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn authenticated_request_reaches_handler() {
        let (router, raw) = setup(&["read"]).await;
        let response = router.oneshot(request("/whoami", Some(&raw))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADER_RATE_LIMIT_REMAINING], "59");
    }

    #[tokio::test]
    async fn unauthenticated_carries_pre_auth_headers() {
        let (router, _) = setup(&["read"]).await;
        let response = router.oneshot(request("/whoami", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[HEADER_RATE_LIMIT_REMAINING], "119");
    }

    #[tokio::test]
    async fn missing_capability_is_forbidden() {
        let (router, raw) = setup(&["write"]).await;
        let response = router.oneshot(request("/whoami", Some(&raw))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let (router, raw) = setup(&["read"]).await;
        let response = router.oneshot(request("/explode", Some(&raw))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[HEADER_RATE_LIMIT_REMAINING], "59");
        assert_eq!(response.headers()["cache-control"], "no-store");
    }

    #[tokio::test]
    async fn handler_built_responses_get_security_headers() {
        let (router, raw) = setup(&["read"]).await;
        let response = router.oneshot(request("/plain", Some(&raw))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()[HEADER_RATE_LIMIT_REMAINING], "59");
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
