//! HTTP surface: the versioned REST API mounted under `/api`.

pub mod categories;
pub mod keys;
pub mod wallet_auth;

use axum::{
    body::Bytes,
    extract::DefaultBodyLimit,
    middleware::{from_fn_with_state, map_response},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};

use crate::gate::response::into_api_envelope;
use crate::gate::{api_gate_middleware, ApiError, ApiErrorKind, Permission, RouteGuard};
use crate::AppState;

/// Request bodies on this API are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let read_routes = Router::new()
        .route("/v1/categories", get(categories::list_categories))
        .route_layer(from_fn_with_state(
            RouteGuard::new(state.gate.clone(), &[Permission::Read]),
            api_gate_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/v1/keys",
            get(keys::list_keys)
                .post(keys::create_key)
                .delete(keys::delete_key),
        )
        .route_layer(from_fn_with_state(
            RouteGuard::new(state.gate.clone(), &[Permission::Admin]),
            api_gate_middleware,
        ));

    // Public: these issue keys, so they are limited per client address instead
    let wallet_routes = Router::new()
        .route("/v1/auth/challenge", post(wallet_auth::challenge))
        .route("/v1/auth/register", post(wallet_auth::register))
        .route("/v1/auth/login", post(wallet_auth::login));

    let api = Router::new()
        .merge(read_routes)
        .merge(admin_routes)
        .merge(wallet_routes);

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(map_response(shape_response))
        .layer(cors)
        .with_state(state)
}

async fn not_found() -> Response {
    ApiError::new(ApiErrorKind::NotFound).into_response()
}

/// Method mismatches and body-limit rejections are produced by axum itself.
async fn shape_response(response: Response) -> Response {
    into_api_envelope(response)
}

/// Parse a JSON request body, mapping syntax errors to `Invalid JSON body`
/// and shape errors to `Invalid request body`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request("Invalid JSON body"))?;
    serde_json::from_value(value).map_err(|e| {
        log::debug!("Rejected request body: {}", e);
        ApiError::bad_request("Invalid request body")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    #[test]
    fn body_errors_are_distinguished() {
        let err = parse_body::<Named>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.detail.as_deref(), Some("Invalid JSON body"));

        let err = parse_body::<Named>(&Bytes::from_static(br#"{"name": 5}"#)).unwrap_err();
        assert_eq!(err.detail.as_deref(), Some("Invalid request body"));

        let ok = parse_body::<Named>(&Bytes::from_static(br#"{"name": "x"}"#)).unwrap();
        assert_eq!(ok.name, "x");
    }
}
