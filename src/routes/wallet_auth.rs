//! Wallet sign-in: challenge issuance, registration and login.
//!
//! These routes are public and hand out API keys, so every call is charged
//! against the auth-endpoint limiter for the client address, and every
//! response carries that tier's rate-limit headers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::accounts::Profile;
use crate::api_keys::keys::to_hex;
use crate::api_keys::{generate_api_key, ApiCredential};
use crate::error::GateError;
use crate::gate::response::{api_success, with_rate_limit_headers};
use crate::gate::{client_address, ApiError, ApiErrorKind, Permission, RateLimitStatus};
use crate::wallet::{build_auth_message, canonical_wallet, verify_wallet_signature, ChallengePurpose};
use crate::AppState;

pub const CHALLENGE_TTL_MINUTES: i64 = 10;
pub const WALLET_KEY_TTL_DAYS: i64 = 30;
pub const MAX_ACTIVE_KEYS: usize = 10;

const NONCE_BYTES: usize = 32;
const MAX_SIGNATURE_LEN: usize = 200;
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub wallet: String,
    pub purpose: ChallengePurpose,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub wallet: String,
    pub signature: String,
    pub nonce: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub wallet: String,
    pub signature: String,
    pub nonce: String,
    pub key_name: Option<String>,
}

/// `POST /api/v1/auth/challenge`
pub async fn challenge(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    limited(&state, &headers, issue_challenge(&state, &body)).await
}

/// `POST /api/v1/auth/register`
pub async fn register(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    limited(&state, &headers, register_wallet(&state, &body)).await
}

/// `POST /api/v1/auth/login`
pub async fn login(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    limited(&state, &headers, login_wallet(&state, &body)).await
}

/// Charge the auth tier, then run `handler` only if a token was available.
async fn limited<F>(state: &AppState, headers: &HeaderMap, handler: F) -> Response
where
    F: std::future::Future<Output = Result<Response, ApiError>>,
{
    let address = client_address(headers);
    let limit: RateLimitStatus = state.gate.auth_endpoints.check(&format!("auth:{}", address));
    if !limit.allowed {
        log::warn!("Rate limited (auth endpoints) ip={}", address);
        return with_rate_limit_headers(ApiError::new(ApiErrorKind::RateLimited).into_response(), &limit);
    }
    let response = handler.await.unwrap_or_else(IntoResponse::into_response);
    with_rate_limit_headers(response, &limit)
}

fn check_wallet(wallet: &str) -> Result<(), ApiError> {
    if canonical_wallet(wallet).is_none() {
        return Err(ApiError::bad_request("Invalid Solana wallet address"));
    }
    Ok(())
}

fn check_signed_fields(wallet: &str, signature: &str, nonce: &str) -> Result<(), ApiError> {
    check_wallet(wallet)?;
    if signature.is_empty() || signature.len() > MAX_SIGNATURE_LEN {
        return Err(ApiError::bad_request("Field 'signature' must be 1-200 characters"));
    }
    let nonce_ok = nonce.len() == NONCE_BYTES * 2
        && nonce.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !nonce_ok {
        return Err(ApiError::bad_request("nonce must be 64-char lowercase hex"));
    }
    Ok(())
}

fn check_optional_name(field: &str, value: Option<&str>) -> Result<(), ApiError> {
    match value {
        Some(v) if v.is_empty() || v.chars().count() > MAX_NAME_LEN => Err(ApiError::bad_request(
            format!("Field '{}' must be 1-{} characters", field, MAX_NAME_LEN),
        )),
        _ => Ok(()),
    }
}

/// Verify the signature over the message for `purpose`, then consume the
/// challenge. A bad signature leaves the challenge in place.
async fn verify_and_consume(
    state: &AppState,
    wallet: &str,
    signature: &str,
    nonce: &str,
    purpose: ChallengePurpose,
) -> Result<(), ApiError> {
    let message = build_auth_message(wallet, nonce, purpose);
    if let Err(e) = verify_wallet_signature(wallet, &message, signature) {
        log::warn!("Wallet {} failed: wallet={} reason={}", purpose, wallet, e);
        return Err(ApiError::bad_request("Signature verification failed"));
    }

    let consumed = state
        .accounts
        .consume_challenge(wallet, nonce, purpose, Utc::now())
        .await?;
    if !consumed {
        return Err(ApiError::bad_request(
            "Challenge not found, expired, or already used. Request a new challenge.",
        ));
    }
    Ok(())
}

fn wallet_credential(user_id: &str, name: &str) -> (ApiCredential, String) {
    let key = generate_api_key();
    let credential = ApiCredential::new(
        user_id,
        name,
        key.hash,
        vec![
            Permission::Read.as_str().to_string(),
            Permission::Write.as_str().to_string(),
        ],
        Some(Utc::now() + Duration::days(WALLET_KEY_TTL_DAYS)),
    );
    (credential, key.raw)
}

async fn issue_challenge(state: &AppState, body: &Bytes) -> Result<Response, ApiError> {
    let req: ChallengeRequest = super::parse_body(body)?;
    check_wallet(&req.wallet)?;

    let registered = state.accounts.find_by_wallet(&req.wallet).await?.is_some();
    match req.purpose {
        ChallengePurpose::Register if registered => {
            return Err(ApiError::with_detail(
                ApiErrorKind::Conflict,
                "Wallet already registered. Use login instead.",
            ));
        }
        ChallengePurpose::Login if !registered => {
            return Err(ApiError::with_detail(
                ApiErrorKind::NotFound,
                "Wallet not registered. Use register first.",
            ));
        }
        _ => {}
    }

    let mut bytes = [0u8; NONCE_BYTES];
    rand::rng().fill(&mut bytes);
    let nonce = to_hex(&bytes);
    let expires_at = Utc::now() + Duration::minutes(CHALLENGE_TTL_MINUTES);

    state
        .accounts
        .upsert_challenge(&req.wallet, &nonce, req.purpose, expires_at)
        .await?;

    let message = build_auth_message(&req.wallet, &nonce, req.purpose);
    Ok(api_success(serde_json::json!({
        "nonce": nonce,
        "message": message,
        "expires_at": expires_at,
    })))
}

async fn register_wallet(state: &AppState, body: &Bytes) -> Result<Response, ApiError> {
    let req: RegisterRequest = super::parse_body(body)?;
    check_signed_fields(&req.wallet, &req.signature, &req.nonce)?;
    check_optional_name("display_name", req.display_name.as_deref())?;

    verify_and_consume(state, &req.wallet, &req.signature, &req.nonce, ChallengePurpose::Register).await?;

    let profile = Profile::for_wallet(&req.wallet, req.display_name.as_deref());
    match state.accounts.create_profile(profile.clone()).await {
        Ok(()) => {}
        Err(GateError::Conflict(_)) => {
            return Err(ApiError::with_detail(
                ApiErrorKind::Conflict,
                "Wallet already registered. Use login instead.",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    let (credential, raw) = wallet_credential(&profile.id, "auto-provisioned");
    if let Err(e) = state.credentials.insert(credential).await {
        log::error!("Key issuance failed for new profile {}, rolling back: {}", profile.id, e);
        if let Err(del) = state.accounts.delete_profile(&profile.id).await {
            log::error!("Rollback of profile {} failed: {}", profile.id, del);
        }
        return Err(ApiError::with_detail(
            ApiErrorKind::InternalError,
            "Registration failed. Please try again.",
        ));
    }

    log::info!("AUDIT user={} action=agent.registered wallet={}", profile.id, req.wallet);
    Ok(api_success(serde_json::json!({
        "api_key": raw,
        "user_id": profile.id,
        "wallet": req.wallet,
    })))
}

async fn login_wallet(state: &AppState, body: &Bytes) -> Result<Response, ApiError> {
    let req: LoginRequest = super::parse_body(body)?;
    check_signed_fields(&req.wallet, &req.signature, &req.nonce)?;
    check_optional_name("key_name", req.key_name.as_deref())?;

    verify_and_consume(state, &req.wallet, &req.signature, &req.nonce, ChallengePurpose::Login).await?;

    let Some(profile) = state.accounts.find_by_wallet(&req.wallet).await? else {
        log::error!("Profile missing after login challenge was consumed: wallet={}", req.wallet);
        return Err(ApiError::with_detail(
            ApiErrorKind::InternalError,
            "Account not found. Contact support.",
        ));
    };

    let active = state
        .credentials
        .count_active_for_user(&profile.id, Utc::now())
        .await?;
    if active >= MAX_ACTIVE_KEYS {
        return Err(ApiError::bad_request(
            "Too many active API keys (max 10). Revoke unused keys first.",
        ));
    }

    let name = req.key_name.as_deref().unwrap_or("wallet-login");
    let (credential, raw) = wallet_credential(&profile.id, name);
    state.credentials.insert(credential).await?;

    log::info!("AUDIT user={} action=agent.login wallet={}", profile.id, req.wallet);
    Ok(api_success(serde_json::json!({
        "api_key": raw,
        "user_id": profile.id,
        "wallet": req.wallet,
    })))
}
