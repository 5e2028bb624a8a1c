use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::{
    extract::{FromRef, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{CookieJar, SameSite};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        cookie::{
            expired_oauth_state_cookie, oauth_state_cookie, session_cookie, OAUTH_STATE_COOKIE,
        },
        jwt::JwtKeys,
        repo::{NewOAuthUser, User},
    },
    config::GoogleConfig,
    error::ApiError,
    state::AppState,
};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Google calls are bounded; a stuck provider becomes a normal failure
/// instead of a hung request.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/google", get(authorize))
        .route("/oauth/google/callback", get(callback))
}

fn oauth_client(google: &GoogleConfig) -> anyhow::Result<BasicClient> {
    let client = BasicClient::new(
        ClientId::new(google.client_id.clone()),
        Some(ClientSecret::new(google.client_secret.clone())),
        AuthUrl::new(GOOGLE_AUTH_URL.to_string()).context("google auth url")?,
        Some(TokenUrl::new(GOOGLE_TOKEN_URL.to_string()).context("google token url")?),
    )
    .set_redirect_uri(
        RedirectUrl::new(google.redirect_uri.clone()).context("google redirect uri")?,
    );
    Ok(client)
}

fn authorize_url(google: &GoogleConfig) -> anyhow::Result<(String, CsrfToken)> {
    let client = oauth_client(google)?;
    let (url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("email".to_string()))
        .add_scope(Scope::new("profile".to_string()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();
    Ok((url.to_string(), csrf_token))
}

/// Profile returned by Google's v3 userinfo endpoint.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Error)]
enum CallbackError {
    #[error("Google account not verified")]
    UnverifiedEmail,
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Sends the browser to Google's consent screen, pinning the generated
/// state in a short-lived cookie for the callback to check.
#[instrument(skip(state, jar))]
pub async fn authorize(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let (url, csrf_token) = authorize_url(&state.config.google)?;
    let jar = jar.add(oauth_state_cookie(
        csrf_token.secret().clone(),
        state.config.cookie_secure(),
    ));
    info!("redirecting to google consent screen");
    Ok((jar, Redirect::to(&url)))
}

/// Completes the code-for-token exchange. Provider-side failures bounce
/// the browser back to the login page with `?error=oauth_failed`; an
/// unverified Google account is the one case reported as a plain 400.
#[instrument(skip(state, jar, params))]
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let pinned_state = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|cookie| cookie.value().to_string());
    let jar = jar.add(expired_oauth_state_cookie());

    match run_callback(&state, &params, pinned_state.as_deref()).await {
        Ok(user) => {
            let keys = JwtKeys::from_ref(&state);
            let token = keys.sign(user.id, user.role)?;
            // SameSite=None because the browser lands here from Google's
            // origin, not ours.
            let cookie = session_cookie(
                token,
                state.config.jwt.session_ttl_days,
                state.config.cookie_secure(),
                SameSite::None,
            );
            info!(user_id = %user.id, "google login completed");
            Ok((jar.add(cookie), Redirect::to(&state.config.panel_url())).into_response())
        }
        Err(CallbackError::UnverifiedEmail) => {
            warn!("google account email not verified");
            Ok(unverified_response(jar))
        }
        Err(CallbackError::Provider(err)) => {
            error!(error = %err, "google oauth exchange failed");
            Ok((jar, Redirect::to(&state.config.login_error_url())).into_response())
        }
    }
}

/// 400 for the unverified-account case. The jar rides along so the
/// state-cookie removal still reaches the browser on this exit.
fn unverified_response(jar: CookieJar) -> Response {
    (
        jar,
        ApiError::Validation("Google account not verified".to_string()),
    )
        .into_response()
}

async fn run_callback(
    state: &AppState,
    params: &CallbackParams,
    pinned_state: Option<&str>,
) -> Result<User, CallbackError> {
    let code = params
        .code
        .as_deref()
        .ok_or_else(|| anyhow!("callback missing code parameter"))?;
    verify_state(params, pinned_state)?;

    let access_token = exchange_code(&state.config.google, code).await?;
    let info = fetch_userinfo(&access_token).await?;
    resolve_user(&state.db, info).await
}

/// The state echoed by Google has to match what we pinned before the
/// redirect; anything else is a forged or replayed callback.
fn verify_state(params: &CallbackParams, pinned: Option<&str>) -> Result<(), CallbackError> {
    let echoed = params
        .state
        .as_deref()
        .ok_or_else(|| anyhow!("callback missing state parameter"))?;
    let pinned = pinned.ok_or_else(|| anyhow!("state cookie missing or expired"))?;
    if echoed != pinned {
        return Err(anyhow!("oauth state mismatch").into());
    }
    Ok(())
}

async fn exchange_code(google: &GoogleConfig, code: &str) -> anyhow::Result<String> {
    let client = oauth_client(google)?;
    let response = tokio::time::timeout(
        PROVIDER_TIMEOUT,
        client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(oauth2::reqwest::async_http_client),
    )
    .await
    .context("google token exchange timed out")?
    .context("google token exchange failed")?;

    Ok(response.access_token().secret().clone())
}

async fn fetch_userinfo(access_token: &str) -> anyhow::Result<GoogleUserInfo> {
    let client = reqwest::Client::new();
    let response = tokio::time::timeout(
        PROVIDER_TIMEOUT,
        client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send(),
    )
    .await
    .context("google userinfo timed out")?
    .context("google userinfo request failed")?;

    if !response.status().is_success() {
        return Err(anyhow!("google userinfo returned {}", response.status()));
    }
    response
        .json::<GoogleUserInfo>()
        .await
        .context("google userinfo body")
}

/// Looks the account up by (sub, email); first-time visitors get a row
/// created, but only when Google vouches for the address.
async fn resolve_user(db: &PgPool, info: GoogleUserInfo) -> Result<User, CallbackError> {
    let email = info.email.trim().to_lowercase();

    if let Some(user) = User::find_by_oauth(db, &info.sub, &email).await? {
        return Ok(user);
    }

    let new_user = first_login_profile(info, email)?;
    let user = User::create_oauth(db, &new_user).await?;
    info!(user_id = %user.id, "created user from google profile");
    Ok(user)
}

/// Builds the row for a first-time visitor. Rejects before anything can be
/// persisted unless Google vouches for the address.
fn first_login_profile(
    info: GoogleUserInfo,
    email: String,
) -> Result<NewOAuthUser, CallbackError> {
    if !info.email_verified {
        return Err(CallbackError::UnverifiedEmail);
    }

    let fullname = info
        .name
        .ok_or_else(|| anyhow!("google profile missing name"))?
        .trim()
        .to_lowercase();

    Ok(NewOAuthUser {
        email,
        fullname,
        oauth_id: info.sub,
        oauth_provider: "google".to_string(),
        avatar_url: info.picture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google_config() -> GoogleConfig {
        GoogleConfig {
            client_id: "client-id-123".into(),
            client_secret: "client-secret".into(),
            redirect_uri: "http://localhost:8080/api/oauth/google/callback".into(),
        }
    }

    #[test]
    fn authorize_url_carries_expected_params() {
        let (url, csrf_token) = authorize_url(&google_config()).unwrap();

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=client-id-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains(&format!("state={}", csrf_token.secret())));
        assert!(!csrf_token.secret().is_empty());
    }

    #[test]
    fn authorize_urls_use_fresh_state() {
        let (_, first) = authorize_url(&google_config()).unwrap();
        let (_, second) = authorize_url(&google_config()).unwrap();
        assert_ne!(first.secret(), second.secret());
    }

    #[test]
    fn state_must_match_pinned_cookie() {
        let params = CallbackParams {
            code: Some("4/0AX4code".into()),
            state: Some("abc123".into()),
        };
        assert!(verify_state(&params, Some("abc123")).is_ok());
        assert!(verify_state(&params, Some("other")).is_err());
        assert!(verify_state(&params, None).is_err());

        let missing = CallbackParams {
            code: Some("4/0AX4code".into()),
            state: None,
        };
        assert!(verify_state(&missing, Some("abc123")).is_err());
    }

    #[test]
    fn userinfo_deserializes_full_profile() {
        let body = r#"{
            "sub": "1093843",
            "email": "Ada@Example.com",
            "email_verified": true,
            "name": "Ada Lovelace",
            "picture": "https://lh3.googleusercontent.com/a/photo"
        }"#;
        let info: GoogleUserInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.sub, "1093843");
        assert_eq!(info.email, "Ada@Example.com");
        assert!(info.email_verified);
        assert_eq!(info.name.as_deref(), Some("Ada Lovelace"));
        assert!(info.picture.is_some());
    }

    #[test]
    fn userinfo_defaults_missing_optional_fields() {
        let body = r#"{"sub": "42", "email": "x@y.dev"}"#;
        let info: GoogleUserInfo = serde_json::from_str(body).unwrap();
        assert!(!info.email_verified);
        assert!(info.name.is_none());
        assert!(info.picture.is_none());
    }

    fn first_timer(email_verified: bool) -> GoogleUserInfo {
        GoogleUserInfo {
            sub: "109384".into(),
            email: "New.Person@Gmail.com".into(),
            email_verified,
            name: Some("  New Person ".into()),
            picture: Some("https://lh3.googleusercontent.com/a/photo".into()),
        }
    }

    #[test]
    fn unverified_first_login_never_reaches_the_database() {
        // first_login_profile holds no connection, so an Err here proves no
        // row can have been created for the unverified address.
        let err = first_login_profile(first_timer(false), "new.person@gmail.com".into())
            .unwrap_err();
        assert!(matches!(err, CallbackError::UnverifiedEmail));
    }

    #[test]
    fn verified_first_login_builds_the_row() {
        let new_user =
            first_login_profile(first_timer(true), "new.person@gmail.com".into())
                .expect("verified profile should pass");
        assert_eq!(new_user.email, "new.person@gmail.com");
        assert_eq!(new_user.fullname, "new person");
        assert_eq!(new_user.oauth_id, "109384");
        assert_eq!(new_user.oauth_provider, "google");
        assert!(new_user.avatar_url.is_some());
    }

    #[test]
    fn first_login_requires_a_profile_name() {
        let mut info = first_timer(true);
        info.name = None;
        let err = first_login_profile(info, "new.person@gmail.com".into()).unwrap_err();
        assert!(matches!(err, CallbackError::Provider(_)));
    }

    #[test]
    fn unverified_response_still_clears_the_state_cookie() {
        use axum::http::{header, StatusCode};

        let jar = CookieJar::new().add(expired_oauth_state_cookie());
        let response = unverified_response(jar);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(set_cookie.starts_with(&format!("{OAUTH_STATE_COOKIE}=")));
        assert!(set_cookie.contains("1970"), "removal must expire in the past: {set_cookie}");
    }
}
