use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        cookie::session_cookie,
        dto::{LoginRequest, MessageResponse, SignupRequest},
        jwt::JwtKeys,
        password,
        repo::User,
    },
    error::{is_unique_violation, ApiError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    payload.fullname = payload.fullname.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "signup with invalid email");
        return Err(ApiError::Validation(
            "Please provide a valid email address".to_string(),
        ));
    }

    if payload.fullname.is_empty() {
        warn!("signup with empty fullname");
        return Err(ApiError::Validation("Fullname is required".to_string()));
    }

    let min = state.config.password_min_len;
    let max = state.config.password_max_len;
    let len = payload.password.chars().count();
    if len < min || len > max {
        warn!(len, "signup password outside allowed length");
        return Err(ApiError::Validation(format!(
            "Password must be between {min} and {max} characters"
        )));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "signup email already registered");
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let user = User::create_local(&state.db, &payload.email, &payload.fullname, &payload.password)
        .await
        .map_err(|err| {
            // Concurrent signup can still trip the unique index after the
            // pre-check passed; report it the same way.
            if is_unique_violation(&err) {
                ApiError::Conflict("Email already registered".to_string())
            } else {
                ApiError::Internal(err)
            }
        })?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User created successfully")),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<User>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    let found = User::find_by_email(&state.db, &payload.email).await?;
    let user = verify_login(found, &payload.password).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, user.role)?;
    let cookie = session_cookie(
        token,
        state.config.jwt.session_ttl_days,
        state.config.cookie_secure(),
        SameSite::Lax,
    );

    info!(user_id = %user.id, "user logged in");
    Ok((jar.add(cookie), Json(user)))
}

/// Checks the lookup result against the supplied password. Unknown email,
/// OAuth-only account and wrong password all share one answer so the
/// endpoint cannot be used to enumerate accounts.
async fn verify_login(found: Option<User>, plain_password: &str) -> Result<User, ApiError> {
    let rejected = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = match found {
        Some(user) => user,
        None => {
            warn!("login with unknown email");
            return Err(rejected());
        }
    };

    let Some(hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "password login against oauth-only account");
        return Err(rejected());
    };

    if !password::verify_password(plain_password, hash).await? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(rejected());
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::Role;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn stored_user(password_hash: Option<String>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            fullname: "ada lovelace".into(),
            password_hash,
            role: Role::User,
            is_verified: true,
            is_active: true,
            oauth_id: None,
            oauth_provider: None,
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn login_failures_share_one_answer() {
        let hash = password::hash_password("hunter2!").await.expect("hash");

        let unknown_email = verify_login(None, "hunter2!").await.unwrap_err();
        let oauth_only = verify_login(Some(stored_user(None)), "hunter2!")
            .await
            .unwrap_err();
        let wrong_password = verify_login(Some(stored_user(Some(hash))), "letmein")
            .await
            .unwrap_err();

        for err in [unknown_email, oauth_only, wrong_password] {
            assert!(
                matches!(&err, ApiError::Unauthorized(msg) if msg == "Invalid email or password"),
                "expected the shared rejection, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn login_passes_with_the_right_password() {
        let hash = password::hash_password("hunter2!").await.expect("hash");
        let user = verify_login(Some(stored_user(Some(hash))), "hunter2!")
            .await
            .expect("credentials should check out");
        assert_eq!(user.email, "ada@example.com");
    }

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+tag@mail.co"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("nodomain@"));
        assert!(!is_valid_email("notld@example"));
    }

    #[test]
    fn message_response_serializes() {
        let response = MessageResponse::new("User created successfully");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"message":"User created successfully"}"#);
    }
}
