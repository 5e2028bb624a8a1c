use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use crate::auth::cookie::SESSION_COOKIE;
use crate::auth::jwt::JwtKeys;
use crate::auth::repo::Role;
use crate::error::ApiError;

/// Authenticated caller, resolved from the session cookie or an
/// `Authorization: Bearer` header for non-browser clients.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Not logged in".to_string()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(&token).map_err(|err| {
            warn!(error = %err, "session token rejected");
            ApiError::Unauthorized("Invalid or expired token".to_string())
        })?;

        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}

/// Cookie first, `Authorization` header as fallback.
fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// Catalog writes require a moderator or admin. The check lives on the
/// server even though the client hides the controls from plain users.
#[derive(Debug, Clone)]
pub struct StaffUser(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_staff() {
            warn!(user_id = %user.id, role = user.role.as_str(), "catalog write denied");
            return Err(ApiError::Forbidden(
                "Moderator or admin role required".to_string(),
            ));
        }
        Ok(StaffUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/laptops");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(()).expect("request builds");
        request.into_parts().0
    }

    #[test]
    fn reads_token_from_session_cookie() {
        let parts = parts_with_headers(&[("cookie", "laptomania_session=abc.def.ghi")]);
        assert_eq!(session_token(&parts).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn falls_back_to_authorization_header() {
        let parts = parts_with_headers(&[("authorization", "Bearer xyz.123")]);
        assert_eq!(session_token(&parts).as_deref(), Some("xyz.123"));
    }

    #[test]
    fn cookie_wins_over_header() {
        let parts = parts_with_headers(&[
            ("cookie", "laptomania_session=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(session_token(&parts).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn missing_credentials_yield_none() {
        let parts = parts_with_headers(&[]);
        assert_eq!(session_token(&parts), None);

        let parts = parts_with_headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert_eq!(session_token(&parts), None);
    }

    #[test]
    fn ignores_unrelated_cookies() {
        let parts = parts_with_headers(&[("cookie", "theme=dark; lang=en")]);
        assert_eq!(session_token(&parts), None);
    }
}
