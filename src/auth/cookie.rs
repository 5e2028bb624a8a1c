use axum_extra::extract::cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};

/// Name of the HTTP-only cookie carrying the session JWT.
pub const SESSION_COOKIE: &str = "laptomania_session";

/// Name of the short-lived cookie mirroring the OAuth `state` parameter.
pub const OAUTH_STATE_COOKIE: &str = "laptomania_oauth_state";

const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// Build the session cookie. The client never reads it: HTTP-only, scoped
/// to the whole site, Secure in production. Password login sets it Lax;
/// the OAuth callback sets it SameSite=None because the browser arrives on
/// a cross-site redirect from the provider.
pub fn session_cookie(
    token: String,
    ttl_days: i64,
    secure: bool,
    same_site: SameSite,
) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(same_site)
        .max_age(Duration::days(ttl_days))
        .build()
}

/// State cookie set alongside the redirect to the provider's consent
/// screen. Lax is enough: the callback is a top-level GET navigation.
pub fn oauth_state_cookie(state: String, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, state))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::minutes(OAUTH_STATE_TTL_MINUTES))
        .build()
}

/// Removal cookie for the state value once the callback has consumed it.
pub fn expired_oauth_state_cookie() -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, ""))
        .path("/")
        .http_only(true)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}
