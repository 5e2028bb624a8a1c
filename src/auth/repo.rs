use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Moderators and admins may mutate the catalog.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }
}

/// User record in the database.
///
/// `password_hash` is NULL for accounts created through OAuth and is never
/// serialized to clients.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub fullname: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    pub is_active: bool,
    pub oauth_id: Option<String>,
    pub oauth_provider: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Profile data an OAuth provider vouched for, ready to persist.
#[derive(Debug)]
pub struct NewOAuthUser {
    pub email: String,
    pub fullname: String,
    pub oauth_id: String,
    pub oauth_provider: String,
    pub avatar_url: Option<String>,
}

const USER_COLUMNS: &str = "id, email, fullname, password_hash, role, is_verified, is_active, \
                            oauth_id, oauth_provider, avatar_url, created_at, updated_at";

impl User {
    /// Find a user by email. This is the login query, so unlike the records
    /// handed to clients it carries the hash column.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by the (provider subject id, email) pair.
    pub async fn find_by_oauth(
        db: &PgPool,
        oauth_id: &str,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE oauth_id = $1 AND email = $2"
        ))
        .bind(oauth_id)
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a password-backed user. The plaintext is hashed here, right
    /// before the insert; nothing else ever persists a password field.
    pub async fn create_local(
        db: &PgPool,
        email: &str,
        fullname: &str,
        plain_password: &str,
    ) -> anyhow::Result<User> {
        let hash = password::hash_password(plain_password).await?;
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, fullname, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(fullname)
        .bind(&hash)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Create a user from a verified OAuth profile: no local password,
    /// pre-verified.
    pub async fn create_oauth(db: &PgPool, new_user: &NewOAuthUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, fullname, oauth_id, oauth_provider, avatar_url, is_verified) \
             VALUES ($1, $2, $3, $4, $5, TRUE) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new_user.email)
        .bind(&new_user.fullname)
        .bind(&new_user.oauth_id)
        .bind(&new_user.oauth_provider)
        .bind(&new_user.avatar_url)
        .fetch_one(db)
        .await?;
        Ok(user)
    }
}
