use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use sqlx::Row;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::app::users::{user_from_row, USER_COLUMNS};
use crate::domain::user::{Role, User};
use crate::infra::db::Db;

const TOKEN_ISSUER: &str = "assembly-portal";
const TOKEN_TYPE_CLAIM: &str = "typ";
const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct AuthService {
    db: Db,
    tokens: AccessTokens,
}

impl AuthService {
    pub fn new(db: Db, access_key: [u8; 32], access_ttl_minutes: u64) -> Self {
        Self {
            db,
            tokens: AccessTokens {
                key: access_key,
                ttl_minutes: access_ttl_minutes,
            },
        }
    }

    pub async fn register(&self, name: String, email: String, password: String) -> Result<User> {
        let password_hash = hash_password(&password)?;
        let row = sqlx::query(&format!(
            "INSERT INTO users (name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(name.trim())
        .bind(email.trim().to_lowercase())
        .bind(password_hash)
        .bind(Role::User.as_db())
        .fetch_one(self.db.pool())
        .await?;

        user_from_row(&row)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {}, password_hash FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(self.db.pool())
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let password_hash: String = row.get("password_hash");
        if password_hash.is_empty() || !verify_password(password, &password_hash)? {
            return Ok(None);
        }

        Ok(Some(user_from_row(&row)?))
    }

    /// Replaces the password when `current` matches. Returns false on mismatch or unknown user.
    pub async fn change_password(&self, user_id: Uuid, current: &str, new: &str) -> Result<bool> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(self.db.pool())
                .await?;

        let stored = match stored {
            Some(stored) => stored,
            None => return Ok(false),
        };
        if !verify_password(current, &stored)? {
            return Ok(false);
        }

        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hash_password(new)?)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<AccessToken> {
        self.tokens.issue(user_id)
    }

    pub async fn authenticate_access_token(&self, token: &str) -> Result<Option<AuthSession>> {
        Ok(self
            .tokens
            .verify(token)?
            .map(|user_id| AuthSession { user_id }))
    }
}

/// PASETO v4.local bearer tokens carrying the user id as subject.
#[derive(Clone)]
struct AccessTokens {
    key: [u8; 32],
    ttl_minutes: u64,
}

impl AccessTokens {
    fn issue(&self, user_id: Uuid) -> Result<AccessToken> {
        let ttl = std::time::Duration::from_secs(self.ttl_minutes * 60);
        let mut claims = Claims::new_expires_in(&ttl)?;
        claims.issuer(TOKEN_ISSUER)?;
        claims.audience(TOKEN_ISSUER)?;
        claims.subject(&user_id.to_string())?;
        claims.add_additional(TOKEN_TYPE_CLAIM, ACCESS_TOKEN_TYPE)?;

        let key = SymmetricKey::<V4>::from(&self.key)?;
        let token = local::encrypt(&key, &claims, None, None)?;
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(self.ttl_minutes as i64);
        Ok(AccessToken { token, expires_at })
    }

    /// The subject of a valid, unexpired access token. Tokens that fail to decrypt or
    /// validate are `None`; only a malformed subject of an otherwise valid token is an error.
    fn verify(&self, token: &str) -> Result<Option<Uuid>> {
        let key = SymmetricKey::<V4>::from(&self.key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);
        rules.validate_audience_with(TOKEN_ISSUER);

        let Ok(untrusted) = UntrustedToken::<Local, V4>::try_from(token) else {
            return Ok(None);
        };
        let Ok(trusted) = local::decrypt(&key, &untrusted, &rules, None, None) else {
            return Ok(None);
        };
        let Some(claims) = trusted.payload_claims() else {
            return Ok(None);
        };

        let token_type = claims.get_claim(TOKEN_TYPE_CLAIM).and_then(|value| value.as_str());
        if token_type != Some(ACCESS_TOKEN_TYPE) {
            return Ok(None);
        }

        let subject = claims
            .get_claim("sub")
            .and_then(|value| value.as_str())
            .ok_or_else(|| anyhow!("access token has no subject"))?;
        Ok(Some(Uuid::parse_str(subject)?))
    }
}

pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
