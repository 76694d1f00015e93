use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use constant_time_eq::constant_time_eq;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::model::Ms;

/// Connection-level gate: every client must present the server password at
/// pgwire startup. Application identity is established afterwards with the
/// LOGIN/AUTH verbs.
#[derive(Debug)]
pub struct ServerAuthSource {
    password: String,
}

impl ServerAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ServerAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Bearer tokens ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub ttl_secs: i64,
}

/// Claims carried by a bearer token. `sub` is the user ULID; `tenant` binds
/// the token to the database it was issued for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub tenant: String,
    pub iat: i64,
    pub exp: i64,
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Sign a token for `user_id`. Returns the token and its expiry in Unix ms.
pub fn issue_token(
    cfg: &TokenConfig,
    user_id: Ulid,
    tenant: &str,
) -> Result<(String, Ms), jsonwebtoken::errors::Error> {
    let iat = now_secs();
    let exp = iat + cfg.ttl_secs;
    let claims = TokenClaims {
        sub: user_id.to_string(),
        tenant: tenant.to_string(),
        iat,
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )?;
    Ok((token, exp * 1000))
}

/// Validate signature and expiry; the caller still has to check the tenant
/// claim and that `sub` resolves to a live account.
pub fn verify_token(
    cfg: &TokenConfig,
    token: &str,
) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

// ── Password storage ─────────────────────────────────────────────
//
// Stored form: base64(salt) '$' base64(sha256(salt || password)).

fn salted_digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let digest = salted_digest(&salt, password);
    format!("{}${}", B64.encode(salt), B64.encode(digest))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_b64, digest_b64)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = B64.decode(salt_b64) else {
        return false;
    };
    let Ok(digest) = B64.decode(digest_b64) else {
        return false;
    };
    constant_time_eq(&salted_digest(&salt, password), &digest)
}
