use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use examhub_core::CurrentUser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub roles: Vec<String>,
}

/// Claims read from a bearer token's payload segment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl JwtClaims {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp <= now.timestamp(),
            None => false,
        }
    }

    pub fn user(&self) -> CurrentUser {
        CurrentUser {
            username: self.sub.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Decodes the payload of a JWT without checking its signature.
///
/// The server remains the authority on the token; this only answers
/// "who is logged in" and "has it visibly expired".
pub fn decode_claims(token: &str) -> Option<JwtClaims> {
    let payload = token.split('.').nth(1)?;
    // 兼容带 padding 的实现
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// A token is usable when it decodes and its `exp` lies in the future.
pub fn token_is_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    decode_claims(token).is_some_and(|claims| !claims.is_expired_at(now))
}

/// Source of the current credential.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    fn current_user(&self) -> Option<CurrentUser> {
        self.token()
            .and_then(|token| decode_claims(&token))
            .map(|claims| claims.user())
    }

    fn is_token_valid(&self) -> bool {
        self.token()
            .is_some_and(|token| token_is_valid_at(&token, Utc::now()))
    }

    /// Called when the server rejected the token (HTTP 401).
    fn invalidate(&self) {}
}

/// Fixed credential, mostly useful for tests and one-shot tools.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}
